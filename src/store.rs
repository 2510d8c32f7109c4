use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::config::DuesConfig;
use crate::errors::{DuesError, Result};
use crate::obligation::MemberObligation;
use crate::payments::PaymentRecord;
use crate::plans::{InstallmentEligibility, InstallmentPayment, InstallmentPlan};
use crate::types::{ConfigId, ObligationId, PlanId, SavedPaymentMethod};

/// persistent-store boundary
///
/// implementations must provide read-after-write consistency on the row
/// being mutated, uniqueness for (member, config) and for one active plan
/// per obligation, and per-key serialization through the `with_*` closures
/// so operations on a single obligation never interleave while unrelated
/// obligations proceed concurrently
pub trait DuesStore: Send + Sync {
    // configurations
    fn insert_config(&self, config: DuesConfig) -> Result<()>;
    fn config(&self, config_id: ConfigId) -> Result<DuesConfig>;

    // obligations
    fn insert_obligation(&self, obligation: MemberObligation) -> Result<()>;
    fn obligation(&self, obligation_id: ObligationId) -> Result<MemberObligation>;
    fn find_obligation(
        &self,
        member_id: &str,
        config_id: ConfigId,
    ) -> Result<Option<MemberObligation>>;
    fn obligations_for_config(&self, config_id: ConfigId) -> Result<Vec<MemberObligation>>;
    /// run a mutation under the obligation's single-writer lock
    fn with_obligation<R, F>(&self, obligation_id: ObligationId, f: F) -> Result<R>
    where
        F: FnOnce(&mut MemberObligation) -> Result<R>,
        Self: Sized;
    /// administrative delete; rejected while payments or an active plan
    /// reference the obligation
    fn delete_obligation(&self, obligation_id: ObligationId) -> Result<()>;

    // installment eligibility
    fn upsert_eligibility(&self, eligibility: InstallmentEligibility) -> Result<()>;
    fn eligibility(&self, obligation_id: ObligationId) -> Result<Option<InstallmentEligibility>>;

    // installment plans
    /// persist a plan with its schedule rows atomically; fails with
    /// ActivePlanExists if the obligation already has an active plan
    fn insert_plan(
        &self,
        plan: InstallmentPlan,
        payments: Vec<InstallmentPayment>,
    ) -> Result<()>;
    fn plan(&self, plan_id: PlanId) -> Result<(InstallmentPlan, Vec<InstallmentPayment>)>;
    fn active_plan(&self, obligation_id: ObligationId) -> Result<Option<InstallmentPlan>>;
    /// run a mutation under the plan's single-writer lock
    fn with_plan<R, F>(&self, plan_id: PlanId, f: F) -> Result<R>
    where
        F: FnOnce(&mut InstallmentPlan, &mut Vec<InstallmentPayment>) -> Result<R>,
        Self: Sized;

    // payment audit rows
    fn insert_payment_record(&self, record: PaymentRecord) -> Result<()>;
    fn payments_for_obligation(&self, obligation_id: ObligationId) -> Result<Vec<PaymentRecord>>;

    // saved payment methods
    fn save_payment_method(&self, method: SavedPaymentMethod) -> Result<()>;
    fn saved_payment_method(&self, method_id: &str) -> Result<Option<SavedPaymentMethod>>;
}

#[derive(Debug)]
struct PlanRow {
    plan: InstallmentPlan,
    payments: Vec<InstallmentPayment>,
}

/// in-memory store
///
/// each obligation and plan sits behind its own mutex, so mutations on one
/// key serialize while different keys run in parallel
#[derive(Debug, Default)]
pub struct InMemoryStore {
    configs: RwLock<HashMap<ConfigId, DuesConfig>>,
    obligations: RwLock<HashMap<ObligationId, Arc<Mutex<MemberObligation>>>>,
    member_index: RwLock<HashMap<(String, ConfigId), ObligationId>>,
    eligibilities: RwLock<HashMap<ObligationId, InstallmentEligibility>>,
    plans: RwLock<HashMap<PlanId, Arc<Mutex<PlanRow>>>>,
    plan_index: RwLock<HashMap<ObligationId, PlanId>>,
    payment_records: RwLock<HashMap<ObligationId, Vec<PaymentRecord>>>,
    methods: RwLock<HashMap<String, SavedPaymentMethod>>,
}

const POISONED: &str = "store lock poisoned";

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn obligation_cell(&self, obligation_id: ObligationId) -> Result<Arc<Mutex<MemberObligation>>> {
        self.obligations
            .read()
            .map_err(|_| DuesError::store(POISONED))?
            .get(&obligation_id)
            .cloned()
            .ok_or(DuesError::NotFound {
                entity: "obligation",
                id: obligation_id.to_string(),
            })
    }

    fn plan_cell(&self, plan_id: PlanId) -> Result<Arc<Mutex<PlanRow>>> {
        self.plans
            .read()
            .map_err(|_| DuesError::store(POISONED))?
            .get(&plan_id)
            .cloned()
            .ok_or(DuesError::NotFound {
                entity: "plan",
                id: plan_id.to_string(),
            })
    }
}

impl DuesStore for InMemoryStore {
    fn insert_config(&self, config: DuesConfig) -> Result<()> {
        config.validate()?;
        self.configs
            .write()
            .map_err(|_| DuesError::store(POISONED))?
            .insert(config.config_id, config);
        Ok(())
    }

    fn config(&self, config_id: ConfigId) -> Result<DuesConfig> {
        self.configs
            .read()
            .map_err(|_| DuesError::store(POISONED))?
            .get(&config_id)
            .cloned()
            .ok_or(DuesError::NotFound {
                entity: "configuration",
                id: config_id.to_string(),
            })
    }

    fn insert_obligation(&self, obligation: MemberObligation) -> Result<()> {
        let key = (obligation.member_id.clone(), obligation.config_id);
        let mut index = self
            .member_index
            .write()
            .map_err(|_| DuesError::store(POISONED))?;
        if index.contains_key(&key) {
            return Err(DuesError::AlreadyAssigned {
                member_id: obligation.member_id,
                config_id: obligation.config_id,
            });
        }
        let id = obligation.obligation_id;
        self.obligations
            .write()
            .map_err(|_| DuesError::store(POISONED))?
            .insert(id, Arc::new(Mutex::new(obligation)));
        index.insert(key, id);
        Ok(())
    }

    fn obligation(&self, obligation_id: ObligationId) -> Result<MemberObligation> {
        let cell = self.obligation_cell(obligation_id)?;
        let guard = cell.lock().map_err(|_| DuesError::store(POISONED))?;
        Ok(guard.clone())
    }

    fn find_obligation(
        &self,
        member_id: &str,
        config_id: ConfigId,
    ) -> Result<Option<MemberObligation>> {
        let id = self
            .member_index
            .read()
            .map_err(|_| DuesError::store(POISONED))?
            .get(&(member_id.to_string(), config_id))
            .copied();
        match id {
            Some(id) => Ok(Some(self.obligation(id)?)),
            None => Ok(None),
        }
    }

    fn obligations_for_config(&self, config_id: ConfigId) -> Result<Vec<MemberObligation>> {
        let cells: Vec<Arc<Mutex<MemberObligation>>> = self
            .obligations
            .read()
            .map_err(|_| DuesError::store(POISONED))?
            .values()
            .cloned()
            .collect();
        let mut rows = Vec::new();
        for cell in cells {
            let guard = cell.lock().map_err(|_| DuesError::store(POISONED))?;
            if guard.config_id == config_id {
                rows.push(guard.clone());
            }
        }
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    fn with_obligation<R, F>(&self, obligation_id: ObligationId, f: F) -> Result<R>
    where
        F: FnOnce(&mut MemberObligation) -> Result<R>,
    {
        let cell = self.obligation_cell(obligation_id)?;
        let mut guard = cell.lock().map_err(|_| DuesError::store(POISONED))?;
        f(&mut guard)
    }

    fn delete_obligation(&self, obligation_id: ObligationId) -> Result<()> {
        let has_payments = self
            .payment_records
            .read()
            .map_err(|_| DuesError::store(POISONED))?
            .get(&obligation_id)
            .map(|rows| !rows.is_empty())
            .unwrap_or(false);
        if has_payments {
            return Err(DuesError::PaymentsExist { obligation_id });
        }
        if self.active_plan(obligation_id)?.is_some() {
            return Err(DuesError::ActivePlanExists { obligation_id });
        }

        let removed = self
            .obligations
            .write()
            .map_err(|_| DuesError::store(POISONED))?
            .remove(&obligation_id);
        let cell = removed.ok_or(DuesError::NotFound {
            entity: "obligation",
            id: obligation_id.to_string(),
        })?;
        let guard = cell.lock().map_err(|_| DuesError::store(POISONED))?;
        self.member_index
            .write()
            .map_err(|_| DuesError::store(POISONED))?
            .remove(&(guard.member_id.clone(), guard.config_id));
        self.eligibilities
            .write()
            .map_err(|_| DuesError::store(POISONED))?
            .remove(&obligation_id);
        Ok(())
    }

    fn upsert_eligibility(&self, eligibility: InstallmentEligibility) -> Result<()> {
        self.eligibilities
            .write()
            .map_err(|_| DuesError::store(POISONED))?
            .insert(eligibility.obligation_id, eligibility);
        Ok(())
    }

    fn eligibility(&self, obligation_id: ObligationId) -> Result<Option<InstallmentEligibility>> {
        Ok(self
            .eligibilities
            .read()
            .map_err(|_| DuesError::store(POISONED))?
            .get(&obligation_id)
            .cloned())
    }

    fn insert_plan(
        &self,
        plan: InstallmentPlan,
        payments: Vec<InstallmentPayment>,
    ) -> Result<()> {
        // hold the index write lock across the uniqueness check and the
        // insert, so two racing creations cannot both pass
        let mut index = self
            .plan_index
            .write()
            .map_err(|_| DuesError::store(POISONED))?;
        if let Some(existing_id) = index.get(&plan.obligation_id) {
            let cell = self.plan_cell(*existing_id)?;
            let guard = cell.lock().map_err(|_| DuesError::store(POISONED))?;
            if guard.plan.is_active() {
                return Err(DuesError::ActivePlanExists {
                    obligation_id: plan.obligation_id,
                });
            }
        }
        let plan_id = plan.plan_id;
        let obligation_id = plan.obligation_id;
        self.plans
            .write()
            .map_err(|_| DuesError::store(POISONED))?
            .insert(plan_id, Arc::new(Mutex::new(PlanRow { plan, payments })));
        index.insert(obligation_id, plan_id);
        Ok(())
    }

    fn plan(&self, plan_id: PlanId) -> Result<(InstallmentPlan, Vec<InstallmentPayment>)> {
        let cell = self.plan_cell(plan_id)?;
        let guard = cell.lock().map_err(|_| DuesError::store(POISONED))?;
        Ok((guard.plan.clone(), guard.payments.clone()))
    }

    fn active_plan(&self, obligation_id: ObligationId) -> Result<Option<InstallmentPlan>> {
        let plan_id = self
            .plan_index
            .read()
            .map_err(|_| DuesError::store(POISONED))?
            .get(&obligation_id)
            .copied();
        match plan_id {
            Some(plan_id) => {
                let (plan, _) = self.plan(plan_id)?;
                Ok(plan.is_active().then_some(plan))
            }
            None => Ok(None),
        }
    }

    fn with_plan<R, F>(&self, plan_id: PlanId, f: F) -> Result<R>
    where
        F: FnOnce(&mut InstallmentPlan, &mut Vec<InstallmentPayment>) -> Result<R>,
    {
        let cell = self.plan_cell(plan_id)?;
        let mut guard = cell.lock().map_err(|_| DuesError::store(POISONED))?;
        let row = &mut *guard;
        f(&mut row.plan, &mut row.payments)
    }

    fn insert_payment_record(&self, record: PaymentRecord) -> Result<()> {
        self.payment_records
            .write()
            .map_err(|_| DuesError::store(POISONED))?
            .entry(record.obligation_id)
            .or_default()
            .push(record);
        Ok(())
    }

    fn payments_for_obligation(&self, obligation_id: ObligationId) -> Result<Vec<PaymentRecord>> {
        Ok(self
            .payment_records
            .read()
            .map_err(|_| DuesError::store(POISONED))?
            .get(&obligation_id)
            .cloned()
            .unwrap_or_default())
    }

    fn save_payment_method(&self, method: SavedPaymentMethod) -> Result<()> {
        self.methods
            .write()
            .map_err(|_| DuesError::store(POISONED))?
            .entry(method.method_id.clone())
            .or_insert(method);
        Ok(())
    }

    fn saved_payment_method(&self, method_id: &str) -> Result<Option<SavedPaymentMethod>> {
        Ok(self
            .methods
            .read()
            .map_err(|_| DuesError::store(POISONED))?
            .get(method_id)
            .cloned())
    }
}
