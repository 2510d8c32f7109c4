use chrono::{DateTime, Utc};
use hourglass_rs::{SafeTimeProvider, TimeSource};

use crate::assignment::{Assigner, AssignmentRequest, BulkAssignOutcome, BulkFilters};
use crate::config::{DuesConfig, FeeSchedule};
use crate::decimal::Money;
use crate::errors::{DuesError, Result};
use crate::events::{Event, EventStore};
use crate::export::{export_config, ObligationExport};
use crate::latefee::{LateFeeEngine, SweepOutcome};
use crate::obligation::MemberObligation;
use crate::payments::{PaymentApplication, PaymentInput, PaymentRecorder};
use crate::plans::{
    CreatePlanRequest, InstallmentCharge, InstallmentEligibility, InstallmentPayment,
    InstallmentPlan, PayoutSettings, PlanCreation, PlanOrchestrator, SettlementReport,
};
use crate::processor::PaymentProcessor;
use crate::store::DuesStore;
use crate::types::{ConfigId, Member, ObligationId, PlanId};

/// the caller-facing engine
///
/// owns the store, the processor handle, the clock, and the event buffer;
/// each operation appends its events, which the caller drains with
/// `take_events`
pub struct DuesEngine<S: DuesStore, P: PaymentProcessor> {
    store: S,
    processor: P,
    fees: FeeSchedule,
    payout: PayoutSettings,
    time_provider: SafeTimeProvider,
    events: EventStore,
}

impl<S: DuesStore, P: PaymentProcessor> DuesEngine<S, P> {
    pub fn new(
        store: S,
        processor: P,
        fees: FeeSchedule,
        payout: PayoutSettings,
        time_source: TimeSource,
    ) -> Self {
        Self {
            store,
            processor,
            fees,
            payout,
            time_provider: SafeTimeProvider::new(time_source),
            events: EventStore::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time_provider.now()
    }

    /// events accumulated since the last drain
    pub fn events(&self) -> &[Event] {
        self.events.events()
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.take_events()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// tear the engine down to its store, e.g. to rebuild against a
    /// different clock
    pub fn into_store(self) -> S {
        self.store
    }

    // configurations

    pub fn create_config(&mut self, config: DuesConfig) -> Result<ConfigId> {
        let config_id = config.config_id;
        self.store.insert_config(config)?;
        Ok(config_id)
    }

    // assignment

    pub fn assign_obligation(
        &mut self,
        config_id: ConfigId,
        request: AssignmentRequest,
    ) -> Result<ObligationId> {
        Assigner::new(&self.store).assign_one(
            config_id,
            request,
            &self.time_provider,
            &mut self.events,
        )
    }

    pub fn bulk_assign(
        &mut self,
        config_id: ConfigId,
        roster: &[Member],
        filters: &BulkFilters,
        amount: Option<Money>,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<BulkAssignOutcome> {
        Assigner::new(&self.store).assign_bulk(
            config_id,
            roster,
            filters,
            amount,
            due_date,
            &self.time_provider,
            &mut self.events,
        )
    }

    // payments

    pub fn record_payment(&mut self, input: PaymentInput) -> Result<PaymentApplication> {
        PaymentRecorder::new(&self.store).record(input, &mut self.events)
    }

    // administrative operations on a single obligation

    /// forgive the remaining balance; terminal
    pub fn waive(&mut self, obligation_id: ObligationId) -> Result<Money> {
        let now = self.now();
        let forgiven = self
            .store
            .with_obligation(obligation_id, |ob| ob.waive(now))?;
        self.events.emit(Event::ObligationWaived {
            obligation_id,
            balance_forgiven: forgiven,
            timestamp: now,
        });
        Ok(forgiven)
    }

    pub fn apply_adjustment(
        &mut self,
        obligation_id: ObligationId,
        amount: Money,
        reason: Option<String>,
    ) -> Result<()> {
        let now = self.now();
        let transition = self.store.with_obligation(obligation_id, |ob| {
            let old = ob.status;
            ob.set_adjustment(amount, reason.clone(), now)?;
            Ok((old != ob.status).then_some((old, ob.status)))
        })?;
        self.events.emit(Event::AdjustmentApplied {
            obligation_id,
            amount,
            reason,
            timestamp: now,
        });
        if let Some((old_status, new_status)) = transition {
            self.events.emit(Event::StatusChanged {
                obligation_id,
                old_status,
                new_status,
                timestamp: now,
            });
        }
        Ok(())
    }

    /// per-member due-date override; overdue derivation and late-fee grace
    /// both follow the new date
    pub fn override_due_date(
        &mut self,
        obligation_id: ObligationId,
        due_date: DateTime<Utc>,
    ) -> Result<()> {
        self.store.with_obligation(obligation_id, |ob| {
            if ob.is_waived() {
                return Err(DuesError::ObligationWaived { obligation_id });
            }
            ob.due_date = due_date;
            Ok(())
        })
    }

    pub fn grant_flexible_deadline(
        &mut self,
        obligation_id: ObligationId,
        deadline: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<()> {
        self.store
            .with_obligation(obligation_id, |ob| ob.grant_flexible_deadline(deadline, notes))
    }

    /// allow the member to split this obligation into installments
    pub fn grant_eligibility(
        &mut self,
        obligation_id: ObligationId,
        allowed_plan_sizes: Vec<u32>,
        notes: Option<String>,
    ) -> Result<()> {
        if allowed_plan_sizes.is_empty() || allowed_plan_sizes.iter().any(|&n| n < 2) {
            return Err(DuesError::validation(
                "allowed plan sizes must be a non-empty set of sizes >= 2",
            ));
        }
        // the obligation must exist
        self.store.obligation(obligation_id)?;
        self.store.upsert_eligibility(InstallmentEligibility {
            obligation_id,
            is_eligible: true,
            allowed_plan_sizes,
            notes,
            granted_at: self.now(),
        })
    }

    /// administrative delete; rejected while payments or an active plan
    /// reference the obligation
    pub fn delete_obligation(&mut self, obligation_id: ObligationId) -> Result<()> {
        self.store.delete_obligation(obligation_id)?;
        self.events.emit(Event::ObligationDeleted {
            obligation_id,
            timestamp: self.now(),
        });
        Ok(())
    }

    // late fees

    pub fn sweep_late_fees(&mut self, config_id: ConfigId) -> Result<SweepOutcome> {
        LateFeeEngine::new(&self.store).sweep(config_id, &self.time_provider, &mut self.events)
    }

    // installment plans

    pub fn create_installment_plan(&mut self, request: CreatePlanRequest) -> Result<PlanCreation> {
        Self::orchestrator_for(&self.store, &self.processor, &self.fees, &self.payout)
            .create_plan(request, &self.time_provider, &mut self.events)
    }

    pub fn charge_next_installment(&mut self, plan_id: PlanId) -> Result<InstallmentCharge> {
        Self::orchestrator_for(&self.store, &self.processor, &self.fees, &self.payout)
            .charge_next_installment(plan_id, &self.time_provider, &mut self.events)
    }

    pub fn settle_installment(
        &mut self,
        plan_id: PlanId,
        installment_number: u32,
        report: SettlementReport,
    ) -> Result<()> {
        Self::orchestrator_for(&self.store, &self.processor, &self.fees, &self.payout)
            .settle_installment(
            plan_id,
            installment_number,
            report,
            &self.time_provider,
            &mut self.events,
        )
    }

    // reads

    pub fn obligation(&self, obligation_id: ObligationId) -> Result<MemberObligation> {
        self.store.obligation(obligation_id)
    }

    pub fn plan(&self, plan_id: PlanId) -> Result<(InstallmentPlan, Vec<InstallmentPayment>)> {
        self.store.plan(plan_id)
    }

    pub fn export(&self, config_id: ConfigId) -> Result<Vec<ObligationExport>> {
        export_config(&self.store, config_id, self.now())
    }

    fn orchestrator_for<'a>(
        store: &'a S,
        processor: &'a P,
        fees: &FeeSchedule,
        payout: &PayoutSettings,
    ) -> PlanOrchestrator<'a, S, P> {
        PlanOrchestrator::new(store, processor, fees.clone(), payout.clone())
    }
}
