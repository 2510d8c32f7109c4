use hourglass_rs::SafeTimeProvider;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::FeeSchedule;
use crate::decimal::Money;
use crate::errors::{DuesError, Result};
use crate::events::{Event, EventStore};
use crate::fees;
use crate::payments::{PaymentInput, PaymentRecorder};
use crate::plans::{
    build_schedule, InstallmentPayment, InstallmentPlan, InstallmentStatus, PlanStatus,
};
use crate::processor::{
    ChargeMetadata, ChargeOutcome, ChargeRequest, PaymentProcessor, ProcessorPaymentMethod,
};
use crate::store::DuesStore;
use crate::types::{ObligationId, PaymentMethodKind, PlanId, SavedPaymentMethod};

/// payout routing for processor charges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutSettings {
    pub currency: String,
    /// the organization's connected payout account
    pub destination_account: String,
}

/// plan-creation request from a member
#[derive(Debug, Clone)]
pub struct CreatePlanRequest {
    pub obligation_id: ObligationId,
    /// the requesting member; ownership of the obligation and of the
    /// payment method are both verified against this
    pub member_id: String,
    pub member_email: String,
    pub num_installments: u32,
    /// processor-side saved method reference
    pub payment_method_id: String,
    /// the first charge was already completed through a separate checkout
    /// flow; verify and reconcile it instead of charging
    pub skip_first_payment: bool,
    /// external reference for the already-completed first charge
    pub checkout_reference: Option<String>,
}

/// how the first installment ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirstPaymentOutcome {
    /// charged and settled immediately
    Settled,
    /// charge submitted; settlement arrives later through
    /// `settle_installment`
    Processing,
    /// the payer must complete an authentication challenge; the caller
    /// gets the client secret and may never come back
    RequiresAction { client_secret: String },
    /// completed out of band before the plan was created
    AlreadyCompleted,
}

/// successful plan creation
#[derive(Debug, Clone)]
pub struct PlanCreation {
    pub plan_id: PlanId,
    pub schedule: Vec<InstallmentPayment>,
    pub first_payment: FirstPaymentOutcome,
}

/// processor settlement callback payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementReport {
    Succeeded,
    Failed { reason: String },
}

/// result of charging one scheduled installment
#[derive(Debug, Clone)]
pub struct InstallmentCharge {
    pub installment_number: u32,
    pub outcome: FirstPaymentOutcome,
}

enum SettlementStep {
    Settled {
        obligation_id: ObligationId,
        amount: Money,
        method: PaymentMethodKind,
        intent_id: Option<String>,
        plan_completed: bool,
    },
    MarkedFailed {
        reason: String,
    },
    Mismatch {
        stored: InstallmentStatus,
    },
}

/// creates and services installment plans against the payment processor
///
/// precondition failures abort with no side effects; once the plan row is
/// persisted it doubles as the idempotency barrier, so a retried request
/// conflicts instead of charging twice
pub struct PlanOrchestrator<'a, S: DuesStore, P: PaymentProcessor> {
    store: &'a S,
    processor: &'a P,
    fees: FeeSchedule,
    payout: PayoutSettings,
}

impl<'a, S: DuesStore, P: PaymentProcessor> PlanOrchestrator<'a, S, P> {
    pub fn new(store: &'a S, processor: &'a P, fees: FeeSchedule, payout: PayoutSettings) -> Self {
        Self {
            store,
            processor,
            fees,
            payout,
        }
    }

    /// create a plan and handle its first installment
    pub fn create_plan(
        &self,
        request: CreatePlanRequest,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<PlanCreation> {
        let now = time_provider.now();

        // preconditions, checked in order; each failure is distinct and
        // leaves nothing behind
        let obligation = self.store.obligation(request.obligation_id)?;
        if obligation.member_id != request.member_id {
            // a foreign obligation is indistinguishable from a missing one
            return Err(DuesError::NotFound {
                entity: "obligation",
                id: request.obligation_id.to_string(),
            });
        }

        let balance = obligation.balance();
        if !balance.is_positive() {
            return Err(DuesError::ZeroBalance {
                obligation_id: request.obligation_id,
            });
        }

        let eligibility = self
            .store
            .eligibility(request.obligation_id)?
            .ok_or(DuesError::NotFound {
                entity: "installment eligibility",
                id: request.obligation_id.to_string(),
            })?;
        if !eligibility.is_eligible {
            return Err(DuesError::NotEligible {
                obligation_id: request.obligation_id,
            });
        }
        if !eligibility.allows(request.num_installments) {
            return Err(DuesError::PlanSizeNotAllowed {
                requested: request.num_installments,
                allowed: eligibility.allowed_plan_sizes.clone(),
            });
        }

        if self.store.active_plan(request.obligation_id)?.is_some() {
            return Err(DuesError::ActivePlanExists {
                obligation_id: request.obligation_id,
            });
        }

        let deadline = obligation.installment_deadline();
        if deadline <= now {
            return Err(DuesError::DeadlinePassed { deadline });
        }

        // the referenced method must belong to the requesting member's
        // processor customer profile, in both modes
        let customer = self
            .processor
            .ensure_customer(&request.member_id, &request.member_email)?;
        let method = self
            .processor
            .retrieve_payment_method(&request.payment_method_id)?;
        if method.customer_id != customer.customer_id {
            return Err(DuesError::ForeignPaymentMethod {
                method_id: request.payment_method_id.clone(),
            });
        }
        self.persist_method(&method, &request.member_id, time_provider)?;

        let mut plan = InstallmentPlan::new(
            request.obligation_id,
            request.num_installments,
            request.payment_method_id.clone(),
            deadline,
            now,
        );
        let plan_id = plan.plan_id;
        let mut schedule =
            build_schedule(plan_id, balance, request.num_installments, now, deadline)?;

        if request.skip_first_payment {
            // reconcile the charge the member already completed
            schedule[0].status = InstallmentStatus::Paid;
            plan.installments_paid = 1;
            plan.next_payment_date = schedule.get(1).map(|row| row.scheduled_date);
            let first_amount = schedule[0].amount;

            // the insert enforces the one-active-plan constraint even
            // under a racing duplicate request
            self.store.insert_plan(plan, schedule.clone())?;
            events.emit(Event::PlanCreated {
                plan_id,
                obligation_id: request.obligation_id,
                num_installments: request.num_installments,
                total: balance,
                deadline,
                timestamp: now,
            });

            PaymentRecorder::new(self.store).record(
                PaymentInput {
                    obligation_id: request.obligation_id,
                    amount: first_amount,
                    method: method.kind,
                    paid_at: now,
                    reference: request.checkout_reference,
                    notes: Some("installment 1 (separate checkout)".to_string()),
                    reconciled: false,
                },
                events,
            )?;
            events.emit(Event::InstallmentSettled {
                plan_id,
                installment_number: 1,
                amount: first_amount,
                timestamp: now,
            });

            return Ok(PlanCreation {
                plan_id,
                schedule: self.store.plan(plan_id)?.1,
                first_payment: FirstPaymentOutcome::AlreadyCompleted,
            });
        }

        // orchestrated first payment: persist the plan before touching the
        // processor so a retry after a transport failure hits the
        // active-plan barrier instead of charging again
        plan.next_payment_date = Some(schedule[0].scheduled_date);
        self.store.insert_plan(plan, schedule.clone())?;
        events.emit(Event::PlanCreated {
            plan_id,
            obligation_id: request.obligation_id,
            num_installments: request.num_installments,
            total: balance,
            deadline,
            timestamp: now,
        });

        let outcome = self.charge_installment(
            plan_id,
            request.obligation_id,
            &schedule[0],
            &method,
            &customer.customer_id,
            time_provider,
            events,
        )?;

        Ok(PlanCreation {
            plan_id,
            schedule: self.store.plan(plan_id)?.1,
            first_payment: outcome,
        })
    }

    /// charge the next scheduled installment with the plan's saved method
    pub fn charge_next_installment(
        &self,
        plan_id: PlanId,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<InstallmentCharge> {
        let (plan, payments) = self.store.plan(plan_id)?;
        if !plan.is_active() {
            return Err(DuesError::PlanNotActive { plan_id });
        }
        let next = payments
            .iter()
            .find(|row| row.status == InstallmentStatus::Scheduled)
            .cloned()
            .ok_or(DuesError::NotFound {
                entity: "scheduled installment",
                id: plan_id.to_string(),
            })?;

        let obligation = self.store.obligation(plan.obligation_id)?;
        let customer = self
            .processor
            .ensure_customer(&obligation.member_id, &obligation.member_email)?;
        let method = self.processor.retrieve_payment_method(&plan.payment_method_id)?;
        if method.customer_id != customer.customer_id {
            return Err(DuesError::ForeignPaymentMethod {
                method_id: plan.payment_method_id.clone(),
            });
        }

        let outcome = self.charge_installment(
            plan_id,
            plan.obligation_id,
            &next,
            &method,
            &customer.customer_id,
            time_provider,
            events,
        )?;
        Ok(InstallmentCharge {
            installment_number: next.installment_number,
            outcome,
        })
    }

    /// reconcile an asynchronous settlement against the stored attempt
    ///
    /// a report against an installment that is not in processing is a
    /// reconciliation error: logged, surfaced, never silently applied
    pub fn settle_installment(
        &self,
        plan_id: PlanId,
        installment_number: u32,
        report: SettlementReport,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<()> {
        let now = time_provider.now();

        let (plan_snapshot, _) = self.store.plan(plan_id)?;
        let method_kind = self
            .store
            .saved_payment_method(&plan_snapshot.payment_method_id)?
            .map(|m| m.kind)
            .unwrap_or(PaymentMethodKind::Card);

        let step = self.store.with_plan(plan_id, |plan, payments| {
            let row = payments
                .iter_mut()
                .find(|row| row.installment_number == installment_number)
                .ok_or(DuesError::NotFound {
                    entity: "installment",
                    id: format!("{}#{}", plan_id, installment_number),
                })?;

            if row.status != InstallmentStatus::Processing {
                return Ok(SettlementStep::Mismatch { stored: row.status });
            }

            match &report {
                SettlementReport::Succeeded => {
                    row.status = InstallmentStatus::Paid;
                    let amount = row.amount;
                    let intent_id = row.intent_id.clone();
                    plan.installments_paid += 1;
                    plan.next_payment_date = payments
                        .iter()
                        .find(|r| r.status == InstallmentStatus::Scheduled)
                        .map(|r| r.scheduled_date);
                    let plan_completed = plan.installments_paid == plan.num_installments;
                    if plan_completed {
                        plan.status = PlanStatus::Completed;
                    }
                    Ok(SettlementStep::Settled {
                        obligation_id: plan.obligation_id,
                        amount,
                        method: method_kind,
                        intent_id,
                        plan_completed,
                    })
                }
                SettlementReport::Failed { reason } => {
                    row.status = InstallmentStatus::Failed;
                    Ok(SettlementStep::MarkedFailed {
                        reason: reason.clone(),
                    })
                }
            }
        })?;

        match step {
            SettlementStep::Settled {
                obligation_id,
                amount,
                method,
                intent_id,
                plan_completed,
            } => {
                PaymentRecorder::new(self.store).record(
                    PaymentInput {
                        obligation_id,
                        amount,
                        method,
                        paid_at: now,
                        reference: intent_id,
                        notes: Some(format!("installment {} settled", installment_number)),
                        reconciled: false,
                    },
                    events,
                )?;
                events.emit(Event::InstallmentSettled {
                    plan_id,
                    installment_number,
                    amount,
                    timestamp: now,
                });
                if plan_completed {
                    events.emit(Event::PlanCompleted {
                        plan_id,
                        timestamp: now,
                    });
                }
                Ok(())
            }
            SettlementStep::MarkedFailed { reason } => {
                events.emit(Event::InstallmentFailed {
                    plan_id,
                    installment_number,
                    reason,
                    timestamp: now,
                });
                Ok(())
            }
            SettlementStep::Mismatch { stored } => {
                let reported = match report {
                    SettlementReport::Succeeded => "succeeded".to_string(),
                    SettlementReport::Failed { reason } => format!("failed: {}", reason),
                };
                warn!(
                    "settlement mismatch on plan {} installment {}: stored {}, reported {}",
                    plan_id,
                    installment_number,
                    stored.as_str(),
                    reported
                );
                events.emit(Event::ReconciliationMismatch {
                    plan_id,
                    installment_number,
                    stored: stored.as_str().to_string(),
                    reported: reported.clone(),
                    timestamp: now,
                });
                Err(DuesError::Reconciliation {
                    plan_id,
                    installment_number,
                    stored: stored.as_str().to_string(),
                    reported,
                })
            }
        }
    }

    /// submit one installment charge and apply its immediate outcome
    #[allow(clippy::too_many_arguments)]
    fn charge_installment(
        &self,
        plan_id: PlanId,
        obligation_id: ObligationId,
        installment: &InstallmentPayment,
        method: &ProcessorPaymentMethod,
        customer_id: &str,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<FirstPaymentOutcome> {
        let now = time_provider.now();
        let class = method.kind.fee_class().ok_or_else(|| {
            DuesError::validation(format!(
                "payment method {} cannot be charged through the processor",
                method.method_id
            ))
        })?;
        let quote = fees::quote(&self.fees, installment.amount, class)?;

        let charge = ChargeRequest {
            amount: quote.total_charge,
            currency: self.payout.currency.clone(),
            customer_id: customer_id.to_string(),
            payment_method_id: method.method_id.clone(),
            destination_account: self.payout.destination_account.clone(),
            transfer_amount: quote.net_amount,
            off_session: true,
            metadata: ChargeMetadata {
                obligation_id,
                plan_id,
                installment_number: installment.installment_number,
            },
        };

        // a transport failure here leaves the plan persisted with the row
        // still scheduled; the caller retries the top-level operation and
        // lands on the active-plan conflict instead of a duplicate charge
        let outcome = match self.processor.create_payment_intent(&charge) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    "charge submission failed for plan {} installment {}: {}",
                    plan_id, installment.installment_number, err
                );
                return Err(err);
            }
        };

        let number = installment.installment_number;
        match outcome {
            ChargeOutcome::Succeeded { intent_id } => {
                events.emit(Event::InstallmentChargeSubmitted {
                    plan_id,
                    installment_number: number,
                    intent_id: intent_id.clone(),
                    amount_charged: quote.total_charge,
                    timestamp: now,
                });
                let (amount, plan_completed) = self.store.with_plan(plan_id, |plan, payments| {
                    let row = row_mut(payments, number)?;
                    row.status = InstallmentStatus::Paid;
                    row.intent_id = Some(intent_id.clone());
                    let amount = row.amount;
                    plan.installments_paid += 1;
                    plan.next_payment_date = payments
                        .iter()
                        .find(|r| r.status == InstallmentStatus::Scheduled)
                        .map(|r| r.scheduled_date);
                    let plan_completed = plan.installments_paid == plan.num_installments;
                    if plan_completed {
                        plan.status = PlanStatus::Completed;
                    }
                    Ok((amount, plan_completed))
                })?;
                PaymentRecorder::new(self.store).record(
                    PaymentInput {
                        obligation_id,
                        amount,
                        method: method.kind,
                        paid_at: now,
                        reference: Some(intent_id),
                        notes: Some(format!("installment {}", number)),
                        reconciled: false,
                    },
                    events,
                )?;
                events.emit(Event::InstallmentSettled {
                    plan_id,
                    installment_number: number,
                    amount,
                    timestamp: now,
                });
                if plan_completed {
                    events.emit(Event::PlanCompleted {
                        plan_id,
                        timestamp: now,
                    });
                }
                Ok(FirstPaymentOutcome::Settled)
            }
            ChargeOutcome::Processing { intent_id } => {
                events.emit(Event::InstallmentChargeSubmitted {
                    plan_id,
                    installment_number: number,
                    intent_id: intent_id.clone(),
                    amount_charged: quote.total_charge,
                    timestamp: now,
                });
                // no balance change until settlement reports back
                self.store.with_plan(plan_id, |_, payments| {
                    let row = row_mut(payments, number)?;
                    row.status = InstallmentStatus::Processing;
                    row.intent_id = Some(intent_id);
                    Ok(())
                })?;
                Ok(FirstPaymentOutcome::Processing)
            }
            ChargeOutcome::RequiresAction {
                intent_id,
                client_secret,
            } => {
                events.emit(Event::InstallmentChargeSubmitted {
                    plan_id,
                    installment_number: number,
                    intent_id: intent_id.clone(),
                    amount_charged: quote.total_charge,
                    timestamp: now,
                });
                // the caller completes the challenge; if they never return,
                // the row stays processing until reconciled manually
                self.store.with_plan(plan_id, |_, payments| {
                    let row = row_mut(payments, number)?;
                    row.status = InstallmentStatus::Processing;
                    row.intent_id = Some(intent_id);
                    Ok(())
                })?;
                Ok(FirstPaymentOutcome::RequiresAction { client_secret })
            }
            ChargeOutcome::Failed { intent_id, reason } => {
                // the processor declined before money moved; on the first
                // installment the plan is compensated away so the member
                // can try again, later installments just mark the row
                let cancel_plan = number == 1
                    && self
                        .store
                        .plan(plan_id)
                        .map(|(plan, _)| plan.installments_paid == 0)
                        .unwrap_or(false);
                self.store.with_plan(plan_id, |plan, payments| {
                    let row = row_mut(payments, number)?;
                    row.status = InstallmentStatus::Failed;
                    row.intent_id = intent_id.clone();
                    if cancel_plan {
                        plan.status = PlanStatus::Cancelled;
                        plan.next_payment_date = None;
                    }
                    Ok(())
                })?;
                events.emit(Event::InstallmentFailed {
                    plan_id,
                    installment_number: number,
                    reason: reason.clone(),
                    timestamp: now,
                });
                if cancel_plan {
                    events.emit(Event::PlanCancelled {
                        plan_id,
                        reason: "first charge declined".to_string(),
                        timestamp: now,
                    });
                }
                Err(DuesError::ChargeDeclined {
                    plan_id,
                    installment_number: number,
                    reason,
                })
            }
        }
    }

    fn persist_method(
        &self,
        method: &ProcessorPaymentMethod,
        member_id: &str,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        if self.store.saved_payment_method(&method.method_id)?.is_some() {
            return Ok(());
        }
        self.store.save_payment_method(SavedPaymentMethod {
            method_id: method.method_id.clone(),
            member_id: member_id.to_string(),
            kind: method.kind,
            last4: method.last4.clone(),
            brand: method.brand.clone(),
            saved_at: time_provider.now(),
        })
    }
}

fn row_mut(
    payments: &mut [InstallmentPayment],
    installment_number: u32,
) -> Result<&mut InstallmentPayment> {
    payments
        .iter_mut()
        .find(|row| row.installment_number == installment_number)
        .ok_or(DuesError::NotFound {
            entity: "installment",
            id: format!("#{}", installment_number),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Money;
    use crate::obligation::MemberObligation;
    use crate::plans::InstallmentEligibility;
    use crate::processor::MockProcessor;
    use crate::store::InMemoryStore;
    use crate::types::{ObligationStatus, PaymentMethodKind};
    use chrono::{DateTime, TimeZone, Utc};
    use hourglass_rs::TimeSource;
    use uuid::Uuid;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn setup(
        amount: Money,
        kind: PaymentMethodKind,
    ) -> (InMemoryStore, MockProcessor, ObligationId, SafeTimeProvider) {
        let store = InMemoryStore::new();
        let ob = MemberObligation::new(
            "m-1",
            "m1@example.org",
            Uuid::new_v4(),
            amount,
            at(2025, 12, 1),
            at(2025, 9, 1),
        );
        let obligation_id = ob.obligation_id;
        store.insert_obligation(ob).unwrap();
        store
            .upsert_eligibility(InstallmentEligibility {
                obligation_id,
                is_eligible: true,
                allowed_plan_sizes: vec![2, 3],
                notes: None,
                granted_at: at(2025, 9, 1),
            })
            .unwrap();

        let processor = MockProcessor::new();
        processor.register_method("pm_1", "cus_m-1", kind, "4242");

        let time = SafeTimeProvider::new(TimeSource::Test(at(2025, 9, 15)));
        (store, processor, obligation_id, time)
    }

    fn orchestrator<'a>(
        store: &'a InMemoryStore,
        processor: &'a MockProcessor,
    ) -> PlanOrchestrator<'a, InMemoryStore, MockProcessor> {
        PlanOrchestrator::new(
            store,
            processor,
            crate::config::FeeSchedule::standard(),
            PayoutSettings {
                currency: "usd".to_string(),
                destination_account: "acct_org".to_string(),
            },
        )
    }

    fn request(obligation_id: ObligationId, n: u32) -> CreatePlanRequest {
        CreatePlanRequest {
            obligation_id,
            member_id: "m-1".to_string(),
            member_email: "m1@example.org".to_string(),
            num_installments: n,
            payment_method_id: "pm_1".to_string(),
            skip_first_payment: false,
            checkout_reference: None,
        }
    }

    #[test]
    fn test_create_plan_settles_first_card_charge() {
        let (store, processor, obligation_id, time) =
            setup(Money::from_major(90), PaymentMethodKind::Card);
        let orch = orchestrator(&store, &processor);
        let mut events = EventStore::new();

        let creation = orch
            .create_plan(request(obligation_id, 3), &time, &mut events)
            .unwrap();
        assert_eq!(creation.first_payment, FirstPaymentOutcome::Settled);
        assert_eq!(creation.schedule[0].status, InstallmentStatus::Paid);
        assert_eq!(creation.schedule[1].status, InstallmentStatus::Scheduled);

        let (plan, _) = store.plan(creation.plan_id).unwrap();
        assert_eq!(plan.installments_paid, 1);
        assert!(plan.is_active());

        let ob = store.obligation(obligation_id).unwrap();
        assert_eq!(ob.amount_paid, Money::from_major(30));
        assert_eq!(ob.status, ObligationStatus::Partial);

        // the payer was charged the grossed-up total, not the face amount
        let submitted = processor.requests();
        assert_eq!(submitted.len(), 1);
        assert!(submitted[0].amount > Money::from_major(30));
        assert_eq!(submitted[0].transfer_amount, Money::from_str_exact("29.70").unwrap());
    }

    #[test]
    fn test_first_charge_declined_compensates_plan_away() {
        let (store, processor, obligation_id, time) =
            setup(Money::from_major(90), PaymentMethodKind::Card);
        processor.queue_outcome(ChargeOutcome::Failed {
            intent_id: None,
            reason: "card_declined".to_string(),
        });
        let orch = orchestrator(&store, &processor);
        let mut events = EventStore::new();

        let err = orch
            .create_plan(request(obligation_id, 3), &time, &mut events)
            .unwrap_err();
        assert!(matches!(err, DuesError::ChargeDeclined { .. }));

        // no active plan, no balance change, member may try again
        assert!(store.active_plan(obligation_id).unwrap().is_none());
        assert_eq!(
            store.obligation(obligation_id).unwrap().balance(),
            Money::from_major(90)
        );
        orch.create_plan(request(obligation_id, 3), &time, &mut events)
            .unwrap();
    }

    #[test]
    fn test_transport_error_leaves_plan_as_conflict_barrier() {
        let (store, processor, obligation_id, time) =
            setup(Money::from_major(90), PaymentMethodKind::Card);
        processor.queue_transport_error("connection reset");
        let orch = orchestrator(&store, &processor);
        let mut events = EventStore::new();

        let err = orch
            .create_plan(request(obligation_id, 3), &time, &mut events)
            .unwrap_err();
        assert!(!err.is_terminal());

        // the persisted plan blocks a blind retry from double-charging
        assert!(store.active_plan(obligation_id).unwrap().is_some());
        let retry = orch
            .create_plan(request(obligation_id, 3), &time, &mut events)
            .unwrap_err();
        assert!(matches!(retry, DuesError::ActivePlanExists { .. }));
    }

    #[test]
    fn test_foreign_method_rejected_before_any_side_effect() {
        let (store, processor, obligation_id, time) =
            setup(Money::from_major(90), PaymentMethodKind::Card);
        processor.register_method("pm_other", "cus_someone_else", PaymentMethodKind::Card, "1111");
        let orch = orchestrator(&store, &processor);
        let mut events = EventStore::new();

        let mut req = request(obligation_id, 3);
        req.payment_method_id = "pm_other".to_string();
        let err = orch.create_plan(req, &time, &mut events).unwrap_err();
        assert!(matches!(err, DuesError::ForeignPaymentMethod { .. }));

        assert!(store.active_plan(obligation_id).unwrap().is_none());
        assert!(processor.requests().is_empty());
    }

    #[test]
    fn test_bank_transfer_settles_asynchronously_to_completion() {
        let (store, processor, obligation_id, time) =
            setup(Money::from_major(90), PaymentMethodKind::BankAccount);
        processor.queue_outcome(ChargeOutcome::Processing {
            intent_id: "pi_a".to_string(),
        });
        processor.queue_outcome(ChargeOutcome::Processing {
            intent_id: "pi_b".to_string(),
        });
        let orch = orchestrator(&store, &processor);
        let mut events = EventStore::new();

        let creation = orch
            .create_plan(request(obligation_id, 2), &time, &mut events)
            .unwrap();
        assert_eq!(creation.first_payment, FirstPaymentOutcome::Processing);
        assert_eq!(
            store.obligation(obligation_id).unwrap().amount_paid,
            Money::ZERO
        );

        orch.settle_installment(
            creation.plan_id,
            1,
            SettlementReport::Succeeded,
            &time,
            &mut events,
        )
        .unwrap();
        assert_eq!(
            store.obligation(obligation_id).unwrap().amount_paid,
            Money::from_major(45)
        );

        let charged = orch
            .charge_next_installment(creation.plan_id, &time, &mut events)
            .unwrap();
        assert_eq!(charged.installment_number, 2);
        orch.settle_installment(
            creation.plan_id,
            2,
            SettlementReport::Succeeded,
            &time,
            &mut events,
        )
        .unwrap();

        let (plan, _) = store.plan(creation.plan_id).unwrap();
        assert_eq!(plan.status, PlanStatus::Completed);
        let ob = store.obligation(obligation_id).unwrap();
        assert_eq!(ob.status, ObligationStatus::Paid);
        assert!(events
            .events()
            .iter()
            .any(|e| matches!(e, Event::PlanCompleted { .. })));
    }

    #[test]
    fn test_settlement_against_unsubmitted_row_is_a_mismatch() {
        let (store, processor, obligation_id, time) =
            setup(Money::from_major(90), PaymentMethodKind::Card);
        let orch = orchestrator(&store, &processor);
        let mut events = EventStore::new();

        let creation = orch
            .create_plan(request(obligation_id, 3), &time, &mut events)
            .unwrap();
        events.clear();

        // installment 2 was never submitted
        let err = orch
            .settle_installment(
                creation.plan_id,
                2,
                SettlementReport::Succeeded,
                &time,
                &mut events,
            )
            .unwrap_err();
        assert!(matches!(err, DuesError::Reconciliation { .. }));
        assert!(matches!(
            events.events()[0],
            Event::ReconciliationMismatch { .. }
        ));
        // the stored row is untouched
        let (_, payments) = store.plan(creation.plan_id).unwrap();
        assert_eq!(payments[1].status, InstallmentStatus::Scheduled);
    }

    #[test]
    fn test_skip_first_payment_reconciles_checkout_charge() {
        let (store, processor, obligation_id, time) =
            setup(Money::from_major(90), PaymentMethodKind::Card);
        let orch = orchestrator(&store, &processor);
        let mut events = EventStore::new();

        let mut req = request(obligation_id, 3);
        req.skip_first_payment = true;
        req.checkout_reference = Some("pi_checkout".to_string());
        let creation = orch.create_plan(req, &time, &mut events).unwrap();

        assert_eq!(
            creation.first_payment,
            FirstPaymentOutcome::AlreadyCompleted
        );
        assert!(processor.requests().is_empty());
        assert_eq!(creation.schedule[0].status, InstallmentStatus::Paid);
        assert_eq!(
            store.obligation(obligation_id).unwrap().amount_paid,
            Money::from_major(30)
        );
        let rows = store.payments_for_obligation(obligation_id).unwrap();
        assert_eq!(rows[0].reference.as_deref(), Some("pi_checkout"));
    }

    #[test]
    fn test_preconditions_checked_in_order() {
        let (store, processor, obligation_id, time) =
            setup(Money::from_major(90), PaymentMethodKind::Card);
        let orch = orchestrator(&store, &processor);
        let mut events = EventStore::new();

        // plan size outside the granted set
        let err = orch
            .create_plan(request(obligation_id, 4), &time, &mut events)
            .unwrap_err();
        assert!(matches!(err, DuesError::PlanSizeNotAllowed { .. }));

        // someone else's obligation reads as missing
        let mut req = request(obligation_id, 3);
        req.member_id = "m-2".to_string();
        let err = orch.create_plan(req, &time, &mut events).unwrap_err();
        assert!(matches!(err, DuesError::NotFound { .. }));

        // past the deadline
        let late = SafeTimeProvider::new(TimeSource::Test(at(2025, 12, 2)));
        let err = orch
            .create_plan(request(obligation_id, 3), &late, &mut events)
            .unwrap_err();
        assert!(matches!(err, DuesError::DeadlinePassed { .. }));
    }
}
