use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{
    ConfigId, ObligationId, ObligationStatus, PaymentMethodKind, PlanId,
};

/// all events that can be emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // obligation lifecycle
    ObligationAssigned {
        obligation_id: ObligationId,
        member_id: String,
        config_id: ConfigId,
        amount: Money,
        due_date: DateTime<Utc>,
    },
    AdjustmentApplied {
        obligation_id: ObligationId,
        amount: Money,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    ObligationWaived {
        obligation_id: ObligationId,
        balance_forgiven: Money,
        timestamp: DateTime<Utc>,
    },
    ObligationDeleted {
        obligation_id: ObligationId,
        timestamp: DateTime<Utc>,
    },
    StatusChanged {
        obligation_id: ObligationId,
        old_status: ObligationStatus,
        new_status: ObligationStatus,
        timestamp: DateTime<Utc>,
    },

    // late fees
    LateFeeAssessed {
        obligation_id: ObligationId,
        fee: Money,
        days_overdue: u32,
        timestamp: DateTime<Utc>,
    },

    // payments
    PaymentRecorded {
        obligation_id: ObligationId,
        amount: Money,
        applied: Money,
        excess: Money,
        method: PaymentMethodKind,
        timestamp: DateTime<Utc>,
    },

    // installment plans
    PlanCreated {
        plan_id: PlanId,
        obligation_id: ObligationId,
        num_installments: u32,
        total: Money,
        deadline: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    InstallmentChargeSubmitted {
        plan_id: PlanId,
        installment_number: u32,
        intent_id: String,
        amount_charged: Money,
        timestamp: DateTime<Utc>,
    },
    InstallmentSettled {
        plan_id: PlanId,
        installment_number: u32,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    InstallmentFailed {
        plan_id: PlanId,
        installment_number: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    PlanCompleted {
        plan_id: PlanId,
        timestamp: DateTime<Utc>,
    },
    PlanCancelled {
        plan_id: PlanId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    ReconciliationMismatch {
        plan_id: PlanId,
        installment_number: u32,
        stored: String,
        reported: String,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
