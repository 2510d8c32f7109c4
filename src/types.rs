use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// unique identifier for a dues configuration
pub type ConfigId = Uuid;

/// unique identifier for a member obligation
pub type ObligationId = Uuid;

/// unique identifier for an installment plan
pub type PlanId = Uuid;

/// unique identifier for a recorded payment
pub type PaymentId = Uuid;

/// a member of the organization, as provided by the roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub member_id: String,
    pub email: String,
    pub cohort: Option<String>,
    pub active: bool,
}

/// persisted status of an obligation
///
/// overdue is never persisted; it is derived from the due date at query
/// time so the stored status cannot drift from the calendar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObligationStatus {
    /// created, nothing paid
    Pending,
    /// partially paid
    Partial,
    /// fully paid
    Paid,
    /// forgiven by an administrator, terminal
    Waived,
}

/// status with overdue derived against a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectiveStatus {
    Pending,
    Partial,
    Overdue,
    Paid,
    Waived,
}

/// how a payment was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethodKind {
    Card,
    BankAccount,
    Cash,
    Check,
    Other,
}

/// processor fee class for a payment method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethodClass {
    Card,
    BankTransfer,
}

impl PaymentMethodKind {
    /// fee class when charged through the processor
    pub fn fee_class(&self) -> Option<PaymentMethodClass> {
        match self {
            PaymentMethodKind::Card => Some(PaymentMethodClass::Card),
            PaymentMethodKind::BankAccount => Some(PaymentMethodClass::BankTransfer),
            _ => None,
        }
    }
}

/// a reusable payment instrument saved against a member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedPaymentMethod {
    /// processor-side method id
    pub method_id: String,
    pub member_id: String,
    pub kind: PaymentMethodKind,
    pub last4: String,
    pub brand: Option<String>,
    pub saved_at: DateTime<Utc>,
}
