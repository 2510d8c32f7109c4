pub mod orchestrator;
pub mod schedule;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{ObligationId, PlanId};

pub use orchestrator::{
    CreatePlanRequest, FirstPaymentOutcome, InstallmentCharge, PayoutSettings, PlanCreation,
    PlanOrchestrator, SettlementReport,
};
pub use schedule::build_schedule;

/// administrator-granted permission to split an obligation into installments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentEligibility {
    pub obligation_id: ObligationId,
    pub is_eligible: bool,
    /// plan sizes the administrator allows, e.g. [2, 3]
    pub allowed_plan_sizes: Vec<u32>,
    pub notes: Option<String>,
    pub granted_at: DateTime<Utc>,
}

impl InstallmentEligibility {
    pub fn allows(&self, num_installments: u32) -> bool {
        self.is_eligible && self.allowed_plan_sizes.contains(&num_installments)
    }
}

/// installment plan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStatus {
    Active,
    Completed,
    Cancelled,
}

/// per-installment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallmentStatus {
    /// waiting to be charged
    Scheduled,
    /// charge submitted, settlement pending (bank transfers, or a strong
    /// authentication challenge the payer has not completed)
    Processing,
    Paid,
    Failed,
}

impl InstallmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallmentStatus::Scheduled => "scheduled",
            InstallmentStatus::Processing => "processing",
            InstallmentStatus::Paid => "paid",
            InstallmentStatus::Failed => "failed",
        }
    }
}

/// a multi-payment plan against a single obligation
///
/// at most one active plan exists per obligation at a time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallmentPlan {
    pub plan_id: PlanId,
    pub obligation_id: ObligationId,
    pub num_installments: u32,
    pub installments_paid: u32,
    pub next_payment_date: Option<DateTime<Utc>>,
    pub status: PlanStatus,
    /// processor-side saved method used for auto-charging
    pub payment_method_id: String,
    /// frozen at creation from the obligation's flexible deadline or due date
    pub deadline_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl InstallmentPlan {
    pub fn new(
        obligation_id: ObligationId,
        num_installments: u32,
        payment_method_id: impl Into<String>,
        deadline_date: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            plan_id: Uuid::new_v4(),
            obligation_id,
            num_installments,
            installments_paid: 0,
            next_payment_date: None,
            status: PlanStatus::Active,
            payment_method_id: payment_method_id.into(),
            deadline_date,
            created_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PlanStatus::Active
    }
}

/// ordered child row of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentPayment {
    pub plan_id: PlanId,
    /// 1-based
    pub installment_number: u32,
    pub amount: Money,
    pub scheduled_date: DateTime<Utc>,
    pub status: InstallmentStatus,
    /// processor payment-intent id once a charge has been submitted
    pub intent_id: Option<String>,
}
