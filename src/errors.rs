use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decimal::Money;
use crate::types::{ConfigId, ObligationId, PlanId};

#[derive(Error, Debug)]
pub enum DuesError {
    #[error("validation failed: {message}")]
    Validation {
        message: String,
    },

    #[error("invalid amount: {amount}")]
    InvalidAmount {
        amount: Money,
    },

    #[error("payment method {method_id} does not belong to the requesting member")]
    ForeignPaymentMethod {
        method_id: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound {
        entity: &'static str,
        id: String,
    },

    #[error("member {member_id} already has an obligation for configuration {config_id}")]
    AlreadyAssigned {
        member_id: String,
        config_id: ConfigId,
    },

    #[error("an active installment plan already exists for obligation {obligation_id}")]
    ActivePlanExists {
        obligation_id: ObligationId,
    },

    #[error("obligation {obligation_id} has recorded payments and cannot be deleted")]
    PaymentsExist {
        obligation_id: ObligationId,
    },

    #[error("obligation {obligation_id} is not eligible for installments")]
    NotEligible {
        obligation_id: ObligationId,
    },

    #[error("plan size {requested} is not in the allowed set {allowed:?}")]
    PlanSizeNotAllowed {
        requested: u32,
        allowed: Vec<u32>,
    },

    #[error("installment deadline {deadline} is not in the future")]
    DeadlinePassed {
        deadline: DateTime<Utc>,
    },

    #[error("obligation {obligation_id} has no outstanding balance")]
    ZeroBalance {
        obligation_id: ObligationId,
    },

    #[error("obligation {obligation_id} is waived")]
    ObligationWaived {
        obligation_id: ObligationId,
    },

    #[error("plan {plan_id} is not active")]
    PlanNotActive {
        plan_id: PlanId,
    },

    #[error("{service} error: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },

    #[error("charge declined for plan {plan_id} installment {installment_number}: {reason}")]
    ChargeDeclined {
        plan_id: PlanId,
        installment_number: u32,
        reason: String,
    },

    #[error(
        "reconciliation mismatch for plan {plan_id} installment {installment_number}: \
         stored {stored}, reported {reported}"
    )]
    Reconciliation {
        plan_id: PlanId,
        installment_number: u32,
        stored: String,
        reported: String,
    },
}

/// stable machine-readable classification for callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Policy,
    ExternalService,
    Reconciliation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Policy => "policy",
            ErrorKind::ExternalService => "external_service",
            ErrorKind::Reconciliation => "reconciliation",
        }
    }
}

impl DuesError {
    pub fn validation(message: impl Into<String>) -> Self {
        DuesError::Validation {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        DuesError::ExternalService {
            service: "store",
            message: message.into(),
        }
    }

    pub fn processor(message: impl Into<String>) -> Self {
        DuesError::ExternalService {
            service: "processor",
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DuesError::Validation { .. }
            | DuesError::InvalidAmount { .. }
            | DuesError::ForeignPaymentMethod { .. } => ErrorKind::Validation,
            DuesError::NotFound { .. } => ErrorKind::NotFound,
            DuesError::AlreadyAssigned { .. }
            | DuesError::ActivePlanExists { .. }
            | DuesError::PaymentsExist { .. } => ErrorKind::Conflict,
            DuesError::NotEligible { .. }
            | DuesError::PlanSizeNotAllowed { .. }
            | DuesError::DeadlinePassed { .. }
            | DuesError::ZeroBalance { .. }
            | DuesError::ObligationWaived { .. }
            | DuesError::PlanNotActive { .. } => ErrorKind::Policy,
            DuesError::ExternalService { .. } | DuesError::ChargeDeclined { .. } => {
                ErrorKind::ExternalService
            }
            DuesError::Reconciliation { .. } => ErrorKind::Reconciliation,
        }
    }

    /// terminal errors must not be retried; external-service errors may be
    /// re-invoked at the top level, relying on the idempotency barriers
    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind(), ErrorKind::ExternalService)
    }
}

pub type Result<T> = std::result::Result<T, DuesError>;
