use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::decimal::{Money, Rate};
use crate::errors::{DuesError, Result};
use crate::types::ConfigId;

/// dues configuration for one organizational period
///
/// immutable once obligations reference it except for administrative
/// correction; never deleted while obligations reference it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuesConfig {
    pub config_id: ConfigId,
    pub name: String,
    pub fiscal_year: i32,
    /// charge when no cohort override matches
    pub default_amount: Money,
    /// per-cohort overrides, e.g. "Freshman" -> 75.00
    pub cohort_amounts: BTreeMap<String, Money>,
    pub due_date: DateTime<Utc>,
    /// None disables late fees for this period
    pub late_fee: Option<LateFeePolicy>,
}

impl DuesConfig {
    pub fn new(
        name: impl Into<String>,
        fiscal_year: i32,
        default_amount: Money,
        due_date: DateTime<Utc>,
    ) -> Self {
        Self {
            config_id: uuid::Uuid::new_v4(),
            name: name.into(),
            fiscal_year,
            default_amount,
            cohort_amounts: BTreeMap::new(),
            due_date,
            late_fee: None,
        }
    }

    pub fn with_cohort_amount(mut self, cohort: impl Into<String>, amount: Money) -> Self {
        self.cohort_amounts.insert(cohort.into(), amount);
        self
    }

    pub fn with_late_fee(mut self, policy: LateFeePolicy) -> Self {
        self.late_fee = Some(policy);
        self
    }

    /// charge amount for a cohort, falling back to the default
    pub fn amount_for_cohort(&self, cohort: Option<&str>) -> Money {
        cohort
            .and_then(|c| self.cohort_amounts.get(c).copied())
            .unwrap_or(self.default_amount)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.default_amount.is_positive() {
            return Err(DuesError::InvalidAmount {
                amount: self.default_amount,
            });
        }
        for (cohort, amount) in &self.cohort_amounts {
            if !amount.is_positive() {
                return Err(DuesError::validation(format!(
                    "cohort {} has non-positive amount {}",
                    cohort, amount
                )));
            }
        }
        if let Some(policy) = &self.late_fee {
            policy.validate()?;
        }
        Ok(())
    }
}

/// late-fee accrual rule
///
/// fixed amounts and percentages are distinct variants so the sweep's
/// idempotence tracking never has to reverse-engineer what a stored
/// delta meant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LateFeeKind {
    /// flat amount per assessment
    Fixed(Money),
    /// percentage of the obligation's base amount
    PercentOfBase(Rate),
}

/// late-fee policy for a configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LateFeePolicy {
    pub kind: LateFeeKind,
    /// days past the due date before a fee is assessed
    pub grace_days: u32,
}

impl LateFeePolicy {
    pub fn fixed(amount: Money, grace_days: u32) -> Self {
        Self {
            kind: LateFeeKind::Fixed(amount),
            grace_days,
        }
    }

    pub fn percent_of_base(rate: Rate, grace_days: u32) -> Self {
        Self {
            kind: LateFeeKind::PercentOfBase(rate),
            grace_days,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.kind {
            LateFeeKind::Fixed(amount) if !amount.is_positive() => {
                Err(DuesError::InvalidAmount { amount })
            }
            LateFeeKind::PercentOfBase(rate) if rate <= Rate::ZERO => Err(DuesError::validation(
                format!("late-fee rate must be positive, got {}", rate),
            )),
            _ => Ok(()),
        }
    }
}

/// processor fee constants
///
/// passed explicitly into the fee calculator and orchestrator so tests can
/// substitute alternate policies
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// card percentage fee (e.g. 2.9%)
    pub card_rate: Rate,
    /// card fixed fee per charge (e.g. $0.30)
    pub card_fixed: Money,
    /// bank-transfer percentage fee (e.g. 0.8%)
    pub ach_rate: Rate,
    /// bank-transfer fee cap (e.g. $5.00)
    pub ach_cap: Money,
    /// flat platform fee taken from the organization's net
    pub platform_rate: Rate,
}

impl FeeSchedule {
    /// standard published processor pricing
    pub fn standard() -> Self {
        Self {
            card_rate: Rate::from_decimal(dec!(0.029)),
            card_fixed: Money::from_cents(30),
            ach_rate: Rate::from_decimal(dec!(0.008)),
            ach_cap: Money::from_major(5),
            platform_rate: Rate::from_percentage(1),
        }
    }
}
