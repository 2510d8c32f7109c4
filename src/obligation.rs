use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{DuesError, Result};
use crate::types::{ConfigId, EffectiveStatus, ObligationId, ObligationStatus};

/// a member's dues record for one period
///
/// invariants, re-established after every mutation:
/// `total_amount = base_amount + late_fee + adjustment` and
/// `balance = max(total_amount - amount_paid, 0)` (zero once waived)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberObligation {
    pub obligation_id: ObligationId,
    pub member_id: String,
    pub member_email: String,
    pub config_id: ConfigId,

    // amounts
    pub base_amount: Money,
    /// accrued by the late-fee sweep only
    pub late_fee: Money,
    /// signed administrative correction, distinct from late fees
    pub adjustment: Money,
    pub adjustment_reason: Option<String>,
    pub amount_paid: Money,

    // dates
    pub due_date: DateTime<Utc>,
    pub paid_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// set when the sweep assesses a fee; the idempotence marker for the
    /// current cycle, independent of the late_fee amount
    pub late_fee_assessed_at: Option<DateTime<Utc>>,

    // administrator-granted exception to the configuration due date,
    // used as the installment-plan deadline when present
    pub flexible_deadline: Option<DateTime<Utc>>,
    pub flexible_notes: Option<String>,

    pub status: ObligationStatus,
    pub notes: Option<String>,
}

impl MemberObligation {
    pub fn new(
        member_id: impl Into<String>,
        member_email: impl Into<String>,
        config_id: ConfigId,
        base_amount: Money,
        due_date: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            obligation_id: Uuid::new_v4(),
            member_id: member_id.into(),
            member_email: member_email.into(),
            config_id,
            base_amount,
            late_fee: Money::ZERO,
            adjustment: Money::ZERO,
            adjustment_reason: None,
            amount_paid: Money::ZERO,
            due_date,
            paid_date: None,
            created_at,
            late_fee_assessed_at: None,
            flexible_deadline: None,
            flexible_notes: None,
            status: ObligationStatus::Pending,
            notes: None,
        }
    }

    /// base + late fee + adjustment
    pub fn total_amount(&self) -> Money {
        self.base_amount + self.late_fee + self.adjustment
    }

    /// remaining amount owed, never negative, zero once waived
    pub fn balance(&self) -> Money {
        if self.status == ObligationStatus::Waived {
            return Money::ZERO;
        }
        (self.total_amount() - self.amount_paid).max(Money::ZERO)
    }

    pub fn is_waived(&self) -> bool {
        self.status == ObligationStatus::Waived
    }

    /// overdue is derived, never stored
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.balance().is_positive() && now > self.due_date
    }

    pub fn days_overdue(&self, now: DateTime<Utc>) -> u32 {
        if !self.is_overdue(now) {
            return 0;
        }
        (now - self.due_date).num_days().max(0) as u32
    }

    /// persisted status folded together with the due-date comparison
    pub fn effective_status(&self, now: DateTime<Utc>) -> EffectiveStatus {
        match self.status {
            ObligationStatus::Waived => EffectiveStatus::Waived,
            ObligationStatus::Paid => EffectiveStatus::Paid,
            ObligationStatus::Pending if self.is_overdue(now) => EffectiveStatus::Overdue,
            ObligationStatus::Partial if self.is_overdue(now) => EffectiveStatus::Overdue,
            ObligationStatus::Pending => EffectiveStatus::Pending,
            ObligationStatus::Partial => EffectiveStatus::Partial,
        }
    }

    /// deadline for an installment plan: flexible deadline wins over the
    /// (possibly member-overridden) due date
    pub fn installment_deadline(&self) -> DateTime<Utc> {
        self.flexible_deadline.unwrap_or(self.due_date)
    }

    /// re-derive status from amounts; invoked after every mutation of
    /// amount_paid, late_fee, base_amount, or adjustment
    ///
    /// returns the transition when the status changed
    pub fn recompute(
        &mut self,
        now: DateTime<Utc>,
    ) -> Option<(ObligationStatus, ObligationStatus)> {
        if self.status == ObligationStatus::Waived {
            return None;
        }

        let old = self.status;
        let new = if (self.total_amount() - self.amount_paid) <= Money::ZERO {
            if self.paid_date.is_none() {
                self.paid_date = Some(now);
            }
            ObligationStatus::Paid
        } else if self.amount_paid.is_positive() {
            ObligationStatus::Partial
        } else {
            ObligationStatus::Pending
        };

        self.status = new;
        if old != new {
            Some((old, new))
        } else {
            None
        }
    }

    /// apply a payment, capping the applied amount at the open balance
    ///
    /// returns (applied, excess); the excess is reported back to the
    /// caller, never silently absorbed
    pub fn apply_payment(&mut self, amount: Money, now: DateTime<Utc>) -> Result<(Money, Money)> {
        if !amount.is_positive() {
            return Err(DuesError::InvalidAmount { amount });
        }
        if self.is_waived() {
            return Err(DuesError::ObligationWaived {
                obligation_id: self.obligation_id,
            });
        }

        let applied = amount.min(self.balance());
        let excess = amount - applied;
        self.amount_paid += applied;
        self.recompute(now);
        Ok((applied, excess))
    }

    /// one-way transition; balance drops to zero regardless of amount_paid
    pub fn waive(&mut self, now: DateTime<Utc>) -> Result<Money> {
        if self.is_waived() {
            return Err(DuesError::ObligationWaived {
                obligation_id: self.obligation_id,
            });
        }
        let forgiven = self.balance();
        self.status = ObligationStatus::Waived;
        if self.paid_date.is_none() {
            self.paid_date = Some(now);
        }
        Ok(forgiven)
    }

    /// set a signed administrative correction; a reason is required when
    /// the adjustment is nonzero
    pub fn set_adjustment(
        &mut self,
        amount: Money,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.is_waived() {
            return Err(DuesError::ObligationWaived {
                obligation_id: self.obligation_id,
            });
        }
        if !amount.is_zero() && reason.as_deref().map_or(true, |r| r.trim().is_empty()) {
            return Err(DuesError::validation(
                "a nonzero adjustment requires a reason",
            ));
        }
        self.adjustment = amount;
        self.adjustment_reason = reason;
        self.recompute(now);
        Ok(())
    }

    /// administrative correction of the base charge
    pub fn set_base_amount(&mut self, amount: Money, now: DateTime<Utc>) -> Result<()> {
        if !amount.is_positive() {
            return Err(DuesError::InvalidAmount { amount });
        }
        if self.is_waived() {
            return Err(DuesError::ObligationWaived {
                obligation_id: self.obligation_id,
            });
        }
        self.base_amount = amount;
        self.recompute(now);
        Ok(())
    }

    /// record a late fee assessed by the sweep and mark the cycle
    pub fn assess_late_fee(&mut self, fee: Money, now: DateTime<Utc>) {
        self.late_fee += fee;
        self.late_fee_assessed_at = Some(now);
        self.recompute(now);
    }

    pub fn grant_flexible_deadline(
        &mut self,
        deadline: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<()> {
        if self.is_waived() {
            return Err(DuesError::ObligationWaived {
                obligation_id: self.obligation_id,
            });
        }
        self.flexible_deadline = Some(deadline);
        self.flexible_notes = notes;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn obligation() -> MemberObligation {
        let due = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
        let created = Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap();
        MemberObligation::new(
            "m-1",
            "m1@example.org",
            Uuid::new_v4(),
            Money::from_major(100),
            due,
            created,
        )
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_balance_invariant_after_each_mutation() {
        let mut ob = obligation();
        let now = at(2025, 9, 15);

        let check = |ob: &MemberObligation| {
            assert_eq!(
                ob.balance(),
                (ob.base_amount + ob.late_fee + ob.adjustment - ob.amount_paid).max(Money::ZERO)
            );
        };

        check(&ob);
        ob.apply_payment(Money::from_major(40), now).unwrap();
        check(&ob);
        ob.assess_late_fee(Money::from_major(10), now);
        check(&ob);
        ob.set_adjustment(-Money::from_major(5), Some("board vote".to_string()), now)
            .unwrap();
        check(&ob);
        ob.set_base_amount(Money::from_major(90), now).unwrap();
        check(&ob);
    }

    #[test]
    fn test_status_transitions() {
        let mut ob = obligation();
        let now = at(2025, 9, 15);
        assert_eq!(ob.status, ObligationStatus::Pending);

        ob.apply_payment(Money::from_major(30), now).unwrap();
        assert_eq!(ob.status, ObligationStatus::Partial);

        ob.apply_payment(Money::from_major(70), now).unwrap();
        assert_eq!(ob.status, ObligationStatus::Paid);
        assert_eq!(ob.paid_date, Some(now));
        assert_eq!(ob.balance(), Money::ZERO);
    }

    #[test]
    fn test_paid_reopens_when_fee_added() {
        let mut ob = obligation();
        let now = at(2025, 9, 15);
        ob.apply_payment(Money::from_major(100), now).unwrap();
        assert_eq!(ob.status, ObligationStatus::Paid);

        // a later fee re-opens the balance but keeps the original paid_date
        ob.assess_late_fee(Money::from_major(15), at(2025, 10, 20));
        assert_eq!(ob.status, ObligationStatus::Partial);
        assert_eq!(ob.balance(), Money::from_major(15));
        assert_eq!(ob.paid_date, Some(now));
    }

    #[test]
    fn test_overdue_is_derived() {
        let mut ob = obligation();
        assert!(!ob.is_overdue(at(2025, 9, 15)));
        assert!(ob.is_overdue(at(2025, 10, 5)));
        assert_eq!(ob.days_overdue(at(2025, 10, 5)), 4);
        assert_eq!(ob.effective_status(at(2025, 10, 5)), EffectiveStatus::Overdue);
        assert_eq!(
            ob.effective_status(at(2025, 9, 15)),
            EffectiveStatus::Pending
        );

        ob.apply_payment(Money::from_major(100), at(2025, 10, 6))
            .unwrap();
        assert!(!ob.is_overdue(at(2025, 10, 7)));
        assert_eq!(ob.effective_status(at(2025, 10, 7)), EffectiveStatus::Paid);
    }

    #[test]
    fn test_waive_is_terminal_and_zeroes_balance() {
        let mut ob = obligation();
        let now = at(2025, 9, 15);
        ob.apply_payment(Money::from_major(25), now).unwrap();

        let forgiven = ob.waive(now).unwrap();
        assert_eq!(forgiven, Money::from_major(75));
        assert_eq!(ob.balance(), Money::ZERO);
        assert_eq!(ob.status, ObligationStatus::Waived);

        // waived rows reject further mutation
        assert!(ob.waive(now).is_err());
        assert!(ob.apply_payment(Money::from_major(1), now).is_err());
        assert!(ob
            .set_adjustment(Money::from_major(1), Some("x".to_string()), now)
            .is_err());
        // and recompute never leaves waived
        ob.recompute(now);
        assert_eq!(ob.status, ObligationStatus::Waived);
    }

    #[test]
    fn test_overpayment_is_capped_with_excess_reported() {
        let mut ob = obligation();
        let now = at(2025, 9, 15);
        let (applied, excess) = ob.apply_payment(Money::from_major(120), now).unwrap();
        assert_eq!(applied, Money::from_major(100));
        assert_eq!(excess, Money::from_major(20));
        assert_eq!(ob.amount_paid, Money::from_major(100));
        assert_eq!(ob.status, ObligationStatus::Paid);
    }

    #[test]
    fn test_adjustment_requires_reason() {
        let mut ob = obligation();
        let now = at(2025, 9, 15);
        assert!(ob.set_adjustment(Money::from_major(5), None, now).is_err());
        assert!(ob
            .set_adjustment(Money::from_major(5), Some("  ".to_string()), now)
            .is_err());
        assert!(ob.set_adjustment(Money::ZERO, None, now).is_ok());
        assert!(ob
            .set_adjustment(-Money::from_major(20), Some("hardship".to_string()), now)
            .is_ok());
        assert_eq!(ob.balance(), Money::from_major(80));
    }

    #[test]
    fn test_installment_deadline_resolution() {
        let mut ob = obligation();
        assert_eq!(ob.installment_deadline(), ob.due_date);

        let extended = at(2025, 12, 15);
        ob.grant_flexible_deadline(extended, Some("payment plan approved".to_string()))
            .unwrap();
        assert_eq!(ob.installment_deadline(), extended);
    }
}
