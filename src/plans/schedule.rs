use chrono::{DateTime, Duration, Utc};

use crate::decimal::Money;
use crate::errors::{DuesError, Result};
use crate::plans::{InstallmentPayment, InstallmentStatus};
use crate::types::PlanId;

/// split a balance into n installment rows between `start` and `deadline`
///
/// `base = floor(balance / n)` to the cent; the rounding remainder lands on
/// installment #1 so the amounts reconcile exactly and the remainder is
/// charged immediately rather than deferred. installment #1 is scheduled at
/// `start`, the rest evenly spaced up to the deadline
pub fn build_schedule(
    plan_id: PlanId,
    balance: Money,
    num_installments: u32,
    start: DateTime<Utc>,
    deadline: DateTime<Utc>,
) -> Result<Vec<InstallmentPayment>> {
    if num_installments < 2 {
        return Err(DuesError::validation(format!(
            "an installment plan needs at least 2 installments, got {}",
            num_installments
        )));
    }
    if !balance.is_positive() {
        return Err(DuesError::InvalidAmount { amount: balance });
    }
    if deadline <= start {
        return Err(DuesError::DeadlinePassed { deadline });
    }

    // integer cent arithmetic so the floor is exact
    let balance_cents = balance.as_cents();
    let base_cents = balance_cents / num_installments as i64;
    let remainder_cents = balance_cents - base_cents * num_installments as i64;
    let base = Money::from_cents(base_cents);
    let first = Money::from_cents(base_cents + remainder_cents);

    let span_seconds = (deadline - start).num_seconds();
    let interval = span_seconds / num_installments as i64;

    let mut rows = Vec::with_capacity(num_installments as usize);
    for i in 1..=num_installments {
        rows.push(InstallmentPayment {
            plan_id,
            installment_number: i,
            amount: if i == 1 { first } else { base },
            scheduled_date: start + Duration::seconds(interval * (i as i64 - 1)),
            status: InstallmentStatus::Scheduled,
            intent_id: None,
        });
    }

    Ok(rows)
}
