use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::FeeSchedule;
use crate::decimal::Money;
use crate::errors::{DuesError, Result};
use crate::types::PaymentMethodClass;

/// breakdown of a single charge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    /// fee retained by the payment processor
    pub processor_fee: Money,
    /// amount actually charged to the payer
    pub total_charge: Money,
    /// amount the organization receives after processor and platform fees
    pub net_amount: Money,
}

/// compute processor fee, payer total, and organization net for a charge
///
/// card charges gross the fee up so the organization nets the base amount:
/// `total = (amount + fixed) / (1 - rate)`, rounded to the cent. bank
/// transfers charge the payer the base amount and the organization absorbs
/// the (capped) fee. the platform fee always comes out of the
/// organization's side
pub fn quote(schedule: &FeeSchedule, amount: Money, class: PaymentMethodClass) -> Result<FeeBreakdown> {
    if !amount.is_positive() {
        return Err(DuesError::InvalidAmount { amount });
    }

    let platform_fee = amount.apply_rate(schedule.platform_rate);

    match class {
        PaymentMethodClass::Card => {
            let gross = (amount + schedule.card_fixed).as_decimal()
                / (Decimal::ONE - schedule.card_rate.as_decimal());
            let total_charge = Money::from_decimal(gross);
            Ok(FeeBreakdown {
                processor_fee: total_charge - amount,
                total_charge,
                net_amount: amount - platform_fee,
            })
        }
        PaymentMethodClass::BankTransfer => {
            let processor_fee = amount.apply_rate(schedule.ach_rate).min(schedule.ach_cap);
            Ok(FeeBreakdown {
                processor_fee,
                total_charge: amount,
                net_amount: amount - processor_fee - platform_fee,
            })
        }
    }
}
