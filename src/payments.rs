use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::Result;
use crate::events::{Event, EventStore};
use crate::store::DuesStore;
use crate::types::{ObligationId, ObligationStatus, PaymentId, PaymentMethodKind};

/// auditable payment row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: PaymentId,
    pub obligation_id: ObligationId,
    /// amount applied to the obligation (the capped amount, not the tender)
    pub amount: Money,
    pub method: PaymentMethodKind,
    pub paid_at: DateTime<Utc>,
    /// external reference: check number, processor intent id, etc
    pub reference: Option<String>,
    pub notes: Option<String>,
    /// set when the row has been matched against a bank statement
    pub reconciled: bool,
}

/// payment to apply to one obligation
#[derive(Debug, Clone)]
pub struct PaymentInput {
    pub obligation_id: ObligationId,
    pub amount: Money,
    pub method: PaymentMethodKind,
    pub paid_at: DateTime<Utc>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub reconciled: bool,
}

/// result of applying a payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentApplication {
    pub payment_id: PaymentId,
    /// portion applied to the balance
    pub applied: Money,
    /// portion above the open balance, returned to the caller rather than
    /// absorbed
    pub excess: Money,
    pub new_balance: Money,
    pub new_status: ObligationStatus,
}

/// applies payments to obligations under the store's per-obligation lock
///
/// safe to invoke concurrently for different obligations; no
/// cross-obligation locking
pub struct PaymentRecorder<'a, S: DuesStore> {
    store: &'a S,
}

impl<'a, S: DuesStore> PaymentRecorder<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// apply a payment (manual entry or processor-confirmed), recomputing
    /// balance and status atomically and writing the audit row
    pub fn record(&self, input: PaymentInput, events: &mut EventStore) -> Result<PaymentApplication> {
        let outcome = self.store.with_obligation(input.obligation_id, |ob| {
            let (applied, excess) = ob.apply_payment(input.amount, input.paid_at)?;
            Ok((applied, excess, ob.balance(), ob.status))
        })?;
        let (applied, excess, new_balance, new_status) = outcome;

        let record = PaymentRecord {
            payment_id: Uuid::new_v4(),
            obligation_id: input.obligation_id,
            amount: applied,
            method: input.method,
            paid_at: input.paid_at,
            reference: input.reference,
            notes: input.notes,
            reconciled: input.reconciled,
        };
        let payment_id = record.payment_id;
        self.store.insert_payment_record(record)?;

        events.emit(Event::PaymentRecorded {
            obligation_id: input.obligation_id,
            amount: input.amount,
            applied,
            excess,
            method: input.method,
            timestamp: input.paid_at,
        });

        Ok(PaymentApplication {
            payment_id,
            applied,
            excess,
            new_balance,
            new_status,
        })
    }
}
