use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{DuesError, Result};
use crate::types::{ObligationId, PaymentMethodKind, PlanId};

/// processor-side customer profile reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRef {
    pub customer_id: String,
}

/// a payment method as the processor reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorPaymentMethod {
    pub method_id: String,
    /// customer the method is attached to; checked against the requesting
    /// member's profile before any charge
    pub customer_id: String,
    pub kind: PaymentMethodKind,
    pub last4: String,
    pub brand: Option<String>,
}

/// metadata tagged onto every charge so processor records link back to the
/// obligation, plan, and installment row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeMetadata {
    pub obligation_id: ObligationId,
    pub plan_id: PlanId,
    pub installment_number: u32,
}

/// a payment-intent creation request
///
/// confirmed immediately and off-session; the destination split routes the
/// organization's net to its connected payout account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    /// amount charged to the payer, fees included
    pub amount: Money,
    pub currency: String,
    pub customer_id: String,
    pub payment_method_id: String,
    /// the organization's connected payout account
    pub destination_account: String,
    /// explicit split amount forwarded to the destination
    pub transfer_amount: Money,
    pub off_session: bool,
    pub metadata: ChargeMetadata,
}

/// processor response states the engine consumes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeOutcome {
    /// settled immediately (typical for cards)
    Succeeded { intent_id: String },
    /// submitted, settles later (typical for bank transfers)
    Processing { intent_id: String },
    /// payer must complete a challenge; the caller gets the client secret
    /// and may never return
    RequiresAction {
        intent_id: String,
        client_secret: String,
    },
    /// declined before any money moved
    Failed {
        intent_id: Option<String>,
        reason: String,
    },
}

/// payment processor boundary
///
/// a transport-level failure is an `Err`; a declined charge is
/// `Ok(ChargeOutcome::Failed)` — the two are handled differently by the
/// orchestrator
pub trait PaymentProcessor: Send + Sync {
    /// find or create the processor customer profile for a member
    fn ensure_customer(&self, member_id: &str, email: &str) -> Result<CustomerRef>;

    /// retrieve a payment method together with its owning customer
    fn retrieve_payment_method(&self, method_id: &str) -> Result<ProcessorPaymentMethod>;

    /// create and confirm a payment intent
    fn create_payment_intent(&self, request: &ChargeRequest) -> Result<ChargeOutcome>;
}

/// scriptable in-memory processor for tests and examples
///
/// register customers and methods up front, queue charge outcomes, and
/// inspect the requests the engine submitted
#[derive(Debug, Default)]
pub struct MockProcessor {
    inner: std::sync::Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    customers: std::collections::HashMap<String, String>,
    methods: std::collections::HashMap<String, ProcessorPaymentMethod>,
    outcomes: std::collections::VecDeque<Result<ChargeOutcome>>,
    requests: Vec<ChargeRequest>,
    intent_seq: u32,
}

impl MockProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// register a member -> customer mapping
    pub fn register_customer(&self, member_id: &str, customer_id: &str) {
        let mut state = self.inner.lock().expect("mock poisoned");
        state
            .customers
            .insert(member_id.to_string(), customer_id.to_string());
    }

    /// register a payment method attached to a customer
    pub fn register_method(
        &self,
        method_id: &str,
        customer_id: &str,
        kind: PaymentMethodKind,
        last4: &str,
    ) {
        let mut state = self.inner.lock().expect("mock poisoned");
        state.methods.insert(
            method_id.to_string(),
            ProcessorPaymentMethod {
                method_id: method_id.to_string(),
                customer_id: customer_id.to_string(),
                kind,
                last4: last4.to_string(),
                brand: None,
            },
        );
    }

    /// queue the outcome for the next charge; defaults to Succeeded when
    /// the queue is empty
    pub fn queue_outcome(&self, outcome: ChargeOutcome) {
        let mut state = self.inner.lock().expect("mock poisoned");
        state.outcomes.push_back(Ok(outcome));
    }

    /// queue a transport-level failure for the next charge
    pub fn queue_transport_error(&self, message: &str) {
        let mut state = self.inner.lock().expect("mock poisoned");
        state
            .outcomes
            .push_back(Err(DuesError::processor(message.to_string())));
    }

    /// charge requests submitted so far
    pub fn requests(&self) -> Vec<ChargeRequest> {
        self.inner.lock().expect("mock poisoned").requests.clone()
    }
}

impl PaymentProcessor for MockProcessor {
    fn ensure_customer(&self, member_id: &str, _email: &str) -> Result<CustomerRef> {
        let mut state = self.inner.lock().expect("mock poisoned");
        let customer_id = state
            .customers
            .entry(member_id.to_string())
            .or_insert_with(|| format!("cus_{}", member_id))
            .clone();
        Ok(CustomerRef { customer_id })
    }

    fn retrieve_payment_method(&self, method_id: &str) -> Result<ProcessorPaymentMethod> {
        let state = self.inner.lock().expect("mock poisoned");
        state
            .methods
            .get(method_id)
            .cloned()
            .ok_or(DuesError::NotFound {
                entity: "payment method",
                id: method_id.to_string(),
            })
    }

    fn create_payment_intent(&self, request: &ChargeRequest) -> Result<ChargeOutcome> {
        let mut state = self.inner.lock().expect("mock poisoned");
        state.requests.push(request.clone());
        match state.outcomes.pop_front() {
            Some(outcome) => outcome,
            None => {
                state.intent_seq += 1;
                Ok(ChargeOutcome::Succeeded {
                    intent_id: format!("pi_{}", state.intent_seq),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn request() -> ChargeRequest {
        ChargeRequest {
            amount: Money::from_major(50),
            currency: "usd".to_string(),
            customer_id: "cus_m-1".to_string(),
            payment_method_id: "pm_1".to_string(),
            destination_account: "acct_org".to_string(),
            transfer_amount: Money::from_major(49),
            off_session: true,
            metadata: ChargeMetadata {
                obligation_id: Uuid::new_v4(),
                plan_id: Uuid::new_v4(),
                installment_number: 1,
            },
        }
    }

    #[test]
    fn test_mock_queues_outcomes_in_order() {
        let processor = MockProcessor::new();
        processor.queue_outcome(ChargeOutcome::Processing {
            intent_id: "pi_a".to_string(),
        });
        processor.queue_transport_error("timeout");

        let first = processor.create_payment_intent(&request()).unwrap();
        assert!(matches!(first, ChargeOutcome::Processing { .. }));

        let second = processor.create_payment_intent(&request());
        assert!(second.is_err());

        // queue exhausted: defaults to success
        let third = processor.create_payment_intent(&request()).unwrap();
        assert!(matches!(third, ChargeOutcome::Succeeded { .. }));

        assert_eq!(processor.requests().len(), 3);
    }

    #[test]
    fn test_ensure_customer_is_stable() {
        let processor = MockProcessor::new();
        let a = processor.ensure_customer("m-1", "m1@example.org").unwrap();
        let b = processor.ensure_customer("m-1", "m1@example.org").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_method_lookup() {
        let processor = MockProcessor::new();
        processor.register_method("pm_1", "cus_x", PaymentMethodKind::Card, "4242");
        let method = processor.retrieve_payment_method("pm_1").unwrap();
        assert_eq!(method.customer_id, "cus_x");
        assert!(processor.retrieve_payment_method("pm_404").is_err());
    }
}
