pub mod assignment;
pub mod config;
pub mod decimal;
pub mod engine;
pub mod errors;
pub mod events;
pub mod export;
pub mod fees;
pub mod latefee;
pub mod obligation;
pub mod payments;
pub mod plans;
pub mod processor;
pub mod store;
pub mod types;

// re-export key types
pub use decimal::{Money, Rate};
pub use engine::DuesEngine;
pub use errors::{DuesError, ErrorKind, Result};
pub use events::{Event, EventStore};
pub use assignment::{
    Assigner, AssignmentRequest, BulkAssignError, BulkAssignOutcome, BulkFilters,
};
pub use config::{DuesConfig, FeeSchedule, LateFeeKind, LateFeePolicy};
pub use export::{export_config, ObligationExport};
pub use fees::{quote, FeeBreakdown};
pub use latefee::{LateFeeEngine, SweepOutcome};
pub use obligation::MemberObligation;
pub use payments::{PaymentApplication, PaymentInput, PaymentRecord, PaymentRecorder};
pub use plans::{
    build_schedule, CreatePlanRequest, FirstPaymentOutcome, InstallmentCharge,
    InstallmentEligibility, InstallmentPayment, InstallmentPlan, InstallmentStatus,
    PayoutSettings, PlanCreation, PlanOrchestrator, PlanStatus, SettlementReport,
};
pub use processor::{
    ChargeMetadata, ChargeOutcome, ChargeRequest, CustomerRef, MockProcessor, PaymentProcessor,
    ProcessorPaymentMethod,
};
pub use store::{DuesStore, InMemoryStore};
pub use types::{
    ConfigId, EffectiveStatus, Member, ObligationId, ObligationStatus, PaymentId,
    PaymentMethodClass, PaymentMethodKind, PlanId, SavedPaymentMethod,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
