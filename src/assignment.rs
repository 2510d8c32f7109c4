use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};

use crate::config::DuesConfig;
use crate::decimal::Money;
use crate::errors::{DuesError, ErrorKind, Result};
use crate::events::{Event, EventStore};
use crate::obligation::MemberObligation;
use crate::store::DuesStore;
use crate::types::{ConfigId, Member, ObligationId};

/// single-assignment request
#[derive(Debug, Clone)]
pub struct AssignmentRequest {
    pub member: Member,
    /// explicit amount; falls back to the cohort override, then the
    /// configuration default
    pub amount: Option<Money>,
    /// per-member due-date override
    pub due_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// roster filters for bulk assignment
#[derive(Debug, Clone, Default)]
pub struct BulkFilters {
    pub cohort: Option<String>,
    pub active_only: bool,
}

impl BulkFilters {
    fn matches(&self, member: &Member) -> bool {
        if self.active_only && !member.active {
            return false;
        }
        match &self.cohort {
            Some(cohort) => member.cohort.as_deref() == Some(cohort.as_str()),
            None => true,
        }
    }
}

/// per-member failure inside a bulk run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkAssignError {
    pub member_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// bulk result; one member's failure never aborts the batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkAssignOutcome {
    pub assigned: u32,
    pub skipped: u32,
    pub errors: Vec<BulkAssignError>,
}

enum ItemOutcome {
    Assigned { id: ObligationId, event: Event },
    Skipped,
    Error(BulkAssignError),
}

/// creates obligations from a configuration and a member population
pub struct Assigner<'a, S: DuesStore> {
    store: &'a S,
}

impl<'a, S: DuesStore> Assigner<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// assign one member; a duplicate (member, configuration) pair is an
    /// explicit AlreadyAssigned conflict, not a silent no-op
    pub fn assign_one(
        &self,
        config_id: ConfigId,
        request: AssignmentRequest,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<ObligationId> {
        let config = self.store.config(config_id)?;
        let now = time_provider.now();
        match self.insert(&config, &request, now)? {
            ItemOutcome::Assigned { id, event } => {
                events.emit(event);
                Ok(id)
            }
            ItemOutcome::Skipped => Err(DuesError::AlreadyAssigned {
                member_id: request.member.member_id,
                config_id,
            }),
            ItemOutcome::Error(err) => Err(DuesError::validation(err.message)),
        }
    }

    /// assign every matching roster member not already assigned
    ///
    /// the roster is processed in parallel chunks; results are merged into
    /// counts plus itemized errors
    pub fn assign_bulk(
        &self,
        config_id: ConfigId,
        roster: &[Member],
        filters: &BulkFilters,
        amount: Option<Money>,
        due_date: Option<DateTime<Utc>>,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<BulkAssignOutcome> {
        let config = self.store.config(config_id)?;
        let now = time_provider.now();

        let selected: Vec<&Member> = roster.iter().filter(|m| filters.matches(m)).collect();
        if selected.is_empty() {
            return Ok(BulkAssignOutcome::default());
        }

        let chunk_size = selected.len().div_ceil(8).max(1);
        let mut items: Vec<ItemOutcome> = Vec::with_capacity(selected.len());

        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for chunk in selected.chunks(chunk_size) {
                let config = &config;
                handles.push(scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|member| {
                            let request = AssignmentRequest {
                                member: (*member).clone(),
                                amount,
                                due_date,
                                notes: None,
                            };
                            self.insert(config, &request, now).unwrap_or_else(|err| {
                                ItemOutcome::Error(BulkAssignError {
                                    member_id: member.member_id.clone(),
                                    kind: err.kind(),
                                    message: err.to_string(),
                                })
                            })
                        })
                        .collect::<Vec<_>>()
                }));
            }
            for handle in handles {
                match handle.join() {
                    Ok(chunk_items) => items.extend(chunk_items),
                    Err(_) => items.push(ItemOutcome::Error(BulkAssignError {
                        member_id: String::new(),
                        kind: ErrorKind::ExternalService,
                        message: "bulk assignment worker panicked".to_string(),
                    })),
                }
            }
        });

        let mut outcome = BulkAssignOutcome::default();
        for item in items {
            match item {
                ItemOutcome::Assigned { event, .. } => {
                    outcome.assigned += 1;
                    events.emit(event);
                }
                ItemOutcome::Skipped => outcome.skipped += 1,
                ItemOutcome::Error(err) => outcome.errors.push(err),
            }
        }
        Ok(outcome)
    }

    fn insert(
        &self,
        config: &DuesConfig,
        request: &AssignmentRequest,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome> {
        let amount = request
            .amount
            .unwrap_or_else(|| config.amount_for_cohort(request.member.cohort.as_deref()));
        if !amount.is_positive() {
            return Err(DuesError::InvalidAmount { amount });
        }
        let due_date = request.due_date.unwrap_or(config.due_date);

        let mut obligation = MemberObligation::new(
            request.member.member_id.clone(),
            request.member.email.clone(),
            config.config_id,
            amount,
            due_date,
            now,
        );
        obligation.notes = request.notes.clone();
        let id = obligation.obligation_id;
        let event = Event::ObligationAssigned {
            obligation_id: id,
            member_id: obligation.member_id.clone(),
            config_id: config.config_id,
            amount,
            due_date,
        };

        match self.store.insert_obligation(obligation) {
            Ok(()) => Ok(ItemOutcome::Assigned { id, event }),
            Err(DuesError::AlreadyAssigned { .. }) => Ok(ItemOutcome::Skipped),
            Err(err) => Err(err),
        }
    }
}
