use chrono::Duration;
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};

use crate::config::LateFeeKind;
use crate::decimal::Money;
use crate::errors::Result;
use crate::events::{Event, EventStore};
use crate::store::DuesStore;
use crate::types::ConfigId;

/// result of one sweep over a configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub assessed: u32,
    pub skipped: u32,
    pub fees_added: Money,
}

/// assesses late fees on overdue obligations, exactly once per obligation
/// per cycle
///
/// triggering the sweep is the caller's responsibility; there is no
/// internal scheduler
pub struct LateFeeEngine<'a, S: DuesStore> {
    store: &'a S,
}

impl<'a, S: DuesStore> LateFeeEngine<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// sweep every obligation in a configuration
    ///
    /// an obligation is assessed when its balance is positive, it is not
    /// waived, the grace period past its due date has elapsed, and the
    /// per-obligation assessment marker is unset. the marker makes the
    /// sweep idempotent independently of manual adjustments that may look
    /// like fees
    pub fn sweep(
        &self,
        config_id: ConfigId,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<SweepOutcome> {
        let config = self.store.config(config_id)?;
        let policy = match config.late_fee {
            Some(policy) => policy,
            None => return Ok(SweepOutcome::default()),
        };
        let now = time_provider.now();

        let mut outcome = SweepOutcome::default();
        for row in self.store.obligations_for_config(config_id)? {
            let assessed = self.store.with_obligation(row.obligation_id, |ob| {
                if ob.is_waived()
                    || !ob.balance().is_positive()
                    || ob.late_fee_assessed_at.is_some()
                    || now <= ob.due_date + Duration::days(policy.grace_days as i64)
                {
                    return Ok(None);
                }

                let fee = match policy.kind {
                    LateFeeKind::Fixed(amount) => amount,
                    LateFeeKind::PercentOfBase(rate) => ob.base_amount.apply_rate(rate),
                };
                let days_overdue = ob.days_overdue(now);
                ob.assess_late_fee(fee, now);
                Ok(Some((ob.obligation_id, fee, days_overdue)))
            })?;

            match assessed {
                Some((obligation_id, fee, days_overdue)) => {
                    outcome.assessed += 1;
                    outcome.fees_added += fee;
                    events.emit(Event::LateFeeAssessed {
                        obligation_id,
                        fee,
                        days_overdue,
                        timestamp: now,
                    });
                }
                None => outcome.skipped += 1,
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DuesConfig, LateFeePolicy};
    use crate::decimal::Rate;
    use crate::obligation::MemberObligation;
    use crate::store::InMemoryStore;
    use crate::types::ObligationId;
    use chrono::{DateTime, TimeZone, Utc};
    use hourglass_rs::TimeSource;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn setup(policy: LateFeePolicy) -> (InMemoryStore, ConfigId, Vec<ObligationId>) {
        let store = InMemoryStore::new();
        let config = DuesConfig::new("Fall 2025", 2025, Money::from_major(100), at(2025, 10, 1))
            .with_late_fee(policy);
        let config_id = config.config_id;
        store.insert_config(config).unwrap();

        let mut ids = Vec::new();
        for i in 1..=3 {
            let ob = MemberObligation::new(
                format!("m-{}", i),
                format!("m{}@example.org", i),
                config_id,
                Money::from_major(100),
                at(2025, 10, 1),
                at(2025, 9, 1),
            );
            ids.push(ob.obligation_id);
            store.insert_obligation(ob).unwrap();
        }
        (store, config_id, ids)
    }

    #[test]
    fn test_fixed_fee_after_grace() {
        let (store, config_id, ids) =
            setup(LateFeePolicy::fixed(Money::from_major(15), 7));
        let engine = LateFeeEngine::new(&store);
        let mut events = EventStore::new();

        // inside the grace window: nothing assessed
        let time = SafeTimeProvider::new(TimeSource::Test(at(2025, 10, 5)));
        let outcome = engine.sweep(config_id, &time, &mut events).unwrap();
        assert_eq!(outcome.assessed, 0);
        assert_eq!(outcome.skipped, 3);

        // past the grace window: every open obligation gets the fee
        let time = SafeTimeProvider::new(TimeSource::Test(at(2025, 10, 15)));
        let outcome = engine.sweep(config_id, &time, &mut events).unwrap();
        assert_eq!(outcome.assessed, 3);
        assert_eq!(outcome.fees_added, Money::from_major(45));

        let ob = store.obligation(ids[0]).unwrap();
        assert_eq!(ob.late_fee, Money::from_major(15));
        assert_eq!(ob.balance(), Money::from_major(115));
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let (store, config_id, ids) =
            setup(LateFeePolicy::fixed(Money::from_major(15), 0));
        let engine = LateFeeEngine::new(&store);
        let mut events = EventStore::new();
        let time = SafeTimeProvider::new(TimeSource::Test(at(2025, 10, 15)));

        engine.sweep(config_id, &time, &mut events).unwrap();
        let second = engine.sweep(config_id, &time, &mut events).unwrap();
        assert_eq!(second.assessed, 0);
        assert_eq!(second.skipped, 3);

        // total fee equals a single assessment
        let ob = store.obligation(ids[0]).unwrap();
        assert_eq!(ob.late_fee, Money::from_major(15));
    }

    #[test]
    fn test_adjustment_does_not_mask_assessment() {
        let (store, config_id, ids) =
            setup(LateFeePolicy::fixed(Money::from_major(15), 0));
        // an administrator correction that looks like a fee must not
        // suppress the sweep
        store
            .with_obligation(ids[0], |ob| {
                ob.set_adjustment(
                    Money::from_major(15),
                    Some("damage fee".to_string()),
                    at(2025, 10, 2),
                )
            })
            .unwrap();

        let engine = LateFeeEngine::new(&store);
        let mut events = EventStore::new();
        let time = SafeTimeProvider::new(TimeSource::Test(at(2025, 10, 15)));
        let outcome = engine.sweep(config_id, &time, &mut events).unwrap();
        assert_eq!(outcome.assessed, 3);

        let ob = store.obligation(ids[0]).unwrap();
        assert_eq!(ob.late_fee, Money::from_major(15));
        assert_eq!(ob.adjustment, Money::from_major(15));
    }

    #[test]
    fn test_percentage_fee_and_exclusions() {
        let (store, config_id, ids) =
            setup(LateFeePolicy::percent_of_base(Rate::from_percentage(5), 0));

        // one paid, one waived, one open
        store
            .with_obligation(ids[0], |ob| {
                ob.apply_payment(Money::from_major(100), at(2025, 9, 20))?;
                Ok(())
            })
            .unwrap();
        store
            .with_obligation(ids[1], |ob| {
                ob.waive(at(2025, 9, 20))?;
                Ok(())
            })
            .unwrap();

        let engine = LateFeeEngine::new(&store);
        let mut events = EventStore::new();
        let time = SafeTimeProvider::new(TimeSource::Test(at(2025, 10, 15)));
        let outcome = engine.sweep(config_id, &time, &mut events).unwrap();

        assert_eq!(outcome.assessed, 1);
        assert_eq!(outcome.fees_added, Money::from_major(5));
        let ob = store.obligation(ids[2]).unwrap();
        assert_eq!(ob.late_fee, Money::from_major(5));
        assert_eq!(events.events().len(), 1);
    }

    #[test]
    fn test_no_policy_is_a_noop() {
        let store = InMemoryStore::new();
        let config = DuesConfig::new("Fall 2025", 2025, Money::from_major(100), at(2025, 10, 1));
        let config_id = config.config_id;
        store.insert_config(config).unwrap();

        let engine = LateFeeEngine::new(&store);
        let mut events = EventStore::new();
        let time = SafeTimeProvider::new(TimeSource::Test(at(2025, 12, 1)));
        let outcome = engine.sweep(config_id, &time, &mut events).unwrap();
        assert_eq!(outcome, SweepOutcome::default());
    }
}
