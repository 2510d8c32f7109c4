use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::Result;
use crate::store::DuesStore;
use crate::types::{ConfigId, EffectiveStatus, ObligationId};

/// flat obligation row for reporting
///
/// computed fields (effective status, balance, days overdue) are evaluated
/// at export time against the supplied clock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationExport {
    pub obligation_id: ObligationId,
    pub member_id: String,
    pub member_email: String,
    pub base_amount: Money,
    pub late_fee: Money,
    pub adjustment: Money,
    pub total_amount: Money,
    pub amount_paid: Money,
    pub balance: Money,
    pub status: EffectiveStatus,
    pub due_date: DateTime<Utc>,
    pub paid_date: Option<DateTime<Utc>>,
    pub days_overdue: u32,
    pub has_flexible_deadline: bool,
    pub notes: Option<String>,
}

/// export every obligation under a configuration, sorted by member id
///
/// read-only; never mutates stored rows even when the derived status
/// differs from the persisted one
pub fn export_config<S: DuesStore>(
    store: &S,
    config_id: ConfigId,
    now: DateTime<Utc>,
) -> Result<Vec<ObligationExport>> {
    let mut rows: Vec<ObligationExport> = store
        .obligations_for_config(config_id)?
        .into_iter()
        .map(|ob| ObligationExport {
            obligation_id: ob.obligation_id,
            member_id: ob.member_id.clone(),
            member_email: ob.member_email.clone(),
            base_amount: ob.base_amount,
            late_fee: ob.late_fee,
            adjustment: ob.adjustment,
            total_amount: ob.total_amount(),
            amount_paid: ob.amount_paid,
            balance: ob.balance(),
            status: ob.effective_status(now),
            due_date: ob.due_date,
            paid_date: ob.paid_date,
            days_overdue: ob.days_overdue(now),
            has_flexible_deadline: ob.flexible_deadline.is_some(),
            notes: ob.notes,
        })
        .collect();
    rows.sort_by(|a, b| a.member_id.cmp(&b.member_id));
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obligation::MemberObligation;
    use crate::store::InMemoryStore;
    use crate::types::ObligationStatus;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_export_derives_overdue_without_mutating() {
        let store = InMemoryStore::new();
        let config_id = Uuid::new_v4();
        let ob = MemberObligation::new(
            "m-1",
            "m1@example.org",
            config_id,
            Money::from_major(100),
            at(2025, 10, 1),
            at(2025, 9, 1),
        );
        let id = ob.obligation_id;
        store.insert_obligation(ob).unwrap();

        let rows = export_config(&store, config_id, at(2025, 10, 11)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, EffectiveStatus::Overdue);
        assert_eq!(rows[0].days_overdue, 10);
        assert_eq!(rows[0].balance, Money::from_major(100));

        // the stored row still carries its persisted status
        assert_eq!(store.obligation(id).unwrap().status, ObligationStatus::Pending);
    }

    #[test]
    fn test_export_sorts_by_member_and_serializes() {
        let store = InMemoryStore::new();
        let config_id = Uuid::new_v4();
        for member in ["m-3", "m-1", "m-2"] {
            store
                .insert_obligation(MemberObligation::new(
                    member,
                    format!("{}@example.org", member),
                    config_id,
                    Money::from_major(50),
                    at(2025, 10, 1),
                    at(2025, 9, 1),
                ))
                .unwrap();
        }

        let rows = export_config(&store, config_id, at(2025, 9, 15)).unwrap();
        let members: Vec<&str> = rows.iter().map(|r| r.member_id.as_str()).collect();
        assert_eq!(members, vec!["m-1", "m-2", "m-3"]);

        let json = serde_json::to_string(&rows).unwrap();
        assert!(json.contains("\"member_id\":\"m-1\""));
        assert!(json.contains("\"status\":\"Pending\""));
    }
}
