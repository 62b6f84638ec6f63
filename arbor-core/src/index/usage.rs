//! Per-passphrase usage rows backing quota checks.
//!
//! A check reserves a pending row in the same transaction that counts, so two
//! concurrent callers cannot both take the last allowance. A successful run
//! confirms its row; a failed one releases it.

use super::NodeIndex;
use crate::access::Action;
use crate::task::now_rfc3339;
use rusqlite::{params, Connection, TransactionBehavior};

impl NodeIndex {
    /// Reserve one unit of `action` for `passphrase` unless `limit` is reached.
    ///
    /// Analyses count distinct snapshots; questions count every row. Returns
    /// `false` when the allowance is used up.
    pub fn reserve_usage(
        &self,
        passphrase: &str,
        action: Action,
        snapshot_id: &str,
        limit: u32,
    ) -> crate::Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let used = count_usage(&tx, passphrase, action)?;
        if used >= limit {
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO passphrase_usage (passphrase, action, snapshot_id, confirmed, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![passphrase, action_name(action), snapshot_id, now_rfc3339()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Mark one pending reservation as used, or record the use directly when
    /// none is pending.
    pub fn confirm_usage(
        &self,
        passphrase: &str,
        action: Action,
        snapshot_id: &str,
    ) -> crate::Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE passphrase_usage SET confirmed = 1
             WHERE id = (SELECT id FROM passphrase_usage
                         WHERE passphrase = ?1 AND action = ?2 AND snapshot_id = ?3 AND confirmed = 0
                         ORDER BY id LIMIT 1)",
            params![passphrase, action_name(action), snapshot_id],
        )?;
        if updated == 0 {
            tx.execute(
                "INSERT INTO passphrase_usage (passphrase, action, snapshot_id, confirmed, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                params![passphrase, action_name(action), snapshot_id, now_rfc3339()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Drop one pending reservation.
    pub fn release_usage(
        &self,
        passphrase: &str,
        action: Action,
        snapshot_id: &str,
    ) -> crate::Result<()> {
        self.conn().execute(
            "DELETE FROM passphrase_usage
             WHERE id = (SELECT id FROM passphrase_usage
                         WHERE passphrase = ?1 AND action = ?2 AND snapshot_id = ?3 AND confirmed = 0
                         ORDER BY id LIMIT 1)",
            params![passphrase, action_name(action), snapshot_id],
        )?;
        Ok(())
    }

    /// Units of `action` used or reserved by `passphrase`
    pub fn usage_count(&self, passphrase: &str, action: Action) -> crate::Result<u32> {
        count_usage(&self.conn(), passphrase, action)
    }

    /// Reservations left by a previous process never complete.
    pub fn clear_pending_usage(&self) -> crate::Result<usize> {
        Ok(self
            .conn()
            .execute("DELETE FROM passphrase_usage WHERE confirmed = 0", [])?)
    }
}

fn action_name(action: Action) -> &'static str {
    match action {
        Action::Analyze => "analyze",
        Action::Ask => "ask",
    }
}

fn count_usage(conn: &Connection, passphrase: &str, action: Action) -> crate::Result<u32> {
    let sql = match action {
        Action::Analyze => {
            "SELECT COUNT(DISTINCT snapshot_id) FROM passphrase_usage
             WHERE passphrase = ?1 AND action = ?2"
        }
        Action::Ask => {
            "SELECT COUNT(*) FROM passphrase_usage WHERE passphrase = ?1 AND action = ?2"
        }
    };
    let count: i64 = conn.query_row(sql, params![passphrase, action_name(action)], |row| {
        row.get(0)
    })?;
    Ok(count.max(0) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reserve_counts_pending_rows() {
        let index = NodeIndex::open_in_memory().unwrap();
        assert!(index.reserve_usage("cs1", Action::Ask, "s", 2).unwrap());
        assert!(index.reserve_usage("cs1", Action::Ask, "s", 2).unwrap());
        // Both reservations still pending: the allowance is already taken
        assert!(!index.reserve_usage("cs1", Action::Ask, "s", 2).unwrap());

        index.release_usage("cs1", Action::Ask, "s").unwrap();
        assert_eq!(index.usage_count("cs1", Action::Ask).unwrap(), 1);
        assert!(index.reserve_usage("cs1", Action::Ask, "s", 2).unwrap());
        assert_eq!(index.usage_count("cs2", Action::Ask).unwrap(), 0);
    }

    #[test]
    fn test_analyses_count_distinct_snapshots() {
        let index = NodeIndex::open_in_memory().unwrap();
        index.confirm_usage("cs1", Action::Analyze, "a").unwrap();
        index.confirm_usage("cs1", Action::Analyze, "a").unwrap();
        assert_eq!(index.usage_count("cs1", Action::Analyze).unwrap(), 1);
        assert!(index.reserve_usage("cs1", Action::Analyze, "b", 2).unwrap());
        assert_eq!(index.usage_count("cs1", Action::Analyze).unwrap(), 2);
        assert!(!index.reserve_usage("cs1", Action::Analyze, "c", 2).unwrap());
    }

    #[test]
    fn test_usage_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("arbor.db");
        {
            let index = NodeIndex::open(&db).unwrap();
            assert!(index.reserve_usage("cs1", Action::Ask, "s", 5).unwrap());
            index.confirm_usage("cs1", Action::Ask, "s").unwrap();
            assert!(index.reserve_usage("cs1", Action::Ask, "s", 5).unwrap());
        }
        let index = NodeIndex::open(&db).unwrap();
        assert_eq!(index.usage_count("cs1", Action::Ask).unwrap(), 2);
        assert_eq!(index.clear_pending_usage().unwrap(), 1);
        assert_eq!(index.usage_count("cs1", Action::Ask).unwrap(), 1);
    }
}
