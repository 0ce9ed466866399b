use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Params, Row};

use crate::error::{FleetError, Result};
use crate::store::WorkerStore;
use crate::worker::{Worker, WorkerRecord};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS workers (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        uid         TEXT NOT NULL UNIQUE,
        name        TEXT NOT NULL,
        owner_id    INTEGER NOT NULL,
        node_name   TEXT NOT NULL,
        tunnel_id   TEXT NOT NULL DEFAULT '',
        port        INTEGER NOT NULL DEFAULT 0,
        entry       TEXT NOT NULL,
        code        BLOB NOT NULL,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL,
        deleted_at  TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_workers_owner_name ON workers (owner_id, name);
    CREATE INDEX IF NOT EXISTS idx_workers_node_name ON workers (node_name);
";

const COLUMNS: &str = "id, uid, name, owner_id, node_name, tunnel_id, port, entry, code, \
                       created_at, updated_at, deleted_at";

/// SQLite-backed [`WorkerStore`]. One connection guarded by a mutex.
pub struct SqliteWorkerStore {
    conn: Mutex<Connection>,
}

impl SqliteWorkerStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::bootstrap(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| FleetError::Internal("worker store connection poisoned".to_string()))
    }

    fn select<P: Params>(&self, filter: &str, params: P) -> Result<Vec<WorkerRecord>> {
        self.select_window(filter, "", params)
    }

    /// `window` is appended after the ORDER BY clause (LIMIT/OFFSET).
    fn select_window<P: Params>(
        &self,
        filter: &str,
        window: &str,
        params: P,
    ) -> Result<Vec<WorkerRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM workers WHERE deleted_at IS NULL{} ORDER BY id ASC{}",
            COLUMNS, filter, window
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params, map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

impl WorkerStore for SqliteWorkerStore {
    fn create(&self, worker: &Worker) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn()?.execute(
            "INSERT INTO workers (uid, name, owner_id, node_name, tunnel_id, port, entry, code,
                                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                worker.uid,
                worker.name,
                owner_key(worker.owner_id)?,
                worker.node_name,
                worker.tunnel_id,
                worker.port,
                worker.entry,
                worker.code,
                now,
            ],
        )?;
        Ok(())
    }

    fn save(&self, worker: &Worker) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn()?.execute(
            "INSERT INTO workers (uid, name, owner_id, node_name, tunnel_id, port, entry, code,
                                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
             ON CONFLICT (uid) DO UPDATE SET
                name = excluded.name,
                owner_id = excluded.owner_id,
                node_name = excluded.node_name,
                tunnel_id = excluded.tunnel_id,
                port = excluded.port,
                entry = excluded.entry,
                code = excluded.code,
                updated_at = excluded.updated_at,
                deleted_at = NULL",
            params![
                worker.uid,
                worker.name,
                owner_key(worker.owner_id)?,
                worker.node_name,
                worker.tunnel_id,
                worker.port,
                worker.entry,
                worker.code,
                now,
            ],
        )?;
        Ok(())
    }

    fn hard_delete(&self, uid: &str) -> Result<()> {
        let removed = self
            .conn()?
            .execute("DELETE FROM workers WHERE uid = ?1", params![uid])?;
        if removed == 0 {
            return Err(FleetError::NotFound(uid.to_string()));
        }
        Ok(())
    }

    fn soft_delete(&self, uid: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let marked = self.conn()?.execute(
            "UPDATE workers SET deleted_at = ?2, updated_at = ?2
             WHERE uid = ?1 AND deleted_at IS NULL",
            params![uid, now],
        )?;
        if marked == 0 {
            return Err(FleetError::NotFound(uid.to_string()));
        }
        Ok(())
    }

    fn get_by_uid(&self, owner_id: u64, uid: &str) -> Result<WorkerRecord> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM workers WHERE deleted_at IS NULL AND owner_id = ?1 AND uid = ?2",
            COLUMNS
        );
        let record = conn
            .query_row(&sql, params![owner_key(owner_id)?, uid], map_row)
            .optional()?;
        record.ok_or_else(|| FleetError::NotFound(uid.to_string()))
    }

    fn list_by_owner(&self, owner_id: u64) -> Result<Vec<WorkerRecord>> {
        self.select(" AND owner_id = ?1", params![owner_key(owner_id)?])
    }

    fn list_page(
        &self,
        owner_id: u64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<WorkerRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        self.select_window(
            " AND owner_id = ?1",
            " LIMIT ?2 OFFSET ?3",
            params![owner_key(owner_id)?, limit, offset],
        )
    }

    fn list_by_names(&self, owner_id: u64, names: &[&str]) -> Result<Vec<WorkerRecord>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let mut values = vec![Value::Integer(owner_key(owner_id)?)];
        values.extend(names.iter().map(|n| Value::Text(n.to_string())));
        let filter = format!(" AND owner_id = ?1 AND name IN ({})", placeholders(2, names.len()));
        self.select(&filter, params_from_iter(values))
    }

    fn admin_list_by_names(&self, names: &[&str]) -> Result<Vec<WorkerRecord>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let filter = format!(" AND name IN ({})", placeholders(1, names.len()));
        self.select(&filter, params_from_iter(names.iter()))
    }

    fn admin_list_by_node(&self, node_name: &str) -> Result<Vec<WorkerRecord>> {
        self.select(" AND node_name = ?1", params![node_name])
    }

    fn admin_list_all(&self) -> Result<Vec<WorkerRecord>> {
        self.select("", [])
    }
}

fn owner_key(owner_id: u64) -> Result<i64> {
    i64::try_from(owner_id)
        .map_err(|_| FleetError::InvalidPayload(format!("owner id {} out of range", owner_id)))
}

/// `?start, ?start+1, ...` for `count` parameters.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<WorkerRecord> {
    let owner_id: i64 = row.get(3)?;
    let port: i64 = row.get(6)?;
    Ok(WorkerRecord {
        id: row.get(0)?,
        worker: Worker {
            uid: row.get(1)?,
            name: row.get(2)?,
            owner_id: u64::try_from(owner_id)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Integer, e.into()))?,
            node_name: row.get(4)?,
            tunnel_id: row.get(5)?,
            port: u16::try_from(port)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Integer, e.into()))?,
            entry: row.get(7)?,
            code: row.get(8)?,
        },
        created_at: parse_timestamp(row, 9)?,
        updated_at: parse_timestamp(row, 10)?,
        deleted_at: row
            .get::<_, Option<String>>(11)?
            .map(|s| parse_rfc3339(11, &s))
            .transpose()?,
    })
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_rfc3339(idx, &raw)
}

fn parse_rfc3339(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(owner_id: u64, name: &str, node: &str) -> Worker {
        let mut w = Worker::new(owner_id, name, node, "index.js", format!("// {}", name));
        w.tunnel_id = format!("tunnel-{}", name);
        w
    }

    fn names(records: &[WorkerRecord]) -> Vec<&str> {
        records.iter().map(|r| r.worker.name.as_str()).collect()
    }

    #[test]
    fn create_and_get_by_uid() {
        let store = SqliteWorkerStore::in_memory().unwrap();
        let w = worker(1, "api", "node-a");
        store.create(&w).unwrap();

        let record = store.get_by_uid(1, &w.uid).unwrap();
        assert_eq!(record.worker, w);
        assert_eq!(record.created_at, record.updated_at);
        assert!(record.deleted_at.is_none());
    }

    #[test]
    fn get_by_uid_is_owner_scoped() {
        let store = SqliteWorkerStore::in_memory().unwrap();
        let w = worker(1, "api", "node-a");
        store.create(&w).unwrap();

        let err = store.get_by_uid(2, &w.uid).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn create_rejects_duplicate_uid() {
        let store = SqliteWorkerStore::in_memory().unwrap();
        let w = worker(1, "api", "node-a");
        store.create(&w).unwrap();
        assert!(matches!(store.create(&w), Err(FleetError::Database(_))));
    }

    #[test]
    fn same_name_under_new_uid_is_a_separate_row() {
        // A redeploy inserts the new UID before the old row is removed.
        let store = SqliteWorkerStore::in_memory().unwrap();
        let old = worker(1, "api", "node-a");
        let new = worker(1, "api", "node-a");
        store.create(&old).unwrap();
        store.create(&new).unwrap();

        assert_eq!(store.list_by_names(1, &["api"]).unwrap().len(), 2);
        store.hard_delete(&old.uid).unwrap();
        let left = store.list_by_names(1, &["api"]).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].worker.uid, new.uid);
    }

    #[test]
    fn save_upserts_on_uid() {
        let store = SqliteWorkerStore::in_memory().unwrap();
        let mut w = worker(1, "api", "node-a");
        store.save(&w).unwrap();

        w.port = 12001;
        w.code = b"// v2".to_vec();
        store.save(&w).unwrap();

        let all = store.admin_list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].worker.port, 12001);
        assert_eq!(all[0].worker.code, b"// v2".to_vec());
    }

    #[test]
    fn hard_delete_reports_missing_rows() {
        let store = SqliteWorkerStore::in_memory().unwrap();
        let w = worker(1, "api", "node-a");
        store.create(&w).unwrap();

        store.hard_delete(&w.uid).unwrap();
        assert!(store.admin_list_all().unwrap().is_empty());
        assert!(store.hard_delete(&w.uid).unwrap_err().is_not_found());
    }

    #[test]
    fn soft_deleted_rows_are_hidden_but_hard_deletable() {
        let store = SqliteWorkerStore::in_memory().unwrap();
        let w = worker(1, "api", "node-a");
        store.create(&w).unwrap();

        store.soft_delete(&w.uid).unwrap();
        assert!(store.list_by_owner(1).unwrap().is_empty());
        assert!(store.get_by_uid(1, &w.uid).unwrap_err().is_not_found());
        assert!(store.soft_delete(&w.uid).unwrap_err().is_not_found());

        // The name is free again once the old row is soft-deleted.
        store.create(&worker(1, "api", "node-a")).unwrap();

        store.hard_delete(&w.uid).unwrap();
    }

    #[test]
    fn list_by_names_excludes_other_owners() {
        let store = SqliteWorkerStore::in_memory().unwrap();
        store.create(&worker(1, "a", "node-a")).unwrap();
        store.create(&worker(1, "b", "node-a")).unwrap();
        store.create(&worker(1, "c", "node-a")).unwrap();
        store.create(&worker(2, "a", "node-a")).unwrap();

        let found = store.list_by_names(1, &["a", "b"]).unwrap();
        assert_eq!(names(&found), vec!["a", "b"]);
        assert!(found.iter().all(|r| r.worker.owner_id == 1));

        assert!(store.list_by_names(1, &[]).unwrap().is_empty());
        assert!(store.list_by_names(1, &["zzz"]).unwrap().is_empty());
    }

    #[test]
    fn admin_list_by_names_spans_owners() {
        let store = SqliteWorkerStore::in_memory().unwrap();
        store.create(&worker(1, "a", "node-a")).unwrap();
        store.create(&worker(2, "a", "node-b")).unwrap();
        store.create(&worker(2, "b", "node-b")).unwrap();

        let found = store.admin_list_by_names(&["a"]).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|r| r.worker.name == "a"));
    }

    #[test]
    fn admin_list_by_node() {
        let store = SqliteWorkerStore::in_memory().unwrap();
        store.create(&worker(1, "a", "node-a")).unwrap();
        store.create(&worker(1, "b", "node-b")).unwrap();
        store.create(&worker(2, "c", "node-b")).unwrap();

        assert_eq!(names(&store.admin_list_by_node("node-b").unwrap()), vec!["b", "c"]);
        assert!(store.admin_list_by_node("node-z").unwrap().is_empty());
    }

    #[test]
    fn list_page_windows_in_insertion_order() {
        let store = SqliteWorkerStore::in_memory().unwrap();
        for name in ["w0", "w1", "w2", "w3", "w4"] {
            store.create(&worker(1, name, "node-a")).unwrap();
        }
        store.create(&worker(2, "other", "node-a")).unwrap();

        assert_eq!(names(&store.list_page(1, 0, 2).unwrap()), vec!["w0", "w1"]);
        assert_eq!(names(&store.list_page(1, 2, 2).unwrap()), vec!["w2", "w3"]);
        assert_eq!(names(&store.list_page(1, 4, 2).unwrap()), vec!["w4"]);
        assert!(store.list_page(1, 10, 2).unwrap().is_empty());
        assert_eq!(store.list_by_owner(1).unwrap().len(), 5);
    }

    #[test]
    fn tunnel_map_covers_fleet() {
        let store = SqliteWorkerStore::in_memory().unwrap();
        store.create(&worker(1, "a", "node-a")).unwrap();
        store.create(&worker(2, "b", "node-b")).unwrap();

        let map = store.admin_tunnel_map().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["a"], "tunnel-a");
        assert_eq!(map["b"], "tunnel-b");
    }

    #[test]
    fn open_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workers.db");
        let w = worker(3, "persisted", "node-a");
        {
            let store = SqliteWorkerStore::open(&path).unwrap();
            store.create(&w).unwrap();
        }
        let store = SqliteWorkerStore::open(&path).unwrap();
        assert_eq!(store.get_by_uid(3, &w.uid).unwrap().worker, w);
    }
}
