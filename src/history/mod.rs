//! SQLite-backed browsing stores: history, per-domain zoom levels and
//! permission records share one connection.

use parking_lot::Mutex;
use rusqlite::{params, Connection, Result};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config;
use crate::permissions::{PermissionDecision, PermissionKind, PermissionRecord, PermissionStore};

/// A single history entry
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub visit_count: i32,
    pub last_visit_time: i64,
    pub first_visit_time: i64,
}

/// Navigation-facing history surface.
pub trait HistoryStore: Send + Sync {
    fn record_visit(&self, url: &str, title: Option<&str>);
    fn update_title(&self, url: &str, title: &str);
}

/// Per-domain zoom persistence.
pub trait ZoomStore: Send + Sync {
    fn set_zoom(&self, domain: &str, level: f64);
    fn zoom_for(&self, domain: &str) -> Option<f64>;
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// SQLite-based browsing storage
pub struct Database {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Create or open the browsing database in the given data directory
    pub fn new(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join(config::BROWSING_DB);
        let conn = Connection::open(&db_path)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                title TEXT,
                visit_count INTEGER DEFAULT 1,
                last_visit_time INTEGER NOT NULL,
                first_visit_time INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_history_url ON history(url);
            CREATE INDEX IF NOT EXISTS idx_history_last_visit ON history(last_visit_time DESC);
            CREATE INDEX IF NOT EXISTS idx_history_visit_count ON history(visit_count DESC);

            CREATE TABLE IF NOT EXISTS zoom_levels (
                domain TEXT PRIMARY KEY,
                level REAL NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS permissions (
                origin TEXT NOT NULL,
                permission TEXT NOT NULL,
                decision TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (origin, permission)
            );
            ",
        )?;

        log::info!("Browsing database opened at {:?}", db_path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Record a page visit
    pub fn record_visit(&self, url: &str, title: Option<&str>) -> Result<()> {
        let now = unix_now();

        self.conn.lock().execute(
            "INSERT INTO history (url, title, last_visit_time, first_visit_time, visit_count)
             VALUES (?1, ?2, ?3, ?3, 1)
             ON CONFLICT(url) DO UPDATE SET
                 title = COALESCE(?2, title),
                 visit_count = visit_count + 1,
                 last_visit_time = ?3",
            params![url, title, now],
        )?;

        log::debug!("Recorded visit to {}", url);

        Ok(())
    }

    /// Update the title for a URL (called when page title changes).
    /// Last writer wins.
    pub fn update_title(&self, url: &str, title: &str) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE history SET title = ?1 WHERE url = ?2",
            params![title, url],
        )?;
        Ok(())
    }

    /// Search history by URL or title
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let pattern = format!("%{}%", query);
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT id, url, title, visit_count, last_visit_time, first_visit_time
             FROM history
             WHERE url LIKE ?1 OR title LIKE ?1
             ORDER BY visit_count DESC, last_visit_time DESC
             LIMIT ?2",
        )?;

        let entries = stmt
            .query_map(params![pattern, limit as i64], Self::row_to_entry)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(entries)
    }

    /// Get recent history entries
    pub fn get_recent(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, url, title, visit_count, last_visit_time, first_visit_time
             FROM history
             ORDER BY last_visit_time DESC
             LIMIT ?1",
        )?;

        let entries = stmt
            .query_map(params![limit as i64], Self::row_to_entry)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(entries)
    }

    /// Get most visited entries
    pub fn get_most_visited(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, url, title, visit_count, last_visit_time, first_visit_time
             FROM history
             ORDER BY visit_count DESC, last_visit_time DESC
             LIMIT ?1",
        )?;

        let entries = stmt
            .query_map(params![limit as i64], Self::row_to_entry)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(entries)
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<HistoryEntry> {
        Ok(HistoryEntry {
            id: row.get(0)?,
            url: row.get(1)?,
            title: row.get(2)?,
            visit_count: row.get(3)?,
            last_visit_time: row.get(4)?,
            first_visit_time: row.get(5)?,
        })
    }

    /// Get entry by URL
    pub fn get_by_url(&self, url: &str) -> Result<Option<HistoryEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, url, title, visit_count, last_visit_time, first_visit_time
             FROM history
             WHERE url = ?1",
        )?;

        let entry = stmt.query_row(params![url], Self::row_to_entry).ok();

        Ok(entry)
    }

    /// Delete a specific history entry
    pub fn delete_entry(&self, id: i64) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM history WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Clear all history
    pub fn clear_all(&self) -> Result<()> {
        self.conn.lock().execute("DELETE FROM history", [])?;
        log::info!("Cleared all history");
        Ok(())
    }

    /// Get the total number of history entries
    pub fn count(&self) -> Result<i64> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))
    }

    /// Store a per-domain zoom factor, clamped to the supported range
    pub fn set_zoom_level(&self, domain: &str, level: f64) -> Result<()> {
        let level = crate::workspace::clamp_zoom(level);
        self.conn.lock().execute(
            "INSERT INTO zoom_levels (domain, level, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(domain) DO UPDATE SET level = ?2, updated_at = ?3",
            params![domain, level, unix_now()],
        )?;
        Ok(())
    }

    /// Zoom factor stored for a domain, if any
    pub fn zoom_level(&self, domain: &str) -> Result<Option<f64>> {
        let level = self
            .conn
            .lock()
            .query_row(
                "SELECT level FROM zoom_levels WHERE domain = ?1",
                params![domain],
                |row| row.get(0),
            )
            .ok();
        Ok(level)
    }

    fn save_permission(&self, record: &PermissionRecord) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO permissions (origin, permission, decision, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(origin, permission) DO UPDATE SET decision = ?3, updated_at = ?4",
            params![
                record.origin,
                record.kind.as_str(),
                record.decision.as_str(),
                record.updated_at
            ],
        )?;
        Ok(())
    }

    fn permission_decision(
        &self,
        origin: &str,
        kind: PermissionKind,
    ) -> Result<Option<PermissionDecision>> {
        let raw: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT decision FROM permissions WHERE origin = ?1 AND permission = ?2",
                params![origin, kind.as_str()],
                |row| row.get(0),
            )
            .ok();
        Ok(raw.as_deref().and_then(PermissionDecision::from_str))
    }
}

impl HistoryStore for Database {
    fn record_visit(&self, url: &str, title: Option<&str>) {
        if let Err(e) = Database::record_visit(self, url, title) {
            log::warn!("Failed to record history for {}: {}", url, e);
        }
    }

    fn update_title(&self, url: &str, title: &str) {
        if let Err(e) = Database::update_title(self, url, title) {
            log::warn!("Failed to update history title for {}: {}", url, e);
        }
    }
}

impl ZoomStore for Database {
    fn set_zoom(&self, domain: &str, level: f64) {
        if let Err(e) = self.set_zoom_level(domain, level) {
            log::warn!("Failed to store zoom for {}: {}", domain, e);
        }
    }

    fn zoom_for(&self, domain: &str) -> Option<f64> {
        self.zoom_level(domain).ok().flatten()
    }
}

impl PermissionStore for Database {
    fn save(&self, record: &PermissionRecord) {
        if let Err(e) = self.save_permission(record) {
            log::warn!("Failed to store permission for {}: {}", record.origin, e);
        }
    }

    fn decision_for(&self, origin: &str, kind: PermissionKind) -> Option<PermissionDecision> {
        self.permission_decision(origin, kind).ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_record_and_search() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();

        db.record_visit("https://example.com/", Some("Example"))
            .unwrap();

        let results = db.search("example", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://example.com/");
        assert_eq!(results[0].title, Some("Example".to_string()));
        assert_eq!(results[0].visit_count, 1);
    }

    #[test]
    fn test_visit_count_increment() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();

        db.record_visit("https://example.com/", Some("Example"))
            .unwrap();
        db.record_visit("https://example.com/", None).unwrap();
        db.record_visit("https://example.com/", None).unwrap();

        let entry = db.get_by_url("https://example.com/").unwrap().unwrap();
        assert_eq!(entry.visit_count, 3);
        assert_eq!(entry.title, Some("Example".to_string()));
    }

    #[test]
    fn test_title_update_last_writer_wins() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();

        db.record_visit("https://example.com/", Some("First")).unwrap();
        db.update_title("https://example.com/", "Second").unwrap();
        db.update_title("https://example.com/", "Third").unwrap();

        let entry = db.get_by_url("https://example.com/").unwrap().unwrap();
        assert_eq!(entry.title, Some("Third".to_string()));
    }

    #[test]
    fn test_clear_all() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();

        db.record_visit("https://example1.com/", None).unwrap();
        db.record_visit("https://example2.com/", None).unwrap();

        assert_eq!(db.count().unwrap(), 2);

        db.clear_all().unwrap();

        assert_eq!(db.count().unwrap(), 0);
    }

    #[test]
    fn test_zoom_round_trip_and_clamp() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();

        db.set_zoom_level("example.com", 1.5).unwrap();
        assert_eq!(db.zoom_level("example.com").unwrap(), Some(1.5));

        db.set_zoom_level("example.com", 50.0).unwrap();
        assert_eq!(
            db.zoom_level("example.com").unwrap(),
            Some(crate::config::ZOOM_MAX)
        );

        assert_eq!(db.zoom_level("unknown.test").unwrap(), None);
    }

    #[test]
    fn test_permission_round_trip() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();

        PermissionStore::save(
            &db,
            &PermissionRecord {
                origin: "https://example.com".to_string(),
                kind: PermissionKind::Camera,
                decision: PermissionDecision::Denied,
                updated_at: 123,
            },
        );

        assert_eq!(
            db.decision_for("https://example.com", PermissionKind::Camera),
            Some(PermissionDecision::Denied)
        );
        assert_eq!(
            db.decision_for("https://example.com", PermissionKind::Microphone),
            None
        );
    }
}
