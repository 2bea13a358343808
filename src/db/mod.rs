use rusqlite::{params, Connection, OptionalExtension, Result};
use std::sync::Mutex;

/// Local settings store. Nothing from a chat or upload session is ever written here.
pub struct Database {
    pub conn: Mutex<Connection>,
}

impl Database {
    pub fn new(app_dir: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(app_dir).ok();
        let db_path = app_dir.join("assistant-console.db");
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()
    }

    /// Upserts; the last write for a key wins.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.lock().unwrap().execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Returns whether a value was stored.
    pub fn delete_setting(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    pub fn all_settings(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Database::new(dir.path()).unwrap();
            db.set_setting("base_url", "http://a").unwrap();
            db.set_setting("base_url", "http://b").unwrap();
        }
        let db = Database::new(dir.path()).unwrap();
        assert_eq!(db.get_setting("base_url").unwrap().as_deref(), Some("http://b"));
        assert_eq!(db.get_setting("missing").unwrap(), None);
        assert_eq!(
            db.all_settings().unwrap(),
            vec![("base_url".to_string(), "http://b".to_string())]
        );
    }

    #[test]
    fn test_delete_setting() {
        let db = Database::in_memory().unwrap();
        db.set_setting("api_token", "x").unwrap();
        assert!(db.delete_setting("api_token").unwrap());
        assert!(!db.delete_setting("api_token").unwrap());
        assert!(db.all_settings().unwrap().is_empty());
    }
}
