use anyhow::Result;
use rusqlite::OptionalExtension;

use crate::{KvStore, StorageBackend};

impl StorageBackend for KvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
                .optional()?;
            Ok(value)
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE
                 SET value = excluded.value, updated_at = datetime('now')",
                (key, value),
            )?;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
            Ok(())
        })
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(keys)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_and_remove_deletes() {
        let store = KvStore::open_in_memory().unwrap();
        store.set("sb-access-token", "a").unwrap();
        store.set("sb-access-token", "b").unwrap();
        assert_eq!(store.get("sb-access-token").unwrap().as_deref(), Some("b"));

        store.remove("sb-access-token").unwrap();
        assert_eq!(store.get("sb-access-token").unwrap(), None);
    }

    #[test]
    fn two_handles_on_one_file_share_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.db");

        let tab_a = KvStore::open(&path).unwrap();
        let tab_b = KvStore::open(&path).unwrap();

        tab_a.set("telegram-login-complete", "true").unwrap();
        assert_eq!(
            tab_b.get("telegram-login-complete").unwrap().as_deref(),
            Some("true")
        );
        assert_eq!(tab_b.keys().unwrap(), vec!["telegram-login-complete".to_string()]);
    }
}
