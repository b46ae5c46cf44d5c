//! Owner record operations.

use chrono::Utc;
use rusqlite::params;

use super::Database;
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    /// Create the owner row if it does not exist yet.
    /// Uploads reference owners by ID; there is no separate signup flow.
    pub fn ensure_user(&self, id: &str) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT OR IGNORE INTO users (id, created_at) VALUES (?1, ?2)",
            params![id, Utc::now().to_rfc3339()],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }
}
