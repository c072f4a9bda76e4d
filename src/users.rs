//! User records resolved from an upstream-authenticated subject.
//!
//! Token verification happens outside this backend; handlers receive an
//! opaque subject string and resolve it here, creating the user row on first
//! sight.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::{format_datetime, parse_datetime, parse_uuid, Database, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub external_uid: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct UserStorage {
    db: Database,
}

impl UserStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Look up a user by their external subject, creating the row lazily on
    /// first sight.
    pub fn get_or_create(&self, external_uid: &str, name: &str) -> Result<User> {
        let conn = self.db.conn()?;

        let existing = conn
            .query_row(
                "SELECT id, external_uid, name, created_at FROM users WHERE external_uid = ?1",
                params![external_uid],
                map_user,
            )
            .optional()?;
        if let Some(user) = existing {
            return Ok(user);
        }

        let user = User {
            id: Uuid::new_v4(),
            external_uid: external_uid.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO users (id, external_uid, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                user.id.to_string(),
                user.external_uid,
                user.name,
                format_datetime(user.created_at),
            ],
        )?;
        log::info!("created user {} for subject {}", user.id, external_uid);
        Ok(user)
    }
}

fn map_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: parse_uuid(0, row.get(0)?)?,
        external_uid: row.get(1)?,
        name: row.get(2)?,
        created_at: parse_datetime(3, row.get(3)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let users = UserStorage::new(db);

        let first = users.get_or_create("uid-1", "Ada").unwrap();
        let second = users.get_or_create("uid-1", "Ada Again").unwrap();

        assert_eq!(first.id, second.id);
        // The stored name from the first sighting wins.
        assert_eq!(second.name, "Ada");
    }

    #[test]
    fn distinct_subjects_get_distinct_users() {
        let db = Database::open_in_memory().unwrap();
        let users = UserStorage::new(db);

        let a = users.get_or_create("uid-a", "A").unwrap();
        let b = users.get_or_create("uid-b", "B").unwrap();
        assert_ne!(a.id, b.id);
    }
}
