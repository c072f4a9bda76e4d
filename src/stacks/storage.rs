//! Storage operations for stacks, topics, and topic dependencies.
//!
//! Every operation is scoped by `user_id`: rows that exist but belong to
//! another user surface as the same NotFound errors as rows that do not
//! exist at all.

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::models::{StudyStack, Topic, TopicDependency};
use crate::storage::{parse_uuid, Database, Result, StorageError};

#[derive(Clone)]
pub struct StackStorage {
    db: Database,
}

impl StackStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ==================== Stacks ====================

    pub fn list_stacks(&self, user_id: Uuid) -> Result<Vec<StudyStack>> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, description FROM study_stacks
             WHERE user_id = ?1 ORDER BY rowid",
        )?;
        let stacks = stmt
            .query_map(params![user_id.to_string()], map_stack)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stacks)
    }

    pub fn get_stack(&self, user_id: Uuid, stack_id: Uuid) -> Result<StudyStack> {
        let conn = self.db.conn()?;
        stack_owned_in(&conn, user_id, stack_id)
    }

    pub fn create_stack(
        &self,
        user_id: Uuid,
        name: String,
        description: Option<String>,
    ) -> Result<StudyStack> {
        let stack = StudyStack::new(user_id, name, description);
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO study_stacks (id, user_id, name, description) VALUES (?1, ?2, ?3, ?4)",
            params![
                stack.id.to_string(),
                stack.user_id.to_string(),
                stack.name,
                stack.description,
            ],
        )?;
        Ok(stack)
    }

    // ==================== Topics ====================

    pub fn list_topics(&self, user_id: Uuid, stack_id: Uuid) -> Result<Vec<Topic>> {
        let conn = self.db.conn()?;
        stack_owned_in(&conn, user_id, stack_id)?;
        let mut stmt = conn.prepare(
            "SELECT id, stack_id, name, description FROM topics
             WHERE stack_id = ?1 ORDER BY rowid",
        )?;
        let topics = stmt
            .query_map(params![stack_id.to_string()], map_topic)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(topics)
    }

    pub fn get_topic(&self, user_id: Uuid, topic_id: Uuid) -> Result<Topic> {
        let conn = self.db.conn()?;
        topic_owned_in(&conn, user_id, topic_id)
    }

    pub fn get_topic_by_name(&self, user_id: Uuid, name: &str) -> Result<Topic> {
        let conn = self.db.conn()?;
        topic_by_name_in(&conn, user_id, name)
    }

    pub fn create_topic(
        &self,
        user_id: Uuid,
        stack_id: Uuid,
        name: String,
        description: Option<String>,
    ) -> Result<Topic> {
        let conn = self.db.conn()?;
        stack_owned_in(&conn, user_id, stack_id)?;
        let topic = Topic::new(stack_id, name, description);
        conn.execute(
            "INSERT INTO topics (id, stack_id, name, description) VALUES (?1, ?2, ?3, ?4)",
            params![
                topic.id.to_string(),
                topic.stack_id.to_string(),
                topic.name,
                topic.description,
            ],
        )?;
        Ok(topic)
    }

    pub fn update_topic(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        name: String,
        description: Option<String>,
    ) -> Result<Topic> {
        let conn = self.db.conn()?;
        let mut topic = topic_owned_in(&conn, user_id, topic_id)?;
        conn.execute(
            "UPDATE topics SET name = ?1, description = ?2 WHERE id = ?3",
            params![name, description, topic_id.to_string()],
        )?;
        topic.name = name;
        topic.description = description;
        Ok(topic)
    }

    pub fn delete_topic(&self, user_id: Uuid, topic_id: Uuid) -> Result<()> {
        let conn = self.db.conn()?;
        topic_owned_in(&conn, user_id, topic_id)?;
        conn.execute("DELETE FROM topics WHERE id = ?1", params![topic_id.to_string()])?;
        Ok(())
    }

    // ==================== Dependencies ====================

    /// List every dependency whose endpoints lie in the given stack.
    pub fn list_dependencies(&self, user_id: Uuid, stack_id: Uuid) -> Result<Vec<TopicDependency>> {
        let conn = self.db.conn()?;
        stack_owned_in(&conn, user_id, stack_id)?;
        let mut stmt = conn.prepare(
            "SELECT d.from_topic_id, d.to_topic_id
             FROM topic_dependencies d
             JOIN topics tf ON d.from_topic_id = tf.id
             JOIN topics tt ON d.to_topic_id = tt.id
             WHERE tf.stack_id = ?1 OR tt.stack_id = ?1
             ORDER BY d.rowid",
        )?;
        let deps = stmt
            .query_map(params![stack_id.to_string()], map_dependency)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(deps)
    }

    pub fn add_dependency(
        &self,
        user_id: Uuid,
        from_topic_id: Uuid,
        to_topic_id: Uuid,
    ) -> Result<TopicDependency> {
        let conn = self.db.conn()?;
        topic_owned_in(&conn, user_id, from_topic_id)?;
        topic_owned_in(&conn, user_id, to_topic_id)?;
        insert_dependency_in(&conn, from_topic_id, to_topic_id)
    }

    /// Add a dependency by topic names, as produced by the LLM inference.
    pub fn add_dependency_by_name(
        &self,
        user_id: Uuid,
        from_name: &str,
        to_name: &str,
    ) -> Result<TopicDependency> {
        let conn = self.db.conn()?;
        let from = topic_by_name_in(&conn, user_id, from_name)?;
        let to = topic_by_name_in(&conn, user_id, to_name)?;
        insert_dependency_in(&conn, from.id, to.id)
    }

    /// Repoint an existing edge at topics resolved by name.
    pub fn update_dependency(
        &self,
        user_id: Uuid,
        from_topic_id: Uuid,
        to_topic_id: Uuid,
        new_from_name: &str,
        new_to_name: &str,
    ) -> Result<TopicDependency> {
        let conn = self.db.conn()?;
        dependency_owned_in(&conn, user_id, from_topic_id, to_topic_id)?;
        let new_from = topic_by_name_in(&conn, user_id, new_from_name)?;
        let new_to = topic_by_name_in(&conn, user_id, new_to_name)?;
        conn.execute(
            "UPDATE topic_dependencies SET from_topic_id = ?1, to_topic_id = ?2
             WHERE from_topic_id = ?3 AND to_topic_id = ?4",
            params![
                new_from.id.to_string(),
                new_to.id.to_string(),
                from_topic_id.to_string(),
                to_topic_id.to_string(),
            ],
        )?;
        Ok(TopicDependency {
            from_topic_id: new_from.id,
            to_topic_id: new_to.id,
        })
    }

    pub fn delete_dependency(
        &self,
        user_id: Uuid,
        from_topic_id: Uuid,
        to_topic_id: Uuid,
    ) -> Result<()> {
        let conn = self.db.conn()?;
        dependency_owned_in(&conn, user_id, from_topic_id, to_topic_id)?;
        conn.execute(
            "DELETE FROM topic_dependencies WHERE from_topic_id = ?1 AND to_topic_id = ?2",
            params![from_topic_id.to_string(), to_topic_id.to_string()],
        )?;
        Ok(())
    }
}

// ==================== Shared row helpers ====================

fn map_stack(row: &rusqlite::Row) -> rusqlite::Result<StudyStack> {
    Ok(StudyStack {
        id: parse_uuid(0, row.get(0)?)?,
        user_id: parse_uuid(1, row.get(1)?)?,
        name: row.get(2)?,
        description: row.get(3)?,
    })
}

fn map_topic(row: &rusqlite::Row) -> rusqlite::Result<Topic> {
    Ok(Topic {
        id: parse_uuid(0, row.get(0)?)?,
        stack_id: parse_uuid(1, row.get(1)?)?,
        name: row.get(2)?,
        description: row.get(3)?,
    })
}

fn map_dependency(row: &rusqlite::Row) -> rusqlite::Result<TopicDependency> {
    Ok(TopicDependency {
        from_topic_id: parse_uuid(0, row.get(0)?)?,
        to_topic_id: parse_uuid(1, row.get(1)?)?,
    })
}

pub(crate) fn stack_owned_in(
    conn: &Connection,
    user_id: Uuid,
    stack_id: Uuid,
) -> Result<StudyStack> {
    conn.query_row(
        "SELECT id, user_id, name, description FROM study_stacks
         WHERE id = ?1 AND user_id = ?2",
        params![stack_id.to_string(), user_id.to_string()],
        map_stack,
    )
    .optional()?
    .ok_or(StorageError::StackNotFound(stack_id))
}

pub(crate) fn topic_owned_in(conn: &Connection, user_id: Uuid, topic_id: Uuid) -> Result<Topic> {
    conn.query_row(
        "SELECT t.id, t.stack_id, t.name, t.description
         FROM topics t JOIN study_stacks s ON t.stack_id = s.id
         WHERE t.id = ?1 AND s.user_id = ?2",
        params![topic_id.to_string(), user_id.to_string()],
        map_topic,
    )
    .optional()?
    .ok_or(StorageError::TopicNotFound(topic_id))
}

fn topic_by_name_in(conn: &Connection, user_id: Uuid, name: &str) -> Result<Topic> {
    conn.query_row(
        "SELECT t.id, t.stack_id, t.name, t.description
         FROM topics t JOIN study_stacks s ON t.stack_id = s.id
         WHERE t.name = ?1 AND s.user_id = ?2",
        params![name, user_id.to_string()],
        map_topic,
    )
    .optional()?
    .ok_or_else(|| StorageError::TopicNameNotFound(name.to_string()))
}

fn dependency_owned_in(
    conn: &Connection,
    user_id: Uuid,
    from_topic_id: Uuid,
    to_topic_id: Uuid,
) -> Result<TopicDependency> {
    topic_owned_in(conn, user_id, from_topic_id)?;
    topic_owned_in(conn, user_id, to_topic_id)?;
    conn.query_row(
        "SELECT from_topic_id, to_topic_id FROM topic_dependencies
         WHERE from_topic_id = ?1 AND to_topic_id = ?2",
        params![from_topic_id.to_string(), to_topic_id.to_string()],
        map_dependency,
    )
    .optional()?
    .ok_or(StorageError::DependencyNotFound {
        from: from_topic_id,
        to: to_topic_id,
    })
}

fn insert_dependency_in(
    conn: &Connection,
    from_topic_id: Uuid,
    to_topic_id: Uuid,
) -> Result<TopicDependency> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO topic_dependencies (from_topic_id, to_topic_id) VALUES (?1, ?2)",
        params![from_topic_id.to_string(), to_topic_id.to_string()],
    )?;
    if inserted == 0 {
        return Err(StorageError::DuplicateDependency {
            from: from_topic_id,
            to: to_topic_id,
        });
    }
    Ok(TopicDependency {
        from_topic_id,
        to_topic_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserStorage;

    fn setup() -> (StackStorage, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let user = UserStorage::new(db.clone())
            .get_or_create("uid", "Tester")
            .unwrap();
        (StackStorage::new(db), user.id)
    }

    #[test]
    fn stack_crud_roundtrip() {
        let (stacks, user) = setup();
        let stack = stacks
            .create_stack(user, "Linear Algebra".into(), Some("MIT 18.06".into()))
            .unwrap();

        let listed = stacks.list_stacks(user).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, stack.id);

        let fetched = stacks.get_stack(user, stack.id).unwrap();
        assert_eq!(fetched.name, "Linear Algebra");
    }

    #[test]
    fn foreign_stack_is_not_found() {
        let (stacks, user) = setup();
        let stack = stacks.create_stack(user, "Mine".into(), None).unwrap();

        let err = stacks.get_stack(Uuid::new_v4(), stack.id).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn topic_crud_and_rename() {
        let (stacks, user) = setup();
        let stack = stacks.create_stack(user, "Rust".into(), None).unwrap();
        let topic = stacks
            .create_topic(user, stack.id, "Ownership".into(), None)
            .unwrap();

        let updated = stacks
            .update_topic(user, topic.id, "Borrowing".into(), Some("refs".into()))
            .unwrap();
        assert_eq!(updated.name, "Borrowing");

        let by_name = stacks.get_topic_by_name(user, "Borrowing").unwrap();
        assert_eq!(by_name.id, topic.id);

        stacks.delete_topic(user, topic.id).unwrap();
        assert!(stacks.list_topics(user, stack.id).unwrap().is_empty());
    }

    #[test]
    fn dependencies_reject_duplicates() {
        let (stacks, user) = setup();
        let stack = stacks.create_stack(user, "Calc".into(), None).unwrap();
        let limits = stacks
            .create_topic(user, stack.id, "Limits".into(), None)
            .unwrap();
        let derivatives = stacks
            .create_topic(user, stack.id, "Derivatives".into(), None)
            .unwrap();

        stacks.add_dependency(user, limits.id, derivatives.id).unwrap();
        let err = stacks
            .add_dependency(user, limits.id, derivatives.id)
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateDependency { .. }));

        let deps = stacks.list_dependencies(user, stack.id).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].from_topic_id, limits.id);
    }

    #[test]
    fn dependency_by_name_then_delete() {
        let (stacks, user) = setup();
        let stack = stacks.create_stack(user, "Calc".into(), None).unwrap();
        stacks
            .create_topic(user, stack.id, "Limits".into(), None)
            .unwrap();
        stacks
            .create_topic(user, stack.id, "Series".into(), None)
            .unwrap();

        let dep = stacks
            .add_dependency_by_name(user, "Limits", "Series")
            .unwrap();
        stacks
            .delete_dependency(user, dep.from_topic_id, dep.to_topic_id)
            .unwrap();
        assert!(stacks.list_dependencies(user, stack.id).unwrap().is_empty());
    }

    #[test]
    fn deleting_topic_cascades_to_dependencies() {
        let (stacks, user) = setup();
        let stack = stacks.create_stack(user, "Calc".into(), None).unwrap();
        let a = stacks
            .create_topic(user, stack.id, "A".into(), None)
            .unwrap();
        let b = stacks
            .create_topic(user, stack.id, "B".into(), None)
            .unwrap();
        stacks.add_dependency(user, a.id, b.id).unwrap();

        stacks.delete_topic(user, a.id).unwrap();
        assert!(stacks.list_dependencies(user, stack.id).unwrap().is_empty());
    }
}
