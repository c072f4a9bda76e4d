//! Storage operations for chat sessions, messages, attachments, and tags.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::models::{
    AttachmentKind, ChatAttachment, ChatMessage, ChatSession, ChatSessionDetail, ChatTag,
    HydratedAttachment,
};
use crate::stacks::storage::stack_owned_in;
use crate::storage::{format_datetime, parse_datetime, parse_uuid, Database, Result, StorageError};

#[derive(Clone)]
pub struct ChatStorage {
    db: Database,
}

impl ChatStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create_session(
        &self,
        user_id: Uuid,
        stack_id: Uuid,
        title: String,
    ) -> Result<ChatSession> {
        let conn = self.db.conn()?;
        stack_owned_in(&conn, user_id, stack_id)?;
        let session = ChatSession::new(stack_id, title);
        conn.execute(
            "INSERT INTO chat_sessions (id, stack_id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id.to_string(),
                session.stack_id.to_string(),
                session.title,
                format_datetime(session.created_at),
                format_datetime(session.updated_at),
            ],
        )?;
        Ok(session)
    }

    pub fn list_sessions(&self, user_id: Uuid, stack_id: Uuid) -> Result<Vec<ChatSession>> {
        let conn = self.db.conn()?;
        stack_owned_in(&conn, user_id, stack_id)?;
        let mut stmt = conn.prepare(
            "SELECT id, stack_id, title, created_at, updated_at FROM chat_sessions
             WHERE stack_id = ?1 ORDER BY updated_at DESC",
        )?;
        let sessions = stmt
            .query_map(params![stack_id.to_string()], map_session)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    /// Load a session with all of its children.
    pub fn get_session(&self, user_id: Uuid, chat_id: Uuid) -> Result<ChatSessionDetail> {
        let conn = self.db.conn()?;
        let session = chat_owned_in(&conn, user_id, chat_id)?;

        let mut stmt = conn.prepare(
            "SELECT id, chat_id, role, content, created_at FROM chat_messages
             WHERE chat_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let messages = stmt
            .query_map(params![chat_id.to_string()], map_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let attachments = list_attachments_in(&conn, chat_id)?;

        let mut stmt = conn.prepare(
            "SELECT id, chat_id, tag FROM chat_tags WHERE chat_id = ?1 ORDER BY rowid",
        )?;
        let tags = stmt
            .query_map(params![chat_id.to_string()], map_tag)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(ChatSessionDetail {
            id: session.id,
            stack_id: session.stack_id,
            title: session.title,
            created_at: session.created_at,
            updated_at: session.updated_at,
            messages,
            attachments,
            tags,
        })
    }

    pub fn delete_session(&self, user_id: Uuid, chat_id: Uuid) -> Result<()> {
        let conn = self.db.conn()?;
        chat_owned_in(&conn, user_id, chat_id)?;
        conn.execute(
            "DELETE FROM chat_sessions WHERE id = ?1",
            params![chat_id.to_string()],
        )?;
        Ok(())
    }

    /// Rename a session (used by the automatic title generation).
    pub fn rename_session(&self, user_id: Uuid, chat_id: Uuid, title: String) -> Result<()> {
        let conn = self.db.conn()?;
        chat_owned_in(&conn, user_id, chat_id)?;
        conn.execute(
            "UPDATE chat_sessions SET title = ?1 WHERE id = ?2",
            params![title, chat_id.to_string()],
        )?;
        Ok(())
    }

    pub fn add_message(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        role: String,
        content: String,
    ) -> Result<ChatMessage> {
        let conn = self.db.conn()?;
        chat_owned_in(&conn, user_id, chat_id)?;
        let message = ChatMessage {
            id: Uuid::new_v4(),
            chat_id,
            role,
            content,
            created_at: chrono::Utc::now(),
        };
        conn.execute(
            "INSERT INTO chat_messages (id, chat_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.to_string(),
                message.chat_id.to_string(),
                message.role,
                message.content,
                format_datetime(message.created_at),
            ],
        )?;
        conn.execute(
            "UPDATE chat_sessions SET updated_at = ?1 WHERE id = ?2",
            params![format_datetime(message.created_at), chat_id.to_string()],
        )?;
        Ok(message)
    }

    pub fn add_attachment(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        kind: AttachmentKind,
        ref_id: Uuid,
    ) -> Result<ChatAttachment> {
        let conn = self.db.conn()?;
        chat_owned_in(&conn, user_id, chat_id)?;
        let attachment = ChatAttachment {
            id: Uuid::new_v4(),
            chat_id,
            kind,
            ref_id,
            created_at: chrono::Utc::now(),
        };
        conn.execute(
            "INSERT INTO chat_attachments (id, chat_id, kind, ref_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                attachment.id.to_string(),
                attachment.chat_id.to_string(),
                attachment.kind.as_str(),
                attachment.ref_id.to_string(),
                format_datetime(attachment.created_at),
            ],
        )?;
        Ok(attachment)
    }

    pub fn add_tag(&self, user_id: Uuid, chat_id: Uuid, tag: String) -> Result<ChatTag> {
        let conn = self.db.conn()?;
        chat_owned_in(&conn, user_id, chat_id)?;
        let tag = ChatTag {
            id: Uuid::new_v4(),
            chat_id,
            tag,
        };
        conn.execute(
            "INSERT INTO chat_tags (id, chat_id, tag) VALUES (?1, ?2, ?3)",
            params![tag.id.to_string(), tag.chat_id.to_string(), tag.tag],
        )?;
        Ok(tag)
    }

    /// Resolve the session's attachments to display text for an LLM
    /// preamble. References whose target rows no longer exist are skipped.
    pub fn hydrate_attachments(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
    ) -> Result<Vec<HydratedAttachment>> {
        let conn = self.db.conn()?;
        chat_owned_in(&conn, user_id, chat_id)?;
        let attachments = list_attachments_in(&conn, chat_id)?;

        let mut hydrated = Vec::new();
        for attachment in attachments {
            let text = match attachment.kind {
                AttachmentKind::ExamQuestion => conn
                    .query_row(
                        "SELECT text, option_a, option_b, option_c, option_d, answer
                         FROM questions WHERE id = ?1",
                        params![attachment.ref_id.to_string()],
                        |row| {
                            Ok(format!(
                                "{}\nA: {}\nB: {}\nC: {}\nD: {}\nCorrect Answer: {}",
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                                row.get::<_, String>(4)?,
                                row.get::<_, String>(5)?,
                            ))
                        },
                    )
                    .optional()?,
                AttachmentKind::Flashcard => conn
                    .query_row(
                        "SELECT front, back, explanation FROM flashcards WHERE id = ?1",
                        params![attachment.ref_id.to_string()],
                        |row| {
                            Ok(format!(
                                "Front: {}\nBack: {}\nExplanation: {}",
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                            ))
                        },
                    )
                    .optional()?,
                AttachmentKind::Topic => conn
                    .query_row(
                        "SELECT name, description FROM topics WHERE id = ?1",
                        params![attachment.ref_id.to_string()],
                        |row| {
                            Ok(format!(
                                "Topic: {}\nDescription: {}",
                                row.get::<_, String>(0)?,
                                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                            ))
                        },
                    )
                    .optional()?,
            };
            if let Some(text) = text {
                hydrated.push(HydratedAttachment {
                    kind: attachment.kind,
                    text,
                });
            }
        }
        Ok(hydrated)
    }
}

// ==================== Row helpers ====================

fn map_session(row: &rusqlite::Row) -> rusqlite::Result<ChatSession> {
    Ok(ChatSession {
        id: parse_uuid(0, row.get(0)?)?,
        stack_id: parse_uuid(1, row.get(1)?)?,
        title: row.get(2)?,
        created_at: parse_datetime(3, row.get(3)?)?,
        updated_at: parse_datetime(4, row.get(4)?)?,
    })
}

fn map_message(row: &rusqlite::Row) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: parse_uuid(0, row.get(0)?)?,
        chat_id: parse_uuid(1, row.get(1)?)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: parse_datetime(4, row.get(4)?)?,
    })
}

fn map_attachment(row: &rusqlite::Row) -> rusqlite::Result<ChatAttachment> {
    let kind_raw: String = row.get(2)?;
    let kind = AttachmentKind::parse(&kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown attachment kind: {kind_raw}").into(),
        )
    })?;
    Ok(ChatAttachment {
        id: parse_uuid(0, row.get(0)?)?,
        chat_id: parse_uuid(1, row.get(1)?)?,
        kind,
        ref_id: parse_uuid(3, row.get(3)?)?,
        created_at: parse_datetime(4, row.get(4)?)?,
    })
}

fn map_tag(row: &rusqlite::Row) -> rusqlite::Result<ChatTag> {
    Ok(ChatTag {
        id: parse_uuid(0, row.get(0)?)?,
        chat_id: parse_uuid(1, row.get(1)?)?,
        tag: row.get(2)?,
    })
}

fn chat_owned_in(conn: &Connection, user_id: Uuid, chat_id: Uuid) -> Result<ChatSession> {
    conn.query_row(
        "SELECT c.id, c.stack_id, c.title, c.created_at, c.updated_at
         FROM chat_sessions c JOIN study_stacks s ON c.stack_id = s.id
         WHERE c.id = ?1 AND s.user_id = ?2",
        params![chat_id.to_string(), user_id.to_string()],
        map_session,
    )
    .optional()?
    .ok_or(StorageError::ChatNotFound(chat_id))
}

fn list_attachments_in(conn: &Connection, chat_id: Uuid) -> Result<Vec<ChatAttachment>> {
    let mut stmt = conn.prepare(
        "SELECT id, chat_id, kind, ref_id, created_at FROM chat_attachments
         WHERE chat_id = ?1 ORDER BY rowid",
    )?;
    let attachments = stmt
        .query_map(params![chat_id.to_string()], map_attachment)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(attachments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flashcards::{FlashcardStorage, SchedulerConfig};
    use crate::stacks::StackStorage;
    use crate::users::UserStorage;

    struct Fixture {
        db: Database,
        chat: ChatStorage,
        user: Uuid,
        stack: Uuid,
        topic: Uuid,
    }

    fn setup() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let user = UserStorage::new(db.clone())
            .get_or_create("uid", "Tester")
            .unwrap();
        let stacks = StackStorage::new(db.clone());
        let stack = stacks.create_stack(user.id, "Biology".into(), None).unwrap();
        let topic = stacks
            .create_topic(user.id, stack.id, "Cell Division".into(), Some("Mitosis".into()))
            .unwrap();
        Fixture {
            chat: ChatStorage::new(db.clone()),
            db,
            user: user.id,
            stack: stack.id,
            topic: topic.id,
        }
    }

    #[test]
    fn session_with_children_roundtrip() {
        let f = setup();
        let session = f
            .chat
            .create_session(f.user, f.stack, "New Chat".into())
            .unwrap();

        f.chat
            .add_message(f.user, session.id, "user".into(), "What is mitosis?".into())
            .unwrap();
        f.chat
            .add_attachment(f.user, session.id, AttachmentKind::Topic, f.topic)
            .unwrap();
        f.chat
            .add_tag(f.user, session.id, "revision".into())
            .unwrap();

        let detail = f.chat.get_session(f.user, session.id).unwrap();
        assert_eq!(detail.messages.len(), 1);
        assert_eq!(detail.attachments.len(), 1);
        assert_eq!(detail.tags.len(), 1);
        // Adding a message bumps updated_at past creation.
        assert!(detail.updated_at >= detail.created_at);
    }

    #[test]
    fn hydration_resolves_topic_and_card_text() {
        let f = setup();
        let cards = FlashcardStorage::new(f.db.clone(), SchedulerConfig::default());
        let card = cards
            .create(
                f.user,
                f.topic,
                "Phases of mitosis?".into(),
                "PMAT".into(),
                Some("Prophase, metaphase, anaphase, telophase".into()),
            )
            .unwrap();

        let session = f
            .chat
            .create_session(f.user, f.stack, "New Chat".into())
            .unwrap();
        f.chat
            .add_attachment(f.user, session.id, AttachmentKind::Topic, f.topic)
            .unwrap();
        f.chat
            .add_attachment(f.user, session.id, AttachmentKind::Flashcard, card.id)
            .unwrap();

        let hydrated = f.chat.hydrate_attachments(f.user, session.id).unwrap();
        assert_eq!(hydrated.len(), 2);
        assert!(hydrated[0].text.contains("Cell Division"));
        assert!(hydrated[1].text.contains("PMAT"));
    }

    #[test]
    fn hydration_skips_dangling_refs() {
        let f = setup();
        let session = f
            .chat
            .create_session(f.user, f.stack, "New Chat".into())
            .unwrap();
        f.chat
            .add_attachment(f.user, session.id, AttachmentKind::Flashcard, Uuid::new_v4())
            .unwrap();

        let hydrated = f.chat.hydrate_attachments(f.user, session.id).unwrap();
        assert!(hydrated.is_empty());
    }

    #[test]
    fn sessions_are_scoped_by_owner() {
        let f = setup();
        let session = f
            .chat
            .create_session(f.user, f.stack, "Mine".into())
            .unwrap();

        let err = f.chat.get_session(Uuid::new_v4(), session.id).unwrap_err();
        assert!(err.is_not_found());

        f.chat.delete_session(f.user, session.id).unwrap();
        assert!(f
            .chat
            .get_session(f.user, session.id)
            .unwrap_err()
            .is_not_found());
    }
}
