// Messaging channel - direct chats between user pairs with read tracking
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::sync::Arc;

use crate::db::{
    self,
    models::{Chat, ChatSummary, Message, Participant},
};
use crate::domain::{
    bounded_text, ChatId, Denial, Entity, MessageId, StoreError, StoreResult, UserId,
};
use crate::identity::repository::user_exists;
use crate::state::DbPool;

pub const MAX_MESSAGE_CHARS: usize = 2000;

#[async_trait]
pub trait MessagingChannel: Send + Sync {
    /// The chat between `user` and `peer`, created if missing.
    /// The flag is true when the chat was created by this call.
    async fn find_or_create_chat(&self, user: &UserId, peer: &UserId)
        -> StoreResult<(Chat, bool)>;

    async fn send_message(
        &self,
        sender: &UserId,
        chat: &ChatId,
        content: &str,
    ) -> StoreResult<Message>;

    /// Oldest first. Marks the other side's unread messages as read.
    async fn list_messages(&self, caller: &UserId, chat: &ChatId) -> StoreResult<Vec<Message>>;

    /// Inbox, most recent activity first. Chats without messages come last.
    async fn list_chats_for_user(&self, user: &UserId) -> StoreResult<Vec<ChatSummary>>;
}

pub struct SqliteMessagingChannel {
    pool: DbPool,
}

impl SqliteMessagingChannel {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessagingChannel for SqliteMessagingChannel {
    async fn find_or_create_chat(
        &self,
        user: &UserId,
        peer: &UserId,
    ) -> StoreResult<(Chat, bool)> {
        if user == peer {
            return Err(StoreError::Validation("participantId"));
        }

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !user_exists(&tx, peer)? {
            return Err(StoreError::NotFound(Entity::User));
        }

        let existing: Option<String> = tx
            .query_row(
                "SELECT a.chat_id FROM chat_participants a
                 JOIN chat_participants b ON b.chat_id = a.chat_id
                 WHERE a.user_id = ?1 AND b.user_id = ?2
                 LIMIT 1",
                params![user.as_str(), peer.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            let chat = load_chat(&tx, &ChatId(id))?;
            return Ok((chat, false));
        }

        let id = ChatId::generate();
        tx.execute(
            "INSERT INTO chats (id, created_at) VALUES (?1, ?2)",
            params![id.as_str(), db::timestamp()],
        )?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO chat_participants (chat_id, user_id) VALUES (?1, ?2)")?;
            stmt.execute(params![id.as_str(), user.as_str()])?;
            stmt.execute(params![id.as_str(), peer.as_str()])?;
        }
        let chat = load_chat(&tx, &id)?;
        tx.commit()?;

        tracing::info!(chat_id = %id, "Chat created");
        Ok((chat, true))
    }

    async fn send_message(
        &self,
        sender: &UserId,
        chat: &ChatId,
        content: &str,
    ) -> StoreResult<Message> {
        let content = bounded_text(content, "content", MAX_MESSAGE_CHARS)?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_participant(&tx, sender, chat)?;

        let message = Message {
            id: MessageId::generate(),
            chat_id: chat.clone(),
            sender_id: sender.clone(),
            content,
            is_read: false,
            created_at: db::timestamp(),
        };
        tx.execute(
            "INSERT INTO messages (id, chat_id, sender_id, content, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![
                message.id.as_str(),
                chat.as_str(),
                sender.as_str(),
                message.content,
                message.created_at
            ],
        )?;
        tx.commit()?;

        tracing::debug!(chat_id = %chat, message_id = %message.id, "Message sent");
        Ok(message)
    }

    async fn list_messages(&self, caller: &UserId, chat: &ChatId) -> StoreResult<Vec<Message>> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_participant(&tx, caller, chat)?;

        // Read flags only ever go from 0 to 1, and never for the caller's own messages
        let marked = tx.execute(
            "UPDATE messages SET is_read = 1
             WHERE chat_id = ?1 AND sender_id != ?2 AND is_read = 0",
            params![chat.as_str(), caller.as_str()],
        )?;

        let messages = {
            let mut stmt = tx.prepare(
                "SELECT id, chat_id, sender_id, content, is_read, created_at
                 FROM messages WHERE chat_id = ?1
                 ORDER BY created_at, rowid",
            )?;
            let rows = stmt
                .query_map(params![chat.as_str()], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        tx.commit()?;

        if marked > 0 {
            tracing::debug!(chat_id = %chat, marked, "Messages marked read");
        }
        Ok(messages)
    }

    async fn list_chats_for_user(&self, user: &UserId) -> StoreResult<Vec<ChatSummary>> {
        let mut conn = self.pool.get()?;
        // One read snapshot for the listing and every summary, so a peer
        // deleted mid-listing cannot leave a chat without its other side
        let tx = conn.transaction()?;

        let chats: Vec<ChatId> = {
            let mut stmt = tx.prepare(
                "SELECT c.id,
                        (SELECT MAX(m.created_at) FROM messages m WHERE m.chat_id = c.id) AS last_at,
                        (SELECT MAX(m.rowid) FROM messages m WHERE m.chat_id = c.id) AS last_seq
                 FROM chats c
                 JOIN chat_participants p ON p.chat_id = c.id
                 WHERE p.user_id = ?1
                 ORDER BY last_at IS NULL, last_at DESC, last_seq DESC,
                          c.created_at DESC, c.rowid DESC",
            )?;
            let rows = stmt
                .query_map(params![user.as_str()], |row| row.get::<_, String>(0))?
                .map(|id| id.map(ChatId))
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let summaries = chats
            .into_iter()
            .map(|chat| summarize(&tx, user, chat))
            .collect::<StoreResult<Vec<_>>>()?;
        tx.commit()?;
        Ok(summaries)
    }
}

/// Remove every chat `user` takes part in, with its messages and
/// participant rows. Returns the number of chats removed.
pub(crate) fn purge_user_chats(conn: &Connection, user: &UserId) -> StoreResult<usize> {
    const USER_CHATS: &str = "SELECT chat_id FROM chat_participants WHERE user_id = ?1";

    conn.execute(
        &format!("DELETE FROM messages WHERE chat_id IN ({})", USER_CHATS),
        params![user.as_str()],
    )?;
    let chat_ids: Vec<String> = {
        let mut stmt = conn.prepare(USER_CHATS)?;
        let rows = stmt
            .query_map(params![user.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    for id in &chat_ids {
        conn.execute("DELETE FROM chat_participants WHERE chat_id = ?1", params![id])?;
        conn.execute("DELETE FROM chats WHERE id = ?1", params![id])?;
    }
    Ok(chat_ids.len())
}

fn ensure_participant(conn: &Connection, user: &UserId, chat: &ChatId) -> StoreResult<()> {
    let participant: Option<bool> = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM chat_participants WHERE chat_id = c.id AND user_id = ?2)
             FROM chats c WHERE c.id = ?1",
            params![chat.as_str(), user.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    match participant {
        None => Err(StoreError::NotFound(Entity::Chat)),
        Some(false) => Err(StoreError::Forbidden(Denial::NotParticipant)),
        Some(true) => Ok(()),
    }
}

fn load_chat(conn: &Connection, chat: &ChatId) -> StoreResult<Chat> {
    let created_at: String = conn
        .query_row(
            "SELECT created_at FROM chats WHERE id = ?1",
            params![chat.as_str()],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(StoreError::NotFound(Entity::Chat))?;

    let mut stmt = conn.prepare_cached(
        "SELECT user_id FROM chat_participants WHERE chat_id = ?1 ORDER BY rowid",
    )?;
    let participants = stmt
        .query_map(params![chat.as_str()], |row| row.get::<_, String>(0))?
        .map(|id| id.map(UserId))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Chat {
        id: chat.clone(),
        participants,
        created_at,
    })
}

fn summarize(conn: &Connection, user: &UserId, chat: ChatId) -> StoreResult<ChatSummary> {
    let other_participant = conn
        .query_row(
            "SELECT u.id, u.username FROM chat_participants p
             JOIN users u ON u.id = p.user_id
             WHERE p.chat_id = ?1 AND p.user_id != ?2
             LIMIT 1",
            params![chat.as_str(), user.as_str()],
            |row| {
                Ok(Participant {
                    id: UserId(row.get(0)?),
                    username: row.get(1)?,
                })
            },
        )
        .optional()?
        .ok_or(StoreError::NotFound(Entity::User))?;

    let last_message = conn
        .query_row(
            "SELECT id, chat_id, sender_id, content, is_read, created_at
             FROM messages WHERE chat_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1",
            params![chat.as_str()],
            message_from_row,
        )
        .optional()?;

    let unread_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE chat_id = ?1 AND sender_id != ?2 AND is_read = 0",
        params![chat.as_str(), user.as_str()],
        |row| row.get(0),
    )?;

    Ok(ChatSummary {
        id: chat,
        other_participant,
        last_message,
        unread_count,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: MessageId(row.get(0)?),
        chat_id: ChatId(row.get(1)?),
        sender_id: UserId(row.get(2)?),
        content: row.get(3)?,
        is_read: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Type alias for Arc-wrapped messaging channel (for AppState)
pub type DynMessagingChannel = Arc<dyn MessagingChannel>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::identity::{IdentityStore, SqliteIdentityStore};

    struct Fixture {
        chats: SqliteMessagingChannel,
        users: SqliteIdentityStore,
        pool: DbPool,
        _temp: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let (pool, temp) = test_pool();
        Fixture {
            chats: SqliteMessagingChannel::new(pool.clone()),
            users: SqliteIdentityStore::new(pool.clone(), 4, 1),
            pool,
            _temp: temp,
        }
    }

    #[tokio::test]
    async fn chat_lookup_is_symmetric() {
        let f = fixture();
        let u1 = f.users.register("u1", "pw").await.unwrap();
        let u2 = f.users.register("u2", "pw").await.unwrap();

        let (first, created) = f.chats.find_or_create_chat(&u1, &u2).await.unwrap();
        assert!(created);
        assert_eq!(first.participants, vec![u1.clone(), u2.clone()]);

        let (second, created) = f.chats.find_or_create_chat(&u2, &u1).await.unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);

        let count: i64 = f
            .pool
            .get()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM chats", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn chat_with_self_or_unknown_peer_is_rejected() {
        let f = fixture();
        let u1 = f.users.register("u1", "pw").await.unwrap();

        assert!(matches!(
            f.chats.find_or_create_chat(&u1, &u1).await.unwrap_err(),
            StoreError::Validation("participantId")
        ));
        assert!(matches!(
            f.chats
                .find_or_create_chat(&u1, &UserId::new("ghost"))
                .await
                .unwrap_err(),
            StoreError::NotFound(Entity::User)
        ));
    }

    #[tokio::test]
    async fn read_flag_flips_once_for_the_recipient_only() {
        let f = fixture();
        let u1 = f.users.register("u1", "pw").await.unwrap();
        let u2 = f.users.register("u2", "pw").await.unwrap();
        let (chat, _) = f.chats.find_or_create_chat(&u1, &u2).await.unwrap();

        let sent = f.chats.send_message(&u1, &chat.id, "hi").await.unwrap();
        assert!(!sent.is_read);

        // The sender reading their own message leaves it unread
        let seen_by_sender = f.chats.list_messages(&u1, &chat.id).await.unwrap();
        assert!(!seen_by_sender[0].is_read);

        let seen_by_recipient = f.chats.list_messages(&u2, &chat.id).await.unwrap();
        assert!(seen_by_recipient[0].is_read);

        let seen_again = f.chats.list_messages(&u1, &chat.id).await.unwrap();
        assert!(seen_again[0].is_read);
    }

    #[tokio::test]
    async fn only_participants_may_read_or_send() {
        let f = fixture();
        let u1 = f.users.register("u1", "pw").await.unwrap();
        let u2 = f.users.register("u2", "pw").await.unwrap();
        let u3 = f.users.register("u3", "pw").await.unwrap();
        let (chat, _) = f.chats.find_or_create_chat(&u1, &u2).await.unwrap();

        assert!(matches!(
            f.chats.send_message(&u3, &chat.id, "hey").await.unwrap_err(),
            StoreError::Forbidden(Denial::NotParticipant)
        ));
        assert!(matches!(
            f.chats.list_messages(&u3, &chat.id).await.unwrap_err(),
            StoreError::Forbidden(Denial::NotParticipant)
        ));
        assert!(matches!(
            f.chats
                .send_message(&u1, &ChatId::new("missing"), "hey")
                .await
                .unwrap_err(),
            StoreError::NotFound(Entity::Chat)
        ));
        assert!(matches!(
            f.chats.send_message(&u1, &chat.id, "   ").await.unwrap_err(),
            StoreError::Validation("content")
        ));
    }

    #[tokio::test]
    async fn messages_list_oldest_first() {
        let f = fixture();
        let u1 = f.users.register("u1", "pw").await.unwrap();
        let u2 = f.users.register("u2", "pw").await.unwrap();
        let (chat, _) = f.chats.find_or_create_chat(&u1, &u2).await.unwrap();

        for text in ["one", "two", "three"] {
            f.chats.send_message(&u1, &chat.id, text).await.unwrap();
        }

        let contents: Vec<_> = f
            .chats
            .list_messages(&u2, &chat.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn inbox_orders_by_activity_and_counts_unread() {
        let f = fixture();
        let me = f.users.register("me", "pw").await.unwrap();
        let quiet = f.users.register("quiet", "pw").await.unwrap();
        let old = f.users.register("old", "pw").await.unwrap();
        let recent = f.users.register("recent", "pw").await.unwrap();

        let (quiet_chat, _) = f.chats.find_or_create_chat(&me, &quiet).await.unwrap();
        let (old_chat, _) = f.chats.find_or_create_chat(&me, &old).await.unwrap();
        let (recent_chat, _) = f.chats.find_or_create_chat(&recent, &me).await.unwrap();

        f.chats.send_message(&old, &old_chat.id, "a").await.unwrap();
        f.chats.send_message(&old, &old_chat.id, "b").await.unwrap();
        f.chats.send_message(&me, &recent_chat.id, "c").await.unwrap();
        f.chats.send_message(&recent, &recent_chat.id, "d").await.unwrap();

        let inbox = f.chats.list_chats_for_user(&me).await.unwrap();
        let order: Vec<_> = inbox.iter().map(|s| s.id.clone()).collect();
        assert_eq!(
            order,
            vec![
                recent_chat.id.clone(),
                old_chat.id.clone(),
                quiet_chat.id.clone()
            ]
        );

        assert_eq!(inbox[0].other_participant.username, "recent");
        assert_eq!(inbox[0].last_message.as_ref().unwrap().content, "d");
        assert_eq!(inbox[0].unread_count, 1);
        assert_eq!(inbox[1].unread_count, 2);
        assert!(inbox[2].last_message.is_none());
        assert_eq!(inbox[2].unread_count, 0);

        f.chats.list_messages(&me, &old_chat.id).await.unwrap();
        let inbox = f.chats.list_chats_for_user(&me).await.unwrap();
        assert_eq!(inbox[1].unread_count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn inbox_stays_readable_while_peers_delete_accounts() {
        let f = fixture();
        let me = f.users.register("me", "pw").await.unwrap();
        let mut peers = Vec::new();
        for n in 0..12 {
            let peer = f.users.register(&format!("peer{}", n), "pw").await.unwrap();
            let (chat, _) = f.chats.find_or_create_chat(&me, &peer).await.unwrap();
            f.chats.send_message(&peer, &chat.id, "hello").await.unwrap();
            peers.push(peer);
        }

        let deleter = SqliteIdentityStore::new(f.pool.clone(), 4, 1);
        let deletions = tokio::spawn(async move {
            for peer in peers {
                deleter.delete_user(&peer).await.unwrap();
            }
        });

        while !deletions.is_finished() {
            let inbox = f.chats.list_chats_for_user(&me).await.unwrap();
            assert!(inbox.len() <= 12);
            tokio::task::yield_now().await;
        }
        deletions.await.unwrap();

        assert!(f.chats.list_chats_for_user(&me).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_user_removes_their_chats() {
        let f = fixture();
        let u1 = f.users.register("u1", "pw").await.unwrap();
        let u2 = f.users.register("u2", "pw").await.unwrap();
        let u3 = f.users.register("u3", "pw").await.unwrap();
        let (doomed, _) = f.chats.find_or_create_chat(&u1, &u2).await.unwrap();
        let (kept, _) = f.chats.find_or_create_chat(&u2, &u3).await.unwrap();
        f.chats.send_message(&u1, &doomed.id, "bye").await.unwrap();
        f.chats.send_message(&u3, &kept.id, "stay").await.unwrap();

        f.users.delete_user(&u1).await.unwrap();

        let inbox = f.chats.list_chats_for_user(&u2).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].id, kept.id);
        assert!(matches!(
            f.chats.list_messages(&u2, &doomed.id).await.unwrap_err(),
            StoreError::NotFound(Entity::Chat)
        ));
    }
}
