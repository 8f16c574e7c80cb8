// Identity store - user records, credentials, sessions and karma
use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::sync::{Arc, OnceLock};

use crate::content;
use crate::courses;
use crate::db::{self, models::UserProfile};
use crate::domain::{ConflictKind, Entity, StoreError, StoreResult, UserId};
use crate::identity::credentials::{validate_handle, validate_secret, PasswordHash};
use crate::identity::session;
use crate::messaging;
use crate::state::DbPool;

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Create a user with a hashed password
    async fn register(&self, handle: &str, secret: &str) -> StoreResult<UserId>;

    /// Check a handle/password pair
    async fn authenticate(&self, handle: &str, secret: &str) -> StoreResult<UserId>;

    async fn profile(&self, user: &UserId) -> StoreResult<UserProfile>;

    async fn rename(&self, user: &UserId, handle: &str) -> StoreResult<UserProfile>;

    /// Remove a user and everything they own, atomically
    async fn delete_user(&self, user: &UserId) -> StoreResult<()>;

    async fn open_session(&self, user: &UserId) -> StoreResult<String>;

    async fn resolve_session(&self, token: &str) -> StoreResult<Option<UserId>>;

    async fn close_session(&self, token: &str) -> StoreResult<()>;
}

pub struct SqliteIdentityStore {
    pool: DbPool,
    bcrypt_cost: u32,
    session_hours: u64,
    /// Verified against when the handle is unknown, so both rejections pay for bcrypt
    decoy: OnceLock<PasswordHash>,
}

impl SqliteIdentityStore {
    pub fn new(pool: DbPool, bcrypt_cost: u32, session_hours: u64) -> Self {
        Self {
            pool,
            bcrypt_cost,
            session_hours,
            decoy: OnceLock::new(),
        }
    }

    fn decoy(&self) -> StoreResult<&PasswordHash> {
        if let Some(hash) = self.decoy.get() {
            return Ok(hash);
        }
        let hash = PasswordHash::new("quadrangle-decoy", self.bcrypt_cost)?;
        Ok(self.decoy.get_or_init(|| hash))
    }
}

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn register(&self, handle: &str, secret: &str) -> StoreResult<UserId> {
        let handle = validate_handle(handle)?;
        let secret = validate_secret(secret)?;
        // Hash before taking the write lock
        let hash = PasswordHash::new(secret, self.bcrypt_cost)?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if find_by_handle(&tx, handle)?.is_some() {
            return Err(StoreError::Conflict(ConflictKind::DuplicateHandle));
        }

        let id = UserId::generate();
        tx.execute(
            "INSERT INTO users (id, username, password_hash, karma, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![id.as_str(), handle, hash.as_str(), db::timestamp()],
        )
        .map_err(duplicate_handle)?;
        tx.commit()?;

        tracing::info!(user_id = %id, "User registered");
        Ok(id)
    }

    async fn authenticate(&self, handle: &str, secret: &str) -> StoreResult<UserId> {
        let found = {
            let conn = self.pool.get()?;
            find_by_handle(&conn, handle)?
        };

        let accepted = match found {
            Some((id, hash)) => hash.verify(secret).then_some(id),
            None => {
                self.decoy()?.verify(secret);
                None
            }
        };

        accepted.ok_or_else(|| {
            tracing::debug!("Rejected login attempt");
            StoreError::InvalidCredentials
        })
    }

    async fn profile(&self, user: &UserId) -> StoreResult<UserProfile> {
        let conn = self.pool.get()?;
        load_profile(&conn, user)
    }

    async fn rename(&self, user: &UserId, handle: &str) -> StoreResult<UserProfile> {
        let handle = validate_handle(handle)?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some((owner, _)) = find_by_handle(&tx, handle)? {
            if &owner != user {
                return Err(StoreError::Conflict(ConflictKind::DuplicateHandle));
            }
        }

        let updated = tx
            .execute(
                "UPDATE users SET username = ?1 WHERE id = ?2",
                params![handle, user.as_str()],
            )
            .map_err(duplicate_handle)?;
        if updated == 0 {
            return Err(StoreError::NotFound(Entity::User));
        }
        let profile = load_profile(&tx, user)?;
        tx.commit()?;

        Ok(profile)
    }

    async fn delete_user(&self, user: &UserId) -> StoreResult<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !user_exists(&tx, user)? {
            return Err(StoreError::NotFound(Entity::User));
        }

        // Likes first, so counters and karma on surviving posts stay in step
        let withdrawn = content::ledger::withdraw_likes_by(&tx, user)?;
        let posts = content::repository::purge_user_content(&tx, user)?;
        let chats = messaging::repository::purge_user_chats(&tx, user)?;
        courses::repository::purge_user_enrollments(&tx, user)?;
        tx.execute(
            "DELETE FROM sessions WHERE user_id = ?1",
            params![user.as_str()],
        )?;
        tx.execute("DELETE FROM users WHERE id = ?1", params![user.as_str()])?;
        tx.commit()?;

        tracing::info!(user_id = %user, withdrawn, posts, chats, "User deleted");
        Ok(())
    }

    async fn open_session(&self, user: &UserId) -> StoreResult<String> {
        let conn = self.pool.get()?;
        Ok(session::create_session(&conn, user, self.session_hours)?)
    }

    async fn resolve_session(&self, token: &str) -> StoreResult<Option<UserId>> {
        let conn = self.pool.get()?;
        Ok(session::resolve_session(&conn, token)?)
    }

    async fn close_session(&self, token: &str) -> StoreResult<()> {
        let conn = self.pool.get()?;
        Ok(session::delete_session(&conn, token)?)
    }
}

/// Move a user's karma by `delta`, returning the new value.
///
/// Only the engagement ledger calls this, inside its like-toggle transaction.
pub(crate) fn adjust_karma(conn: &Connection, user: &UserId, delta: i64) -> StoreResult<i64> {
    conn.query_row(
        "UPDATE users SET karma = karma + ?1 WHERE id = ?2 RETURNING karma",
        params![delta, user.as_str()],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(StoreError::NotFound(Entity::User))
}

pub(crate) fn username_of(conn: &Connection, user: &UserId) -> StoreResult<String> {
    conn.query_row(
        "SELECT username FROM users WHERE id = ?1",
        params![user.as_str()],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(StoreError::NotFound(Entity::User))
}

pub(crate) fn user_exists(conn: &Connection, user: &UserId) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE id = ?1",
        params![user.as_str()],
        |row| row.get(0),
    )
}

fn find_by_handle(
    conn: &Connection,
    handle: &str,
) -> rusqlite::Result<Option<(UserId, PasswordHash)>> {
    conn.query_row(
        "SELECT id, password_hash FROM users WHERE username = ?1",
        params![handle],
        |row| {
            Ok((
                UserId(row.get(0)?),
                PasswordHash::from_stored(row.get::<_, String>(1)?),
            ))
        },
    )
    .optional()
}

fn load_profile(conn: &Connection, user: &UserId) -> StoreResult<UserProfile> {
    let (username, karma, created_at) = conn
        .query_row(
            "SELECT username, karma, created_at FROM users WHERE id = ?1",
            params![user.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?
        .ok_or(StoreError::NotFound(Entity::User))?;

    Ok(UserProfile {
        id: user.clone(),
        username,
        karma,
        enrolled_courses: courses::repository::enrolled_course_ids(conn, user)?,
        created_at,
    })
}

// A concurrent registration can still win the race to the UNIQUE index
fn duplicate_handle(err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StoreError::Conflict(ConflictKind::DuplicateHandle),
        _ => StoreError::Sql(err),
    }
}

/// Type alias for Arc-wrapped identity store (for AppState)
pub type DynIdentityStore = Arc<dyn IdentityStore>;
