use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::UserId;

/// Create a new session for a user. Returns the session token.
/// Expired sessions of every user are swept first.
pub fn create_session(
    conn: &Connection,
    user_id: &UserId,
    hours: u64,
) -> Result<String, rusqlite::Error> {
    let swept = purge_expired(conn)?;
    if swept > 0 {
        tracing::debug!(swept, "Expired sessions removed");
    }

    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();

    conn.execute(
        "INSERT INTO sessions (id, user_id, token, expires_at) VALUES (?1, ?2, ?3, datetime('now', ?4))",
        params![id, user_id.as_str(), token, format!("+{} hours", hours)],
    )?;

    Ok(token)
}

/// Look up the user behind a live (unexpired) session token.
pub fn resolve_session(conn: &Connection, token: &str) -> Result<Option<UserId>, rusqlite::Error> {
    conn.query_row(
        "SELECT user_id FROM sessions WHERE token = ?1 AND expires_at > datetime('now')",
        params![token],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map(|id| id.map(UserId))
}

/// Delete a session by token.
pub fn delete_session(conn: &Connection, token: &str) -> Result<(), rusqlite::Error> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// Delete every session past its expiry. Returns the number removed.
pub fn purge_expired(conn: &Connection) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "DELETE FROM sessions WHERE expires_at <= datetime('now')",
        [],
    )
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
