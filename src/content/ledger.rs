//! Engagement ledger: like/unlike bookkeeping.
//!
//! Every change to `post_likes` goes through here, together with the post's
//! `likes` counter and the author's karma, on the caller's open transaction.
//! That keeps `posts.likes` equal to the number of `post_likes` rows for the
//! post, and keeps karma moving in lockstep with it.

use rusqlite::{params, Connection};

use crate::db;
use crate::domain::{PostId, StoreResult, UserId};
use crate::identity;

/// Add `user` to the post's liked-by set. Returns the new like count.
pub(crate) fn record_like(
    conn: &Connection,
    post: &PostId,
    author: &UserId,
    user: &UserId,
) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO post_likes (post_id, user_id, created_at) VALUES (?1, ?2, ?3)",
        params![post.as_str(), user.as_str(), db::timestamp()],
    )?;
    apply(conn, post, author, 1)
}

/// Remove `user` from the post's liked-by set. Returns the new like count.
pub(crate) fn record_unlike(
    conn: &Connection,
    post: &PostId,
    author: &UserId,
    user: &UserId,
) -> StoreResult<i64> {
    conn.execute(
        "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
        params![post.as_str(), user.as_str()],
    )?;
    apply(conn, post, author, -1)
}

/// Withdraw every like `user` has given, as if each were toggled off.
/// Used when the account is deleted.
pub(crate) fn withdraw_likes_by(conn: &Connection, user: &UserId) -> StoreResult<usize> {
    let liked: Vec<(PostId, UserId)> = {
        let mut stmt = conn.prepare(
            "SELECT p.id, p.user_id FROM post_likes l
             JOIN posts p ON p.id = l.post_id
             WHERE l.user_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![user.as_str()], |row| {
                Ok((PostId(row.get(0)?), UserId(row.get(1)?)))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    for (post, author) in &liked {
        record_unlike(conn, post, author, user)?;
    }
    Ok(liked.len())
}

fn apply(conn: &Connection, post: &PostId, author: &UserId, delta: i64) -> StoreResult<i64> {
    let likes: i64 = conn.query_row(
        "UPDATE posts SET likes = likes + ?1 WHERE id = ?2 RETURNING likes",
        params![delta, post.as_str()],
        |row| row.get(0),
    )?;
    identity::repository::adjust_karma(conn, author, delta)?;
    tracing::debug!(post_id = %post, author_id = %author, delta, likes, "Ledger entry");
    Ok(likes)
}
