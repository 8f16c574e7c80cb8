// Content graph - posts, comments and likes, gated by course membership
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Params, TransactionBehavior};
use std::sync::Arc;

use crate::content::ledger;
use crate::courses::repository::{course_exists, is_enrolled_in};
use crate::db::{
    self,
    models::{Comment, LikeState, Post},
};
use crate::domain::{
    bounded_text, CommentId, CourseId, Denial, Entity, PostId, StoreError, StoreResult, UserId,
};
use crate::identity::repository::{user_exists, username_of};
use crate::state::DbPool;

pub const MAX_POST_CHARS: usize = 2000;
pub const MAX_COMMENT_CHARS: usize = 500;

#[async_trait]
pub trait ContentGraph: Send + Sync {
    /// Post into a course the author is enrolled in
    async fn create_post(
        &self,
        author: &UserId,
        course: &CourseId,
        content: &str,
        image: Option<&str>,
    ) -> StoreResult<Post>;

    /// Delete a post with its comments and likes. Author only.
    async fn delete_post(&self, caller: &UserId, post: &PostId) -> StoreResult<()>;

    async fn create_comment(
        &self,
        author: &UserId,
        post: &PostId,
        content: &str,
    ) -> StoreResult<Comment>;

    async fn delete_comment(&self, caller: &UserId, comment: &CommentId) -> StoreResult<()>;

    /// Like the post if `user` has not, otherwise take the like back
    async fn toggle_like(&self, user: &UserId, post: &PostId) -> StoreResult<LikeState>;

    /// Newest first
    async fn list_posts_for_course(
        &self,
        caller: &UserId,
        course: &CourseId,
    ) -> StoreResult<Vec<Post>>;

    /// Newest first, across every course `user` is enrolled in
    async fn list_posts_for_enrolled_courses(&self, user: &UserId) -> StoreResult<Vec<Post>>;

    async fn list_posts_by_author(&self, caller: &UserId, author: &UserId)
        -> StoreResult<Vec<Post>>;

    async fn liked_post_ids(&self, user: &UserId) -> StoreResult<Vec<PostId>>;
}

pub struct SqliteContentGraph {
    pool: DbPool,
}

impl SqliteContentGraph {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContentGraph for SqliteContentGraph {
    async fn create_post(
        &self,
        author: &UserId,
        course: &CourseId,
        content: &str,
        image: Option<&str>,
    ) -> StoreResult<Post> {
        let content = bounded_text(content, "content", MAX_POST_CHARS)?;
        let image = image.map(str::trim).filter(|image| !image.is_empty());

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !course_exists(&tx, course)? {
            return Err(StoreError::NotFound(Entity::Course));
        }
        if !is_enrolled_in(&tx, author, course)? {
            return Err(StoreError::Forbidden(Denial::NotEnrolled));
        }

        let id = PostId::generate();
        tx.execute(
            "INSERT INTO posts (id, user_id, course_id, content, image, likes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                id.as_str(),
                author.as_str(),
                course.as_str(),
                content,
                image,
                db::timestamp()
            ],
        )?;
        let post = load_posts(&tx, "WHERE p.id = ?2", params![author.as_str(), id.as_str()])?
            .pop()
            .ok_or(StoreError::NotFound(Entity::Post))?;
        tx.commit()?;

        tracing::info!(post_id = %id, course_id = %course, author_id = %author, "Post created");
        Ok(post)
    }

    async fn delete_post(&self, caller: &UserId, post: &PostId) -> StoreResult<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let author = post_author(&tx, post)?;
        if &author != caller {
            return Err(StoreError::Forbidden(Denial::NotAuthor));
        }

        purge_posts(&tx, "id = ?1", params![post.as_str()])?;
        tx.commit()?;

        tracing::info!(post_id = %post, "Post deleted");
        Ok(())
    }

    async fn create_comment(
        &self,
        author: &UserId,
        post: &PostId,
        content: &str,
    ) -> StoreResult<Comment> {
        let content = bounded_text(content, "content", MAX_COMMENT_CHARS)?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Existence only; commenters need not be enrolled in the post's course
        post_author(&tx, post)?;

        let comment = Comment {
            id: CommentId::generate(),
            post_id: post.clone(),
            author_id: author.clone(),
            author_username: username_of(&tx, author)?,
            content,
            created_at: db::timestamp(),
        };
        tx.execute(
            "INSERT INTO comments (id, post_id, user_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                comment.id.as_str(),
                post.as_str(),
                author.as_str(),
                comment.content,
                comment.created_at
            ],
        )?;
        tx.commit()?;

        tracing::debug!(comment_id = %comment.id, post_id = %post, "Comment created");
        Ok(comment)
    }

    async fn delete_comment(&self, caller: &UserId, comment: &CommentId) -> StoreResult<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let author: String = tx
            .query_row(
                "SELECT user_id FROM comments WHERE id = ?1",
                params![comment.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::NotFound(Entity::Comment))?;
        if author != caller.as_str() {
            return Err(StoreError::Forbidden(Denial::NotAuthor));
        }

        tx.execute(
            "DELETE FROM comments WHERE id = ?1",
            params![comment.as_str()],
        )?;
        tx.commit()?;

        tracing::debug!(comment_id = %comment, "Comment deleted");
        Ok(())
    }

    async fn toggle_like(&self, user: &UserId, post: &PostId) -> StoreResult<LikeState> {
        let mut conn = self.pool.get()?;
        // IMMEDIATE takes the write lock before the liked-by read, so two
        // toggles on the same post cannot both see the same starting state
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let author = post_author(&tx, post)?;
        let already_liked: bool = tx.query_row(
            "SELECT COUNT(*) > 0 FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
            params![post.as_str(), user.as_str()],
            |row| row.get(0),
        )?;

        let like_count = if already_liked {
            ledger::record_unlike(&tx, post, &author, user)?
        } else {
            ledger::record_like(&tx, post, &author, user)?
        };
        tx.commit()?;

        let liked = !already_liked;
        tracing::info!(post_id = %post, user_id = %user, liked, like_count, "Like toggled");
        Ok(LikeState { liked, like_count })
    }

    async fn list_posts_for_course(
        &self,
        caller: &UserId,
        course: &CourseId,
    ) -> StoreResult<Vec<Post>> {
        let conn = self.pool.get()?;
        if !course_exists(&conn, course)? {
            return Err(StoreError::NotFound(Entity::Course));
        }
        load_posts(
            &conn,
            "WHERE p.course_id = ?2 ORDER BY p.created_at DESC, p.rowid DESC",
            params![caller.as_str(), course.as_str()],
        )
    }

    async fn list_posts_for_enrolled_courses(&self, user: &UserId) -> StoreResult<Vec<Post>> {
        let conn = self.pool.get()?;
        load_posts(
            &conn,
            "WHERE p.course_id IN (SELECT course_id FROM enrollments WHERE user_id = ?1)
             ORDER BY p.created_at DESC, p.rowid DESC",
            params![user.as_str()],
        )
    }

    async fn list_posts_by_author(
        &self,
        caller: &UserId,
        author: &UserId,
    ) -> StoreResult<Vec<Post>> {
        let conn = self.pool.get()?;
        if !user_exists(&conn, author)? {
            return Err(StoreError::NotFound(Entity::User));
        }
        load_posts(
            &conn,
            "WHERE p.user_id = ?2 ORDER BY p.created_at DESC, p.rowid DESC",
            params![caller.as_str(), author.as_str()],
        )
    }

    async fn liked_post_ids(&self, user: &UserId) -> StoreResult<Vec<PostId>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT post_id FROM post_likes WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
        )?;
        let ids = stmt
            .query_map(params![user.as_str()], |row| row.get::<_, String>(0))?
            .map(|id| id.map(PostId))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

/// Remove every post in a course along with its likes and comments.
/// Returns the number of posts removed.
pub(crate) fn purge_course_posts(conn: &Connection, course: &CourseId) -> StoreResult<usize> {
    purge_posts(conn, "course_id = ?1", params![course.as_str()])
}

/// Remove a departing user's posts (with their likes and comments) and every
/// comment they left elsewhere. Returns the number of posts removed.
pub(crate) fn purge_user_content(conn: &Connection, user: &UserId) -> StoreResult<usize> {
    let posts = purge_posts(conn, "user_id = ?1", params![user.as_str()])?;
    conn.execute(
        "DELETE FROM comments WHERE user_id = ?1",
        params![user.as_str()],
    )?;
    Ok(posts)
}

// `filter` selects rows of `posts`; its parameters are shared by all three deletes
fn purge_posts<P: Params + Copy>(conn: &Connection, filter: &str, params: P) -> StoreResult<usize> {
    conn.execute(
        &format!("DELETE FROM post_likes WHERE post_id IN (SELECT id FROM posts WHERE {filter})"),
        params,
    )?;
    conn.execute(
        &format!("DELETE FROM comments WHERE post_id IN (SELECT id FROM posts WHERE {filter})"),
        params,
    )?;
    Ok(conn.execute(&format!("DELETE FROM posts WHERE {filter}"), params)?)
}

fn post_author(conn: &Connection, post: &PostId) -> StoreResult<UserId> {
    conn.query_row(
        "SELECT user_id FROM posts WHERE id = ?1",
        params![post.as_str()],
        |row| row.get::<_, String>(0),
    )
    .optional()?
    .map(UserId)
    .ok_or(StoreError::NotFound(Entity::Post))
}

// ?1 is always the caller, used for `is_liked_by_caller`
const POST_SELECT: &str = "SELECT p.id, p.user_id, u.username, p.course_id, p.content, p.image, p.likes,
        EXISTS(SELECT 1 FROM post_likes l WHERE l.post_id = p.id AND l.user_id = ?1),
        p.created_at
     FROM posts p
     JOIN users u ON u.id = p.user_id";

fn load_posts<P: Params>(conn: &Connection, filter: &str, params: P) -> StoreResult<Vec<Post>> {
    let mut stmt = conn.prepare(&format!("{} {}", POST_SELECT, filter))?;
    let mut posts = stmt
        .query_map(params, |row| {
            Ok(Post {
                id: PostId(row.get(0)?),
                author_id: UserId(row.get(1)?),
                author_username: row.get(2)?,
                course_id: CourseId(row.get(3)?),
                content: row.get(4)?,
                image: row.get(5)?,
                likes: row.get(6)?,
                is_liked_by_caller: row.get(7)?,
                comments: Vec::new(),
                created_at: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for post in &mut posts {
        post.comments = load_comments(conn, &post.id)?;
    }
    Ok(posts)
}

/// Oldest first
fn load_comments(conn: &Connection, post: &PostId) -> rusqlite::Result<Vec<Comment>> {
    let mut stmt = conn.prepare_cached(
        "SELECT c.id, c.post_id, c.user_id, u.username, c.content, c.created_at
         FROM comments c
         JOIN users u ON u.id = c.user_id
         WHERE c.post_id = ?1
         ORDER BY c.created_at, c.rowid",
    )?;
    let comments = stmt
        .query_map(params![post.as_str()], |row| {
            Ok(Comment {
                id: CommentId(row.get(0)?),
                post_id: PostId(row.get(1)?),
                author_id: UserId(row.get(2)?),
                author_username: row.get(3)?,
                content: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect();
    comments
}

/// Type alias for Arc-wrapped content graph (for AppState)
pub type DynContentGraph = Arc<dyn ContentGraph>;
