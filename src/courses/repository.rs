// Course membership - course records and the enrollment join table
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::content;
use crate::db::{self, models::Course};
use crate::domain::{
    bounded_text, ConflictKind, CourseId, Denial, Entity, StoreError, StoreResult, UserId,
};
use crate::identity;
use crate::state::DbPool;

/// Fields supplied when creating a course
#[derive(Debug, Clone)]
pub struct NewCourse {
    pub name: String,
    pub code: String,
    pub description: String,
    /// Defaults to the creator's username
    pub instructor: Option<String>,
}

#[async_trait]
pub trait CourseMembership: Send + Sync {
    async fn create_course(&self, creator: &UserId, course: NewCourse) -> StoreResult<Course>;

    /// Remove a course with its posts and enrollments. Creator only.
    async fn delete_course(&self, caller: &UserId, course: &CourseId) -> StoreResult<()>;

    async fn get_course(&self, course: &CourseId) -> StoreResult<Course>;

    async fn list_courses(&self) -> StoreResult<Vec<Course>>;

    async fn list_courses_for_user(&self, user: &UserId) -> StoreResult<Vec<Course>>;

    async fn enroll(&self, user: &UserId, course: &CourseId) -> StoreResult<()>;

    async fn unenroll(&self, user: &UserId, course: &CourseId) -> StoreResult<()>;

    async fn is_enrolled(&self, user: &UserId, course: &CourseId) -> StoreResult<bool>;

    async fn list_enrolled_course_ids(&self, user: &UserId) -> StoreResult<BTreeSet<CourseId>>;
}

pub struct SqliteCourseMembership {
    pool: DbPool,
}

impl SqliteCourseMembership {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CourseMembership for SqliteCourseMembership {
    async fn create_course(&self, creator: &UserId, course: NewCourse) -> StoreResult<Course> {
        let name = bounded_text(&course.name, "name", 128)?;
        let code = bounded_text(&course.code, "code", 128)?;
        let description = bounded_text(&course.description, "description", 2000)?;
        let instructor = match course.instructor.as_deref().map(str::trim) {
            Some(instructor) if !instructor.is_empty() => {
                Some(bounded_text(instructor, "instructor", 128)?)
            }
            _ => None,
        };

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let instructor = match instructor {
            Some(instructor) => instructor,
            None => identity::repository::username_of(&tx, creator)?,
        };

        let taken: bool = tx.query_row(
            "SELECT COUNT(*) > 0 FROM courses WHERE name = ?1 OR code = ?2",
            params![name, code],
            |row| row.get(0),
        )?;
        if taken {
            return Err(StoreError::Conflict(ConflictKind::DuplicateCourse));
        }

        let id = CourseId::generate();
        tx.execute(
            "INSERT INTO courses (id, name, code, description, instructor, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.as_str(),
                name,
                code,
                description,
                instructor,
                creator.as_str(),
                db::timestamp()
            ],
        )?;
        let created = load_course(&tx, &id)?;
        tx.commit()?;

        tracing::info!(course_id = %id, created_by = %creator, "Course created");
        Ok(created)
    }

    async fn delete_course(&self, caller: &UserId, course: &CourseId) -> StoreResult<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let created_by: Option<String> = tx
            .query_row(
                "SELECT created_by FROM courses WHERE id = ?1",
                params![course.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::NotFound(Entity::Course))?;
        if created_by.as_deref() != Some(caller.as_str()) {
            return Err(StoreError::Forbidden(Denial::NotCreator));
        }

        let posts = content::repository::purge_course_posts(&tx, course)?;
        tx.execute(
            "DELETE FROM enrollments WHERE course_id = ?1",
            params![course.as_str()],
        )?;
        tx.execute("DELETE FROM courses WHERE id = ?1", params![course.as_str()])?;
        tx.commit()?;

        tracing::info!(course_id = %course, posts, "Course deleted");
        Ok(())
    }

    async fn get_course(&self, course: &CourseId) -> StoreResult<Course> {
        let conn = self.pool.get()?;
        load_course(&conn, course)
    }

    async fn list_courses(&self) -> StoreResult<Vec<Course>> {
        let conn = self.pool.get()?;
        let ids = query_ids(&conn, "SELECT id FROM courses ORDER BY name", [])?;
        ids.iter().map(|id| load_course(&conn, id)).collect()
    }

    async fn list_courses_for_user(&self, user: &UserId) -> StoreResult<Vec<Course>> {
        let conn = self.pool.get()?;
        let ids = query_ids(
            &conn,
            "SELECT c.id FROM courses c
             JOIN enrollments e ON e.course_id = c.id
             WHERE e.user_id = ?1
             ORDER BY c.name",
            params![user.as_str()],
        )?;
        ids.iter().map(|id| load_course(&conn, id)).collect()
    }

    async fn enroll(&self, user: &UserId, course: &CourseId) -> StoreResult<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !course_exists(&tx, course)? {
            return Err(StoreError::NotFound(Entity::Course));
        }
        if is_enrolled_in(&tx, user, course)? {
            return Err(StoreError::Conflict(ConflictKind::AlreadyEnrolled));
        }

        tx.execute(
            "INSERT INTO enrollments (user_id, course_id, enrolled_at) VALUES (?1, ?2, ?3)",
            params![user.as_str(), course.as_str(), db::timestamp()],
        )?;
        tx.commit()?;

        tracing::info!(user_id = %user, course_id = %course, "Enrolled");
        Ok(())
    }

    async fn unenroll(&self, user: &UserId, course: &CourseId) -> StoreResult<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !course_exists(&tx, course)? {
            return Err(StoreError::NotFound(Entity::Course));
        }
        let removed = tx.execute(
            "DELETE FROM enrollments WHERE user_id = ?1 AND course_id = ?2",
            params![user.as_str(), course.as_str()],
        )?;
        if removed == 0 {
            return Err(StoreError::Forbidden(Denial::NotEnrolled));
        }
        tx.commit()?;

        tracing::info!(user_id = %user, course_id = %course, "Unenrolled");
        Ok(())
    }

    async fn is_enrolled(&self, user: &UserId, course: &CourseId) -> StoreResult<bool> {
        let conn = self.pool.get()?;
        Ok(is_enrolled_in(&conn, user, course)?)
    }

    async fn list_enrolled_course_ids(&self, user: &UserId) -> StoreResult<BTreeSet<CourseId>> {
        let conn = self.pool.get()?;
        Ok(enrolled_course_ids(&conn, user)?.into_iter().collect())
    }
}

pub(crate) fn course_exists(conn: &Connection, course: &CourseId) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM courses WHERE id = ?1",
        params![course.as_str()],
        |row| row.get(0),
    )
}

pub(crate) fn is_enrolled_in(
    conn: &Connection,
    user: &UserId,
    course: &CourseId,
) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM enrollments WHERE user_id = ?1 AND course_id = ?2",
        params![user.as_str(), course.as_str()],
        |row| row.get(0),
    )
}

/// Ids of the courses a user is enrolled in, oldest enrollment first
pub(crate) fn enrolled_course_ids(
    conn: &Connection,
    user: &UserId,
) -> rusqlite::Result<Vec<CourseId>> {
    let mut stmt = conn.prepare_cached(
        "SELECT course_id FROM enrollments WHERE user_id = ?1 ORDER BY enrolled_at, rowid",
    )?;
    let ids = stmt
        .query_map(params![user.as_str()], |row| row.get::<_, String>(0))?
        .map(|id| id.map(CourseId))
        .collect();
    ids
}

/// Drop every enrollment of a user being deleted and orphan the courses they
/// created. Returns the number of enrollments removed.
pub(crate) fn purge_user_enrollments(conn: &Connection, user: &UserId) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE courses SET created_by = NULL WHERE created_by = ?1",
        params![user.as_str()],
    )?;
    conn.execute(
        "DELETE FROM enrollments WHERE user_id = ?1",
        params![user.as_str()],
    )
}

fn load_course(conn: &Connection, id: &CourseId) -> StoreResult<Course> {
    let mut course = conn
        .query_row(
            "SELECT id, name, code, description, instructor, created_by, created_at
             FROM courses WHERE id = ?1",
            params![id.as_str()],
            |row| {
                Ok(Course {
                    id: CourseId(row.get(0)?),
                    name: row.get(1)?,
                    code: row.get(2)?,
                    description: row.get(3)?,
                    instructor: row.get(4)?,
                    created_by: row.get::<_, Option<String>>(5)?.map(UserId),
                    enrolled_students: Vec::new(),
                    created_at: row.get(6)?,
                })
            },
        )
        .optional()?
        .ok_or(StoreError::NotFound(Entity::Course))?;

    let mut stmt = conn.prepare_cached(
        "SELECT user_id FROM enrollments WHERE course_id = ?1 ORDER BY enrolled_at, rowid",
    )?;
    course.enrolled_students = stmt
        .query_map(params![id.as_str()], |row| row.get::<_, String>(0))?
        .map(|id| id.map(UserId))
        .collect::<Result<_, _>>()?;

    Ok(course)
}

fn query_ids<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> rusqlite::Result<Vec<CourseId>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map(params, |row| row.get::<_, String>(0))?
        .map(|id| id.map(CourseId))
        .collect();
    ids
}

/// Type alias for Arc-wrapped membership store (for AppState)
pub type DynCourseMembership = Arc<dyn CourseMembership>;
