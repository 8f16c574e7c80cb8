// Domain types shared by every component - identifiers and the failure taxonomy
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Fresh time-ordered identifier
            pub fn generate() -> Self {
                Self(uuid::Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(UserId);
string_id!(CourseId);
string_id!(PostId);
string_id!(CommentId);
string_id!(ChatId);
string_id!(MessageId);

/// Entity kinds named by `StoreError::NotFound`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Course,
    Post,
    Comment,
    Chat,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::User => "User",
            Self::Course => "Course",
            Self::Post => "Post",
            Self::Comment => "Comment",
            Self::Chat => "Chat",
        };
        write!(f, "{}", name)
    }
}

/// Why an authenticated caller may not perform an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    NotAuthor,
    NotCreator,
    NotParticipant,
    NotEnrolled,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAuthor => write!(f, "Only the author may do that"),
            Self::NotCreator => write!(f, "Only the course creator may do that"),
            Self::NotParticipant => write!(f, "Not a participant in this chat"),
            Self::NotEnrolled => write!(f, "You must be enrolled in the course"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    DuplicateHandle,
    DuplicateCourse,
    AlreadyEnrolled,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateHandle => write!(f, "Username already taken"),
            Self::DuplicateCourse => write!(f, "A course with that name or code already exists"),
            Self::AlreadyEnrolled => write!(f, "Already enrolled in this course"),
        }
    }
}

/// Every failure a component operation can report.
///
/// `Pool`, `Sql` and `Hash` are persistence failures: the surrounding
/// transaction has been rolled back and nothing was applied.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(Entity),

    #[error("{0}")]
    Forbidden(Denial),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("{0}")]
    Conflict(ConflictKind),

    #[error("Invalid or missing field: {0}")]
    Validation(&'static str),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Hash error: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

impl StoreError {
    pub fn is_persistence_failure(&self) -> bool {
        matches!(self, Self::Pool(_) | Self::Sql(_) | Self::Hash(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Trim `raw` and check it is non-empty and at most `max` characters.
pub fn bounded_text(raw: &str, field: &'static str, max: usize) -> StoreResult<String> {
    let text = raw.trim();
    if text.is_empty() || text.chars().count() > max {
        return Err(StoreError::Validation(field));
    }
    Ok(text.to_string())
}
