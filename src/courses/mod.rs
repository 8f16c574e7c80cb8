pub mod repository;

pub use repository::{CourseMembership, DynCourseMembership, NewCourse, SqliteCourseMembership};
