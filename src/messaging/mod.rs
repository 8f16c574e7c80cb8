pub mod repository;

pub use repository::{DynMessagingChannel, MessagingChannel, SqliteMessagingChannel};
