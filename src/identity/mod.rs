pub mod credentials;
pub mod repository;
pub mod session;

pub use credentials::PasswordHash;
pub use repository::{DynIdentityStore, IdentityStore, SqliteIdentityStore};
