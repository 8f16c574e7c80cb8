use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::Config;
use crate::content::{DynContentGraph, SqliteContentGraph};
use crate::courses::{DynCourseMembership, SqliteCourseMembership};
use crate::identity::{DynIdentityStore, SqliteIdentityStore};
use crate::messaging::{DynMessagingChannel, SqliteMessagingChannel};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub identity: DynIdentityStore,
    pub courses: DynCourseMembership,
    pub content: DynContentGraph,
    pub messaging: DynMessagingChannel,
}

impl AppState {
    /// Wire every component onto one shared pool
    pub fn new(db: DbPool, config: Config) -> Self {
        let identity = Arc::new(SqliteIdentityStore::new(
            db.clone(),
            config.auth.bcrypt_cost,
            config.auth.session_hours,
        ));
        Self {
            identity,
            courses: Arc::new(SqliteCourseMembership::new(db.clone())),
            content: Arc::new(SqliteContentGraph::new(db.clone())),
            messaging: Arc::new(SqliteMessagingChannel::new(db.clone())),
            db,
            config,
        }
    }
}
