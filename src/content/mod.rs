pub mod ledger;
pub mod repository;

pub use repository::{ContentGraph, DynContentGraph, SqliteContentGraph};
