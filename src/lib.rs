// Library exports for Quadrangle
// This allows integration tests and external code to use Quadrangle modules

pub mod config;
pub mod content;
pub mod courses;
pub mod db;
pub mod domain;
pub mod error;
pub mod extractors;
pub mod identity;
pub mod messaging;
pub mod routes;
pub mod state;
