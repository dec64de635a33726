//! Persistence layer — libSQL-backed storage for users and operators.

pub mod libsql_backend;
pub mod migrations;
pub mod model;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use model::{Audience, OperatorRole, UserFilter, UserRecord};
pub use traits::RecordStore;
