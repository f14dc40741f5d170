//! Persistence layer: libSQL-backed system of record for the control plane.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{AuditEntry, Database, Model, ModelRun, NewRun};
