//! Relational persistence over SQLite.
//!
//! - [`TransactionManager`]: connection and transaction handling
//! - [`PersistenceSchemaManager`]: table and column synchronization
//! - [`PersistenceEntityManager`]: record marshalling and CRUD

pub mod entity_manager;
pub mod marshal;
pub mod schema_manager;
pub mod transaction;

pub use entity_manager::{PersistenceEntityManager, MAX_REFERENCE_DEPTH};
pub use schema_manager::{column_definitions, declared_type, PersistenceSchemaManager, SyncReport};
pub use transaction::{quote, Row, SqlStatement, SqlValue, Transaction, TransactionManager};
