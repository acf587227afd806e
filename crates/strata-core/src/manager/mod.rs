//! Engine-level managers.
//!
//! - [`Engine`]: bootstrap and access to the managers
//! - [`EntityManager`]: transactional record operations
//! - [`SchemaManager`]: schema building, catalog records and runtime changes
//! - [`ResolutionExecutor`]: reference handling on delete
//! - [`StateManager`]: lifecycle state

pub mod engine;
pub mod entity_manager;
pub mod resolution;
pub mod schema_manager;
pub mod state;

pub use engine::Engine;
pub use entity_manager::EntityManager;
pub use resolution::{
    DeletedRecord, NullifiedField, ResolutionExecutor, ResolutionPolicy, ResolutionResult,
};
pub use schema_manager::{declared_type_name, SchemaManager};
pub use state::{State, StateManager};
