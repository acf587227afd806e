//! Engine bootstrap.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::entity_manager::EntityManager;
use super::schema_manager::SchemaManager;
use super::state::{State, StateManager};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::filter::FilterContextBuilder;
use crate::persistence::{PersistenceEntityManager, SyncReport, TransactionManager};
use crate::schema::catalog::{self, CORE_MODULE, RUNTIME_MODULE};
use crate::schema::{Module, SchemaRegistry};

/// A started engine: storage opened, schema built and catalog written.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    transactions: Arc<TransactionManager>,
    state: Arc<StateManager>,
    schema: Arc<SchemaManager>,
    entity_manager: EntityManager,
}

impl Engine {
    /// Open storage and initialize the schema declared by `modules`.
    ///
    /// The CORE and RUNTIME modules are added when missing. Storage and
    /// catalog initialization share one transaction, so a failed start
    /// leaves the database untouched.
    #[instrument(skip(config, modules), fields(modules = modules.len()))]
    pub fn start(config: EngineConfig, modules: Vec<Module>) -> Result<Self> {
        let state = Arc::new(StateManager::new());
        let transactions = Arc::new(TransactionManager::open(&config.database)?);
        state.transition(State::Started);

        let registry = Arc::new(SchemaRegistry::new());
        let persistence = Arc::new(PersistenceEntityManager::new(Arc::clone(&registry)));
        let schema = Arc::new(SchemaManager::new(
            Arc::clone(&registry),
            Arc::clone(&persistence),
            Arc::clone(&state),
        ));

        let modules = with_builtin_modules(modules);
        {
            let tx = transactions.open_transaction()?;
            let report = schema.initialize_schemas_storage(&modules, &tx)?;
            schema.initialize_schema_entity_records(&modules, &tx)?;
            tx.commit()?;
            info!(
                entities = registry.all().len(),
                ddl = report.ddl_count(),
                "schema initialized"
            );
        }
        state.transition(State::Initialized);

        let entity_manager = EntityManager::new(
            Arc::clone(&transactions),
            Arc::clone(&state),
            Arc::clone(&schema),
            persistence,
            config.max_cascade_depth,
        );
        Ok(Self {
            config,
            transactions,
            state,
            schema,
            entity_manager,
        })
    }

    /// Record operations.
    pub fn entity_manager(&self) -> &EntityManager {
        &self.entity_manager
    }

    /// Schema lookups.
    pub fn schema_manager(&self) -> &SchemaManager {
        &self.schema
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.state.current()
    }

    /// The configuration the engine started with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Builder for list contexts using the configured default limit.
    pub fn filter_context_builder(&self) -> FilterContextBuilder {
        FilterContextBuilder::new(self.config.api_list_limit)
    }

    /// Synchronize storage with the current schema in a new transaction.
    pub fn sync_storage(&self) -> Result<SyncReport> {
        let tx = self.transactions.open_transaction()?;
        let report = self.schema.sync_storage(&tx)?;
        tx.commit()?;
        Ok(report)
    }
}

/// `modules` with the built-in CORE module first and a RUNTIME module.
fn with_builtin_modules(modules: Vec<Module>) -> Vec<Module> {
    let mut all = vec![catalog::core_module()];
    for module in modules {
        if module.name.eq_ignore_ascii_case(CORE_MODULE) {
            warn!("ignoring user module named {CORE_MODULE}");
            continue;
        }
        all.push(module);
    }
    if !all.iter().any(|m| m.name.eq_ignore_ascii_case(RUNTIME_MODULE)) {
        all.push(catalog::runtime_module());
    }
    all
}
