//! Generic repositories with cascading saves, plus view-model mapping.
//! Entities declare their fields once through schemas; repositories and the
//! mapper work on those schemas instead of runtime reflection.

pub mod config;
pub mod db;
pub mod logging;
pub mod mapper;
pub mod model;
pub mod repo;

pub use config::{ConfigError, DatabaseTarget, StoreConfig};
pub use logging::{default_log_level, init_logging, logging_status};
pub use mapper::{
    fill_from_entity, update_entity_from_view_model, MapError, MapResult, Mapping, MappingPlan,
    ViewModel, ViewModelSchema,
};
pub use model::entity::{new_ref, AnyEntity, AnyEntityRef, Entity, EntityId, EntityRef, EntityType};
pub use model::schema::{EntitySchema, FieldError};
pub use model::value::{FieldKind, Value};
pub use repo::memory_repo::InMemoryRepository;
pub use repo::registry::RepositoryRegistry;
pub use repo::sqlite_repo::SqliteRepository;
pub use repo::{Query, RepoError, RepoResult, Repository, SaveTransaction};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
