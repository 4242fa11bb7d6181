pub mod aliases;
pub mod entity_locks;
pub mod resolver;
pub mod snapshot_cache;

pub use aliases::IdentifierAliases;
pub use entity_locks::EntityLocks;
pub use resolver::HistoryResolver;
pub use snapshot_cache::SnapshotCache;
