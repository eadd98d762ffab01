//! Local caches of API objects kept current by list + watch

pub mod informer;
pub mod store;

pub use informer::{wait_for_cache_sync, Informer, SyncedFlag};
pub use store::{IndexFunc, Store, StoreChange, NAMESPACE_INDEX};
