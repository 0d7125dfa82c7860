//! Filesystem rule loader with hot-reload via `notify` watcher.
//!
//! Every YAML file under the rules directory holds one `AlertRule`
//! definition. Loaded definitions go through [`RuleStore::upsert`], so the
//! same validation applies to files as to programmatic registration. Deleting
//! a file deactivates its rule; rules are never dropped from the store.
//!
//! [`RuleStore::upsert`]: crate::store::RuleStore::upsert

mod core;
mod status;
mod watcher;


pub use self::core::RuleLoader;
pub use self::status::{LoadResult, LoadStatus};
