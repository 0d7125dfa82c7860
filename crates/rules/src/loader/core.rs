//! Core [`RuleLoader`] struct: filesystem-backed rule loading with optional hot-reload.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use crate::error::{Result, RuleError};
use crate::schema::RuleDefinition;
use crate::store::RuleStore;

use super::status::{LoadResult, LoadStatus};
use super::watcher::handle_fs_event;

/// File path → id of the rule it last defined.
pub(super) type FileIndex = Arc<RwLock<HashMap<PathBuf, String>>>;

/// Filesystem-backed rule loader with optional hot-reload.
///
/// Scans a directory (recursively) for `*.yml` / `*.yaml` files and upserts
/// each definition into the shared [`RuleStore`].
pub struct RuleLoader {
    /// Root directory containing rule YAML files.
    rules_dir: PathBuf,
    store: Arc<RuleStore>,
    pub(super) files: FileIndex,
    /// Active filesystem watcher (held to keep it alive).
    _watcher: Option<RecommendedWatcher>,
}

impl RuleLoader {
    /// Create a new loader for the given directory.
    ///
    /// Creates the directory (and parents) if it does not exist.
    pub fn new(rules_dir: PathBuf, store: Arc<RuleStore>) -> Self {
        if !rules_dir.exists() {
            if let Err(e) = fs::create_dir_all(&rules_dir) {
                warn!(path = %rules_dir.display(), error = %e, "failed to create rules directory");
            }
        }
        Self {
            rules_dir,
            store,
            files: Arc::new(RwLock::new(HashMap::new())),
            _watcher: None,
        }
    }

    /// Recursively scan the rules directory and load all YAML files.
    ///
    /// Dotfiles and non-YAML files are skipped. Parse and validation errors
    /// are reported per file but do not abort the scan.
    pub fn load_all(&self) -> Result<Vec<LoadResult>> {
        let mut results = Vec::new();
        self.scan_dir_recursive(&self.rules_dir, &mut results)?;
        let loaded = results.iter().filter(|r| r.status.is_loaded()).count();
        info!(path = %self.rules_dir.display(), loaded, total = results.len(), "loaded rules directory");
        Ok(results)
    }

    fn scan_dir_recursive(&self, dir: &Path, results: &mut Vec<LoadResult>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "failed to read directory");
                return Ok(());
            }
        };

        for entry in entries {
            let path = entry?.path();

            if is_dotfile(&path) {
                if path.is_file() {
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Skipped {
                            reason: "dotfile".to_string(),
                        },
                    });
                }
                continue;
            }

            if path.is_dir() {
                self.scan_dir_recursive(&path, results)?;
                continue;
            }

            if !is_yaml(&path) {
                results.push(LoadResult {
                    path,
                    status: LoadStatus::Skipped {
                        reason: "not a YAML file".to_string(),
                    },
                });
                continue;
            }

            let status = apply_file(&self.store, &self.files, &path);
            results.push(LoadResult { path, status });
        }

        Ok(())
    }

    /// Parse a single YAML file into a [`RuleDefinition`] without storing it.
    pub fn load_file(&self, path: &Path) -> Result<RuleDefinition> {
        parse_file(path)
    }

    /// Start a recursive filesystem watcher.
    ///
    /// Created or modified files are re-parsed and upserted; a file that no
    /// longer parses or validates leaves the previous version in place.
    /// Removed files deactivate the rule they defined.
    pub fn watch(&mut self) -> Result<()> {
        let store = Arc::clone(&self.store);
        let files = Arc::clone(&self.files);

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => handle_fs_event(&event, &store, &files),
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            },
        )?;

        watcher.watch(&self.rules_dir, RecursiveMode::Recursive)?;
        let _ = watcher.configure(notify::Config::default().with_poll_interval(Duration::from_millis(500)));

        info!(path = %self.rules_dir.display(), "watching rules directory for changes (recursive)");
        self._watcher = Some(watcher);
        Ok(())
    }

    /// Get the rules directory path.
    pub fn rules_dir(&self) -> &Path {
        &self.rules_dir
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    /// Rule id last loaded from `path`, if any.
    pub fn rule_for_path(&self, path: &Path) -> Option<String> {
        self.files.read().expect("file index lock poisoned").get(path).cloned()
    }

    /// Validate, store and atomically write a definition to `<id>.yml`.
    ///
    /// The store is updated first, so an invalid definition never reaches
    /// disk. The file is written to a `.tmp` sibling and renamed into place.
    pub fn write_rule(&self, definition: &RuleDefinition) -> Result<PathBuf> {
        let id = definition.id().to_string();
        self.store.upsert(definition.clone(), Utc::now())?;

        let final_path = self.rules_dir.join(format!("{id}.yml"));
        let tmp_path = self.rules_dir.join(format!(".{id}.tmp"));
        let yaml = serde_yaml::to_string(definition)?;
        fs::write(&tmp_path, yaml)?;
        fs::rename(&tmp_path, &final_path)?;

        self.files
            .write()
            .expect("file index lock poisoned")
            .insert(final_path.clone(), id.clone());
        info!(rule_id = %id, path = %final_path.display(), "wrote rule file");
        Ok(final_path)
    }
}

pub(super) fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e == "yml" || e == "yaml")
        .unwrap_or(false)
}

pub(super) fn is_dotfile(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn parse_file(path: &Path) -> Result<RuleDefinition> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}

/// Parse `path` and upsert it into `store`, recording which rule the file
/// defines.
pub(super) fn apply_file(store: &RuleStore, files: &FileIndex, path: &Path) -> LoadStatus {
    let definition = match parse_file(path) {
        Ok(d) => d,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load rule file");
            return LoadStatus::Failed { error: e.to_string() };
        }
    };

    match store.upsert(definition, Utc::now()) {
        Ok(rule) => {
            let rule_id = rule.id().to_string();
            info!(rule_id = %rule_id, path = %path.display(), "loaded rule");
            let orphaned = {
                let mut index = files.write().expect("file index lock poisoned");
                let previous = index.insert(path.to_path_buf(), rule_id.clone());
                // The old id is orphaned unless another file still defines it.
                previous.filter(|old| *old != rule_id && !index.values().any(|id| id == old))
            };
            if let Some(old_id) = orphaned {
                deactivate_renamed(store, &old_id, &rule_id, path);
            }
            LoadStatus::Loaded { rule_id }
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "rejected rule file");
            LoadStatus::Failed { error: e.to_string() }
        }
    }
}

fn deactivate_renamed(store: &RuleStore, old_id: &str, new_id: &str, path: &Path) {
    match store.deactivate(old_id, Utc::now()) {
        Ok(_) => info!(rule_id = %old_id, new_rule_id = %new_id, path = %path.display(), "deactivated rule after id change"),
        Err(RuleError::UnknownRule(_)) => {}
        Err(e) => warn!(rule_id = %old_id, error = %e, "failed to deactivate rule"),
    }
}

/// Deactivate the rule that `path` defined, if any.
pub(super) fn retire_file(store: &RuleStore, files: &FileIndex, path: &Path) -> Option<String> {
    let rule_id = files.write().expect("file index lock poisoned").remove(path)?;
    match store.deactivate(&rule_id, Utc::now()) {
        Ok(_) => {
            info!(rule_id = %rule_id, path = %path.display(), "deactivated rule after file deletion");
            Some(rule_id)
        }
        Err(RuleError::UnknownRule(_)) => None,
        Err(e) => {
            warn!(rule_id = %rule_id, error = %e, "failed to deactivate rule");
            None
        }
    }
}
