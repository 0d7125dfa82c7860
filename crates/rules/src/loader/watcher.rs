//! Filesystem event handler for the notify watcher (hot-reload).

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind};

use crate::store::RuleStore;

use super::core::{apply_file, is_dotfile, is_yaml, retire_file, FileIndex};
use super::status::LoadStatus;

/// Handle a single filesystem event from the notify watcher.
pub(super) fn handle_fs_event(event: &Event, store: &RuleStore, files: &FileIndex) {
    for path in &event.paths {
        // Dotfiles include our own .tmp files from write_rule.
        if !is_yaml(path) || is_dotfile(path) {
            continue;
        }

        match &event.kind {
            EventKind::Create(CreateKind::File)
            | EventKind::Create(CreateKind::Any)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Name(_)) => {
                if !path.exists() {
                    // Renamed away.
                    retire_file(store, files, path);
                    continue;
                }
                if let LoadStatus::Failed { .. } = apply_file(store, files, path) {
                    tracing::warn!(path = %path.display(), "keeping previous version of rule");
                }
            }
            EventKind::Remove(RemoveKind::File) | EventKind::Remove(RemoveKind::Any) => {
                retire_file(store, files, path);
            }
            _ => {}
        }
    }
}
