use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::hierarchy::{Hierarchy, NodeId};

/// Decides whether the local copy of a node must be fetched again.
#[derive(Debug, Clone, Copy, Default)]
pub struct StalenessDecider {
    pub force: bool,
}

impl StalenessDecider {
    pub fn new(force: bool) -> Self {
        Self { force }
    }

    /// `true` when the file is missing or any node in the subtree was edited
    /// after the file was last written. Always `true` when forced.
    pub fn needs_update(&self, file_path: &Path, tree: &Hierarchy, node: NodeId) -> Result<bool> {
        if self.force {
            return Ok(true);
        }
        debug!("Checking for update for file {}", file_path.display());

        let Some(local_last_edit) = local_modified(file_path)? else {
            debug!(
                "Document {} is missing on disk, update needed.",
                file_path.display()
            );
            return Ok(true);
        };

        debug!(
            "Local file timestamp: {}, remote edit timestamp: {}",
            local_last_edit.to_rfc3339(),
            tree.node(node).last_edit.to_rfc3339()
        );
        let changes = tree.changed_since(node, local_last_edit);
        if changes > 0 {
            info!(
                "Document \"{}\" consists of {changes} outdated documents, update needed.",
                file_path.display()
            );
            return Ok(true);
        }

        debug!(
            "Document \"{}\" consists of {changes} outdated documents, skipping updating.",
            file_path.display()
        );
        Ok(false)
    }
}

/// Modification time of `path` in UTC, or `None` when nothing exists there.
pub fn local_modified(path: &Path) -> Result<Option<DateTime<Utc>>> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(error).with_context(|| format!("failed to inspect {}", path.display()));
        }
    };
    let modified = metadata
        .modified()
        .with_context(|| format!("failed to read modification time of {}", path.display()))?;
    Ok(Some(DateTime::<Utc>::from(modified)))
}
