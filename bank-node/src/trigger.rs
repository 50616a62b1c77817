use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Watches for the `MARKER` file (spec.md §4.7): its presence in the node's
/// working directory is the operator's signal to start a snapshot. Checked
/// once per node-loop iteration, matching the original's
/// `_check_marker_file` being called before `_recv_messages`/
/// `_generate_message` rather than on a separate timer.
pub struct TriggerWatcher {
    path: PathBuf,
}

impl TriggerWatcher {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join("MARKER"),
        }
    }

    /// Returns `true` at most once per file: if `MARKER` exists, removes it
    /// and reports the trigger; otherwise reports nothing. Removal happens
    /// before the caller acts on the trigger so a slow snapshot can't be
    /// re-triggered by the same file.
    pub fn check(&self) -> Result<bool> {
        if !self.path.is_file() {
            return Ok(false);
        }
        std::fs::remove_file(&self.path)
            .with_context(|| format!("removing trigger file {:?}", self.path))?;
        Ok(true)
    }
}
