//! File-backed checkpoint store.
//!
//! Each thread's latest checkpoint is one JSON file:
//!
//! ```text
//! root/
//!   researcher/
//!     thread-1.json
//!   supervisor/
//!     thread-1.json
//! ```
//!
//! Path components are percent-encoded so arbitrary thread ids map to safe
//! file names. Writes go to a temp file first and are renamed into place.

use crate::agent::checkpoint::{Checkpoint, CheckpointFuture, Checkpointer, ThreadKey};
use crate::error::AgentError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Checkpoint store writing one JSON file per thread.
#[derive(Debug, Clone)]
pub struct FileCheckpointer {
    root: PathBuf,
}

impl FileCheckpointer {
    /// Use `root` as the store directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(encode_component(namespace))
    }

    fn checkpoint_path(&self, key: &ThreadKey) -> PathBuf {
        self.namespace_dir(&key.namespace)
            .join(format!("{}.json", encode_component(&key.thread_id)))
    }
}

impl Checkpointer for FileCheckpointer {
    fn load<'a>(&'a self, key: &'a ThreadKey) -> CheckpointFuture<'a, Option<Checkpoint>> {
        Box::pin(async move {
            let path = self.checkpoint_path(key);
            let json = match tokio::fs::read_to_string(&path).await {
                Ok(json) => json,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => {
                    return Err(AgentError::checkpoint(format!(
                        "failed to read {}: {e}",
                        path.display()
                    )));
                }
            };
            let checkpoint = serde_json::from_str(&json).map_err(|e| {
                AgentError::checkpoint(format!("corrupt checkpoint {}: {e}", path.display()))
            })?;
            Ok(Some(checkpoint))
        })
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    fn save<'a>(&'a self, checkpoint: &'a Checkpoint) -> CheckpointFuture<'a, ()> {
        Box::pin(async move {
            let dir = self.namespace_dir(&checkpoint.key.namespace);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| AgentError::checkpoint(format!("failed to create {}: {e}", dir.display())))?;

            let final_path = self.checkpoint_path(&checkpoint.key);
            let tmp_path = final_path.with_extension("json.tmp");
            let json = serde_json::to_string_pretty(checkpoint)
                .map_err(|e| AgentError::checkpoint(format!("failed to serialize checkpoint: {e}")))?;
            tokio::fs::write(&tmp_path, json)
                .await
                .map_err(|e| AgentError::checkpoint(format!("failed to write checkpoint: {e}")))?;
            tokio::fs::rename(&tmp_path, &final_path)
                .await
                .map_err(|e| AgentError::checkpoint(format!("failed to rename checkpoint: {e}")))?;
            debug!("Saved checkpoint {} (step {})", checkpoint.key, checkpoint.step);
            Ok(())
        })
    }

    fn list_threads<'a>(&'a self, namespace: &'a str) -> CheckpointFuture<'a, Vec<String>> {
        Box::pin(async move {
            let dir = self.namespace_dir(namespace);
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => {
                    return Err(AgentError::checkpoint(format!(
                        "failed to list {}: {e}",
                        dir.display()
                    )));
                }
            };

            let mut ids = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| AgentError::checkpoint(format!("failed to list {}: {e}", dir.display())))?
            {
                let file_name = entry.file_name();
                let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                    continue;
                };
                match decode_component(stem) {
                    Some(id) => ids.push(id),
                    None => warn!("Skipping unrecognized checkpoint file {stem}"),
                }
            }
            ids.sort();
            Ok(ids)
        })
    }
}

/// Percent-encode everything outside `[A-Za-z0-9_-]`.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_component(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
