//! Screenshot artifact extraction
//!
//! Large image payloads are moved out of recorded results into files under
//! the artifacts directory, so steps.json and the message log stay small.

use std::path::Path;

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::domain::ActionResult;

/// Payloads at or below this size are left inline
pub const MIN_ARTIFACT_CHARS: usize = 256;

const ARTIFACT_FIELDS: &[&str] = &["image", "screenshot"];

/// A payload moved to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// File name relative to the artifacts directory
    pub reference: String,
    pub bytes: usize,
}

/// Move the first large `image`/`screenshot` string in `result` to disk
///
/// The field is replaced by `{artifact, bytes}`. A failed write still strips
/// the payload (with `artifact: null`) and returns `None`.
pub async fn extract_artifact(
    dir: &Path,
    task_id: &str,
    step: usize,
    attempt: u32,
    result: &mut ActionResult,
) -> Option<Artifact> {
    let (field, payload) = ARTIFACT_FIELDS.iter().find_map(|field| match result.data.get(*field) {
        Some(Value::String(s)) if s.len() > MIN_ARTIFACT_CHARS => Some((*field, s.clone())),
        _ => None,
    })?;

    let reference = format!("{}-step{}-a{}.png.b64", task_id, step, attempt);
    let bytes = payload.len();
    debug!(%task_id, step, attempt, field, bytes, "extract_artifact: called");

    let written = match tokio::fs::create_dir_all(dir).await {
        Ok(()) => tokio::fs::write(dir.join(&reference), payload.as_bytes()).await,
        Err(e) => Err(e),
    };

    match written {
        Ok(()) => {
            result
                .data
                .insert(field.to_string(), json!({"artifact": reference, "bytes": bytes}));
            Some(Artifact { reference, bytes })
        }
        Err(e) => {
            warn!(%task_id, step, error = %e, "extract_artifact: write failed, dropping payload");
            result.data.insert(field.to_string(), json!({"artifact": null, "bytes": bytes}));
            None
        }
    }
}
