use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::Path;

/// Read the flat, global sent-id file older deployments kept. A missing file
/// is an empty set.
pub async fn load_sent_ids(path: &Path) -> Result<BTreeSet<String>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read legacy id file: {}", path.display()))
        }
    };

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse legacy id file: {}", path.display()))
}
