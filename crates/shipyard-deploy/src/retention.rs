//! Old image cleanup on the master's containerd

use shipyard_remote::{Containerd, RemoteExecutor};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Images to delete from `existing` (full references). Keeps the `keep`
/// newest timestamp tags, the tag just deployed and `latest`.
pub fn stale_images(existing: &[String], keep: usize, current_tag: &str) -> Vec<String> {
    let mut tags: Vec<&str> = existing.iter().map(|r| tag_of(r)).collect();
    tags.sort_unstable_by(|a, b| b.cmp(a));
    tags.dedup();

    let mut retained: BTreeSet<&str> = tags
        .iter()
        .filter(|t| **t != "latest")
        .take(keep)
        .copied()
        .collect();
    retained.insert(current_tag);
    retained.insert("latest");

    existing
        .iter()
        .filter(|r| !retained.contains(tag_of(r)))
        .cloned()
        .collect()
}

fn tag_of(reference: &str) -> &str {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') && !repo.is_empty() => tag,
        _ => reference,
    }
}

/// Remove superseded tags of `repository`; returns how many were removed
pub async fn cleanup_images(
    exec: &dyn RemoteExecutor,
    repository: &str,
    keep: usize,
    current_tag: &str,
) -> usize {
    let containerd = Containerd::new(exec);
    let existing = containerd.list_images(&format!("{}:", repository)).await;
    let stale = stale_images(&existing, keep, current_tag);
    info!(
        found = existing.len(),
        removing = stale.len(),
        keep,
        "Cleaning up old images"
    );

    let mut removed = 0;
    for reference in &stale {
        if containerd.remove_image(reference).await {
            removed += 1;
        } else {
            debug!(image = %reference, "Image removal failed");
        }
    }
    removed
}
