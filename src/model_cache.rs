//! Filesystem model-cache probe.
//!
//! Mirrors the huggingface_hub cache layout: `<cache_dir>/hub/models--<sanitized-id>/snapshots/*`,
//! where sanitization replaces `/` with `--`.

use std::path::PathBuf;

/// `"sentence-transformers/all-MiniLM-L6-v2"` → `"sentence-transformers--all-MiniLM-L6-v2"`.
pub fn sanitize_model_id(model_id: &str) -> String {
    model_id.replace('/', "--")
}

fn hub_cache_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("HF_HOME") {
        return Some(PathBuf::from(dir).join("hub"));
    }
    dirs::cache_dir().map(|d| d.join("huggingface").join("hub"))
}

/// True if at least one snapshot directory exists for `model_id` and is
/// non-empty.
pub fn is_model_cached(model_id: &str) -> bool {
    let Some(hub_dir) = hub_cache_dir() else {
        return false;
    };
    let snapshots_dir = hub_dir
        .join(format!("models--{}", sanitize_model_id(model_id)))
        .join("snapshots");

    match std::fs::read_dir(&snapshots_dir) {
        Ok(mut entries) => entries.next().is_some(),
        Err(_) => false,
    }
}

/// Set when a requested model is already cached, so the text encoder's
/// hf-hub client does not attempt a network round-trip first.
pub fn set_offline_if_cached(model_id: &str) {
    if is_model_cached(model_id) {
        std::env::set_var("HF_HUB_OFFLINE", "1");
        log::info!("'{model_id}' already cached; forcing offline mode");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_all_slashes() {
        assert_eq!(
            sanitize_model_id("sentence-transformers/all-MiniLM-L6-v2"),
            "sentence-transformers--all-MiniLM-L6-v2"
        );
    }

    #[test]
    fn uncached_model_reports_false() {
        assert!(!is_model_cached("definitely/not-cached-anywhere-12345"));
    }
}
