use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use crate::probe::DomProbe;

/// Write a full-page PNG of `probe` to `dir` for post-mortem debugging.
///
/// Best-effort: failures are logged and swallowed.
pub async fn save_debug_screenshot(probe: &dyn DomProbe, dir: &Path, label: &str) -> Option<PathBuf> {
    let bytes = match probe.screenshot().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(label, error = %e, "Debug screenshot failed");
            return None;
        }
    };

    let path = dir.join(format!("{}_{}.png", label, Utc::now().format("%Y%m%d_%H%M%S%.3f")));
    let written = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, &bytes).await
    }
    .await;

    match written {
        Ok(()) => {
            info!(path = %path.display(), "Saved debug screenshot");
            Some(path)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to write debug screenshot");
            None
        }
    }
}
