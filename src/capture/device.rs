//! Audio-device readiness probing.
//!
//! The virtual monitor source can lag behind browser startup. Before the
//! main capture spawns, poll the platform audio control for the named
//! source; if listing never confirms it, a 100 ms dry-run capture also
//! counts as ready.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::capture::args::build_dry_run_args;
use crate::error::RecorderError;
use crate::media::MediaRunner;

const PROBE_ATTEMPTS: u32 = 15;
const PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Wait until the monitor source is capturable or fail with
/// [`RecorderError::DeviceNotReady`].
pub async fn wait_for_monitor_source(
    source_name: &str,
    runner: &MediaRunner,
) -> Result<(), RecorderError> {
    for attempt in 1..=PROBE_ATTEMPTS {
        match list_sources().await {
            Ok(listing) if listing.lines().any(|line| line.contains(source_name)) => {
                info!(
                    "Audio monitor source '{}' ready after {} attempt(s)",
                    source_name, attempt
                );
                return Ok(());
            }
            Ok(_) => {
                debug!(
                    "Audio monitor source '{}' not listed yet (attempt {}/{})",
                    source_name, attempt, PROBE_ATTEMPTS
                );
            }
            Err(e) => {
                debug!("Source listing failed (attempt {}): {}", attempt, e);
            }
        }
        sleep(PROBE_INTERVAL).await;
    }

    // Listing never confirmed the source; a successful dry-run capture is
    // just as good an answer.
    warn!(
        "Source listing never showed '{}', trying a dry-run capture",
        source_name
    );
    if runner
        .run_encoder(build_dry_run_args(source_name))
        .await
        .is_ok()
    {
        info!("Dry-run capture from '{}' succeeded", source_name);
        return Ok(());
    }

    Err(RecorderError::DeviceNotReady {
        source_name: source_name.to_string(),
        attempts: PROBE_ATTEMPTS,
    })
}

async fn list_sources() -> anyhow::Result<String> {
    let output = Command::new("pactl")
        .args(["list", "sources", "short"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        anyhow::bail!("pactl exited with {:?}", output.status.code());
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
