use serde::Deserialize;
use tracing::{debug, info};

const RELEASES_URL: &str =
    "https://api.github.com/repos/mover-status/mover-status/releases/latest";

#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    tag_name: String,
}

/// Best-effort update check, fired once at startup. Never affects startup or
/// shutdown; every failure path is a debug log.
pub fn spawn_version_check() {
    tokio::spawn(async move {
        let current = env!("CARGO_PKG_VERSION");
        match fetch_latest_version().await {
            Ok(Some(latest)) if is_newer(&latest, current) => {
                info!(latest, current, "A newer mover-status release is available");
            }
            Ok(_) => debug!(current, "Version check complete"),
            Err(e) => debug!(error = %e, "Version check failed"),
        }
    });
}

async fn fetch_latest_version() -> reqwest::Result<Option<String>> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("mover-status/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(10))
        .build()?;
    let response = client.get(RELEASES_URL).send().await?;
    if !response.status().is_success() {
        return Ok(None);
    }
    let release: ReleaseInfo = response.json().await?;
    Ok(Some(
        release.tag_name.trim_start_matches('v').to_string(),
    ))
}

/// Compare dotted numeric versions; non-numeric segments end the comparison.
fn is_newer(latest: &str, current: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map_while(|part| part.parse::<u64>().ok())
            .collect()
    };
    let latest = parse(latest);
    let current = parse(current);
    if latest.is_empty() {
        return false;
    }
    latest > current
}
