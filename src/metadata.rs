use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;

const METADATA_BASE: &str = "http://169.254.169.254/latest/meta-data";

/// Display-only host identity. Lookup failures fall back to placeholders and
/// never surface to callers.
#[derive(Debug, Clone, Serialize)]
pub struct HostInfo {
    pub instance_id: String,
    pub availability_zone: String,
}

impl HostInfo {
    fn local_fallback() -> Self {
        Self {
            instance_id: "local".to_string(),
            availability_zone: "unknown".to_string(),
        }
    }
}

/// Queries the instance metadata endpoint once, with a short timeout so a
/// non-cloud host does not stall startup.
pub async fn fetch_host_info() -> HostInfo {
    match try_fetch().await {
        Ok(info) => info,
        Err(err) => {
            log::warn!("instance metadata unavailable, using fallback identity: {err:#}");
            HostInfo::local_fallback()
        }
    }
}

async fn try_fetch() -> Result<HostInfo> {
    let client = Client::builder()
        .timeout(Duration::from_millis(500))
        .build()
        .context("building metadata client")?;

    let instance_id = fetch_field(&client, "instance-id").await?;
    let availability_zone = fetch_field(&client, "placement/availability-zone").await?;
    Ok(HostInfo {
        instance_id,
        availability_zone,
    })
}

async fn fetch_field(client: &Client, path: &str) -> Result<String> {
    let url = format!("{METADATA_BASE}/{path}");
    let resp = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("requesting {path}"))?
        .error_for_status()
        .with_context(|| format!("fetching {path}"))?;
    let body = resp.text().await.with_context(|| format!("reading {path}"))?;
    if body.is_empty() {
        anyhow::bail!("empty metadata response for {path}");
    }
    Ok(body)
}
