use std::path::Path;
use std::time::Duration;

use super::error::HorizonError;
use super::profile::HorizonProfile;

/// Download a HeyWhatsThat panorama table and store it at `path`.
///
/// The payload is validated by parsing it before the file is replaced, so a
/// bad download never clobbers a good local table.
pub async fn download_profile(
    base_url: &str,
    panorama_id: &str,
    resolution: &str,
    path: &Path,
) -> Result<HorizonProfile, HorizonError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    log::info!("Downloading horizon profile {} from {}", panorama_id, base_url);
    let response = client
        .get(base_url)
        .query(&[("id", panorama_id), ("resolution", resolution)])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(HorizonError::DownloadStatus(status.as_u16()));
    }

    let body = response.bytes().await?;
    let profile = HorizonProfile::from_csv_reader(body.as_ref())?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, &body).await?;
    log::info!(
        "Saved {} horizon points to {}",
        profile.samples().len(),
        path.display()
    );

    Ok(profile)
}
