use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sgp4::{Constants, Elements};

use super::error::FetchError;
use super::types::{ElementCatalog, OrbitalElementSet};
use super::TleSource;

const USER_AGENT: &str = concat!("sky-monitor/", env!("CARGO_PKG_VERSION"));
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

#[derive(Default)]
struct CacheState {
    catalog: Arc<ElementCatalog>,
    fetched_at: Option<DateTime<Utc>>,
}

/// Downloads bulk TLE text, keeps the last good catalog in memory and writes
/// the raw text through to a flat cache file.
pub struct TleFetcher {
    client: reqwest::Client,
    primary_url: String,
    extra_urls: Vec<String>,
    cache_file: PathBuf,
    state: Mutex<CacheState>,
}

impl TleFetcher {
    /// `urls[0]` must succeed for a fetch to count; the remaining urls are
    /// best-effort additions.
    pub fn new(
        urls: Vec<String>,
        cache_file: PathBuf,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let mut urls = urls.into_iter();
        let primary_url = urls
            .next()
            .ok_or_else(|| FetchError::Parse("no TLE source url configured".into()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            primary_url,
            extra_urls: urls.collect(),
            cache_file,
            state: Mutex::new(CacheState::default()),
        })
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    /// Seed the in-memory catalog from the cache file. Returns the file's
    /// modification time, which also becomes the last-success time, or
    /// `None` when there is no cache yet.
    pub async fn load_cache(&self) -> Result<Option<DateTime<Utc>>, FetchError> {
        let metadata = match tokio::fs::metadata(&self.cache_file).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modified: DateTime<Utc> = metadata.modified()?.into();

        let text = tokio::fs::read_to_string(&self.cache_file).await?;
        let catalog = parse_catalog(&text);
        if catalog.is_empty() {
            return Err(FetchError::Parse(format!(
                "cache file {} holds no valid element sets",
                self.cache_file.display()
            )));
        }

        log::info!(
            "Loaded {} element sets from cache {} (written {})",
            catalog.len(),
            self.cache_file.display(),
            modified
        );
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.catalog = Arc::new(catalog);
        state.fetched_at = Some(modified);
        Ok(Some(modified))
    }

    async fn download(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                retry_after: None,
            });
        }
        let zipped = url.to_ascii_lowercase().ends_with(".zip")
            || response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.starts_with("application/zip"));
        let body = response.bytes().await?;

        if zipped || body.starts_with(ZIP_MAGIC) {
            extract_tle_member(&body)
        } else {
            Ok(String::from_utf8_lossy(&body).into_owned())
        }
    }

    async fn write_cache(&self, text: &str) -> Result<(), FetchError> {
        if let Some(parent) = self.cache_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.cache_file.with_extension("tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.cache_file).await?;
        Ok(())
    }
}

#[async_trait]
impl TleSource for TleFetcher {
    async fn fetch(&self) -> Result<Arc<ElementCatalog>, FetchError> {
        log::info!("Fetching TLEs from {}", self.primary_url);
        let mut text = self.download(&self.primary_url).await?;

        for url in &self.extra_urls {
            match self.download(url).await {
                Ok(extra) => {
                    log::info!("Additional TLE source {} returned {} lines", url, extra.lines().count());
                    text.push('\n');
                    text.push_str(&extra);
                }
                Err(e) => log::warn!("Additional TLE source {} failed (continuing): {}", url, e),
            }
        }

        let catalog = parse_catalog(&text);
        if catalog.is_empty() {
            return Err(FetchError::Parse("no valid element sets in response".into()));
        }

        if let Err(e) = self.write_cache(&text).await {
            log::warn!("Failed to write TLE cache {}: {}", self.cache_file.display(), e);
        }

        let catalog = Arc::new(catalog);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.catalog = catalog.clone();
        state.fetched_at = Some(Utc::now());
        log::info!("Loaded {} satellite element sets", catalog.len());
        Ok(catalog)
    }

    fn cached(&self) -> Arc<ElementCatalog> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .catalog
            .clone()
    }

    fn last_success(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fetched_at
    }
}

/// Text of the first `.tle` member of a zip archive, such as the classified
/// catalogue (`classfd.zip` holding `classfd.tle`).
fn extract_tle_member(bytes: &[u8]) -> Result<String, FetchError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| FetchError::Parse(format!("bad zip archive: {}", e)))?;

    for index in 0..archive.len() {
        let mut member = archive
            .by_index(index)
            .map_err(|e| FetchError::Parse(format!("bad zip member: {}", e)))?;
        if !member.is_file() || !member.name().to_ascii_lowercase().ends_with(".tle") {
            continue;
        }
        let mut raw = Vec::new();
        member
            .read_to_end(&mut raw)
            .map_err(|e| FetchError::Parse(format!("unreadable zip member: {}", e)))?;
        log::debug!("Extracted {} from zip archive", member.name());
        return Ok(String::from_utf8_lossy(&raw).into_owned());
    }

    Err(FetchError::Parse("zip archive holds no .tle file".into()))
}

/// Parse bulk 2-line or 3-line TLE text. Entries sgp4 rejects are skipped;
/// when a catalog number repeats, the first entry wins.
pub fn parse_catalog(content: &str) -> ElementCatalog {
    let mut catalog = ElementCatalog::new();
    for (name, line1, line2) in split_tle_lines(content) {
        let elements = match Elements::from_tle(name.clone(), line1.as_bytes(), line2.as_bytes())
        {
            Ok(e) => e,
            Err(e) => {
                log::debug!("Skipping invalid TLE {:?}: {}", name, e);
                continue;
            }
        };
        let constants = match Constants::from_elements(&elements) {
            Ok(c) => c,
            Err(e) => {
                log::debug!("Skipping TLE {:?} with unusable elements: {}", name, e);
                continue;
            }
        };

        let name = name.unwrap_or_else(|| format!("NORAD {}", elements.norad_id));
        let group = group_for_name(&name);
        catalog.entry(elements.norad_id).or_insert(OrbitalElementSet {
            norad_id: elements.norad_id,
            epoch: elements.datetime.and_utc(),
            name,
            line1,
            line2,
            group,
            elements,
            constants,
        });
    }
    catalog
}

fn split_tle_lines(content: &str) -> Vec<(Option<String>, String, String)> {
    let lines: Vec<&str> = content
        .lines()
        .map(|l| l.trim_end())
        .filter(|l| !l.trim().is_empty())
        .collect();

    let mut result = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if lines[i].starts_with("1 ") && i + 1 < lines.len() && lines[i + 1].starts_with("2 ") {
            result.push((None, lines[i].to_string(), lines[i + 1].to_string()));
            i += 2;
        } else if i + 2 < lines.len()
            && lines[i + 1].starts_with("1 ")
            && lines[i + 2].starts_with("2 ")
        {
            let name = lines[i].trim().trim_start_matches("0 ").to_string();
            result.push((Some(name), lines[i + 1].to_string(), lines[i + 2].to_string()));
            i += 3;
        } else {
            i += 1;
        }
    }

    result
}

/// Constellation tag derived from a satellite name. `USA <n>` designations
/// are individual payloads and form their own group.
pub fn group_for_name(name: &str) -> String {
    let mut words = name.split_whitespace();
    if let (Some("USA"), Some(number)) = (words.next(), words.next()) {
        if number.chars().all(|c| c.is_ascii_digit()) {
            return name.trim().to_string();
        }
    }
    if let Some((prefix, _)) = name.split_once('-') {
        return prefix.trim().to_string();
    }
    name.split_whitespace().next().unwrap_or(name).to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use std::sync::atomic::{AtomicU16, Ordering};

    pub(crate) const ISS_TLE: &str = "ISS (ZARYA)
1 25544U 98067A   20194.88612269 -.00002218  00000-0 -31515-4 0  9992
2 25544  51.6461 221.2784 0001413  89.1723 280.4612 15.49507896236008
";

    pub(crate) const STARLINK_TLE: &str = "STARLINK-1007
1 44713U 19074A   20194.88612269 -.00002218  00000-0 -31515-4 0  9992
2 44713  51.6461 221.2784 0001413  89.1723 280.4612 15.49507896236007
";

    fn temp_cache_path(tag: &str) -> PathBuf {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        std::env::temp_dir().join(format!(
            "sky-monitor-{}-{}-{}/tle_cache.txt",
            tag,
            std::process::id(),
            nanos
        ))
    }

    /// Serves `body` with the status held in the returned cell.
    async fn serve_tle(body: String) -> (String, Arc<AtomicU16>) {
        serve_at("/tle", body.into_bytes()).await
    }

    async fn serve_at(path: &'static str, body: Vec<u8>) -> (String, Arc<AtomicU16>) {
        let status = Arc::new(AtomicU16::new(200));
        let handler_status = status.clone();
        let app = Router::new().route(
            path,
            get(move || {
                let status = handler_status.clone();
                let body = body.clone();
                async move {
                    let code = StatusCode::from_u16(status.load(Ordering::SeqCst))
                        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                    (code, body)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}{}", addr, path), status)
    }

    fn zipped(member: &str, text: &str) -> Vec<u8> {
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        writer
            .start_file("README", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"classified elements").unwrap();
        writer.start_file(member, options).unwrap();
        writer.write_all(text.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn parses_named_and_unnamed_entries() {
        let unnamed: String = ISS_TLE.lines().skip(1).collect::<Vec<_>>().join("\n");
        let catalog = parse_catalog(&unnamed);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[&25544].name, "NORAD 25544");

        let both = format!("{}{}", ISS_TLE, STARLINK_TLE);
        let catalog = parse_catalog(&both);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[&25544].name, "ISS (ZARYA)");
        assert_eq!(catalog[&44713].group, "STARLINK");
    }

    #[test]
    fn skips_garbage_and_truncated_entries() {
        let bad = ISS_TLE.replace("15.49507896236008", "15.495");
        let text = format!("garbage line\n{}{}", bad, STARLINK_TLE);
        let catalog = parse_catalog(&text);
        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains_key(&44713));
    }

    #[test]
    fn derives_groups_from_names() {
        assert_eq!(group_for_name("STARLINK-1007"), "STARLINK");
        assert_eq!(group_for_name("ONEWEB-0012"), "ONEWEB");
        assert_eq!(group_for_name("USA 224"), "USA 224");
        assert_eq!(group_for_name("USA ABC"), "USA");
        assert_eq!(group_for_name("ISS (ZARYA)"), "ISS");
        assert_eq!(group_for_name("NOAA 19"), "NOAA");
    }

    #[tokio::test]
    async fn successful_fetch_replaces_catalog_and_writes_cache() {
        let (url, _status) = serve_tle(format!("{}{}", ISS_TLE, STARLINK_TLE)).await;
        let cache = temp_cache_path("ok");
        let fetcher = TleFetcher::new(vec![url], cache.clone(), Duration::from_secs(5)).unwrap();

        assert!(fetcher.cached().is_empty());
        assert!(fetcher.last_success().is_none());

        let catalog = fetcher.fetch().await.unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(fetcher.cached().len(), 2);
        assert!(fetcher.last_success().is_some());

        let written = std::fs::read_to_string(&cache).unwrap();
        assert!(written.contains("STARLINK-1007"));
    }

    #[tokio::test]
    async fn failed_fetch_preserves_previous_catalog() {
        let (url, status) = serve_tle(ISS_TLE.to_string()).await;
        let cache = temp_cache_path("fail");
        let fetcher = TleFetcher::new(vec![url], cache.clone(), Duration::from_secs(5)).unwrap();

        let first = fetcher.fetch().await.unwrap();
        let first_success = fetcher.last_success();

        status.store(503, Ordering::SeqCst);
        let err = fetcher.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Http { status: 503, .. }));

        let cached = fetcher.cached();
        assert!(Arc::ptr_eq(&first, &cached));
        assert_eq!(fetcher.last_success(), first_success);
        assert!(std::fs::read_to_string(&cache).unwrap().contains("ISS (ZARYA)"));
    }

    #[tokio::test]
    async fn malformed_payload_is_a_parse_error() {
        let (url, _status) = serve_tle("<html>maintenance</html>".to_string()).await;
        let cache = temp_cache_path("parse");
        let fetcher = TleFetcher::new(vec![url], cache.clone(), Duration::from_secs(5)).unwrap();

        let err = fetcher.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
        assert!(fetcher.cached().is_empty());
        assert!(!cache.exists());
    }

    #[tokio::test]
    async fn failing_extra_source_does_not_fail_fetch() {
        let (url, _status) = serve_tle(ISS_TLE.to_string()).await;
        let (extra, extra_status) = serve_tle(STARLINK_TLE.to_string()).await;
        extra_status.store(500, Ordering::SeqCst);
        let fetcher = TleFetcher::new(
            vec![url, extra],
            temp_cache_path("extra"),
            Duration::from_secs(5),
        )
        .unwrap();

        let catalog = fetcher.fetch().await.unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn warm_start_from_cache_file() {
        let cache = temp_cache_path("warm");
        std::fs::create_dir_all(cache.parent().unwrap()).unwrap();
        std::fs::write(&cache, STARLINK_TLE).unwrap();

        let fetcher = TleFetcher::new(
            vec!["http://127.0.0.1:9/unused".into()],
            cache,
            Duration::from_secs(1),
        )
        .unwrap();
        let loaded_at = fetcher.load_cache().await.unwrap();
        assert!(loaded_at.is_some());
        assert_eq!(fetcher.last_success(), loaded_at);
        assert_eq!(fetcher.cached().len(), 1);
    }

    #[tokio::test]
    async fn missing_cache_file_is_not_an_error() {
        let fetcher = TleFetcher::new(
            vec!["http://127.0.0.1:9/unused".into()],
            temp_cache_path("missing"),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(fetcher.load_cache().await.unwrap(), None);
    }

    #[test]
    fn extracts_tle_member_from_zip() {
        let text = extract_tle_member(&zipped("classfd.tle", STARLINK_TLE)).unwrap();
        assert_eq!(parse_catalog(&text).len(), 1);

        let err = extract_tle_member(&zipped("notes.txt", STARLINK_TLE)).unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[tokio::test]
    async fn zipped_extra_source_is_unpacked() {
        let (url, _status) = serve_tle(ISS_TLE.to_string()).await;
        let (extra, _extra_status) =
            serve_at("/classfd.zip", zipped("classfd.tle", STARLINK_TLE)).await;
        let cache = temp_cache_path("zip");
        let fetcher =
            TleFetcher::new(vec![url, extra], cache.clone(), Duration::from_secs(5)).unwrap();

        let catalog = fetcher.fetch().await.unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[&44713].name, "STARLINK-1007");

        let written = std::fs::read(&cache).unwrap();
        assert!(!written.starts_with(ZIP_MAGIC));
        assert!(String::from_utf8(written).unwrap().contains("STARLINK-1007"));
    }
}
