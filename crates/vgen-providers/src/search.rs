//! Stock footage search (Pexels, Pixabay).

use std::cmp::Reverse;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use vgen_models::{MaterialInfo, VideoAspect, VideoSource};

use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderResult};

const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

/// A stock footage catalogue.
#[async_trait]
pub trait MaterialSearch: Send + Sync {
    /// Search for clips of at least `min_duration` seconds.
    ///
    /// Provider failures are logged and yield an empty list.
    async fn search(&self, term: &str, min_duration: f64, aspect: VideoAspect) -> Vec<MaterialInfo>;

    fn name(&self) -> &str;
}

/// Build the search provider for `source`. Local sources need none.
pub fn create_material_search(
    source: VideoSource,
    config: &ProviderConfig,
) -> ProviderResult<Option<Arc<dyn MaterialSearch>>> {
    let search: Arc<dyn MaterialSearch> = match source {
        VideoSource::Local => return Ok(None),
        VideoSource::Pexels => Arc::new(PexelsSearch::new(config.pexels_api_keys.clone())?),
        VideoSource::Pixabay => Arc::new(PixabaySearch::new(config.pixabay_api_keys.clone())?),
    };
    Ok(Some(search))
}

/// API keys handed out round-robin.
#[derive(Debug)]
pub struct ApiKeyRing {
    keys: Vec<String>,
    next: AtomicUsize,
}

impl ApiKeyRing {
    pub fn new(provider: &str, keys: Vec<String>) -> ProviderResult<Self> {
        if keys.is_empty() {
            return Err(ProviderError::configuration(format!(
                "{provider}: no API keys configured"
            )));
        }
        Ok(Self {
            keys,
            next: AtomicUsize::new(0),
        })
    }

    pub fn next_key(&self) -> &str {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        &self.keys[i]
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// A downloadable rendition of one catalogue entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendition {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

fn orientation_matches(width: u32, height: u32, aspect: VideoAspect) -> bool {
    match aspect {
        VideoAspect::Landscape => width > height,
        VideoAspect::Portrait => height > width,
        VideoAspect::Square => width == height,
    }
}

/// Pick the rendition that fits `aspect` best.
///
/// Matching orientation wins, then the size closest to the target resolution,
/// then the larger rendition.
pub fn select_rendition(renditions: Vec<Rendition>, aspect: VideoAspect) -> Option<Rendition> {
    let (tw, th) = aspect.resolution();
    renditions
        .into_iter()
        .filter(|r| !r.url.is_empty() && r.width > 0 && r.height > 0)
        .min_by_key(|r| {
            let distance = r.width.abs_diff(tw) as u64 + r.height.abs_diff(th) as u64;
            (
                !orientation_matches(r.width, r.height, aspect),
                distance,
                Reverse(r.width as u64 * r.height as u64),
            )
        })
}

fn http_client() -> ProviderResult<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(SEARCH_TIMEOUT).build()?)
}

// Pexels

#[derive(Debug, Deserialize)]
struct PexelsResponse {
    #[serde(default)]
    videos: Vec<PexelsVideo>,
}

#[derive(Debug, Deserialize)]
struct PexelsVideo {
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    video_files: Vec<PexelsFile>,
}

#[derive(Debug, Deserialize)]
struct PexelsFile {
    #[serde(default)]
    link: String,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

/// Pexels video search.
pub struct PexelsSearch {
    keys: ApiKeyRing,
    base_url: String,
    per_page: u32,
    client: reqwest::Client,
}

impl PexelsSearch {
    pub fn new(keys: Vec<String>) -> ProviderResult<Self> {
        Ok(Self {
            keys: ApiKeyRing::new("pexels", keys)?,
            base_url: "https://api.pexels.com".to_string(),
            per_page: 20,
            client: http_client()?,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    async fn try_search(
        &self,
        term: &str,
        min_duration: f64,
        aspect: VideoAspect,
    ) -> ProviderResult<Vec<MaterialInfo>> {
        let url = format!("{}/videos/search", self.base_url);
        let per_page = self.per_page.to_string();
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.keys.next_key())
            .query(&[
                ("query", term),
                ("page", "1"),
                ("per_page", per_page.as_str()),
                ("orientation", aspect.orientation()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::request_failed(format!(
                "pexels returned {}: {}",
                status, body
            )));
        }

        let body: PexelsResponse = response.json().await?;
        let materials = body
            .videos
            .into_iter()
            .filter(|v| v.duration >= min_duration && v.duration > 0.0)
            .filter_map(|v| {
                let renditions = v
                    .video_files
                    .into_iter()
                    .map(|f| Rendition {
                        url: f.link,
                        width: f.width.unwrap_or(0),
                        height: f.height.unwrap_or(0),
                    })
                    .collect();
                select_rendition(renditions, aspect)
                    .map(|r| MaterialInfo::remote("pexels", r.url, v.duration).with_search_term(term))
            })
            .collect();
        Ok(materials)
    }
}

#[async_trait]
impl MaterialSearch for PexelsSearch {
    async fn search(&self, term: &str, min_duration: f64, aspect: VideoAspect) -> Vec<MaterialInfo> {
        match self.try_search(term, min_duration, aspect).await {
            Ok(found) => {
                info!("Pexels found {} videos for \"{}\"", found.len(), term);
                found
            }
            Err(e) => {
                error!("Pexels search for \"{}\" failed: {}", term, e);
                Vec::new()
            }
        }
    }

    fn name(&self) -> &str {
        "pexels"
    }
}

// Pixabay

#[derive(Debug, Deserialize)]
struct PixabayResponse {
    #[serde(default)]
    hits: Vec<PixabayHit>,
}

#[derive(Debug, Deserialize)]
struct PixabayHit {
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    videos: PixabayRenditions,
}

#[derive(Debug, Default, Deserialize)]
struct PixabayRenditions {
    large: Option<PixabayFile>,
    medium: Option<PixabayFile>,
    small: Option<PixabayFile>,
    tiny: Option<PixabayFile>,
}

#[derive(Debug, Deserialize)]
struct PixabayFile {
    #[serde(default)]
    url: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

/// Pixabay video search.
///
/// Starts with editors' choice results and relaxes the query when that
/// yields nothing.
pub struct PixabaySearch {
    keys: ApiKeyRing,
    base_url: String,
    per_page: u32,
    client: reqwest::Client,
}

impl PixabaySearch {
    pub fn new(keys: Vec<String>) -> ProviderResult<Self> {
        Ok(Self {
            keys: ApiKeyRing::new("pixabay", keys)?,
            base_url: "https://pixabay.com".to_string(),
            per_page: 50,
            client: http_client()?,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    async fn try_search(
        &self,
        term: &str,
        min_duration: f64,
        aspect: VideoAspect,
        editors_choice: bool,
    ) -> ProviderResult<Vec<MaterialInfo>> {
        let url = format!("{}/api/videos/", self.base_url);
        let per_page = self.per_page.to_string();
        let mut query = vec![
            ("key", self.keys.next_key()),
            ("q", term),
            ("video_type", "film"),
            ("safesearch", "true"),
            ("order", "popular"),
            ("page", "1"),
            ("per_page", per_page.as_str()),
        ];
        if editors_choice {
            query.push(("editors_choice", "true"));
        }

        let response = self.client.get(&url).query(&query).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::request_failed(format!(
                "pixabay returned {}: {}",
                status, body
            )));
        }

        let body: PixabayResponse = response.json().await?;
        let materials = body
            .hits
            .into_iter()
            .filter(|h| h.duration >= min_duration && h.duration > 0.0)
            .filter_map(|h| {
                let PixabayRenditions {
                    large,
                    medium,
                    small,
                    tiny,
                } = h.videos;
                let renditions = [large, medium, small, tiny]
                    .into_iter()
                    .flatten()
                    .map(|f| Rendition {
                        url: f.url,
                        width: f.width,
                        height: f.height,
                    })
                    .collect();
                select_rendition(renditions, aspect)
                    .map(|r| MaterialInfo::remote("pixabay", r.url, h.duration).with_search_term(term))
            })
            .collect();
        Ok(materials)
    }
}

#[async_trait]
impl MaterialSearch for PixabaySearch {
    async fn search(&self, term: &str, min_duration: f64, aspect: VideoAspect) -> Vec<MaterialInfo> {
        for editors_choice in [true, false] {
            match self.try_search(term, min_duration, aspect, editors_choice).await {
                Ok(found) if !found.is_empty() => {
                    info!(
                        editors_choice,
                        "Pixabay found {} videos for \"{}\"",
                        found.len(),
                        term
                    );
                    return found;
                }
                Ok(_) => debug!(editors_choice, "Pixabay returned nothing for \"{}\"", term),
                Err(e) => {
                    error!("Pixabay search for \"{}\" failed: {}", term, e);
                    return Vec::new();
                }
            }
        }
        warn!("All Pixabay attempts for \"{}\" came back empty", term);
        Vec::new()
    }

    fn name(&self) -> &str {
        "pixabay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rendition(url: &str, width: u32, height: u32) -> Rendition {
        Rendition {
            url: url.to_string(),
            width,
            height,
        }
    }

    #[test]
    fn test_key_ring_rotates() {
        let ring = ApiKeyRing::new("pexels", vec!["a".into(), "b".into()]).unwrap();
        assert_eq!(ring.next_key(), "a");
        assert_eq!(ring.next_key(), "b");
        assert_eq!(ring.next_key(), "a");
        assert!(matches!(
            ApiKeyRing::new("pexels", vec![]),
            Err(ProviderError::Configuration(_))
        ));
    }

    #[test]
    fn test_select_rendition_prefers_orientation() {
        let picked = select_rendition(
            vec![
                rendition("land", 1920, 1080),
                rendition("port-small", 540, 960),
                rendition("port", 1080, 1920),
            ],
            VideoAspect::Portrait,
        )
        .unwrap();
        assert_eq!(picked.url, "port");
    }

    #[test]
    fn test_select_rendition_falls_back_to_other_orientation() {
        let picked = select_rendition(
            vec![rendition("small", 640, 360), rendition("hd", 1920, 1080)],
            VideoAspect::Portrait,
        )
        .unwrap();
        assert_eq!(picked.url, "hd");
        assert!(select_rendition(vec![rendition("", 1, 1)], VideoAspect::Square).is_none());
    }

    #[tokio::test]
    async fn test_pexels_search() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos/search"))
            .and(header("authorization", "key-1"))
            .and(query_param("query", "city night"))
            .and(query_param("orientation", "portrait"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "videos": [
                    {"duration": 3, "video_files": [{"link": "https://v/short.mp4", "width": 1080, "height": 1920}]},
                    {"duration": 12, "video_files": [
                        {"link": "https://v/land.mp4", "width": 1920, "height": 1080},
                        {"link": "https://v/port.mp4", "width": 1080, "height": 1920}
                    ]}
                ]
            })))
            .mount(&server)
            .await;

        let search = PexelsSearch::new(vec!["key-1".into()])
            .unwrap()
            .with_base_url(server.uri());
        let found = search.search("city night", 5.0, VideoAspect::Portrait).await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, "https://v/port.mp4");
        assert_eq!(found[0].provider, "pexels");
        assert_eq!(found[0].search_term.as_deref(), Some("city night"));
    }

    #[tokio::test]
    async fn test_pexels_error_yields_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let search = PexelsSearch::new(vec!["k".into()])
            .unwrap()
            .with_base_url(server.uri());
        assert!(search.search("x", 5.0, VideoAspect::Landscape).await.is_empty());
    }

    #[tokio::test]
    async fn test_pixabay_relaxes_editors_choice() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/videos/"))
            .and(query_param("editors_choice", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"hits": []})))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/videos/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "hits": [{"duration": 20, "videos": {
                    "large": {"url": "https://p/large.mp4", "width": 3840, "height": 2160},
                    "medium": {"url": "https://p/medium.mp4", "width": 1920, "height": 1080},
                    "tiny": {"url": "", "width": 0, "height": 0}
                }}]
            })))
            .with_priority(2)
            .mount(&server)
            .await;

        let search = PixabaySearch::new(vec!["k".into()])
            .unwrap()
            .with_base_url(server.uri());
        let found = search.search("forest", 5.0, VideoAspect::Landscape).await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, "https://p/medium.mp4");
    }
}
