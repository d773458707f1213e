//! Logo lookup: image search → first decodable candidate → PNG.
//!
//! Best effort by construction. No result, a failed request, or an image
//! that won't decode all end with "no logo", and the profile is built
//! without one. Candidates are tried in the search engine's rank order; there
//! is no further disambiguation.

use crate::error::LogoError;
use crate::output::AssetReference;
use async_trait::async_trait;
use image::DynamicImage;
use scraper::{Html, Selector};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Browser-like user agent; image search pages serve bots a stripped layout.
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Finds a logo image for a company.
#[async_trait]
pub trait LogoSource: Send + Sync {
    /// Look up a logo and return it under `file_name`.
    ///
    /// `Ok(None)` means nothing suitable was found, which is expected for
    /// obscure names.
    async fn find_logo(
        &self,
        company: &str,
        file_name: &str,
    ) -> Result<Option<AssetReference>, LogoError>;
}

/// [`LogoSource`] that scrapes an image-search results page.
pub struct WebLogoSource {
    client: reqwest::Client,
    search_url: String,
    max_candidates: usize,
}

impl WebLogoSource {
    pub fn new(
        search_url: impl Into<String>,
        timeout_secs: u64,
        max_candidates: usize,
    ) -> Result<Self, LogoError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| LogoError::Search(e.to_string()))?;
        Ok(Self {
            client,
            search_url: search_url.into(),
            max_candidates: max_candidates.max(1),
        })
    }

    async fn search(&self, company: &str) -> Result<Vec<String>, LogoError> {
        let query = format!("{company} logo");
        let url = reqwest::Url::parse_with_params(&self.search_url, &[("q", query.as_str())])
            .map_err(|e| LogoError::Search(e.to_string()))?;
        debug!("Image search: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LogoError::Search(e.to_string()))?;
        if !response.status().is_success() {
            return Err(LogoError::Search(format!("HTTP {}", response.status())));
        }
        let body = response
            .text()
            .await
            .map_err(|e| LogoError::Search(e.to_string()))?;

        Ok(extract_candidates(&body))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, LogoError> {
        let response = self.client.get(url).send().await.map_err(|e| LogoError::Download {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(LogoError::Download {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }
        let bytes = response.bytes().await.map_err(|e| LogoError::Download {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl LogoSource for WebLogoSource {
    async fn find_logo(
        &self,
        company: &str,
        file_name: &str,
    ) -> Result<Option<AssetReference>, LogoError> {
        let candidates = self.search(company).await?;
        if candidates.is_empty() {
            info!("{}: image search returned no candidates", company);
            return Ok(None);
        }

        let mut last_err = None;
        for url in candidates.iter().take(self.max_candidates) {
            let attempt = match self.download(url).await {
                Ok(bytes) => normalise_to_png(&bytes).map_err(|e| LogoError::Decode {
                    url: url.clone(),
                    reason: e.to_string(),
                }),
                Err(e) => Err(e),
            };
            match attempt {
                Ok(png) => {
                    info!("{}: logo from {} ({} bytes)", company, url, png.len());
                    return Ok(Some(AssetReference {
                        file_name: file_name.to_string(),
                        bytes: png,
                        content_type: "image/png".to_string(),
                        source_url: Some(url.clone()),
                    }));
                }
                Err(e) => {
                    warn!("{}: candidate rejected: {}", company, e);
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

/// Pull ranked, de-duplicated image URLs out of a search results page.
///
/// Result anchors (`a.iusc`) carry a JSON `m` attribute whose `murl` is the
/// full-size image; those come first. Any absolute `<img>` source follows as
/// a fallback for simpler result pages.
pub fn extract_candidates(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let mut out: Vec<String> = Vec::new();
    let mut push = |url: &str| {
        if is_http_url(url) && !out.iter().any(|u| u == url) {
            out.push(url.to_string());
        }
    };

    if let Ok(sel) = Selector::parse("a.iusc") {
        for el in doc.select(&sel) {
            let Some(meta) = el.value().attr("m") else {
                continue;
            };
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(meta) {
                if let Some(murl) = v.get("murl").and_then(|u| u.as_str()) {
                    push(murl);
                }
            }
        }
    }

    if let Ok(sel) = Selector::parse("img") {
        for el in doc.select(&sel) {
            for attr in ["src", "data-src"] {
                if let Some(src) = el.value().attr(attr) {
                    push(src);
                }
            }
        }
    }

    out
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Decode any supported image format and re-encode it as PNG.
pub fn normalise_to_png(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let img: DynamicImage = image::load_from_memory(bytes)?;
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}
