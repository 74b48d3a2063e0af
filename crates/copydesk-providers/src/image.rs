use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine as _;
use copydesk_core::config::ImageProviderConfig;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{ProviderError, Result};
use crate::provider::ImageGenerator;
use crate::types::{ImageBatch, ImageFailure, RenderedImage};

/// Requests in flight at once for a single batch.
const MAX_PARALLEL_RENDERS: usize = 3;

/// Client for an OpenAI-compatible `/v1/images/generations` endpoint.
///
/// Base64 responses are written to `<output_dir>/<content_id>/` so the
/// publisher can upload them; URL responses are kept as remote references.
pub struct OpenAiImageGenerator {
    client: reqwest::Client,
    config: ImageProviderConfig,
}

impl OpenAiImageGenerator {
    pub fn new(config: ImageProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn render_one(&self, content_id: &str, index: usize, prompt: &str) -> Result<RenderedImage> {
        let url = format!(
            "{}/v1/images/generations",
            self.config.base_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "n": 1,
            "size": self.config.size,
            "response_format": "b64_json",
        });

        debug!(model = %self.config.model, index, "requesting image");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status,
                message: text.chars().take(500).collect(),
            });
        }

        let parsed: ImagesResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let first = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("no image in response".to_string()))?;

        match (first.b64_json, first.url) {
            (Some(b64), _) => {
                let path = self.save(content_id, index, &b64).await?;
                Ok(RenderedImage {
                    index,
                    url: format!("file://{}", path.display()),
                    path: Some(path.display().to_string()),
                })
            }
            (None, Some(url)) => Ok(RenderedImage { index, url, path: None }),
            (None, None) => Err(ProviderError::Parse("image entry has neither data nor url".to_string())),
        }
    }

    async fn save(&self, content_id: &str, index: usize, b64: &str) -> Result<PathBuf> {
        // Some gateways return a data URI instead of bare base64.
        let payload = b64.split_once("base64,").map(|(_, d)| d).unwrap_or(b64);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| ProviderError::Parse(format!("invalid base64 image: {e}")))?;

        let dir = PathBuf::from(&self.config.output_dir).join(content_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ProviderError::Unavailable(format!("cannot create {}: {e}", dir.display())))?;
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let file = dir.join(format!("{index}_{}.png", &suffix[..8]));
        tokio::fs::write(&file, bytes)
            .await
            .map_err(|e| ProviderError::Unavailable(format!("cannot write {}: {e}", file.display())))?;
        Ok(file)
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    fn name(&self) -> &str {
        "openai-images"
    }

    async fn generate_many(&self, content_id: &str, prompts: &[String]) -> Result<ImageBatch> {
        let renders: Vec<_> = prompts
            .iter()
            .enumerate()
            .map(|(i, p)| async move { (i, self.render_one(content_id, i, p).await) })
            .collect();
        let results: Vec<(usize, Result<RenderedImage>)> = stream::iter(renders)
            .buffer_unordered(MAX_PARALLEL_RENDERS)
            .collect()
            .await;

        let batch = collect_batch(results);
        info!(
            content_id,
            success_count = batch.success_count,
            error_count = batch.errors.len(),
            "image batch finished"
        );
        Ok(batch)
    }
}

/// Fold per-prompt results into a batch ordered by prompt index.
pub(crate) fn collect_batch(mut results: Vec<(usize, Result<RenderedImage>)>) -> ImageBatch {
    results.sort_by_key(|(i, _)| *i);
    let mut batch = ImageBatch::default();
    for (index, result) in results {
        match result {
            Ok(image) => {
                batch.success_count += 1;
                batch.images.push(image);
            }
            Err(e) => {
                warn!(index, error = %e, "image render failed");
                batch.errors.push(ImageFailure {
                    index,
                    error: e.to_string(),
                });
            }
        }
    }
    batch
}

#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
    url: Option<String>,
}
