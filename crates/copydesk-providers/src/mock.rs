//! Scripted in-memory collaborators for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ProviderError, Result};
use crate::provider::{ContentGenerator, ImageGenerator, Publisher};
use crate::types::{
    AccountCredentials, GenerateRequest, GeneratedContent, ImageBatch, ImageFailure,
    OptimizeRequest, OptimizedContent, PublishReceipt, PublishRequest, RenderedImage,
    RewriteRequest,
};

/// Deterministic drafting model. Each failure switch makes the matching call
/// return `ProviderError::Unavailable`.
#[derive(Default)]
pub struct MockGenerator {
    pub fail_generate: AtomicBool,
    pub fail_optimize: AtomicBool,
    pub fail_suggest: AtomicBool,
    /// When set, `generate` returns an empty title.
    pub blank_title: AtomicBool,
    generate_calls: Mutex<Vec<GenerateRequest>>,
    optimize_calls: AtomicUsize,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate_calls(&self) -> Vec<GenerateRequest> {
        self.generate_calls.lock().unwrap().clone()
    }

    pub fn optimize_count(&self) -> usize {
        self.optimize_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerator for MockGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<GeneratedContent> {
        let n = {
            let mut calls = self.generate_calls.lock().unwrap();
            calls.push(req.clone());
            calls.len()
        };
        if self.fail_generate.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("mock generator down".into()));
        }
        let topic = req.topic_hint.clone().unwrap_or_else(|| "anything".into());
        let title = if self.blank_title.load(Ordering::SeqCst) {
            String::new()
        } else if req.revision.is_some() {
            format!("Revised draft {n} about {topic}")
        } else {
            format!("Draft {n} about {topic}")
        };
        Ok(GeneratedContent {
            title,
            body: format!("First paragraph on {topic}.\nSecond paragraph."),
            image_prompts: vec![format!("cover for {topic}"), "a quiet street at dawn".into()],
            token_usage: 100,
        })
    }

    async fn optimize(&self, req: &OptimizeRequest) -> Result<OptimizedContent> {
        self.optimize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_optimize.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("mock optimizer down".into()));
        }
        Ok(OptimizedContent {
            title: req.title.clone(),
            body: format!("{} (polished)", req.body),
            token_usage: 40,
        })
    }

    async fn suggest_image_prompts(&self, title: &str, _body: &str, max: usize) -> Result<Vec<String>> {
        if self.fail_suggest.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("mock suggester down".into()));
        }
        Ok(vec![format!("cover for {title}"), "detail shot".into(), "wide landscape".into()]
            .into_iter()
            .take(max)
            .collect())
    }

    async fn rewrite(&self, req: &RewriteRequest) -> Result<String> {
        Ok(format!("{} [{}]", req.text, req.instructions))
    }
}

/// Renders every prompt except the indices listed in `failing`.
#[derive(Default)]
pub struct MockImageGenerator {
    pub failing: Mutex<HashSet<usize>>,
    pub fail_all: AtomicBool,
    calls: AtomicUsize,
}

impl MockImageGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerator for MockImageGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate_many(&self, content_id: &str, prompts: &[String]) -> Result<ImageBatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("mock image service down".into()));
        }
        let failing = self.failing.lock().unwrap().clone();
        let mut batch = ImageBatch::default();
        for (index, _) in prompts.iter().enumerate() {
            if failing.contains(&index) {
                batch.errors.push(ImageFailure {
                    index,
                    error: "render refused".into(),
                });
            } else {
                let path = format!("/tmp/copydesk-mock/{content_id}/{index}.png");
                batch.images.push(RenderedImage {
                    index,
                    url: format!("file://{path}"),
                    path: Some(path),
                });
                batch.success_count += 1;
            }
        }
        Ok(batch)
    }
}

/// Records every publish request. Content ids in `rejected` get an
/// unsuccessful receipt; `unreachable` makes every call fail. A non-zero
/// `latency_ms` holds every call open that long.
#[derive(Default)]
pub struct MockPublisher {
    pub rejected: Mutex<HashSet<String>>,
    pub unreachable: AtomicBool,
    pub latency_ms: AtomicU64,
    published: Mutex<Vec<PublishRequest>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, content_id: &str) {
        self.rejected.lock().unwrap().insert(content_id.to_string());
    }

    pub fn published(&self) -> Vec<PublishRequest> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn publish(
        &self,
        req: &PublishRequest,
        _credentials: &AccountCredentials,
    ) -> Result<PublishReceipt> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("mock relay unreachable".into()));
        }
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(latency)).await;
        }
        self.published.lock().unwrap().push(req.clone());
        if self.rejected.lock().unwrap().contains(&req.content_id) {
            return Ok(PublishReceipt {
                success: false,
                url: None,
                message: "platform rejected the post".into(),
            });
        }
        Ok(PublishReceipt {
            success: true,
            url: Some(format!("https://example.test/p/{}", req.content_id)),
            message: "published".into(),
        })
    }
}
