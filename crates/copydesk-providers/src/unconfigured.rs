//! Stand-ins installed when a collaborator has no configuration. Every call
//! fails with `NotConfigured`, which callers treat as a configuration error.

use async_trait::async_trait;

use crate::error::{ProviderError, Result};
use crate::provider::{ContentGenerator, ImageGenerator, Publisher};
use crate::types::{
    AccountCredentials, GenerateRequest, GeneratedContent, ImageBatch, OptimizeRequest,
    OptimizedContent, PublishReceipt, PublishRequest, RewriteRequest,
};

pub struct UnconfiguredGenerator;

#[async_trait]
impl ContentGenerator for UnconfiguredGenerator {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn generate(&self, _req: &GenerateRequest) -> Result<GeneratedContent> {
        Err(missing("providers.generation"))
    }

    async fn optimize(&self, _req: &OptimizeRequest) -> Result<OptimizedContent> {
        Err(missing("providers.optimization"))
    }

    async fn suggest_image_prompts(&self, _: &str, _: &str, _: usize) -> Result<Vec<String>> {
        Err(missing("providers.generation"))
    }

    async fn rewrite(&self, _req: &RewriteRequest) -> Result<String> {
        Err(missing("providers.generation"))
    }
}

pub struct UnconfiguredImageGenerator;

#[async_trait]
impl ImageGenerator for UnconfiguredImageGenerator {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn generate_many(&self, _content_id: &str, _prompts: &[String]) -> Result<ImageBatch> {
        Err(missing("providers.image"))
    }
}

pub struct UnconfiguredPublisher;

#[async_trait]
impl Publisher for UnconfiguredPublisher {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn publish(&self, _: &PublishRequest, _: &AccountCredentials) -> Result<PublishReceipt> {
        Err(missing("publisher"))
    }
}

fn missing(section: &str) -> ProviderError {
    ProviderError::NotConfigured(format!("no [{section}] section in config"))
}
