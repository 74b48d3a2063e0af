use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    AccountCredentials, GenerateRequest, GeneratedContent, ImageBatch, OptimizeRequest,
    OptimizedContent, PublishReceipt, PublishRequest, RewriteRequest,
};

/// Drafting model used by the generate, optimize, image and edit stages.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Name for logging and error messages.
    fn name(&self) -> &str;

    async fn generate(&self, req: &GenerateRequest) -> Result<GeneratedContent>;

    async fn optimize(&self, req: &OptimizeRequest) -> Result<OptimizedContent>;

    /// Illustration prompts for a finished draft, at most `max` of them.
    async fn suggest_image_prompts(&self, title: &str, body: &str, max: usize)
        -> Result<Vec<String>>;

    /// Rewrite one paragraph or image prompt following the operator's request.
    async fn rewrite(&self, req: &RewriteRequest) -> Result<String>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Render every prompt. Failures are reported per prompt in the batch.
    async fn generate_many(&self, content_id: &str, prompts: &[String]) -> Result<ImageBatch>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    /// A rejected post is `Ok` with `success = false`; `Err` means the
    /// publisher itself could not be reached.
    async fn publish(
        &self,
        req: &PublishRequest,
        credentials: &AccountCredentials,
    ) -> Result<PublishReceipt>;
}
