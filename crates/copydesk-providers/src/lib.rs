//! Collaborator contracts for the content pipeline and their reference
//! adapters: an OpenAI-compatible drafting client, an image client and an
//! HTTP publish relay.

pub mod error;
pub mod image;
pub mod openai;
pub mod prompt;
pub mod provider;
pub mod relay;
pub mod types;
pub mod unconfigured;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{ProviderError, Result};
pub use image::OpenAiImageGenerator;
pub use openai::OpenAiGenerator;
pub use provider::{ContentGenerator, ImageGenerator, Publisher};
pub use relay::RelayPublisher;
pub use types::*;
pub use unconfigured::{UnconfiguredGenerator, UnconfiguredImageGenerator, UnconfiguredPublisher};
