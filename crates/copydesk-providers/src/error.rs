#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Credentials, endpoint or prompt missing. Never retried.
    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Publish failed: {0}")]
    Publish(String),
}

impl ProviderError {
    /// True for failures of the upstream service itself, as opposed to
    /// misconfiguration or a malformed answer.
    pub fn is_service_unavailable(&self) -> bool {
        match self {
            ProviderError::Unavailable(_) | ProviderError::Http(_) => true,
            ProviderError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_upstream_failures() {
        assert!(ProviderError::Unavailable("down".into()).is_service_unavailable());
        assert!(ProviderError::Api { status: 503, message: String::new() }.is_service_unavailable());
        assert!(ProviderError::Api { status: 429, message: String::new() }.is_service_unavailable());
        assert!(!ProviderError::Api { status: 400, message: String::new() }.is_service_unavailable());
        assert!(!ProviderError::NotConfigured("no key".into()).is_service_unavailable());
        assert!(!ProviderError::Parse("bad json".into()).is_service_unavailable());
    }
}
