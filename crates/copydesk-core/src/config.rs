use chrono::FixedOffset;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CONCURRENCY: usize = 3;
pub const DEFAULT_MISFIRE_GRACE_SECS: u64 = 5 * 60;
pub const DEFAULT_TICK_MILLIS: u64 = 1_000;
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";

/// Top-level config (copydesk.toml + COPYDESK_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CopydeskConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Publish relay in front of the browser-automation publisher.
    /// Without it every publish attempt fails with a configuration error.
    pub publisher: Option<PublisherConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Scheduler tuning. All fields have defaults so the section can be omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on firings executing at the same time; extra firings wait.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// A firing later than this is skipped and the next fire time is used instead.
    #[serde(default = "default_misfire_grace_secs")]
    pub misfire_grace_secs: u64,
    /// Timer resolution of the scheduler loop.
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    /// Offset of the wall clock that cron expressions and active hours refer to.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            misfire_grace_secs: DEFAULT_MISFIRE_GRACE_SECS,
            tick_millis: DEFAULT_TICK_MILLIS,
            utc_offset_minutes: 0,
        }
    }
}

impl SchedulerConfig {
    /// The scheduler's wall-clock zone.
    pub fn timezone(&self) -> crate::error::Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            crate::error::CopydeskError::Config(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    /// Drafting model (generate stage, image prompt suggestions, edits).
    pub generation: Option<ChatProviderConfig>,
    /// Rewriting model for the optimize stage. Falls back to `generation`.
    pub optimization: Option<ChatProviderConfig>,
    pub image: Option<ImageProviderConfig>,
}

/// Any OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatProviderConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// System prompt override; the built-in prompt is used when unset.
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageProviderConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_image_model")]
    pub model: String,
    #[serde(default = "default_image_size")]
    pub size: String,
    /// Rendered images are written under `<output_dir>/<content_id>/`.
    #[serde(default = "default_image_dir")]
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Full URL the publish request is POSTed to.
    pub endpoint: String,
    /// Optional bearer token expected by the relay.
    pub token: Option<String>,
    #[serde(default = "default_publish_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.copydesk/copydesk.db", home)
}
fn default_image_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.copydesk/images", home)
}
fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}
fn default_misfire_grace_secs() -> u64 {
    DEFAULT_MISFIRE_GRACE_SECS
}
fn default_tick_millis() -> u64 {
    DEFAULT_TICK_MILLIS
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_chat_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}
fn default_image_model() -> String {
    DEFAULT_IMAGE_MODEL.to_string()
}
fn default_image_size() -> String {
    "1024x1024".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_publish_timeout_secs() -> u64 {
    120
}

impl CopydeskConfig {
    /// Load config from a TOML file with COPYDESK_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `COPYDESK_SCHEDULER__MAX_CONCURRENCY=5`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CopydeskConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("COPYDESK_").split("__"))
            .extract()
            .map_err(|e| crate::error::CopydeskError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.copydesk/copydesk.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("copydesk.toml", "")?;
            let config = CopydeskConfig::load(Some("copydesk.toml")).expect("load");
            assert_eq!(config.scheduler.max_concurrency, 3);
            assert_eq!(config.scheduler.misfire_grace_secs, 300);
            assert!(config.providers.generation.is_none());
            assert!(config.publisher.is_none());
            Ok(())
        });
    }

    #[test]
    fn env_overrides_nested_keys() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "copydesk.toml",
                r#"
                [scheduler]
                max_concurrency = 2
                utc_offset_minutes = 480

                [providers.generation]
                api_key = "sk-test"
                "#,
            )?;
            jail.set_env("COPYDESK_SCHEDULER__MAX_CONCURRENCY", "7");
            let config = CopydeskConfig::load(Some("copydesk.toml")).expect("load");
            assert_eq!(config.scheduler.max_concurrency, 7);
            let tz = config.scheduler.timezone().expect("offset");
            assert_eq!(tz.local_minus_utc(), 8 * 3600);
            let generation = config.providers.generation.expect("generation");
            assert_eq!(generation.model, DEFAULT_CHAT_MODEL);
            assert_eq!(generation.base_url, "https://api.openai.com");
            Ok(())
        });
    }

    #[test]
    fn absurd_offset_is_a_config_error() {
        let scheduler = SchedulerConfig {
            utc_offset_minutes: 24 * 60,
            ..SchedulerConfig::default()
        };
        assert!(scheduler.timezone().is_err());
    }
}
