use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default)]
    pub http: HttpConfig,
    /// Enables `DELETE /conversations/clear`, which wipes every user's data
    #[serde(default)]
    pub allow_global_reset: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            http: HttpConfig::default(),
            allow_global_reset: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
    /// Largest accepted audio upload
    pub max_upload_mb: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_mb: 512,
        }
    }
}

/// On-disk layout: one SQLite file plus three flat-file directories
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding conversations, messages and artifacts
    pub database_path: PathBuf,
    /// One `{transcript, answers}` JSON file per conversation id
    pub conversations_dir: PathBuf,
    /// Cached transcripts, one `<hash>.txt` per upload fingerprint
    pub transcripts_dir: PathBuf,
    /// Cached follow-up suggestions, one `<hash>.json` per upload fingerprint
    pub suggestions_dir: PathBuf,
    /// Run without the metadata repository when false
    pub repository_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/conversations_metadata.db"),
            conversations_dir: PathBuf::from("data/conversations"),
            transcripts_dir: PathBuf::from("data/transcripts"),
            suggestions_dir: PathBuf::from("data/suggestions"),
            repository_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Place every store under a single root directory
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            database_path: root.join("conversations_metadata.db"),
            conversations_dir: root.join("conversations"),
            transcripts_dir: root.join("transcripts"),
            suggestions_dir: root.join("suggestions"),
            repository_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub language: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.deepgram.com/v1/listen".to_string(),
            api_key: String::new(),
            model: "nova-2".to_string(),
            language: "pt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// OpenAI-compatible chat completions endpoint
    pub api_url: String,
    pub api_key: String,
    /// Model answering questions about a transcript
    pub model: String,
    /// Model used for speaker identification and suggestions
    pub analysis_model: String,
    pub temperature: Option<f32>,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "gpt-4.1".to_string(),
            analysis_model: "gpt-4.1".to_string(),
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub user_uuid: String,
    /// Leading prompt characters used as an auto-derived conversation title
    pub title_chars: usize,
    /// Leading answer characters stored as the message summary
    pub summary_chars: usize,
    pub poll_interval_ms: u64,
    pub poll_timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            user_uuid: "default-user".to_string(),
            title_chars: 50,
            summary_chars: 200,
            poll_interval_ms: 2000,
            poll_timeout_secs: 300,
        }
    }
}

fn default_service_name() -> String {
    "transcript-agent".to_string()
}

impl Config {
    /// Load a TOML file (extension optional) layered with `TRANSCRIPT_AGENT__*` env vars
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("TRANSCRIPT_AGENT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
