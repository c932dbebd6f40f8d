use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DavenportError, Result};

/// Top-level configuration for the support gateway.
///
/// Loaded from `~/.davenport/config.toml` by default. Every section falls
/// back to its defaults when omitted, so an empty file is a valid config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub citations: CitationConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GatewayConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject configurations the gateway cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.router.default_profile.trim().is_empty() {
            return Err(DavenportError::Config(
                "router.default_profile must not be empty".to_string(),
            ));
        }
        if let Some((label, _)) = self
            .router
            .profiles
            .iter()
            .find(|(_, id)| id.trim().is_empty())
        {
            return Err(DavenportError::Config(format!(
                "router.profiles.{} must name a backend profile",
                label
            )));
        }
        if self.citations.transcript_url_prefix.is_empty() {
            return Err(DavenportError::Config(
                "citations.transcript_url_prefix must not be empty".to_string(),
            ));
        }
        if self.backend.stream_idle_timeout_secs == 0 {
            return Err(DavenportError::Config(
                "backend.stream_idle_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.chat.max_message_chars == 0 {
            return Err(DavenportError::Config(
                "chat.max_message_chars must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// General process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the feedback database and voice memos.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.davenport/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// HTTP listener and middleware settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed by CORS (the static web front end).
    pub allowed_origins: Vec<String>,
    /// Requests per second across rate-limited routes.
    pub rate_limit_per_sec: u64,
    /// Default request body limit in bytes.
    pub max_body_bytes: usize,
    /// Body limit for voice memo uploads in bytes.
    pub voice_memo_max_bytes: usize,
    /// Interval between SSE keep-alive comments.
    pub sse_keep_alive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7071,
            allowed_origins: vec![
                "http://localhost:4280".to_string(),
                "http://127.0.0.1:4280".to_string(),
            ],
            rate_limit_per_sec: 50,
            max_body_bytes: 1024 * 1024,
            voice_memo_max_bytes: 25 * 1024 * 1024,
            sse_keep_alive_secs: 15,
        }
    }
}

/// Connection settings for the managed agent service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Project endpoint of the agent service.
    pub endpoint: String,
    /// `api-version` query parameter sent with every call.
    pub api_version: String,
    /// Environment variable holding the bearer token.
    pub token_env: String,
    /// Whole-request timeout for blocking calls.
    pub request_timeout_secs: u64,
    /// TCP connect timeout for every call.
    pub connect_timeout_secs: u64,
    /// Longest silence allowed between chunks of a streamed reply.
    pub stream_idle_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint:
                "https://aoai-j6lw7vswhnnhw.services.ai.azure.com/api/projects/proj-j6lw7vswhnnhw"
                    .to_string(),
            api_version: "2025-05-15-preview".to_string(),
            token_env: "DAVENPORT_BACKEND_TOKEN".to_string(),
            request_timeout_secs: 180,
            connect_timeout_secs: 10,
            stream_idle_timeout_secs: 60,
        }
    }
}

/// Reasoning level label to backend profile routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Profile used when the label is absent or unknown.
    pub default_profile: String,
    /// Reasoning level label to backend profile identifier.
    pub profiles: BTreeMap<String, String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let profiles = [
            ("fast", "davenport-fast"),
            ("balanced", "davenport-balanced"),
            ("thorough", "davenport-assistant"),
            ("direct", "davenport-direct-v1"),
        ]
        .into_iter()
        .map(|(label, id)| (label.to_string(), id.to_string()))
        .collect();

        Self {
            default_profile: "davenport-assistant".to_string(),
            profiles,
        }
    }
}

/// Citation rewriting from transcript blobs to public video links.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CitationConfig {
    /// URL prefix of transcript documents cited by the backend.
    pub transcript_url_prefix: String,
    /// Public watch URL; the video id is appended.
    pub watch_url_base: String,
    /// Transcript name (without `.md`) to public video id.
    pub videos: BTreeMap<String, String>,
}

impl Default for CitationConfig {
    fn default() -> Self {
        let videos = [
            ("Davenport Machine Model B - Basic Identification (part 1)", "Bgqf1gt0y10"),
            ("Davenport Machine Model B - Basic Identification (part 2)", "7NYKOGs6CDs"),
            ("Davenport Machine Model B - Cross Working Tools (part 1)", "rINsPjoNOlA"),
            ("Davenport Machine Model B - Cross Working Tools (part 2)", "fb0zCgmn55s"),
            ("Davenport Machine Model B - The Work Spindles", "lwnB7ysRsGs"),
            ("Davenport Machine Model B - Stocking", "22tb3sbqquM"),
            ("Davenport Machine Model B - End Working Tools", "NMeeZX7ie44"),
            ("Davenport Machine Model B - E2726 Size Toll Holder", "diMpiXFFPVo"),
            ("Davenport Machine Model B - Chuck and Feed Mechanism", "C8NLYDmM9jk"),
            ("Davenport Machine Model B - Preventive Maintenance", "RIxzlj3ANTY"),
        ]
        .into_iter()
        .map(|(name, id)| (name.to_string(), id.to_string()))
        .collect();

        Self {
            transcript_url_prefix: "https://stj6lw7vswhnnhw.blob.core.windows.net/video-training/"
                .to_string(),
            watch_url_base: "https://www.youtube.com/watch?v=".to_string(),
            videos,
        }
    }
}

/// Chat request handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Longest accepted message, in characters.
    pub max_message_chars: usize,
    /// Status text sent before the backend is called.
    pub search_status: String,
    /// Status text sent with the first answer fragment.
    pub generating_status: String,
    /// Whether to send `generating_status` at all.
    pub announce_generation: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 4000,
            search_status: "Searching knowledge base...".to_string(),
            generating_status: "Generating answer...".to_string(),
            announce_generation: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.server.port, 7071);
        assert_eq!(config.router.default_profile, "davenport-assistant");
        assert_eq!(config.router.profiles.len(), 4);
        assert_eq!(config.router.profiles["fast"], "davenport-fast");
        assert_eq!(config.citations.videos.len(), 10);
        assert_eq!(config.chat.max_message_chars, 4000);
        assert!(!config.chat.announce_generation);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[server]
port = 8080

[router]
default_profile = "davenport-fast"
"#;
        let file = create_temp_config(content);
        let config = GatewayConfig::load(file.path()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.router.default_profile, "davenport-fast");
        // An omitted table keeps the built-in profiles.
        assert_eq!(config.router.profiles["balanced"], "davenport-balanced");
    }

    #[test]
    fn test_load_custom_tables() {
        let content = r#"
[router.profiles]
quick = "agent-quick"

[citations]
transcript_url_prefix = "internal://vid/"

[citations.videos]
"Intro" = "abc123"
"#;
        let file = create_temp_config(content);
        let config = GatewayConfig::load(file.path()).unwrap();
        assert_eq!(config.router.profiles.len(), 1);
        assert_eq!(config.router.profiles["quick"], "agent-quick");
        assert_eq!(config.citations.transcript_url_prefix, "internal://vid/");
        assert_eq!(config.citations.videos["Intro"], "abc123");
        assert_eq!(
            config.citations.watch_url_base,
            "https://www.youtube.com/watch?v="
        );
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = GatewayConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.data_dir, "~/.davenport/data");
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        assert!(GatewayConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        let mut config = GatewayConfig::default();
        config.server.port = 9000;
        config.save(&path).unwrap();

        let reloaded = GatewayConfig::load(&path).unwrap();
        assert_eq!(reloaded.server.port, 9000);
        assert_eq!(reloaded.citations.videos, config.citations.videos);
        assert_eq!(reloaded.router.profiles, config.router.profiles);
    }

    #[test]
    fn test_validate_rejects_empty_default_profile() {
        let mut config = GatewayConfig::default();
        config.router.default_profile = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("default_profile"));
    }

    #[test]
    fn test_validate_rejects_blank_profile_id() {
        let mut config = GatewayConfig::default();
        config
            .router
            .profiles
            .insert("broken".to_string(), String::new());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("router.profiles.broken"));
    }

    #[test]
    fn test_validate_rejects_zero_message_limit() {
        let mut config = GatewayConfig::default();
        config.chat.max_message_chars = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_stream_idle_timeout() {
        let mut config = GatewayConfig::default();
        assert_eq!(config.backend.stream_idle_timeout_secs, 60);
        config.backend.stream_idle_timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
