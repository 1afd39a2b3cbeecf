use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Inclusive port range probed when `serve.port = "auto"`.
pub const AUTO_PORT_RANGE: (u16, u16) = (8000, 8999);

/// Explanatory block written ahead of the serialized values, so the file a
/// first run leaves behind describes itself.
const CONFIG_HEADER: &str = "\
# vidrelay configuration
#
# An empty allowed_users list lets anyone trigger downloads; port = \"auto\"
# sweeps 8000-8999 for a free port. Environment overrides:
# VIDRELAY_DISCORD_TOKEN, VIDRELAY_SERVE_PORT, VIDRELAY_PUBLIC_HOST.
#
# Optional keys, absent until set:
#   discord.guild_id   only react inside this guild (empty means no pin)
#   discord.intents    gateway intents bitmask
";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    #[serde(skip)]
    pub config_path: PathBuf,

    pub discord: DiscordConfig,
    pub download: DownloadConfig,
    pub serve: ServeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DiscordConfig {
    pub bot_token: String,
    pub guild_id: Option<String>,
    pub allowed_users: Vec<String>,
    pub intents: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub program: String,
    pub timeout_secs: u64,
    pub max_attachment_bytes: u64,
    /// Where downloads land before delivery. Supports `~`. Empty means the
    /// OS temp dir under a `vidrelay` subdirectory.
    pub scratch_dir: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            timeout_secs: 300,
            max_attachment_bytes: 15 * 1024 * 1024,
            scratch_dir: String::new(),
        }
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        if self.scratch_dir.is_empty() {
            std::env::temp_dir().join("vidrelay")
        } else {
            PathBuf::from(shellexpand::tilde(&self.scratch_dir).into_owned())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Host name placed in published URLs. The listener itself binds all
    /// interfaces only through this host's resolution by clients.
    pub public_host: String,
    pub port: PortMode,
    pub ttl_secs: u64,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            public_host: "localhost".to_string(),
            port: PortMode::default(),
            ttl_secs: 3600,
        }
    }
}

impl ServeConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// `"auto"` probes [`AUTO_PORT_RANGE`]; a number binds exactly that port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortMode {
    Fixed(u16),
    Named(String),
}

impl Default for PortMode {
    fn default() -> Self {
        Self::Named("auto".to_string())
    }
}

impl PortMode {
    pub fn is_auto(&self) -> bool {
        matches!(self, Self::Named(name) if name == "auto")
    }

    pub fn fixed(&self) -> Option<u16> {
        match self {
            Self::Fixed(port) => Some(*port),
            Self::Named(_) => None,
        }
    }
}

impl Config {
    /// Read `~/.vidrelay/config.toml`, writing a commented default file on
    /// first run.
    pub fn load_or_init() -> Result<Self, ConfigError> {
        let home = UserDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .ok_or_else(|| ConfigError::Load("home directory not found".to_string()))?;
        let vidrelay_dir = home.join(".vidrelay");
        let config_path = vidrelay_dir.join("config.toml");

        if !vidrelay_dir.exists() {
            fs::create_dir_all(&vidrelay_dir)?;
        }

        if config_path.exists() {
            let contents = fs::read_to_string(&config_path)?;
            let mut config: Config = toml::from_str(&contents)
                .map_err(|error| ConfigError::Load(error.to_string()))?;
            config.config_path = config_path;
            Ok(config)
        } else {
            let config = Self {
                config_path,
                ..Self::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let rendered = toml::to_string_pretty(self)
            .map_err(|error| ConfigError::Save(error.to_string()))?;
        fs::write(&self.config_path, format!("{CONFIG_HEADER}\n{rendered}"))?;
        Ok(())
    }

    pub fn override_from_env(&mut self) {
        if let Ok(token) =
            std::env::var("VIDRELAY_DISCORD_TOKEN").or_else(|_| std::env::var("DISCORD_TOKEN"))
            && !token.is_empty()
        {
            self.discord.bot_token = token;
        }

        if let Ok(port_str) =
            std::env::var("VIDRELAY_SERVE_PORT").or_else(|_| std::env::var("SERVE_PORT"))
            && !port_str.is_empty()
        {
            self.serve.port = match port_str.parse::<u16>() {
                Ok(port) => PortMode::Fixed(port),
                Err(_) => PortMode::Named(port_str),
            };
        }

        if let Ok(host) = std::env::var("VIDRELAY_PUBLIC_HOST")
            && !host.is_empty()
        {
            self.serve.public_host = host;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.bot_token.trim().is_empty() {
            return Err(ConfigError::Validation(
                "discord.bot_token is empty (set it in config.toml or VIDRELAY_DISCORD_TOKEN)"
                    .to_string(),
            ));
        }
        if let PortMode::Named(name) = &self.serve.port
            && name != "auto"
        {
            return Err(ConfigError::Validation(format!(
                "serve.port must be \"auto\" or a port number, got \"{name}\""
            )));
        }
        if self.download.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "download.timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
