use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Windows narrower than this start with the session sidebar collapsed.
pub const COMPACT_WIDTH: u32 = 768;

const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful and friendly AI assistant. \
Your responses should be informative, well-structured, and easy to understand. \
When asked for code, provide it in a clean markdown format.";

fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_chat_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_image_model() -> String {
    "imagen-3.0-generate-002".to_string()
}

fn default_image_count() -> u32 {
    2
}

fn default_aspect_ratio() -> String {
    "1:1".to_string()
}

fn default_system_instruction() -> String {
    DEFAULT_SYSTEM_INSTRUCTION.to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeminiConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Used only when neither `GEMINI_API_KEY` nor `API_KEY` is set.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_image_count")]
    pub image_count: u32,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        GeminiConfig {
            api_base: default_api_base(),
            api_key: None,
            chat_model: default_chat_model(),
            image_model: default_image_model(),
            image_count: default_image_count(),
            aspect_ratio: default_aspect_ratio(),
            system_instruction: default_system_instruction(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            width: 1100,
            height: 760,
            min_width: 480,
            min_height: 360,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Overrides `<config dir>/gemini-chat-history.json`.
    #[serde(default)]
    pub history_file: Option<PathBuf>,
    /// Where saved images go. Defaults to `<config dir>/images`.
    #[serde(default)]
    pub image_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            gemini: GeminiConfig::default(),
            window: WindowConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let config_path = Self::get_config_path();

        if config_path.exists() {
            match fs::read_to_string(&config_path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("Error parsing config.toml: {}. Using defaults.", e),
                },
                Err(e) => tracing::warn!("Error reading config.toml: {}. Using defaults.", e),
            }
        } else if let Some(parent) = config_path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        Config::default()
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn get_config_path() -> PathBuf {
        Self::get_config_dir().join("config.toml")
    }

    pub fn get_config_dir() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/gemini-chat")
        } else {
            PathBuf::from(".")
        }
    }

    pub fn history_path(&self) -> PathBuf {
        self.storage
            .history_file
            .clone()
            .unwrap_or_else(|| Self::get_config_dir().join(format!("{}.json", crate::storage::STORAGE_KEY)))
    }

    pub fn image_dir(&self) -> PathBuf {
        self.storage
            .image_dir
            .clone()
            .unwrap_or_else(|| Self::get_config_dir().join("images"))
    }

    /// The credential for the remote API. Environment wins over the config file.
    pub fn api_key(&self) -> Option<String> {
        ["GEMINI_API_KEY", "API_KEY"]
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .chain(self.gemini.api_key.clone())
            .map(|key| key.trim().to_string())
            .find(|key| !key.is_empty())
    }

    pub fn starts_compact(&self) -> bool {
        self.window.width < COMPACT_WIDTH
    }
}
