use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

fn default_host() -> String {
    "http://localhost:8000".to_string()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default = "default_host")]
    pub host: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            host: default_host(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            width: 1100,
            height: 760,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: BackendConfig::default(),
            window: WindowConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let config_path = Self::get_config_path();

        if config_path.exists() {
            match fs::read_to_string(&config_path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => eprintln!("Error parsing config.toml: {}. Using defaults.", e),
                },
                Err(e) => eprintln!("Error reading config.toml: {}. Using defaults.", e),
            }
        }

        Config::default()
    }

    pub fn get_config_path() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/cipher/config.toml")
        } else {
            PathBuf::from("config.toml")
        }
    }
}
