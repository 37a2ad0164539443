use std::{fs, path::PathBuf, sync::Mutex, time::Duration};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::utils;

const DEFAULT_API_BASE: &str = "https://api.example-events.test";
const DEFAULT_WIDGET_URL: &str = "https://beta.popin.site";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub widget_url: String,
    pub trusted_origins: Vec<String>,
    pub timezone: String,
    pub container_retries: u32,
    pub container_retry_delay_ms: u64,
    pub min_container_size: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub refresh_interval_secs: u64,
    pub staleness_secs: i64,
    pub banner_ttl_secs: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.to_string(),
            widget_url: DEFAULT_WIDGET_URL.to_string(),
            trusted_origins: vec![DEFAULT_WIDGET_URL.to_string()],
            timezone: "America/Toronto".to_string(),
            container_retries: 3,
            container_retry_delay_ms: 1000,
            min_container_size: 30.0,
            viewport_width: 1280.0,
            viewport_height: 800.0,
            refresh_interval_secs: 30,
            staleness_secs: 300,
            banner_ttl_secs: 5,
        }
    }
}

impl AppConfig {
    pub fn tz(&self) -> Tz {
        self.timezone.parse::<Tz>().unwrap_or_else(|_| {
            tracing::warn!(timezone = %self.timezone, "unknown timezone, using UTC");
            Tz::UTC
        })
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.container_retry_delay_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_secs)
    }
}

pub struct ConfigStore {
    path: PathBuf,
    data: Mutex<AppConfig>,
}

impl ConfigStore {
    pub fn load() -> Self {
        Self::load_from(utils::config_path())
    }

    pub fn load_from(path: PathBuf) -> Self {
        let data = read_config(&path).unwrap_or_else(|err| {
            tracing::warn!("failed to read config {:?}: {err}", path);
            AppConfig::default()
        });
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    pub fn read(&self) -> AppConfig {
        match self.data.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update<F>(&self, transform: F) -> Result<AppConfig, String>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut guard = self
            .data
            .lock()
            .map_err(|_| "config mutex poisoned".to_string())?;
        transform(&mut guard);
        write_config(&self.path, &guard)?;
        Ok(guard.clone())
    }
}

fn read_config(path: &PathBuf) -> Result<AppConfig, String> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|err| err.to_string())?;
    serde_json::from_str(&contents).map_err(|err| err.to_string())
}

fn write_config(path: &PathBuf, config: &AppConfig) -> Result<(), String> {
    utils::ensure_parent(path);
    let contents = serde_json::to_string_pretty(config).map_err(|err| err.to_string())?;
    fs::write(path, contents).map_err(|err| err.to_string())
}
