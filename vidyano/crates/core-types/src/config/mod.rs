use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Configuration root loaded from `.env` + `config/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub query: QuerySection,
    #[serde(default)]
    pub metrics: MetricsSection,
}

/// Load config, creating a default config file if none exists at the target path.
pub fn load_or_create_config(path: Option<&Path>) -> Result<AppConfig> {
    let target: PathBuf = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    if !target.exists() {
        if let Some(parent) = target.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config directory {}", parent.display()))?;
        }
        let cfg = AppConfig::default();
        let toml = toml::to_string_pretty(&cfg)?;
        fs::write(&target, toml)
            .with_context(|| format!("write default config {}", target.display()))?;
    }

    load_config(Some(&target))
}

/// Load configuration from .env and a TOML file (default: `config/config.toml`).
///
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let _ = dotenvy::dotenv();
    let target = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    let mut cfg = if target.exists() {
        let raw = fs::read_to_string(&target)
            .with_context(|| format!("read config {}", target.display()))?;
        toml::from_str::<AppConfig>(&raw)
            .with_context(|| format!("parse config {}", target.display()))?
    } else {
        AppConfig::default()
    };
    apply_placeholders(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Common app-wide metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_product_uid")]
    pub product_uid: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            product_uid: default_product_uid(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_product_uid() -> String {
    "vidyano".into()
}

fn default_data_dir() -> String {
    if cfg!(windows) {
        "%LOCALAPPDATA%/Vidyano".into()
    } else {
        "$HOME/.local/share/vidyano".into()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String, // "json" or "text"
    /// Optional log file; empty disables the file sink.
    #[serde(default)]
    pub file: String,
    #[serde(default = "default_log_roll")]
    pub roll: String, // "daily" | "hourly" | "never"
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: String::new(),
            roll: default_log_roll(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_log_roll() -> String {
    "daily".into()
}

/// Tuning knobs for queries created by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySection {
    /// Rows requested per page when the server does not dictate one.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Delay before queued lazy item lookups are flushed as one request.
    #[serde(default = "default_fetch_debounce_ms")]
    pub fetch_debounce_ms: u64,
    /// Largest gap between queued indices that still merges them into one
    /// request; `None` means one page.
    #[serde(default)]
    pub coalesce_gap: Option<u32>,
    #[serde(default)]
    pub max_selected_items: Option<u32>,
    /// Upper bound on distinct values requested per column.
    #[serde(default = "default_distincts_cap")]
    pub distincts_cap: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// When false, failed searches are reported as notifications instead of errors.
    #[serde(default = "default_throw_exceptions")]
    pub throw_exceptions: bool,
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            fetch_debounce_ms: default_fetch_debounce_ms(),
            coalesce_gap: None,
            max_selected_items: None,
            distincts_cap: default_distincts_cap(),
            request_timeout_ms: default_request_timeout_ms(),
            throw_exceptions: default_throw_exceptions(),
        }
    }
}

fn default_page_size() -> u32 {
    100
}
fn default_fetch_debounce_ms() -> u64 {
    25
}
fn default_distincts_cap() -> u32 {
    50
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_throw_exceptions() -> bool {
    true
}

/// Data source request metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_latency_buckets")]
    pub request_latency_buckets: Vec<f64>,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            request_latency_buckets: default_latency_buckets(),
        }
    }
}

fn default_latency_buckets() -> Vec<f64> {
    vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
}

impl AppConfig {
    /// Validate configuration constraints.
    pub fn validate(&self) -> Result<()> {
        if self.query.page_size == 0 {
            bail!("query.page_size must be greater than zero");
        }
        if let Some(gap) = self.query.coalesce_gap
            && u64::from(gap) > u64::from(self.query.page_size) * 16
        {
            bail!(
                "query.coalesce_gap ({gap}) may not exceed 16 pages ({})",
                u64::from(self.query.page_size) * 16
            );
        }
        if self.query.max_selected_items == Some(0) {
            bail!("query.max_selected_items must be greater than zero when set");
        }
        if self
            .metrics
            .request_latency_buckets
            .windows(2)
            .any(|w| w[0] >= w[1])
        {
            bail!("metrics.request_latency_buckets must be strictly increasing");
        }
        if !matches!(self.logging.format.as_str(), "json" | "text") {
            bail!(
                "logging.format must be \"json\" or \"text\", got {:?}",
                self.logging.format
            );
        }
        Ok(())
    }
}

/// Replace `{data_dir}` placeholder tokens with the configured data_dir,
/// and expand environment variables (e.g. `%LOCALAPPDATA%` or `$HOME`).
fn apply_placeholders(cfg: &mut AppConfig) {
    cfg.app.data_dir = expand_env_vars(&cfg.app.data_dir);
    let dd = cfg.app.data_dir.clone();
    cfg.logging.file = expand_env_vars(&cfg.logging.file.replace("{data_dir}", &dd));
}

/// Simple environment variable expansion.
/// Supports $VAR on all platforms and %VAR% on Windows.
fn expand_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    if result.contains('$') {
        // Longest names first so `$HOMEPATH` is not clobbered by `$HOME`.
        let mut vars: Vec<(String, String)> = std::env::vars().collect();
        vars.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        for (key, value) in vars {
            let token = format!("${key}");
            if result.contains(&token) {
                result = result.replace(&token, &value);
            }
        }
    }

    #[cfg(windows)]
    {
        if result.contains('%') {
            use std::collections::HashMap;

            let env_map: HashMap<String, String> = std::env::vars()
                .map(|(k, v)| (k.to_ascii_uppercase(), v))
                .collect();

            let mut out = String::with_capacity(result.len());
            let mut chars = result.chars().peekable();
            while let Some(ch) = chars.next() {
                if ch != '%' {
                    out.push(ch);
                    continue;
                }
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    chars.next();
                    if c == '%' {
                        break;
                    }
                    name.push(c);
                }
                if name.is_empty() {
                    out.push('%');
                } else if let Some(val) = env_map.get(&name.to_ascii_uppercase()) {
                    out.push_str(val);
                } else {
                    out.push('%');
                    out.push_str(&name);
                    out.push('%');
                }
            }
            result = out;
        }
    }

    result
}

/// Default configuration path: `$VIDYANO_CONFIG` when set, else a relative
/// `config/config.toml` (developer runs).
pub fn default_config_path() -> PathBuf {
    std::env::var("VIDYANO_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config").join("config.toml"))
}
