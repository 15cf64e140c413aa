use crate::provider::parse_endpoint;
use crate::shortcut::Shortcut;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_URL: &str = "http://127.0.0.1:5000/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "llama.cpp";
pub const DEFAULT_SHORTCUT: &str = "<Ctrl><Alt>l";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Keys accepted by `config set`.
pub const KEYS: &[&str] = &[
    "url",
    "api_key",
    "model",
    "shortcut",
    "temperature",
    "max_tokens",
    "timeout_secs",
    "stream",
];

/// On-disk configuration. Every key is optional; empty strings count as unset.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Chat-completions endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// GTK-style accelerator, e.g. `<Ctrl><Alt>l`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl Config {
    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg: Config = toml::from_str(&s)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }

    /// Write through a sibling temp file, then rename into place.
    ///
    /// The file can hold an API key, so it is created owner-only on unix.
    pub fn save_atomic(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory: {}", dir.display()))?;

        let text = toml::to_string_pretty(self).context("failed to serialize config")?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create temp config in {}", dir.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))
                .context("failed to restrict temp config permissions")?;
        }
        tmp.write_all(text.as_bytes())
            .with_context(|| format!("failed to write temp config: {}", tmp.path().display()))?;
        tmp.as_file().sync_all().context("failed to sync temp config")?;
        tmp.persist(path)
            .map_err(|e| e.error)
            .with_context(|| format!("failed to move config into place: {}", path.display()))?;
        Ok(())
    }

    /// Validate and store one key. An empty value unsets it.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let value = value.trim();
        let unset = value.is_empty();

        match key {
            "url" => {
                if !unset {
                    parse_endpoint(value)?;
                }
                self.url = non_empty(value);
            }
            "api_key" => self.api_key = non_empty(value),
            "model" => self.model = non_empty(value),
            "shortcut" => {
                if !unset {
                    value.parse::<Shortcut>()?;
                }
                self.shortcut = non_empty(value);
            }
            "temperature" => {
                let t: Option<f32> = parse_opt(value, key)?;
                if let Some(t) = t {
                    anyhow::ensure!((0.0..=2.0).contains(&t), "temperature must be between 0 and 2");
                }
                self.temperature = t;
            }
            "max_tokens" => self.max_tokens = parse_opt(value, key)?,
            "timeout_secs" => {
                let secs: Option<u64> = parse_opt(value, key)?;
                anyhow::ensure!(secs != Some(0), "timeout_secs must be positive");
                self.timeout_secs = secs;
            }
            "stream" => self.stream = parse_opt(value, key)?,
            other => anyhow::bail!("unknown config key {other:?} (expected one of: {})", KEYS.join(", ")),
        }
        Ok(())
    }

    /// Fill unset keys with defaults.
    pub fn resolve(&self) -> Settings {
        let d = Settings::default();
        Settings {
            url: pick(&self.url).unwrap_or(d.url),
            api_key: self.api_key.as_deref().and_then(ApiKey::from_config),
            model: pick(&self.model).unwrap_or(d.model),
            shortcut: pick(&self.shortcut).unwrap_or(d.shortcut),
            temperature: self.temperature.unwrap_or(d.temperature),
            max_tokens: self.max_tokens.unwrap_or(d.max_tokens),
            timeout: self.timeout_secs.map(Duration::from_secs).unwrap_or(d.timeout),
            stream: self.stream.unwrap_or(d.stream),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn pick(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).and_then(non_empty)
}

fn parse_opt<T>(value: &str, key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .with_context(|| format!("invalid value for {key}: {value:?}"))
}

/// Bearer credential. Never shows up in logs or `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// `None` for a blank key, which means "send no Authorization header".
    pub fn from_config(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        (!raw.is_empty()).then(|| Self(raw.to_string()))
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }

    /// `sk-…1234` style hint for display.
    pub fn masked(&self) -> String {
        let n = self.0.chars().count();
        if n <= 8 {
            return "*".repeat(n);
        }
        let tail: String = self.0.chars().skip(n - 4).collect();
        format!("****{tail}")
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Fully resolved settings for one ask.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub url: String,
    pub api_key: Option<ApiKey>,
    pub model: String,
    pub shortcut: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub stream: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            shortcut: DEFAULT_SHORTCUT.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            stream: true,
        }
    }
}

impl Settings {
    /// Apply `ASK_LLAMA_URL`, `ASK_LLAMA_API_KEY` and `ASK_LLAMA_MODEL`.
    pub fn with_env(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(url) = lookup("ASK_LLAMA_URL") {
            self.url = url.trim().to_string();
        }
        if let Some(key) = lookup("ASK_LLAMA_API_KEY") {
            self.api_key = ApiKey::from_config(&key);
        }
        if let Some(model) = lookup("ASK_LLAMA_MODEL") {
            self.model = model.trim().to_string();
        }
        self
    }
}

/// Read-only source of settings, handed to the controller at call time.
pub trait SettingsProvider: Sync {
    fn settings(&self) -> Settings;
}

impl SettingsProvider for Settings {
    fn settings(&self) -> Settings {
        self.clone()
    }
}

impl SettingsProvider for Config {
    fn settings(&self) -> Settings {
        self.resolve()
    }
}

impl<T: SettingsProvider + ?Sized> SettingsProvider for &T {
    fn settings(&self) -> Settings {
        (**self).settings()
    }
}
