//! Configuration types and loading.
//!
//! Config is loaded from an optional JSON file (e.g. `~/.ntfy-bridge/config.json`), then
//! environment variables are layered on top (the same keys the container images use:
//! `NTFY_URL`, `AMI_HOST`, `WEBHOOK_URL`, ...). The merged [`Config`] is validated once into
//! an immutable [`Settings`] value which is passed explicitly to every component.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Top-level file config. Every section falls back to its defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// ntfy server and topic to subscribe to.
    #[serde(default)]
    pub ntfy: NtfyConfig,

    /// Asterisk Manager Interface connection.
    #[serde(default)]
    pub ami: AmiConfig,

    /// What the originated call rings and how it is presented.
    #[serde(default)]
    pub call: CallConfig,

    /// Optional webhook target.
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Threshold, reconnect and dispatch tuning.
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// ntfy subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NtfyConfig {
    /// Base URL of the ntfy server (default "https://ntfy.sh").
    #[serde(default = "default_ntfy_url")]
    pub url: String,

    /// Topic to subscribe to (default "alerts").
    #[serde(default = "default_ntfy_topic")]
    pub topic: String,

    /// Credential for the Authorization header: "user:pass", an access token ("tk_..."),
    /// or an already encoded basic value. Overridden by NTFY_AUTH env.
    pub auth: Option<String>,

    /// Reconnect when nothing (not even a keepalive) arrives for this long.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_ntfy_url() -> String {
    "https://ntfy.sh".to_string()
}

fn default_ntfy_topic() -> String {
    "alerts".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    120
}

impl Default for NtfyConfig {
    fn default() -> Self {
        Self {
            url: default_ntfy_url(),
            topic: default_ntfy_topic(),
            auth: None,
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// AMI connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AmiConfig {
    /// When false no call is placed. Setting AMI_HOST to an empty string also disables it.
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    pub connect_timeout_ms: u64,
    /// How long to wait for the Login and Originate responses.
    pub response_timeout_ms: u64,
}

impl Default for AmiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "pbx".to_string(),
            port: 5038,
            username: "ntfybridge".to_string(),
            secret: "secret".to_string(),
            connect_timeout_ms: 10_000,
            response_timeout_ms: 10_000,
        }
    }
}

/// Originate parameters, static per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CallConfig {
    pub extension: String,
    pub channel_tech: String,
    /// Full dial string; defaults to "{channelTech}/{extension}".
    pub dial_string: Option<String>,
    pub context: String,
    /// Dialplan priority within the context.
    pub priority: u32,
    pub caller_id: String,
    /// Ring timeout handed to the PBX, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            extension: "1000".to_string(),
            channel_tech: "PJSIP".to_string(),
            dial_string: None,
            context: "from-internal".to_string(),
            priority: 1,
            caller_id: "NTFY Bridge <7777>".to_string(),
            timeout_ms: 30_000,
        }
    }
}

/// Webhook target: either a full URL or host/port/path parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: None,
            path: None,
            timeout_secs: 10,
        }
    }
}

/// Bridge behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Messages with priority >= this value trigger actions (ntfy scale 1-5).
    pub min_priority: u8,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    /// Upper bound for a single action (call or webhook) of one dispatch.
    pub dispatch_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            min_priority: 4,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 30_000,
            dispatch_timeout_secs: 60,
        }
    }
}

/// Invalid or missing configuration. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Missing(&'static str),
    #[error("invalid {key} {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("no action configured: enable AMI or set a webhook target")]
    NoActions,
}

fn invalid(key: &'static str, value: impl Into<String>, reason: impl Display) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.into(),
        reason: reason.to_string(),
    }
}

fn parse_value<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse().map_err(|e| invalid(key, value, e))
}

impl Config {
    /// Apply process environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Empty values count as unset, except AMI_HOST where
    /// an explicitly empty value disables the call action.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = var("NTFY_URL") {
            self.ntfy.url = v;
        }
        if let Some(v) = var("NTFY_TOPIC") {
            self.ntfy.topic = v;
        }
        if let Some(v) = var("NTFY_AUTH") {
            self.ntfy.auth = Some(v);
        }
        if let Some(v) = var("NTFY_IDLE_TIMEOUT_SECS") {
            self.ntfy.idle_timeout_secs = parse_value("NTFY_IDLE_TIMEOUT_SECS", &v)?;
        }

        if let Some(host) = lookup("AMI_HOST") {
            let host = host.trim();
            if host.is_empty() {
                self.ami.enabled = false;
            } else {
                self.ami.host = host.to_string();
                self.ami.enabled = true;
            }
        }
        if let Some(v) = var("AMI_PORT") {
            self.ami.port = parse_value("AMI_PORT", &v)?;
        }
        if let Some(v) = var("AMI_USER") {
            self.ami.username = v;
        }
        if let Some(v) = var("AMI_PASS") {
            self.ami.secret = v;
        }
        if let Some(v) = var("AMI_RESPONSE_TIMEOUT_MS") {
            self.ami.response_timeout_ms = parse_value("AMI_RESPONSE_TIMEOUT_MS", &v)?;
        }

        if let Some(v) = var("EXTENSION") {
            self.call.extension = v;
        }
        if let Some(v) = var("CHANNEL_TECH") {
            self.call.channel_tech = v;
        }
        if let Some(v) = var("DIAL_STRING") {
            self.call.dial_string = Some(v);
        }
        if let Some(v) = var("CONTEXT") {
            self.call.context = v;
        }
        if let Some(v) = var("PRIORITY") {
            self.call.priority = parse_value("PRIORITY", &v)?;
        }
        if let Some(v) = var("CALLERID") {
            self.call.caller_id = v;
        }
        if let Some(v) = var("TIMEOUT_MS") {
            self.call.timeout_ms = parse_value("TIMEOUT_MS", &v)?;
        }

        if let Some(v) = var("WEBHOOK_URL") {
            self.webhook.url = Some(v);
        }
        if let Some(v) = var("WEBHOOK_HOST") {
            self.webhook.host = Some(v);
        }
        if let Some(v) = var("WEBHOOK_PORT") {
            self.webhook.port = Some(parse_value("WEBHOOK_PORT", &v)?);
        }
        if let Some(v) = var("WEBHOOK_PATH") {
            self.webhook.path = Some(v);
        }

        if let Some(v) = var("MIN_PRIORITY") {
            self.bridge.min_priority = parse_value("MIN_PRIORITY", &v)?;
        }
        Ok(())
    }
}

/// Validated, immutable settings handed to the core at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub ntfy: NtfySettings,
    /// None when the call action is disabled.
    pub ami: Option<AmiSettings>,
    pub call: CallSettings,
    /// None when no webhook target is configured.
    pub webhook: Option<WebhookSettings>,
    pub bridge: BridgeSettings,
}

#[derive(Debug, Clone)]
pub struct NtfySettings {
    /// Base URL without trailing slash.
    pub url: String,
    pub topic: String,
    pub auth: Option<String>,
    pub idle_timeout: Duration,
}

impl NtfySettings {
    /// `{url}/{topic}/sse`
    pub fn sse_url(&self) -> String {
        format!("{}/{}/sse", self.url, self.topic)
    }
}

#[derive(Debug, Clone)]
pub struct AmiSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

impl AmiSettings {
    /// Longest a single originate session can take: connect, banner, Login and Originate
    /// responses, then the bounded Logoff.
    pub fn session_budget(&self) -> Duration {
        self.connect_timeout + self.response_timeout * 3 + crate::ami::LOGOFF_TIMEOUT
    }
}

#[derive(Debug, Clone)]
pub struct CallSettings {
    pub extension: String,
    pub channel_tech: String,
    /// Resolved dial string (explicit or "{tech}/{extension}").
    pub dial_string: String,
    pub context: String,
    pub priority: u32,
    pub caller_id: String,
    pub ring_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub min_priority: u8,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub dispatch_timeout: Duration,
}

impl Settings {
    /// Validate a merged config.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let ntfy = validate_ntfy(&config.ntfy)?;

        let ami = if config.ami.enabled {
            let host = config.ami.host.trim();
            if host.is_empty() {
                return Err(ConfigError::Missing("AMI_HOST"));
            }
            if config.ami.port == 0 {
                return Err(invalid("AMI_PORT", "0", "port must be non-zero"));
            }
            single_line("AMI_HOST", host)?;
            single_line("AMI_USER", &config.ami.username)?;
            if config.ami.secret.contains(['\r', '\n']) {
                return Err(invalid("AMI_PASS", "***", "must not contain line breaks"));
            }
            Some(AmiSettings {
                host: host.to_string(),
                port: config.ami.port,
                username: config.ami.username.clone(),
                secret: config.ami.secret.clone(),
                connect_timeout: Duration::from_millis(config.ami.connect_timeout_ms.max(1)),
                response_timeout: Duration::from_millis(config.ami.response_timeout_ms.max(1)),
            })
        } else {
            None
        };

        let call = &config.call;
        if call.extension.trim().is_empty() && call.dial_string.is_none() {
            return Err(ConfigError::Missing("EXTENSION"));
        }
        let dial_string = call
            .dial_string
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("{}/{}", call.channel_tech.trim(), call.extension.trim()));
        single_line("EXTENSION", &call.extension)?;
        single_line("CHANNEL_TECH", &call.channel_tech)?;
        single_line("DIAL_STRING", &dial_string)?;
        single_line("CONTEXT", &call.context)?;
        single_line("CALLERID", &call.caller_id)?;
        let call = CallSettings {
            extension: call.extension.trim().to_string(),
            channel_tech: call.channel_tech.trim().to_string(),
            dial_string,
            context: call.context.trim().to_string(),
            priority: call.priority,
            caller_id: call.caller_id.clone(),
            ring_timeout_ms: call.timeout_ms,
        };

        let webhook = resolve_webhook_url(&config.webhook)?.map(|url| WebhookSettings {
            url,
            timeout: Duration::from_secs(config.webhook.timeout_secs.max(1)),
        });

        let b = &config.bridge;
        if !(1..=5).contains(&b.min_priority) {
            return Err(invalid(
                "MIN_PRIORITY",
                b.min_priority.to_string(),
                "must be between 1 and 5",
            ));
        }
        let backoff_initial = Duration::from_millis(b.backoff_initial_ms.max(1));
        let bridge = BridgeSettings {
            min_priority: b.min_priority,
            backoff_initial,
            backoff_max: Duration::from_millis(b.backoff_max_ms).max(backoff_initial),
            dispatch_timeout: Duration::from_secs(b.dispatch_timeout_secs.max(1)),
        };

        if ami.is_none() && webhook.is_none() {
            return Err(ConfigError::NoActions);
        }
        if let Some(ref ami) = ami {
            let budget = ami.session_budget();
            if bridge.dispatch_timeout < budget {
                return Err(invalid(
                    "bridge.dispatchTimeoutSecs",
                    b.dispatch_timeout_secs.to_string(),
                    format!(
                        "must cover the AMI session budget of {}s (connect, three responses, logoff)",
                        budget.as_secs_f64().ceil()
                    ),
                ));
            }
        }

        Ok(Self {
            ntfy,
            ami,
            call,
            webhook,
            bridge,
        })
    }

    /// JSON summary for display; secrets are masked.
    pub fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "ntfy": {
                "sseUrl": self.ntfy.sse_url(),
                "auth": self.ntfy.auth.as_ref().map(|_| "***"),
                "idleTimeoutSecs": self.ntfy.idle_timeout.as_secs(),
            },
            "ami": self.ami.as_ref().map(|a| serde_json::json!({
                "host": a.host,
                "port": a.port,
                "username": a.username,
                "secret": "***",
                "responseTimeoutMs": a.response_timeout.as_millis() as u64,
            })),
            "call": {
                "channel": self.call.dial_string,
                "exten": self.call.extension,
                "context": self.call.context,
                "priority": self.call.priority,
                "callerId": self.call.caller_id,
                "timeoutMs": self.call.ring_timeout_ms,
            },
            "webhook": self.webhook.as_ref().map(|w| w.url.clone()),
            "minPriority": self.bridge.min_priority,
        })
    }
}

/// AMI is line-framed; a CR or LF in a value would start a new header.
fn single_line(key: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.contains(['\r', '\n']) {
        return Err(invalid(key, value, "must not contain line breaks"));
    }
    Ok(())
}

fn validate_ntfy(ntfy: &NtfyConfig) -> Result<NtfySettings, ConfigError> {
    let url = ntfy.url.trim().trim_end_matches('/');
    if url.is_empty() {
        return Err(ConfigError::Missing("NTFY_URL"));
    }
    let parsed = reqwest::Url::parse(url).map_err(|e| invalid("NTFY_URL", url, e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(invalid("NTFY_URL", url, "scheme must be http or https"));
    }
    let topic = ntfy.topic.trim();
    if topic.is_empty() {
        return Err(ConfigError::Missing("NTFY_TOPIC"));
    }
    if topic.contains('/') || topic.contains(char::is_whitespace) {
        return Err(invalid("NTFY_TOPIC", topic, "must be a single path segment"));
    }
    Ok(NtfySettings {
        url: url.to_string(),
        topic: topic.to_string(),
        auth: ntfy
            .auth
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        idle_timeout: Duration::from_secs(ntfy.idle_timeout_secs.max(1)),
    })
}

/// WEBHOOK_URL wins; otherwise host/port/path build `http://host:port/path`.
fn resolve_webhook_url(webhook: &WebhookConfig) -> Result<Option<String>, ConfigError> {
    let url = match (&webhook.url, &webhook.host) {
        (Some(url), _) => url.trim().to_string(),
        (None, Some(host)) => {
            let path = webhook.path.as_deref().unwrap_or("/");
            let path = if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{}", path)
            };
            format!("http://{}:{}{}", host.trim(), webhook.port.unwrap_or(80), path)
        }
        (None, None) => return Ok(None),
    };
    reqwest::Url::parse(&url).map_err(|e| invalid("WEBHOOK_URL", url.clone(), e))?;
    Ok(Some(url))
}

/// Map a LOG_LEVEL value (Python-style names accepted) to an env_logger filter.
pub fn log_filter(level: Option<&str>) -> &'static str {
    match level.map(|l| l.trim().to_ascii_lowercase()).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") | Some("critical") | Some("fatal") => "error",
        Some("off") => "off",
        _ => "info",
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("NTFY_BRIDGE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".ntfy-bridge").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load the file config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Load file config, apply env overrides, and validate.
pub fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
    let (mut config, path) = load_config(path)?;
    config
        .apply_env()
        .context("applying environment overrides")?;
    let settings = Settings::from_config(&config)
        .with_context(|| format!("validating config (file: {})", path.display()))?;
    Ok(settings)
}
