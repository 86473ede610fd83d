//! Command-line and environment configuration.
//!
//! Every flag can also be supplied through the environment variable named next to it, which is
//! how cron entries usually configure a watcher. [`Cli`] is the raw parse; [`WatchConfig`] is the
//! validated form handed to the pipeline.

use crate::state::TargetId;
use clap::{Parser, ValueEnum};
use reqwest::header::HeaderValue;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Resend-compatible e-mail endpoint used when none is configured.
pub const DEFAULT_NOTIFY_ENDPOINT: &str = "https://api.resend.com/emails";

/// Raw command-line interface.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "pagewatch",
    version,
    about = "Detect changes on a web page and e-mail a unified diff"
)]
pub struct Cli {
    /// Page to watch
    #[arg(long, env = "WATCH_URL")]
    pub url: Option<String>,

    /// API key for the notification service
    #[arg(long, env = "RESEND_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Alert recipients, comma separated
    #[arg(long, env = "TO_EMAIL")]
    pub to: Option<String>,

    /// Verified sender identity, e.g. "Alerts <alerts@example.com>"
    #[arg(long, env = "FROM_EMAIL")]
    pub from: Option<String>,

    /// Directory holding per-page state files
    #[arg(long, env = "STATE_DIR", default_value = ".watch_state")]
    pub state_dir: PathBuf,

    /// HTTP timeout in seconds for both the page fetch and the notification call
    #[arg(long = "timeout-secs", env = "REQUEST_TIMEOUT", default_value_t = 20)]
    pub timeout_secs: u64,

    /// Prepended to the alert subject
    #[arg(long, env = "SUBJECT_PREFIX", default_value = "[Page Watch]")]
    pub subject_prefix: String,

    /// User-Agent header sent with the page request
    #[arg(long, env = "USER_AGENT")]
    pub user_agent: Option<String>,

    /// Notification service endpoint
    #[arg(long, env = "RESEND_ENDPOINT", default_value = DEFAULT_NOTIFY_ENDPOINT)]
    pub notify_endpoint: String,

    /// What to do with the new snapshot when the alert cannot be delivered
    #[arg(long, env = "ON_NOTIFY_FAILURE", value_enum, default_value = "advance")]
    pub on_notify_failure: NotifyFailurePolicy,

    /// Compare and print the diff without notifying or writing state
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Enable debug logging on stderr
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

/// Snapshot handling when a change was detected but the alert failed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum NotifyFailurePolicy {
    /// Persist the new snapshot anyway; the failed alert is not retried.
    #[default]
    Advance,
    /// Keep the previous snapshot so the next run detects and reports the same change.
    Retain,
}

/// Errors raised while validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting was not supplied.
    #[error("missing required setting {env} (--{flag})")]
    Missing {
        /// Environment variable name.
        env: &'static str,
        /// Long flag name.
        flag: &'static str,
    },
    /// A URL setting does not parse.
    #[error("invalid URL for {env}: {value:?} ({source})")]
    InvalidUrl {
        /// Environment variable name.
        env: &'static str,
        /// Supplied value.
        value: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },
    /// Only http and https targets are supported.
    #[error("unsupported URL scheme {scheme:?} for {env}; expected http or https")]
    UnsupportedScheme {
        /// Environment variable name.
        env: &'static str,
        /// Offending scheme.
        scheme: String,
    },
    /// The API key cannot be sent as an HTTP header.
    #[error("RESEND_API_KEY contains characters not allowed in an HTTP header")]
    InvalidApiKey,
    /// The recipient list contained no addresses.
    #[error("TO_EMAIL contains no recipient addresses")]
    NoRecipients,
    /// A zero timeout would never let a request finish.
    #[error("REQUEST_TIMEOUT must be at least one second")]
    ZeroTimeout,
}

/// The one page a run watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredTarget {
    url: Url,
    id: TargetId,
}

impl MonitoredTarget {
    /// Derives the target identifier from `url`.
    pub fn new(url: Url) -> Self {
        let id = TargetId::from_url(&url);
        Self { url, id }
    }

    /// Watched URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Identifier naming the target's state.
    pub fn id(&self) -> &TargetId {
        &self.id
    }

    /// Host name used in alert subjects, falling back to the whole URL.
    pub fn display_name(&self) -> &str {
        self.url.host_str().unwrap_or(self.url.as_str())
    }
}

/// Delivery settings for change alerts.
#[derive(Debug, Clone)]
pub struct NotifySettings {
    /// Bearer token for the notification service.
    pub api_key: String,
    /// Endpoint receiving the POST.
    pub endpoint: Url,
    /// Sender identity.
    pub from: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Subject prefix.
    pub subject_prefix: String,
}

/// Validated configuration for one run.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Page being watched.
    pub target: MonitoredTarget,
    /// Root directory for state files.
    pub state_dir: PathBuf,
    /// Bound applied to each HTTP call.
    pub timeout: Duration,
    /// Optional `User-Agent` override.
    pub user_agent: Option<String>,
    /// Alert delivery settings.
    pub notify: NotifySettings,
    /// Snapshot policy on failed delivery.
    pub on_notify_failure: NotifyFailurePolicy,
    /// Skip notification and persistence.
    pub dry_run: bool,
}

impl WatchConfig {
    /// Validates the parsed CLI.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let url = required(&cli.url, "WATCH_URL", "url")?;
        let api_key = required(&cli.api_key, "RESEND_API_KEY", "api-key")?;
        let to = required(&cli.to, "TO_EMAIL", "to")?;
        let from = required(&cli.from, "FROM_EMAIL", "from")?;

        if HeaderValue::from_str(&format!("Bearer {api_key}")).is_err() {
            return Err(ConfigError::InvalidApiKey);
        }
        let url = parse_http_url(url, "WATCH_URL")?;
        let endpoint = parse_http_url(&cli.notify_endpoint, "RESEND_ENDPOINT")?;
        let recipients = split_recipients(to);
        if recipients.is_empty() {
            return Err(ConfigError::NoRecipients);
        }
        if cli.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        let user_agent = cli
            .user_agent
            .as_deref()
            .map(str::trim)
            .filter(|ua| !ua.is_empty())
            .map(str::to_string);

        Ok(Self {
            target: MonitoredTarget::new(url),
            state_dir: cli.state_dir.clone(),
            timeout: Duration::from_secs(cli.timeout_secs),
            user_agent,
            notify: NotifySettings {
                api_key: api_key.to_string(),
                endpoint,
                from: from.to_string(),
                to: recipients,
                subject_prefix: cli.subject_prefix.trim().to_string(),
            },
            on_notify_failure: cli.on_notify_failure,
            dry_run: cli.dry_run,
        })
    }
}

fn required<'a>(
    value: &'a Option<String>,
    env: &'static str,
    flag: &'static str,
) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::Missing { env, flag })
}

fn parse_http_url(raw: &str, env: &'static str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl {
        env,
        value: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme {
            env,
            scheme: other.to_string(),
        }),
    }
}

fn split_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
