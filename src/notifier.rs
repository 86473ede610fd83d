//! Change alerts delivered through an HTTP e-mail API.

use crate::config::{MonitoredTarget, NotifySettings};
use crate::diff::{DiffResult, DEFAULT_CONTEXT, DEFAULT_MAX_LINES};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// One alert, ready to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    /// Sender identity.
    pub from: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// HTML body with the coloured diff.
    pub html: String,
    /// Plain-text body with the unified diff.
    pub text: String,
    /// Page the alert is about.
    #[serde(skip)]
    pub url: Url,
}

impl NotificationPayload {
    /// Builds the alert for `diff` detected on `target` at `detected_at`.
    pub fn for_change(
        target: &MonitoredTarget,
        settings: &NotifySettings,
        diff: &DiffResult,
        detected_at: DateTime<Utc>,
    ) -> Self {
        let url = target.url();
        let timestamp = detected_at.format("%Y-%m-%d %H:%M:%S UTC").to_string();
        let subject = format!(
            "{} Change detected on {} @ {}",
            settings.subject_prefix,
            target.display_name(),
            timestamp
        )
        .trim_start()
        .to_string();

        let stats = diff.stats();
        let escaped_url = html_escape::encode_double_quoted_attribute(url.as_str());
        let html = format!(
            concat!(
                "<div>\n",
                "  <p>Change detected on <a href=\"{href}\">{label}</a> at {ts}.</p>\n",
                "  <p><strong>{added} added, {removed} removed</strong> (previous &rarr; current):</p>\n",
                "  {diff}\n",
                "</div>\n"
            ),
            href = escaped_url,
            label = html_escape::encode_text(url.as_str()),
            ts = html_escape::encode_text(&timestamp),
            added = stats.added,
            removed = stats.removed,
            diff = diff.html(DEFAULT_CONTEXT, DEFAULT_MAX_LINES),
        );
        let text = format!(
            "Change detected on {url} at {timestamp}.\n\nUnified diff (previous -> current):\n\n{}",
            diff.unified(DEFAULT_CONTEXT, DEFAULT_MAX_LINES)
        );

        Self {
            from: settings.from.clone(),
            to: settings.to.clone(),
            subject,
            html,
            text,
            url: url.clone(),
        }
    }
}

/// Errors surfaced while delivering an alert.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The HTTP client could not be constructed.
    #[error("failed to build notification client: {0}")]
    Client(String),
    /// Connection failure or timeout.
    #[error("notification request failed: {0}")]
    Transport(#[source] reqwest::Error),
    /// The service answered with a non-success status.
    #[error("notification service returned {status}: {body}")]
    Rejected {
        /// Response status.
        status: StatusCode,
        /// Response body, verbatim.
        body: String,
    },
}

/// Delivery channel for change alerts.
pub trait Notifier {
    /// Sends `payload` once and returns the service's response.
    fn notify(&self, payload: &NotificationPayload) -> Result<Value, NotifyError>;
}

/// Resend-style `POST /emails` client.
#[derive(Clone)]
pub struct ResendNotifier {
    client: Client,
    endpoint: Url,
}

impl ResendNotifier {
    /// Builds a client authenticating with `api_key` against `endpoint`.
    pub fn new(api_key: &str, endpoint: Url, timeout: Duration) -> Result<Self, NotifyError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        let auth = HeaderValue::from_str(&auth)
            .map_err(|_| NotifyError::Client("invalid API key".to_string()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| NotifyError::Client(err.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    text: &'a str,
}

fn is_blank(text: &&str) -> bool {
    text.is_empty()
}

impl Notifier for ResendNotifier {
    fn notify(&self, payload: &NotificationPayload) -> Result<Value, NotifyError> {
        let request = EmailRequest {
            from: &payload.from,
            to: &payload.to,
            subject: &payload.subject,
            html: &payload.html,
            text: &payload.text,
        };
        let resp = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .map_err(NotifyError::Transport)?;

        let status = resp.status();
        let body = resp
            .text()
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        if !status.is_success() {
            return Err(NotifyError::Rejected { status, body });
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}
