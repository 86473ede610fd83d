#![warn(missing_docs)]
//! Core library for pagewatch: detect changes on a single web page and alert on them.
//!
//! A run fetches the page, reduces it to stable plain text, fingerprints it, compares against the
//! snapshot stored by the previous run and, when the text moved, e-mails a line diff before
//! persisting the new snapshot.

pub mod config;
pub mod diff;
pub mod fetcher;
pub mod fingerprint;
pub mod normalizer;
pub mod notifier;
pub mod pipeline;
pub mod state;

pub use config::{
    Cli, ConfigError, MonitoredTarget, NotifyFailurePolicy, NotifySettings, WatchConfig,
};
pub use diff::{diff_lines, ChangeKind, DiffLine, DiffResult, DiffStats};
pub use fetcher::{FetchError, FetchedPage, HttpFetcher, PageFetcher};
pub use fingerprint::{fingerprint, Digest};
pub use normalizer::{normalize, NormalizationError};
pub use notifier::{NotificationPayload, Notifier, NotifyError, ResendNotifier};
pub use pipeline::{Delivery, RunOutcome, Stage, WatchError, Watcher};
pub use state::{FsStateStore, MemoryStateStore, Snapshot, StateError, StateStore, TargetId};
