//! One watch run: fetch, normalize, compare, diff, notify, persist.

use crate::config::{ConfigError, NotifyFailurePolicy, WatchConfig};
use crate::diff::{diff_lines, DiffResult, DiffStats};
use crate::fetcher::{FetchError, PageFetcher};
use crate::fingerprint::Digest;
use crate::normalizer::{normalize, NormalizationError};
use crate::notifier::{NotificationPayload, Notifier, NotifyError};
use crate::state::{Snapshot, StateError, StateStore};
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

/// Pipeline steps, recorded on log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Downloading the page.
    Fetching,
    /// Reducing markup to text.
    Normalizing,
    /// Loading the previous snapshot.
    Comparing,
    /// First observation; storing the baseline.
    Seeding,
    /// Computing the line diff.
    Diffing,
    /// Sending the alert.
    Notifying,
    /// Writing the new snapshot.
    Persisting,
}

/// Fatal run errors. Nothing is persisted when one of these is returned.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Invalid or missing configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The page could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The page body is not markup.
    #[error("failed to parse page: {0}")]
    Parse(#[from] NormalizationError),
    /// State could not be read or written.
    #[error(transparent)]
    State(#[from] StateError),
    /// The notification client could not be set up.
    #[error(transparent)]
    NotifierSetup(NotifyError),
}

impl WatchError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            _ => 1,
        }
    }
}

/// What happened to the alert for a detected change.
#[derive(Debug)]
pub enum Delivery {
    /// The service accepted the alert; its response is attached.
    Sent(Value),
    /// Delivery failed. Reported, never fatal.
    Failed(NotifyError),
    /// Dry run; nothing was sent.
    Skipped,
}

/// Result of a successful run.
#[derive(Debug)]
pub enum RunOutcome {
    /// No previous state existed; the current snapshot is the new baseline.
    Seeded {
        /// Baseline snapshot.
        snapshot: Snapshot,
        /// False in dry-run mode.
        persisted: bool,
    },
    /// Content is identical to the stored snapshot.
    Unchanged {
        /// Shared digest.
        digest: Digest,
    },
    /// Content changed since the stored snapshot.
    Changed {
        /// Line diff previous → current.
        diff: DiffResult,
        /// Added/removed counts.
        stats: DiffStats,
        /// Alert result.
        delivery: Delivery,
        /// Whether the new snapshot replaced the old one.
        persisted: bool,
    },
}

/// Runs the watch pipeline for one configured target.
pub struct Watcher<F, S, N> {
    config: WatchConfig,
    fetcher: F,
    store: S,
    notifier: N,
}

impl<F, S, N> Watcher<F, S, N>
where
    F: PageFetcher,
    S: StateStore,
    N: Notifier,
{
    /// Wires the pipeline collaborators together.
    pub fn new(config: WatchConfig, fetcher: F, store: S, notifier: N) -> Self {
        Self {
            config,
            fetcher,
            store,
            notifier,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// State backend.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Alert channel.
    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Executes one run.
    pub fn run(&self) -> Result<RunOutcome, WatchError> {
        let target = &self.config.target;
        let span = tracing::info_span!("watch", target_id = %target.id(), url = %target.url());
        let _guard = span.enter();

        tracing::debug!(stage = ?Stage::Fetching, "fetching page");
        let page = self.fetcher.fetch(target.url())?;

        tracing::debug!(stage = ?Stage::Normalizing, bytes = page.body.len(), "normalizing");
        let text = normalize(&page.body)?;
        let current = Snapshot::capture(text, page.fetched_at);

        tracing::debug!(stage = ?Stage::Comparing, digest = %current.digest, "loading previous snapshot");
        let Some(previous) = self.store.load(target.id())? else {
            return self.seed(current);
        };

        if previous.digest == current.digest {
            tracing::info!(digest = %current.digest, "content unchanged");
            return Ok(RunOutcome::Unchanged {
                digest: current.digest,
            });
        }

        tracing::debug!(stage = ?Stage::Diffing, "digests differ");
        let diff = diff_lines(&previous.normalized_text, &current.normalized_text);
        let stats = diff.stats();
        if diff.is_unchanged() {
            // Same lines, different bytes; refresh silently.
            if !self.config.dry_run {
                self.persist(&current)?;
            }
            return Ok(RunOutcome::Unchanged {
                digest: current.digest,
            });
        }
        tracing::info!(added = stats.added, removed = stats.removed, "change detected");

        if self.config.dry_run {
            return Ok(RunOutcome::Changed {
                diff,
                stats,
                delivery: Delivery::Skipped,
                persisted: false,
            });
        }

        tracing::debug!(stage = ?Stage::Notifying, recipients = self.config.notify.to.len(), "sending alert");
        let payload =
            NotificationPayload::for_change(target, &self.config.notify, &diff, Utc::now());
        let delivery = match self.notifier.notify(&payload) {
            Ok(response) => Delivery::Sent(response),
            Err(err) => {
                tracing::warn!(error = %err, "alert delivery failed");
                Delivery::Failed(err)
            }
        };

        let persisted = match (&delivery, self.config.on_notify_failure) {
            (Delivery::Failed(_), NotifyFailurePolicy::Retain) => {
                tracing::info!("keeping previous snapshot so the change is reported again");
                false
            }
            _ => {
                self.persist(&current)?;
                true
            }
        };

        Ok(RunOutcome::Changed {
            diff,
            stats,
            delivery,
            persisted,
        })
    }

    fn seed(&self, snapshot: Snapshot) -> Result<RunOutcome, WatchError> {
        tracing::debug!(stage = ?Stage::Seeding, "no previous snapshot");
        let persisted = !self.config.dry_run;
        if persisted {
            self.persist(&snapshot)?;
        }
        Ok(RunOutcome::Seeded {
            snapshot,
            persisted,
        })
    }

    fn persist(&self, snapshot: &Snapshot) -> Result<(), WatchError> {
        tracing::debug!(stage = ?Stage::Persisting, digest = %snapshot.digest, "saving snapshot");
        self.store.save(self.config.target.id(), snapshot)?;
        Ok(())
    }
}
