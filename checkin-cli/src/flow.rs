//! Capture-and-submit flow.
//!
//! ```text
//! INITIAL ─▶ PROCESSING ─▶ (SYNCING) ─▶ GRANTED
//!                 │
//!                 └──────▶ DENIED ─▶ PROCESSING (retry)
//! ```
//!
//! Capture failures are user-actionable and end in DENIED with a remediation
//! message. Submission failures are an infrastructure concern: under the
//! default `swallow` policy the flow still ends in GRANTED, and the failure is
//! only visible in logs and `SubmissionStats`.
//!
//! Every `request_capture()` starts a new attempt. State updates from an older
//! attempt are dropped, so a superseded capture never changes what is shown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use checkin_core::config::{ErrorPolicy, FlowConfig, SyncMode};
use checkin_core::{CapturedPoint, GeoPoint, SubmissionPayload};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::host::{GeolocationHost, HostError, PositionOptions};
use crate::submit::{HttpSubmitter, LocationSink, SubmissionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Initial,
    Processing,
    Syncing,
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    UnsupportedEnvironment,
    PermissionDenied,
    PositionUnavailable,
    Timeout,
    /// Only reported under `ErrorPolicy::Surface`.
    SubmissionFailure,
}

impl FailureKind {
    pub fn message(&self) -> &'static str {
        match self {
            FailureKind::UnsupportedEnvironment => {
                "Location services are not available on this device. \
                 Try again from a browser or device that supports geolocation."
            }
            FailureKind::PermissionDenied => {
                "Location access was denied. Enable location permission for this site \
                 in your browser settings, then try again."
            }
            FailureKind::PositionUnavailable => {
                "Your position could not be determined. Make sure GPS or location \
                 services are turned on, then try again."
            }
            FailureKind::Timeout => {
                "Finding your location took too long. Move somewhere with a clearer \
                 view of the sky or a stronger signal, then try again."
            }
            FailureKind::SubmissionFailure => {
                "Your location was captured but could not be saved. Please try again."
            }
        }
    }

    /// Whether retrying from the same client can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::UnsupportedEnvironment)
    }
}

impl From<HostError> for FailureKind {
    fn from(e: HostError) -> Self {
        match e {
            HostError::PermissionDenied => FailureKind::PermissionDenied,
            HostError::PositionUnavailable => FailureKind::PositionUnavailable,
            HostError::Timeout => FailureKind::Timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<FailureKind> for FlowFailure {
    fn from(kind: FailureKind) -> Self {
        Self {
            kind,
            message: kind.message().to_string(),
        }
    }
}

/// What the UI renders from.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSnapshot {
    /// Attempt that produced this snapshot; 0 before the first capture.
    pub attempt: u64,
    pub state: FlowState,
    pub failure: Option<FlowFailure>,
    pub point: Option<GeoPoint>,
}

impl FlowSnapshot {
    fn initial() -> Self {
        Self {
            attempt: 0,
            state: FlowState::Initial,
            failure: None,
            point: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Granted {
        point: GeoPoint,
        /// Set when the write was awaited and the endpoint reported an id.
        record_id: Option<String>,
    },
    Denied(FlowFailure),
    /// A newer `request_capture()` took over before this one finished.
    Superseded,
}

/// Counts of delivered and failed submissions. Failed ones are otherwise
/// invisible to the user.
#[derive(Debug, Default)]
pub struct SubmissionStats {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl SubmissionStats {
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Buffered transitions per subscriber before a slow reader starts lagging.
const TRANSITION_BUFFER: usize = 16;

struct Shared {
    state: watch::Sender<FlowSnapshot>,
    transitions: broadcast::Sender<FlowSnapshot>,
    attempt: AtomicU64,
    stats: SubmissionStats,
}

impl Shared {
    fn is_current(&self, attempt: u64) -> bool {
        self.attempt.load(Ordering::SeqCst) == attempt
    }

    /// Apply a snapshot unless a newer attempt has already published.
    fn publish(
        &self,
        attempt: u64,
        state: FlowState,
        failure: Option<FlowFailure>,
        point: Option<GeoPoint>,
    ) {
        let next = FlowSnapshot {
            attempt,
            state,
            failure,
            point,
        };
        let applied = self.state.send_if_modified(|snap| {
            if snap.attempt > attempt {
                return false;
            }
            *snap = next.clone();
            true
        });
        if applied {
            // No subscribers is fine.
            let _ = self.transitions.send(next);
        }
    }
}

pub struct CaptureFlow {
    host: Option<Arc<dyn GeolocationHost>>,
    sink: Arc<dyn LocationSink>,
    config: FlowConfig,
    client_context: String,
    shared: Arc<Shared>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl CaptureFlow {
    /// `host` is `None` when the environment has no geolocation capability.
    pub fn new(
        host: Option<Arc<dyn GeolocationHost>>,
        sink: Arc<dyn LocationSink>,
        config: FlowConfig,
    ) -> Self {
        let (state, _) = watch::channel(FlowSnapshot::initial());
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        Self {
            host,
            sink,
            config,
            client_context: format!(
                "checkin-cli/{} ({})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS
            ),
            shared: Arc::new(Shared {
                state,
                transitions,
                attempt: AtomicU64::new(0),
                stats: SubmissionStats::default(),
            }),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Flow that submits over HTTP to `config.endpoint`.
    pub fn from_config(
        host: Option<Arc<dyn GeolocationHost>>,
        config: FlowConfig,
    ) -> Result<Self, SubmissionError> {
        let sink = HttpSubmitter::new(
            config.endpoint.clone(),
            Duration::from_millis(config.submit_timeout_ms),
        )?;
        Ok(Self::new(host, Arc::new(sink), config))
    }

    pub fn with_client_context(mut self, client_context: impl Into<String>) -> Self {
        self.client_context = client_context.into();
        self
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FlowSnapshot> {
        self.shared.state.subscribe()
    }

    /// Every applied state change, in order. Unlike `subscribe()`, fast
    /// successive states are not coalesced.
    pub fn transitions(&self) -> broadcast::Receiver<FlowSnapshot> {
        self.shared.transitions.subscribe()
    }

    pub fn submission_stats(&self) -> &SubmissionStats {
        &self.shared.stats
    }

    pub fn position_options(&self) -> PositionOptions {
        PositionOptions {
            high_accuracy: self.config.high_accuracy,
            timeout: Duration::from_millis(self.config.capture_timeout_ms),
            maximum_age: Duration::ZERO,
        }
    }

    /// Start a capture attempt. Clears any prior failure and enters PROCESSING.
    pub async fn request_capture(&self) -> CaptureOutcome {
        let attempt = self.shared.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared
            .publish(attempt, FlowState::Processing, None, None);

        let Some(host) = &self.host else {
            return self.deny(attempt, FailureKind::UnsupportedEnvironment);
        };

        let options = self.position_options();
        tracing::debug!(attempt, host = host.name(), ?options, "Requesting position");

        // Bound the wait even if the host ignores its own timeout option.
        let result = tokio::time::timeout(options.timeout, host.current_position(&options))
            .await
            .unwrap_or(Err(HostError::Timeout));

        if !self.shared.is_current(attempt) {
            tracing::debug!(attempt, "Capture superseded by a newer request");
            return CaptureOutcome::Superseded;
        }

        match result {
            Ok(position) => {
                let captured = CapturedPoint {
                    latitude: position.latitude,
                    longitude: position.longitude,
                    accuracy: position.accuracy,
                    captured_at_ms: position.timestamp_ms,
                };
                self.submit_for(attempt, &captured).await
            }
            Err(e) => self.deny(attempt, FailureKind::from(e)),
        }
    }

    /// Build the payload for `point` and write it as part of the current attempt.
    pub async fn submit(&self, point: &CapturedPoint) -> CaptureOutcome {
        let attempt = self.shared.attempt.load(Ordering::SeqCst);
        self.submit_for(attempt, point).await
    }

    /// Wait for background submissions started so far.
    pub async fn drain(&self) {
        let handles: Vec<_> = match self.background.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return,
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn deny(&self, attempt: u64, kind: FailureKind) -> CaptureOutcome {
        let failure = FlowFailure::from(kind);
        tracing::info!(attempt, kind = ?kind, "Location capture failed");
        self.shared
            .publish(attempt, FlowState::Denied, Some(failure.clone()), None);
        CaptureOutcome::Denied(failure)
    }

    async fn submit_for(&self, attempt: u64, point: &CapturedPoint) -> CaptureOutcome {
        let payload =
            SubmissionPayload::from_capture(point, &self.config.subject_id, &self.client_context);
        let geo = payload.point;
        let policy = self.config.error_policy;

        match self.config.sync_mode {
            SyncMode::Background => {
                self.shared
                    .publish(attempt, FlowState::Granted, None, Some(geo));

                let sink = self.sink.clone();
                let shared = self.shared.clone();
                let handle = tokio::spawn(async move {
                    let result = deliver(sink.as_ref(), &payload, &shared.stats).await;
                    if result.is_err() && policy == ErrorPolicy::Surface {
                        shared.publish(
                            attempt,
                            FlowState::Denied,
                            Some(FailureKind::SubmissionFailure.into()),
                            Some(geo),
                        );
                    }
                });
                if let Ok(mut pending) = self.background.lock() {
                    pending.retain(|h| !h.is_finished());
                    pending.push(handle);
                }

                CaptureOutcome::Granted {
                    point: geo,
                    record_id: None,
                }
            }
            SyncMode::Await => {
                self.shared
                    .publish(attempt, FlowState::Syncing, None, Some(geo));

                let result = deliver(self.sink.as_ref(), &payload, &self.shared.stats).await;

                if !self.shared.is_current(attempt) {
                    return CaptureOutcome::Superseded;
                }

                match result {
                    Err(_) if policy == ErrorPolicy::Surface => {
                        let failure = FlowFailure::from(FailureKind::SubmissionFailure);
                        self.shared.publish(
                            attempt,
                            FlowState::Denied,
                            Some(failure.clone()),
                            Some(geo),
                        );
                        CaptureOutcome::Denied(failure)
                    }
                    result => {
                        self.shared
                            .publish(attempt, FlowState::Granted, None, Some(geo));
                        CaptureOutcome::Granted {
                            point: geo,
                            record_id: result.ok().flatten(),
                        }
                    }
                }
            }
        }
    }
}

/// Send one payload and record the outcome. Failures are logged here and
/// nowhere else.
async fn deliver(
    sink: &dyn LocationSink,
    payload: &SubmissionPayload,
    stats: &SubmissionStats,
) -> Result<Option<String>, SubmissionError> {
    match sink.submit(payload).await {
        Ok(id) => {
            stats.succeeded.fetch_add(1, Ordering::SeqCst);
            tracing::info!(endpoint = sink.target(), id = ?id, "Location submitted");
            Ok(id)
        }
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(
                kind = e.kind(),
                endpoint = sink.target(),
                error = %e,
                "Location submission failed"
            );
            Err(e)
        }
    }
}
