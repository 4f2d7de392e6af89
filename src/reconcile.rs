//! Strategies for noticing that an external authorization finished.
//!
//! Both strategies sit behind [`Reconciler`] so the state machine in
//! [`crate::linking`] does not care which one is in use:
//!
//! - [`PollingReconciler`] re-fetches status on a fixed interval until the
//!   provider shows `connected = true` or the attempt budget runs out.
//! - [`ManualReconciler`] does nothing on its own; the user refreshes.
//!
//! Every report is tagged with the attempt id it was started for. Once the
//! [`CancellationToken`] fires no further report is sent, including for a
//! fetch that was already in flight.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{LinkingConfig, Strategy};
use crate::contract::{ConnectionStatus, Provider};
use crate::error::{ClientError, ClientResult};

/// Anything that can produce a fresh connection status snapshot.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self) -> ClientResult<ConnectionStatus>;
}

#[derive(Debug)]
pub enum PollReport {
    Status {
        provider: Provider,
        attempt: Uuid,
        tick: u32,
        status: ConnectionStatus,
    },
    Failed {
        provider: Provider,
        attempt: Uuid,
        tick: u32,
        error: ClientError,
    },
    Exhausted {
        provider: Provider,
        attempt: Uuid,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Connected,
    Exhausted,
    Cancelled,
    /// Nothing was done; status must be refreshed by the user.
    Deferred,
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn run(
        &self,
        provider: Provider,
        attempt: Uuid,
        source: &dyn StatusSource,
        cancel: CancellationToken,
        reports: mpsc::UnboundedSender<PollReport>,
    ) -> ReconcileOutcome;

    /// Whether the user has to refresh manually.
    fn is_manual(&self) -> bool {
        false
    }
}

pub fn build_reconciler(config: &LinkingConfig) -> Box<dyn Reconciler> {
    match config.strategy {
        Strategy::Poll => Box::new(PollingReconciler::new(
            config.poll_interval(),
            config.max_poll_attempts,
        )),
        Strategy::Manual => Box::new(ManualReconciler),
    }
}

pub struct PollingReconciler {
    interval: Duration,
    max_attempts: u32,
}

impl PollingReconciler {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

#[async_trait]
impl Reconciler for PollingReconciler {
    async fn run(
        &self,
        provider: Provider,
        attempt: Uuid,
        source: &dyn StatusSource,
        cancel: CancellationToken,
        reports: mpsc::UnboundedSender<PollReport>,
    ) -> ReconcileOutcome {
        for tick in 1..=self.max_attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return ReconcileOutcome::Cancelled,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ReconcileOutcome::Cancelled,
                result = source.fetch_status() => result,
            };

            if cancel.is_cancelled() {
                return ReconcileOutcome::Cancelled;
            }

            match result {
                Ok(status) => {
                    let connected = status.is_connected(provider);
                    tracing::debug!(%provider, tick, connected, "poll tick");
                    let _ = reports.send(PollReport::Status {
                        provider,
                        attempt,
                        tick,
                        status,
                    });
                    if connected {
                        return ReconcileOutcome::Connected;
                    }
                }
                Err(error) => {
                    tracing::warn!(%provider, tick, error = %error, "poll tick failed");
                    let _ = reports.send(PollReport::Failed {
                        provider,
                        attempt,
                        tick,
                        error,
                    });
                }
            }
        }

        let _ = reports.send(PollReport::Exhausted { provider, attempt });
        ReconcileOutcome::Exhausted
    }
}

pub struct ManualReconciler;

#[async_trait]
impl Reconciler for ManualReconciler {
    async fn run(
        &self,
        _provider: Provider,
        _attempt: Uuid,
        _source: &dyn StatusSource,
        _cancel: CancellationToken,
        _reports: mpsc::UnboundedSender<PollReport>,
    ) -> ReconcileOutcome {
        ReconcileOutcome::Deferred
    }

    fn is_manual(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ProviderConnection;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Reports `connected` for slack from the `connect_on`-th fetch onward.
    struct Scripted {
        calls: AtomicU32,
        connect_on: u32,
        delay: Duration,
    }

    #[async_trait]
    impl StatusSource for Scripted {
        async fn fetch_status(&self) -> ClientResult<ConnectionStatus> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            let mut status = ConnectionStatus::all_disconnected();
            status.providers.insert(
                Provider::Slack,
                ProviderConnection {
                    connected: n >= self.connect_on,
                    workspace: None,
                },
            );
            Ok(status)
        }
    }

    fn scripted(connect_on: u32, delay_ms: u64) -> Scripted {
        Scripted {
            calls: AtomicU32::new(0),
            connect_on,
            delay: Duration::from_millis(delay_ms),
        }
    }

    #[tokio::test]
    async fn test_polls_until_connected() {
        let source = scripted(3, 0);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let poller = PollingReconciler::new(Duration::from_millis(5), 10);
        let id = Uuid::new_v4();

        let outcome = poller
            .run(Provider::Slack, id, &source, CancellationToken::new(), tx)
            .await;
        assert_eq!(outcome, ReconcileOutcome::Connected);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);

        let mut ticks = 0;
        while let Ok(report) = rx.try_recv() {
            match report {
                PollReport::Status { attempt, .. } => {
                    assert_eq!(attempt, id);
                    ticks += 1;
                }
                other => panic!("unexpected report {:?}", other),
            }
        }
        assert_eq!(ticks, 3);
    }

    #[tokio::test]
    async fn test_stops_after_max_attempts() {
        let source = scripted(u32::MAX, 0);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let poller = PollingReconciler::new(Duration::from_millis(1), 4);

        let outcome = poller
            .run(Provider::Slack, Uuid::new_v4(), &source, CancellationToken::new(), tx)
            .await;
        assert_eq!(outcome, ReconcileOutcome::Exhausted);
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);

        let mut last = None;
        while let Ok(report) = rx.try_recv() {
            last = Some(report);
        }
        assert!(matches!(last, Some(PollReport::Exhausted { .. })));
    }

    #[tokio::test]
    async fn test_cancel_during_inflight_fetch_sends_nothing() {
        let source = scripted(1, 200);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let poller = PollingReconciler::new(Duration::from_millis(1), 5);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = poller
            .run(Provider::Slack, Uuid::new_v4(), &source, cancel, tx)
            .await;
        assert_eq!(outcome, ReconcileOutcome::Cancelled);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_manual_defers() {
        let source = scripted(1, 0);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = ManualReconciler
            .run(Provider::Drive, Uuid::new_v4(), &source, CancellationToken::new(), tx)
            .await;
        assert_eq!(outcome, ReconcileOutcome::Deferred);
        assert!(ManualReconciler.is_manual());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert!(rx.try_recv().is_err());
    }
}
