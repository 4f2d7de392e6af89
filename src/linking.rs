//! Connection-linking state machine.
//!
//! ```text
//!            fetch                      connect (browser opened)
//! Unknown ─────────▶ Connected ◀──────────────────────┐
//!    │               Disconnected ──▶ AuthorizingExternally
//!    └─────────────▶      ▲                │
//!                         └── exhausted ───┘ (poll / refresh sees connected
//!                                             ──▶ Connected)
//! ```
//!
//! OAuth completes in a browser tab the client cannot observe, so
//! completion is only ever inferred from a later status fetch. The machine
//! is pure: callers feed it status snapshots and poll outcomes tagged with
//! the attempt id they were started for. At most one attempt per provider
//! is tracked; starting another supersedes it, and anything reported for a
//! superseded or abandoned attempt is ignored.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::contract::{ConnectionStatus, Provider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttemptState {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationAttempt {
    pub id: Uuid,
    pub provider: Provider,
    pub state: AttemptState,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Unknown,
    Connected { workspace: Option<String> },
    Disconnected,
    AuthorizingExternally(AuthorizationAttempt),
}

impl LinkState {
    pub fn label(&self) -> &'static str {
        match self {
            LinkState::Unknown => "unknown",
            LinkState::Connected { .. } => "connected",
            LinkState::Disconnected => "disconnected",
            LinkState::AuthorizingExternally(_) => "authorizing",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected { .. })
    }

    pub fn attempt(&self) -> Option<&AuthorizationAttempt> {
        match self {
            LinkState::AuthorizingExternally(a) => Some(a),
            _ => None,
        }
    }
}

/// A state change, reported so the view can re-render and log it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub provider: Provider,
    pub from: &'static str,
    pub to: &'static str,
}

#[derive(Debug)]
pub struct Linker {
    states: BTreeMap<Provider, LinkState>,
    /// Last resolved attempt per provider, for showing the outcome.
    outcomes: BTreeMap<Provider, AuthorizationAttempt>,
}

impl Default for Linker {
    fn default() -> Self {
        Self::new()
    }
}

impl Linker {
    pub fn new() -> Self {
        Self {
            states: Provider::ALL
                .iter()
                .map(|p| (*p, LinkState::Unknown))
                .collect(),
            outcomes: BTreeMap::new(),
        }
    }

    pub fn state(&self, provider: Provider) -> &LinkState {
        &self.states[&provider]
    }

    pub fn states(&self) -> impl Iterator<Item = (Provider, &LinkState)> {
        self.states.iter().map(|(p, s)| (*p, s))
    }

    pub fn outcome(&self, provider: Provider) -> Option<&AuthorizationAttempt> {
        self.outcomes.get(&provider)
    }

    /// Whether a status report for `attempt` would still be applied.
    pub fn is_current_attempt(&self, provider: Provider, attempt: Uuid) -> bool {
        self.state(provider).attempt().map(|a| a.id) == Some(attempt)
    }

    /// Apply a full status snapshot (page load, refresh, manual reconcile).
    ///
    /// Providers mid-authorization move to `Connected` only when the
    /// snapshot says so; a `false` leaves the attempt outstanding.
    pub fn apply_status(&mut self, status: &ConnectionStatus) -> Vec<Transition> {
        let mut transitions = Vec::new();
        for provider in Provider::ALL {
            let connection = status.get(provider);
            let next = match self.state(provider) {
                LinkState::AuthorizingExternally(_) if !connection.connected => continue,
                _ if connection.connected => LinkState::Connected {
                    workspace: connection.workspace.clone(),
                },
                _ => LinkState::Disconnected,
            };
            if let Some(t) = self.set(provider, next, AttemptState::Completed) {
                transitions.push(t);
            }
        }
        transitions
    }

    /// Record that the browser was opened for `provider`.
    ///
    /// Only call this after the authorize URL was obtained and handed to the
    /// browser; a failure before that point must leave the state alone.
    pub fn begin_authorization(
        &mut self,
        provider: Provider,
        opened_at: DateTime<Utc>,
    ) -> (AuthorizationAttempt, Transition) {
        if let Some(old) = self.state(provider).attempt() {
            tracing::info!(%provider, attempt = %old.id, "superseding outstanding authorization");
        }
        let attempt = AuthorizationAttempt {
            id: Uuid::new_v4(),
            provider,
            state: AttemptState::Pending,
            opened_at,
        };
        let from = self.state(provider).label();
        self.states
            .insert(provider, LinkState::AuthorizingExternally(attempt.clone()));
        let transition = Transition {
            provider,
            from,
            to: "authorizing",
        };
        tracing::info!(%provider, from, to = "authorizing", "link state");
        (attempt, transition)
    }

    /// Apply one poll tick's status for `attempt`.
    pub fn apply_poll(
        &mut self,
        provider: Provider,
        attempt: Uuid,
        status: &ConnectionStatus,
    ) -> Option<Transition> {
        if !self.is_current_attempt(provider, attempt) {
            tracing::warn!(%provider, %attempt, "ignoring poll result for superseded attempt");
            return None;
        }
        let connection = status.get(provider);
        if !connection.connected {
            return None;
        }
        self.set(
            provider,
            LinkState::Connected {
                workspace: connection.workspace.clone(),
            },
            AttemptState::Completed,
        )
    }

    /// Polling gave up without seeing `connected = true`.
    pub fn poll_exhausted(&mut self, provider: Provider, attempt: Uuid) -> Option<Transition> {
        if !self.is_current_attempt(provider, attempt) {
            return None;
        }
        self.set(provider, LinkState::Disconnected, AttemptState::Failed)
    }

    /// The user stopped waiting. The attempt is dropped; a later refresh
    /// can still observe a completed authorization.
    pub fn abandon(&mut self, provider: Provider) -> Option<Transition> {
        self.state(provider).attempt()?;
        self.set(provider, LinkState::Disconnected, AttemptState::Failed)
    }

    /// Explicit user disconnect.
    pub fn mark_disconnected(&mut self, provider: Provider) -> Option<Transition> {
        self.set(provider, LinkState::Disconnected, AttemptState::Failed)
    }

    fn set(
        &mut self,
        provider: Provider,
        next: LinkState,
        resolution: AttemptState,
    ) -> Option<Transition> {
        let previous = self.states.insert(provider, next.clone())?;
        if let LinkState::AuthorizingExternally(mut attempt) = previous.clone() {
            if !matches!(next, LinkState::AuthorizingExternally(_)) {
                attempt.state = resolution;
                self.outcomes.insert(provider, attempt);
            }
        }
        if previous == next {
            return None;
        }
        let transition = Transition {
            provider,
            from: previous.label(),
            to: next.label(),
        };
        tracing::info!(%provider, from = transition.from, to = transition.to, "link state");
        Some(transition)
    }
}
