//! Failure classification and the per-record recovery state machine.

use crate::model::RecordIdentity;
use std::fmt;

/// How a failed attempt is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A bounded wait ran out while the session was otherwise healthy.
    TransientRenderTimeout,
    /// The view is not the one expected (wrong page, half-rendered detail form).
    StaleViewState,
    /// The session itself failed a call.
    SessionUnresponsive,
    /// The target row could not be found where it should be.
    RecordNotLocatable,
}

/// Why one extraction attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    #[error("render timeout: {0}")]
    RenderTimeout(String),

    #[error("stale view: {0}")]
    StaleView(String),

    #[error("session unresponsive: {0}")]
    Unresponsive(String),

    #[error("record not locatable: {0}")]
    NotLocatable(String),

    /// No forward control before the wanted page; the list has ended.
    #[error("no page after page {page}")]
    ExhaustedPages { page: u64 },

    /// An identity scan matched several rows and none was the expected one.
    #[error("{identity} matches rows {ordinals:?}")]
    AmbiguousIdentity {
        identity: RecordIdentity,
        ordinals: Vec<usize>,
    },
}

impl Failure {
    /// Recovery kind, `None` for failures that end the run.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::RenderTimeout(_) => Some(FailureKind::TransientRenderTimeout),
            Self::StaleView(_) => Some(FailureKind::StaleViewState),
            Self::Unresponsive(_) => Some(FailureKind::SessionUnresponsive),
            Self::NotLocatable(_) => Some(FailureKind::RecordNotLocatable),
            Self::ExhaustedPages { .. } | Self::AmbiguousIdentity { .. } => None,
        }
    }
}

impl From<crate::Error> for Failure {
    /// A missing control means the view moved on; anything else from the
    /// session means the session itself is in trouble.
    fn from(e: crate::Error) -> Self {
        match e {
            crate::Error::ControlNotFound(control) => {
                Self::NotLocatable(format!("control {} not found", control))
            }
            other => Self::Unresponsive(other.to_string()),
        }
    }
}

/// Where a record's extraction stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Working,
    RetryInPlace,
    Renavigate,
    RestartSession,
    Aborted,
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Working => "working",
            Self::RetryInPlace => "retry-in-place",
            Self::Renavigate => "renavigate",
            Self::RestartSession => "restart-session",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Next state after the `failures`-th failure of one record.
///
/// `budget` is the number of recoveries a record may use; the failure after
/// that aborts.
pub fn transition(
    state: RecoveryState,
    kind: FailureKind,
    failures: u32,
    budget: u32,
) -> RecoveryState {
    use FailureKind::*;
    use RecoveryState::*;

    if state == Aborted || failures > budget {
        return Aborted;
    }
    match (state, kind) {
        (_, SessionUnresponsive) => RestartSession,
        (Working, TransientRenderTimeout) => RetryInPlace,
        (Working, StaleViewState | RecordNotLocatable) => Renavigate,
        (RetryInPlace, _) => Renavigate,
        (Renavigate, TransientRenderTimeout) => Renavigate,
        (Renavigate, StaleViewState | RecordNotLocatable) => RestartSession,
        (RestartSession, _) => RestartSession,
        (Aborted, _) => Aborted,
    }
}

/// Tracks one record through [`transition`].
#[derive(Debug)]
pub struct RecoveryController {
    state: RecoveryState,
    failures: u32,
    budget: u32,
}

impl RecoveryController {
    pub fn new(budget: u32) -> Self {
        Self {
            state: RecoveryState::Working,
            failures: 0,
            budget,
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failure and move to the next state. Failures without a
    /// recovery kind abort.
    pub fn on_failure(&mut self, failure: &Failure) -> RecoveryState {
        self.failures += 1;
        self.state = match failure.kind() {
            Some(kind) => transition(self.state, kind, self.failures, self.budget),
            None => RecoveryState::Aborted,
        };
        self.state
    }

    /// A new session epoch is up; extraction starts over from the list.
    pub fn restarted(&mut self) {
        if self.state == RecoveryState::RestartSession {
            self.state = RecoveryState::Working;
        }
    }
}
