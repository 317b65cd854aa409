//! The extraction loop.
//!
//! One record at a time: navigate to its page, locate its row, expand it,
//! emit it, advance the checkpoint. Failed attempts go through a
//! [`RecoveryController`] until the record succeeds or the run aborts.

mod expander;
mod locator;
mod navigator;
mod recovery;

pub use navigator::page_of;
pub use recovery::{transition, FailureKind, RecoveryState};

use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::model::{DetailFields, ListFields, Record, RecordIdentity};
use crate::session::{InteractiveSession, SessionFactory};
use crate::sink::CsvSink;
use crate::{Error, Result};
use expander::DetailExpander;
use navigator::{ListNavigator, ListPosition};
use recovery::{Failure, RecoveryController};
use std::collections::HashSet;
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Why a run stopped short.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// One record failed more often than the retry budget allows.
    RetryBudgetExceeded {
        position: u64,
        failures: u32,
        last: String,
    },
    /// A fresh session could not be brought to the list view.
    SessionRecreateFailed(String),
    /// Several rows carry the record's identity and none sits where the
    /// record should be.
    AmbiguousIdentity {
        position: u64,
        identity: RecordIdentity,
        rows: Vec<usize>,
    },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryBudgetExceeded {
                position,
                failures,
                last,
            } => write!(
                f,
                "record {} failed {} times, last: {}",
                position, failures, last
            ),
            Self::SessionRecreateFailed(msg) => {
                write!(f, "session could not be recreated: {}", msg)
            }
            Self::AmbiguousIdentity {
                position,
                identity,
                rows,
            } => write!(
                f,
                "record {}: {} appears at rows {:?}",
                position, identity, rows
            ),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every position of the configured range was processed.
    Completed,
    /// The list ended before the range did.
    ExhaustedPages { position: u64, page: u64 },
    Aborted(AbortReason),
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::ExhaustedPages { position, page } => write!(
                f,
                "list exhausted after page {} (next position {})",
                page, position
            ),
            Self::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

/// Summary of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Position the run started at (checkpoint or configured start).
    pub start_position: u64,
    /// Checkpoint value when the run ended.
    pub checkpoint: u64,
    /// Records written by this run.
    pub emitted: u64,
    /// Records found already written by an interrupted run.
    pub skipped_duplicates: u64,
    /// Recovery attempts across all records.
    pub retries: u32,
    /// Sessions discarded and recreated.
    pub restarts: u32,
    /// Forward page transitions issued.
    pub page_transitions: u64,
    pub duration_ms: u64,
}

impl RunReport {
    fn new(start: u64) -> Self {
        Self {
            outcome: RunOutcome::Completed,
            start_position: start,
            checkpoint: start,
            emitted: 0,
            skipped_duplicates: 0,
            retries: 0,
            restarts: 0,
            page_transitions: 0,
            duration_ms: 0,
        }
    }

    /// False only when the run aborted.
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, RunOutcome::Aborted(_))
    }
}

/// A live session and what the engine believes about its list view.
struct SessionState<S> {
    session: S,
    epoch: u32,
    at: ListPosition,
    /// The view may not match `at`; reset before navigating.
    dirty: bool,
}

/// Result of processing one position.
enum Step {
    Record(Record),
    Exhausted { page: u64 },
    Aborted(AbortReason),
}

/// What earlier attempts on the same record learned.
#[derive(Default)]
struct Attempt {
    identity: Option<RecordIdentity>,
    list: Option<ListFields>,
}

/// Drives a [`SessionFactory`]'s sessions through a configured list.
pub struct Engine<F: SessionFactory> {
    config: Config,
    factory: F,
    checkpoint: CheckpointStore,
    sink: CsvSink,
}

impl<F: SessionFactory> Engine<F> {
    /// Validate `config` and open its checkpoint and output.
    pub fn new(config: Config, factory: F) -> Result<Self> {
        config.validate()?;
        let checkpoint = CheckpointStore::new(config.output.checkpoint_path());
        let sink = CsvSink::open(&config.output.path, &config.output.unavailable)?;
        Ok(Self {
            config,
            factory,
            checkpoint,
            sink,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    pub fn sink(&self) -> &CsvSink {
        &self.sink
    }

    /// Process the configured range, resuming from the checkpoint.
    ///
    /// Returns `Err` only for local failures (checkpoint or output I/O);
    /// everything the source does wrong ends up in [`RunReport::outcome`].
    pub async fn run(&mut self) -> Result<RunReport> {
        let started = Instant::now();
        let plan = self.config.list.target_page_size();
        let configured = self.config.run.start_position(plan);
        let start = self.checkpoint.load_with_page_size(plan)?.max(configured);
        let end = self.config.run.end_position(configured, plan);
        let mut report = RunReport::new(start);

        if end.is_some_and(|end| start >= end) {
            info!("Nothing to do: checkpoint {} is past the range", start);
            report.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(report);
        }
        match end {
            Some(end) => info!(
                "Running '{}': positions {}..{} ({} per page)",
                self.config.name, start, end, plan
            ),
            None => info!(
                "Running '{}': from position {} to the end of the list",
                self.config.name, start
            ),
        }

        let mut state = match self.establish(1).await {
            Ok(state) => state,
            Err(reason) => {
                error!("{}", reason);
                report.outcome = RunOutcome::Aborted(reason);
                report.duration_ms = started.elapsed().as_millis() as u64;
                return Ok(report);
            }
        };

        let result = self.drive(&mut state, start, end, &mut report).await;
        report.page_transitions += state.at.transitions;
        if let Err(e) = state.session.close().await {
            warn!("Failed to close session: {}", e);
        }
        report.outcome = result?;
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Run {}: {} written, checkpoint {}, {} retries, {} restarts",
            report.outcome, report.emitted, report.checkpoint, report.retries, report.restarts
        );
        Ok(report)
    }

    async fn drive(
        &mut self,
        state: &mut SessionState<F::Session>,
        start: u64,
        end: Option<u64>,
        report: &mut RunReport,
    ) -> Result<RunOutcome> {
        let mut seen = HashSet::new();
        let mut position = start;
        loop {
            if end.is_some_and(|end| position >= end) {
                return Ok(RunOutcome::Completed);
            }
            match self.extract(state, position, report).await? {
                Step::Record(record) => {
                    let identity = record.identity();
                    if !seen.insert(identity.clone()) {
                        warn!("{} was already seen in this run", identity);
                    }
                    if position == start && self.sink.last_identity() == Some(&identity) {
                        warn!(
                            "{} is already the last row of {}; not writing it again",
                            identity,
                            self.sink.path().display()
                        );
                        report.skipped_duplicates += 1;
                    } else {
                        self.sink.emit(&record)?;
                        report.emitted = self.sink.emitted();
                    }
                    self.checkpoint.save(position + 1)?;
                    position += 1;
                    report.checkpoint = position;
                    info!(position = record.position, "Record written: {}", identity);
                }
                Step::Exhausted { page } => {
                    info!("No page after page {}; list ends before position {}", page, position);
                    return Ok(RunOutcome::ExhaustedPages { position, page });
                }
                Step::Aborted(reason) => {
                    error!("Aborting at position {}: {}", position, reason);
                    return Ok(RunOutcome::Aborted(reason));
                }
            }
        }
    }

    /// Extract the record at `position`, recovering until it succeeds or the
    /// retry budget runs out.
    async fn extract(
        &self,
        state: &mut SessionState<F::Session>,
        position: u64,
        report: &mut RunReport,
    ) -> Result<Step> {
        let mut ctl = RecoveryController::new(self.config.run.retry_budget);
        let mut attempt = Attempt::default();
        let mut last = String::new();
        loop {
            let result = match ctl.state() {
                RecoveryState::Working => {
                    self.navigate_and_read(state, position, &mut attempt, false)
                        .await
                }
                RecoveryState::RetryInPlace => {
                    self.retry_in_place(state, position, &mut attempt).await
                }
                RecoveryState::Renavigate => {
                    self.navigate_and_read(state, position, &mut attempt, true)
                        .await
                }
                RecoveryState::RestartSession => {
                    self.capture(&mut state.session).await;
                    if let Err(reason) = self.restart(state, report).await {
                        return Ok(Step::Aborted(reason));
                    }
                    self.check_resume(position)?;
                    ctl.restarted();
                    continue;
                }
                RecoveryState::Aborted => {
                    self.capture(&mut state.session).await;
                    return Ok(Step::Aborted(AbortReason::RetryBudgetExceeded {
                        position,
                        failures: ctl.failures(),
                        last,
                    }));
                }
            };

            let failure = match result {
                Ok(record) => return Ok(Step::Record(record)),
                Err(Failure::ExhaustedPages { page }) => return Ok(Step::Exhausted { page }),
                Err(Failure::AmbiguousIdentity { identity, ordinals }) => {
                    self.capture(&mut state.session).await;
                    return Ok(Step::Aborted(AbortReason::AmbiguousIdentity {
                        position,
                        identity,
                        rows: ordinals,
                    }));
                }
                Err(failure) => failure,
            };

            state.dirty = true;
            let next = ctl.on_failure(&failure);
            last = failure.to_string();
            if next == RecoveryState::Aborted {
                continue;
            }
            warn!(
                position,
                attempt = ctl.failures(),
                state = %next,
                "Attempt failed: {}",
                failure
            );
            report.retries += 1;
            tokio::time::sleep(self.config.run.retry_delay()).await;
        }
    }

    /// Put the list on the record's page and read the record. `reset`
    /// forces the list back to page 1 first.
    async fn navigate_and_read(
        &self,
        state: &mut SessionState<F::Session>,
        position: u64,
        attempt: &mut Attempt,
        reset: bool,
    ) -> std::result::Result<Record, Failure> {
        let nav = self.navigator();
        let (page, _) = page_of(position, state.at.page_size);
        if reset || state.dirty || state.at.page > page {
            self.reset_list(state).await?;
        }
        let (page, ordinal) = page_of(position, state.at.page_size);
        nav.goto_page(&mut state.session, &mut state.at, page).await?;
        self.read_row(state, position, page, ordinal, attempt).await
    }

    /// Retry without navigating: re-read an open detail view, or look for
    /// the row again on the current page.
    async fn retry_in_place(
        &self,
        state: &mut SessionState<F::Session>,
        position: u64,
        attempt: &mut Attempt,
    ) -> std::result::Result<Record, Failure> {
        let expander = self.expander();
        if expander.is_open(&mut state.session).await? {
            let Some(list) = attempt.list.clone() else {
                return Err(Failure::StaleView("detail view open for an unknown row".into()));
            };
            debug!("reloading detail view of {}", list.identity());
            state.session.refresh().await?;
            let detail = expander.read(&mut state.session).await?;
            return Ok(self.finish(state, position, list, detail).await);
        }

        let (page, ordinal) = page_of(position, state.at.page_size);
        if state.at.page != page {
            return Err(Failure::StaleView(format!(
                "list is on page {}, record {} is on page {}",
                state.at.page, position, page
            )));
        }
        self.read_row(state, position, page, ordinal, attempt).await
    }

    /// Locate the record on the current page, expand it and go back.
    async fn read_row(
        &self,
        state: &mut SessionState<F::Session>,
        position: u64,
        page: u64,
        ordinal: usize,
        attempt: &mut Attempt,
    ) -> std::result::Result<Record, Failure> {
        let nav = self.navigator();
        let locator = nav.locator();
        let rows = nav.rows(&mut state.session).await?;
        let located = match attempt.identity {
            Some(ref identity) => locator.by_identity(&rows, identity, ordinal)?,
            None => locator.by_ordinal(&rows, ordinal),
        };
        let Some(located) = located else {
            if attempt.identity.is_none()
                && !state.session.has_control(&self.config.list.next).await?
            {
                return Err(Failure::ExhaustedPages { page });
            }
            return Err(Failure::NotLocatable(format!(
                "record {} not on page {} ({} rows)",
                position,
                page,
                rows.len()
            )));
        };

        let list = locator.list_fields(located.row).ok_or_else(|| {
            Failure::StaleView(format!("row {} of page {} is incomplete", located.ordinal, page))
        })?;
        let control = locator.detail_control(located.row).ok_or_else(|| {
            Failure::NotLocatable(format!("{} has no detail control", list.identity()))
        })?;
        debug!(position, page, ordinal = located.ordinal, "located {}", list.identity());
        if attempt.identity.is_none() {
            attempt.identity = Some(list.identity());
        }
        attempt.list = Some(list.clone());

        let detail = self
            .expander()
            .expand(&mut state.session, &control)
            .await?;
        Ok(self.finish(state, position, list, detail).await)
    }

    /// Merge the record and return to the list. A failed return only marks
    /// the view dirty; the record itself is complete.
    async fn finish(
        &self,
        state: &mut SessionState<F::Session>,
        position: u64,
        list: ListFields,
        detail: DetailFields,
    ) -> Record {
        let identity = list.identity();
        let nav = self.navigator();
        match self
            .expander()
            .return_to_list(&mut state.session, &nav, &mut state.at, position, &identity)
            .await
        {
            Ok(()) => state.dirty = false,
            Err(e) => {
                warn!("Could not return to the list after {}: {}", identity, e);
                state.dirty = true;
            }
        }
        Record::new(position, list).with_detail(detail)
    }

    /// Bring the list back to page 1 and widen it again.
    async fn reset_list(
        &self,
        state: &mut SessionState<F::Session>,
    ) -> std::result::Result<(), Failure> {
        let nav = self.navigator();
        if self.expander().is_open(&mut state.session).await? {
            state.session.back().await?;
        }
        state.session.refresh().await?;
        nav.settle(&mut state.session).await?;
        nav.restore(&mut state.session, &mut state.at).await?;
        state.dirty = false;
        debug!("list reset (page size {})", state.at.page_size);
        Ok(())
    }

    /// Create a session and bring it to a widened list on page 1.
    async fn establish(
        &self,
        epoch: u32,
    ) -> std::result::Result<SessionState<F::Session>, AbortReason> {
        let mut session = self
            .factory
            .create()
            .await
            .map_err(|e| AbortReason::SessionRecreateFailed(e.to_string()))?;
        match self.prepare(&mut session).await {
            Ok(at) => {
                info!(epoch, page_size = at.page_size, "Session ready");
                Ok(SessionState {
                    session,
                    epoch,
                    at,
                    dirty: false,
                })
            }
            Err(failure) => {
                self.capture(&mut session).await;
                if let Err(e) = session.close().await {
                    debug!("close after failed setup: {}", e);
                }
                Err(AbortReason::SessionRecreateFailed(failure.to_string()))
            }
        }
    }

    async fn prepare(&self, session: &mut F::Session) -> std::result::Result<ListPosition, Failure> {
        let nav = self.navigator();
        let list = &self.config.list;
        let gate = self.config.run.gate_timeout();

        info!("Navigating to: {}", self.config.target.url);
        session.open(&self.config.target.url).await?;
        info!(
            "Waiting up to {}s for the list; complete any filter or security check in the browser",
            gate.as_secs()
        );
        if session.wait_for(&list.table, gate).await?.is_none() {
            return Err(Failure::RenderTimeout(format!(
                "list {} did not appear within {}s",
                list.table,
                gate.as_secs()
            )));
        }
        nav.settle(session).await?;
        let mut at = ListPosition::new(list.page_size);
        nav.widen(session, &mut at).await?;
        Ok(at)
    }

    /// Discard the session and start a new epoch.
    async fn restart(
        &self,
        state: &mut SessionState<F::Session>,
        report: &mut RunReport,
    ) -> std::result::Result<(), AbortReason> {
        report.restarts += 1;
        report.page_transitions += state.at.transitions;
        state.at.transitions = 0;
        if let Err(e) = state.session.close().await {
            debug!("close of unresponsive session: {}", e);
        }
        let epoch = state.epoch + 1;
        warn!(epoch, "Restarting session");
        *state = self.establish(epoch).await?;
        Ok(())
    }

    /// A restarted session resumes from the checkpoint, which must point at
    /// the record in progress.
    fn check_resume(&self, position: u64) -> Result<()> {
        let plan = self.config.list.target_page_size();
        let resume = self
            .checkpoint
            .load_with_page_size(plan)?
            .max(self.config.run.start_position(plan));
        if resume != position {
            return Err(Error::Checkpoint(format!(
                "checkpoint resumes at {} but record {} is in progress",
                resume, position
            )));
        }
        Ok(())
    }

    /// Save a screenshot of the session when configured.
    async fn capture(&self, session: &mut F::Session) {
        let Some(path) = self
            .config
            .on_failure
            .as_ref()
            .and_then(|f| f.screenshot.as_ref())
        else {
            return;
        };
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let path = path.replace("{timestamp}", &timestamp);
        match session.screenshot().await {
            Ok(data) => {
                info!("Saving failure screenshot to: {}", path);
                if let Err(e) = std::fs::write(&path, data) {
                    warn!("Failed to save screenshot: {}", e);
                }
            }
            Err(e) => warn!("Failed to take screenshot: {}", e),
        }
    }

    fn navigator(&self) -> ListNavigator<'_> {
        ListNavigator::new(&self.config.list, &self.config.run)
    }

    fn expander(&self) -> DetailExpander<'_> {
        DetailExpander::new(&self.config.detail, &self.config.run)
    }
}
