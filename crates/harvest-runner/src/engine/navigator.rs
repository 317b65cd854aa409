//! Moves the list view to a wanted page using only forward transitions.

use super::locator::RecordLocator;
use super::recovery::Failure;
use crate::config::{ListLayout, RunConfig};
use crate::model::RecordIdentity;
use crate::session::{InteractiveSession, RenderedRow};
use std::time::Instant;
use tracing::{debug, warn};

/// Page the list view is believed to be on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPosition {
    /// One-based page index.
    pub page: u64,
    /// Rows per page, as measured after widening.
    pub page_size: u32,
    /// Forward transitions issued in this session.
    pub transitions: u64,
}

impl ListPosition {
    pub fn new(page_size: u32) -> Self {
        Self {
            page: 1,
            page_size,
            transitions: 0,
        }
    }

    /// The source dropped back to its first page at its default size.
    pub fn reset(&mut self, page_size: u32) {
        self.page = 1;
        self.page_size = page_size;
    }
}

/// Page and zero-based row ordinal of `position` at `page_size` rows per page.
pub fn page_of(position: u64, page_size: u32) -> (u64, usize) {
    let size = u64::from(page_size.max(1));
    (position / size + 1, (position % size) as usize)
}

pub struct ListNavigator<'a> {
    list: &'a ListLayout,
    run: &'a RunConfig,
}

impl<'a> ListNavigator<'a> {
    pub fn new(list: &'a ListLayout, run: &'a RunConfig) -> Self {
        Self { list, run }
    }

    pub fn locator(&self) -> RecordLocator<'a> {
        RecordLocator::new(&self.list.columns)
    }

    /// Data rows currently rendered.
    pub async fn rows<S: InteractiveSession>(
        &self,
        session: &mut S,
    ) -> Result<Vec<RenderedRow>, Failure> {
        let rows = session.list_rows(&self.list.rows).await?;
        Ok(self.locator().data_rows(rows))
    }

    /// The source fell back to page 1 at its default size; widen again.
    pub async fn restore<S: InteractiveSession>(
        &self,
        session: &mut S,
        at: &mut ListPosition,
    ) -> Result<(), Failure> {
        at.reset(self.list.page_size);
        self.widen(session, at).await
    }

    /// Whether the view still matches `at`: `identity` sits at `ordinal`
    /// and the page is as long as believed.
    pub async fn holds<S: InteractiveSession>(
        &self,
        session: &mut S,
        at: &ListPosition,
        ordinal: usize,
        identity: &RecordIdentity,
    ) -> Result<bool, Failure> {
        let rows = self.rows(session).await?;
        let locator = self.locator();
        let found = locator
            .by_ordinal(&rows, ordinal)
            .and_then(|r| locator.identity_of(r.row));
        if found.as_ref() != Some(identity) {
            return Ok(false);
        }
        Ok(rows.len() == at.page_size as usize || !session.has_control(&self.list.next).await?)
    }

    /// Poll data rows until `done` accepts them; `None` on timeout.
    pub async fn wait_rows<S, P>(
        &self,
        session: &mut S,
        done: P,
    ) -> Result<Option<Vec<RenderedRow>>, Failure>
    where
        S: InteractiveSession,
        P: Fn(&[RenderedRow]) -> bool,
    {
        let deadline = Instant::now() + self.run.wait_timeout();
        loop {
            let rows = self.rows(session).await?;
            if done(rows.as_slice()) {
                return Ok(Some(rows));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.run.poll_interval()).await;
        }
    }

    /// Wait until the list table shows data rows.
    pub async fn settle<S: InteractiveSession>(&self, session: &mut S) -> Result<(), Failure> {
        if session
            .wait_for(&self.list.table, self.run.wait_timeout())
            .await?
            .is_none()
        {
            return Err(Failure::RenderTimeout(format!(
                "list table {} did not render",
                self.list.table
            )));
        }
        match self.wait_rows(session, |rows| !rows.is_empty()).await? {
            Some(_) => Ok(()),
            None => Err(Failure::RenderTimeout("list shows no data rows".into())),
        }
    }

    /// Request each widening step, then measure the page size actually in
    /// effect. Must be called on page 1.
    pub async fn widen<S: InteractiveSession>(
        &self,
        session: &mut S,
        at: &mut ListPosition,
    ) -> Result<(), Failure> {
        if let Some(ref widen) = self.list.widen {
            for step in &widen.steps {
                let before = self.rows(session).await?.len();
                if before == *step as usize {
                    continue;
                }
                session.select(&widen.control, &step.to_string()).await?;
                let applied = self
                    .wait_rows(session, |rows| !rows.is_empty() && rows.len() != before)
                    .await?
                    .is_some();
                if !applied {
                    debug!("page size {} not applied", step);
                }
            }
        }

        let size = self.measure(session).await?;
        if size != self.list.target_page_size() {
            warn!(
                "Page size is {} (wanted {}); positions are mapped with {}",
                size,
                self.list.target_page_size(),
                size
            );
        }
        at.page = 1;
        at.page_size = size;
        Ok(())
    }

    /// Rows per page on page 1. A single-page list cannot be measured, so
    /// the planned size is assumed.
    async fn measure<S: InteractiveSession>(&self, session: &mut S) -> Result<u32, Failure> {
        let rows = self.rows(session).await?;
        if rows.is_empty() {
            return Err(Failure::RenderTimeout("list shows no data rows".into()));
        }
        let count = rows.len() as u32;
        if session.has_control(&self.list.next).await? {
            Ok(count)
        } else {
            Ok(count.max(self.list.target_page_size()))
        }
    }

    /// Advance from `at.page` to `target` with forward transitions only.
    ///
    /// Fails with [`Failure::StaleView`] when the list is already past
    /// `target`; the caller must reset the list first.
    pub async fn goto_page<S: InteractiveSession>(
        &self,
        session: &mut S,
        at: &mut ListPosition,
        target: u64,
    ) -> Result<(), Failure> {
        if at.page > target {
            return Err(Failure::StaleView(format!(
                "list is on page {}, past page {}",
                at.page, target
            )));
        }
        while at.page < target {
            if !session.has_control(&self.list.next).await? {
                return Err(Failure::ExhaustedPages { page: at.page });
            }
            let before = self
                .rows(session)
                .await?
                .first()
                .map(RenderedRow::fingerprint);
            session.click(&self.list.next).await?;
            let rendered = self
                .wait_rows(session, |rows| {
                    let first = rows.first().map(RenderedRow::fingerprint);
                    first.is_some() && first != before
                })
                .await?;
            if rendered.is_none() {
                return Err(Failure::RenderTimeout(format!(
                    "page {} did not render",
                    at.page + 1
                )));
            }
            at.page += 1;
            at.transitions += 1;
            debug!("list on page {}", at.page);
        }
        Ok(())
    }
}
