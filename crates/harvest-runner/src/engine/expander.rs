//! Opens a row's detail view, reads it and goes back to the list.

use super::navigator::{page_of, ListNavigator, ListPosition};
use super::recovery::Failure;
use crate::config::{DetailLayout, RunConfig, Target};
use crate::model::{DetailFields, OptionalField, RecordIdentity};
use crate::session::InteractiveSession;
use std::time::Duration;
use tracing::debug;

pub struct DetailExpander<'a> {
    detail: &'a DetailLayout,
    run: &'a RunConfig,
}

impl<'a> DetailExpander<'a> {
    pub fn new(detail: &'a DetailLayout, run: &'a RunConfig) -> Self {
        Self { detail, run }
    }

    /// Activate `control` and read the detail view it opens.
    pub async fn expand<S: InteractiveSession>(
        &self,
        session: &mut S,
        control: &str,
    ) -> Result<DetailFields, Failure> {
        session.click(&Target::selector(control)).await?;
        self.read(session).await
    }

    /// Whether the session is showing a detail view.
    pub async fn is_open<S: InteractiveSession>(&self, session: &mut S) -> Result<bool, Failure> {
        match self.detail.view_contains {
            Some(ref fragment) => Ok(session.current_view().await?.contains(fragment.as_str())),
            None => Ok(session
                .wait_for(&self.detail.ready, Duration::ZERO)
                .await?
                .is_some()),
        }
    }

    /// Read the open detail view.
    ///
    /// Required fields that never render make the view stale. Optional ones
    /// get a short wait and become [`OptionalField::Unavailable`].
    pub async fn read<S: InteractiveSession>(
        &self,
        session: &mut S,
    ) -> Result<DetailFields, Failure> {
        if session
            .wait_for(&self.detail.ready, self.run.wait_timeout())
            .await?
            .is_none()
        {
            return Err(Failure::RenderTimeout(format!(
                "detail view not ready ({})",
                self.detail.ready
            )));
        }
        if let Some(ref fragment) = self.detail.view_contains {
            let view = session.current_view().await?;
            if !view.contains(fragment.as_str()) {
                return Err(Failure::StaleView(format!(
                    "expected a detail view, on {}",
                    view
                )));
            }
        }

        let f = &self.detail.fields;
        Ok(DetailFields {
            status: self.required(session, "status", &f.status).await?,
            address: self.required(session, "address", &f.address).await?,
            state: self.required(session, "state", &f.state).await?,
            district: self.required(session, "district", &f.district).await?,
            tehsil: self.required(session, "tehsil", &f.tehsil).await?,
            email: self.optional(session, &f.email).await?,
            mobile: self.optional(session, &f.mobile).await?,
        })
    }

    async fn required<S: InteractiveSession>(
        &self,
        session: &mut S,
        name: &str,
        selector: &str,
    ) -> Result<String, Failure> {
        session
            .wait_for(selector, self.run.wait_timeout())
            .await?
            .map(|v| v.trim().to_string())
            .ok_or_else(|| {
                Failure::StaleView(format!("detail field {} ({}) missing", name, selector))
            })
    }

    async fn optional<S: InteractiveSession>(
        &self,
        session: &mut S,
        selector: &str,
    ) -> Result<OptionalField, Failure> {
        let value = session
            .wait_for(selector, self.run.optional_field_timeout())
            .await?;
        if value.is_none() {
            debug!("optional field {} unavailable", selector);
        }
        Ok(OptionalField::from_read(value))
    }

    /// Go back and put the list on the page of `position` again.
    ///
    /// The source usually drops back to page 1 at its default size; when it
    /// kept the page (the record is still in its row) nothing is replayed.
    pub async fn return_to_list<S: InteractiveSession>(
        &self,
        session: &mut S,
        nav: &ListNavigator<'_>,
        at: &mut ListPosition,
        position: u64,
        identity: &RecordIdentity,
    ) -> Result<(), Failure> {
        session.back().await?;
        nav.settle(session).await?;
        let (page, ordinal) = page_of(position, at.page_size);
        if at.page == page && nav.holds(session, at, ordinal, identity).await? {
            debug!("list kept page {}", page);
            return Ok(());
        }
        nav.restore(session, at).await?;
        let (page, _) = page_of(position, at.page_size);
        nav.goto_page(session, at, page).await
    }
}
