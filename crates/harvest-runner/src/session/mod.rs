//! The interactive session boundary.
//!
//! The engine never talks to a browser directly. It drives an
//! [`InteractiveSession`]: something that can open a view, click controls,
//! read rendered values and report which view it is on. Sessions are
//! disposable; when one stops responding the engine asks its
//! [`SessionFactory`] for a fresh one.

pub mod browser;

use crate::config::Target;
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// One rendered table cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RenderedCell {
    /// Trimmed text content.
    pub text: String,
    /// `href` of the first link in the cell.
    #[serde(default)]
    pub href: Option<String>,
    /// Selector of the first link in the cell, when it can be addressed.
    #[serde(default)]
    pub control: Option<String>,
}

impl RenderedCell {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// One rendered table row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct RenderedRow {
    pub cells: Vec<RenderedCell>,
}

impl RenderedRow {
    pub fn cell(&self, index: usize) -> Option<&RenderedCell> {
        self.cells.get(index)
    }

    /// Text of the whole row, used to notice when a page was re-rendered.
    pub fn fingerprint(&self) -> String {
        self.cells
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }
}

/// A live, stateful view onto the remote source.
///
/// Errors returned from these methods mean the session itself is in
/// trouble; an expected element that has not appeared yet is reported by
/// [`wait_for`](Self::wait_for) returning `Ok(None)`.
#[async_trait]
pub trait InteractiveSession: Send {
    /// Navigate to `url`.
    async fn open(&mut self, url: &str) -> Result<()>;

    /// Wait up to `timeout` for the element at `selector` and read its value.
    ///
    /// Selects yield the selected option's text, form inputs their value and
    /// anything else its trimmed text. `Ok(None)` means the wait timed out.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<Option<String>>;

    /// Activate a control.
    async fn click(&mut self, control: &Target) -> Result<()>;

    /// Whether a control is currently rendered.
    async fn has_control(&mut self, control: &Target) -> Result<bool>;

    /// Choose `value` in a dropdown control.
    async fn select(&mut self, control: &Target, value: &str) -> Result<()>;

    /// Rows currently rendered for `selector`.
    async fn list_rows(&mut self, selector: &str) -> Result<Vec<RenderedRow>>;

    /// Identifier of the current view (the page URL for a browser).
    async fn current_view(&mut self) -> Result<String>;

    /// Return to the previous view.
    async fn back(&mut self) -> Result<()>;

    /// Reload the current view.
    async fn refresh(&mut self) -> Result<()>;

    /// Image of the current view, for failure diagnostics.
    async fn screenshot(&mut self) -> Result<Vec<u8>>;

    /// Dispose of the session.
    async fn close(&mut self) -> Result<()>;
}

/// Creates sessions; called once per session epoch.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: InteractiveSession;

    async fn create(&self) -> Result<Self::Session>;
}
