//! # harvest-runner
//!
//! Resumable extraction of records from a paginated, session-gated list that
//! only exposes its data through interactive navigation.
//!
//! The engine walks the list one record at a time, expands each row into its
//! detail view, appends the merged record to a CSV sink and then advances a
//! durable checkpoint. Failures are classified and handled by a small
//! recovery state machine (retry in place, re-navigate, restart the session,
//! abort) so a run never skips or duplicates a record.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use harvest_runner::{BrowserSessionFactory, Config, Engine};
//!
//! # #[tokio::main]
//! # async fn main() -> harvest_runner::Result<()> {
//! let config = Config::load("configs/cg-rera.yaml")?;
//! let factory = BrowserSessionFactory::new(config.browser.clone());
//! let mut engine = Engine::new(config, factory)?;
//! let report = engine.run().await?;
//! println!("{}", report.outcome);
//! # Ok(())
//! # }
//! ```

mod checkpoint;
mod config;
pub mod engine;
mod model;
pub mod session;
mod sink;

pub use checkpoint::CheckpointStore;
pub use config::{
    BrowserConfig, Columns, Config, DetailFieldSelectors, DetailLayout, ListLayout, OnFailure,
    OutputConfig, ParamDef, Params, RunConfig, Target, TargetUrl, Viewport, Widen,
};
pub use engine::{AbortReason, Engine, RunOutcome, RunReport};
pub use model::{DetailFields, ListFields, OptionalField, Record, RecordIdentity, COLUMNS};
pub use session::browser::{BrowserSession, BrowserSessionFactory};
pub use session::{InteractiveSession, RenderedCell, RenderedRow, SessionFactory};
pub use sink::CsvSink;

/// Result type for harvest-runner operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that end a run outright.
///
/// Record-level trouble (timeouts, stale views, lost rows) never shows up
/// here; it is absorbed by the engine's recovery machine and only surfaces
/// as a [`RunOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("session error: {0}")]
    Session(String),

    /// The session is alive but the control is not on the current view.
    #[error("control not found: {0}")]
    ControlNotFound(String),

    #[error("output error: {0}")]
    Sink(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r##"
name: "Test"
target:
  url: "https://example.com/list.aspx"
list:
  table: "#grid"
  rows: "#grid > tbody > tr"
  next:
    text: "Next"
detail:
  ready: "#status"
  fields:
    status: "#status"
    address: "#address"
    state: "#state"
    district: "#district"
    tehsil: "#tehsil"
    email: "#email"
    mobile: "#mobile"
"##;

    #[test]
    fn test_parse_minimal_config() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.name, "Test");
        assert_eq!(config.target.url, "https://example.com/list.aspx");
        assert_eq!(config.list.page_size, 10);
        assert!(config.list.widen.is_none());
        assert_eq!(config.list.columns.registration_number, 2);
        assert_eq!(config.list.columns.details, 13);
        assert_eq!(config.run.retry_budget, 5);
        assert_eq!(config.output.unavailable, "N/A");
        assert!(!config.browser.headless);
    }

    #[test]
    fn test_parse_widen_and_run() {
        let yaml = format!(
            "{MINIMAL}{}",
            r##"
run:
  start_page: 3
  pages: 2
  wait_timeout_ms: 5000
  retry_budget: 3
"##
        )
        .replace(
            "  next:\n",
            "  widen:\n    control:\n      selector: \"#size\"\n    steps: [20, 100]\n  next:\n",
        );
        let config = Config::parse(&yaml).unwrap();
        let widen = config.list.widen.as_ref().unwrap();
        assert_eq!(widen.steps, vec![20, 100]);
        assert_eq!(config.list.target_page_size(), 100);
        assert_eq!(config.run.start_position(100), 200);
        assert_eq!(config.run.end_position(200, 100), Some(400));
        assert_eq!(config.run.retry_budget, 3);
    }

    #[test]
    fn test_validation_missing_url() {
        let yaml = MINIMAL.replace("https://example.com/list.aspx", "");
        let result = Config::parse(&yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("target.url"));
    }

    #[test]
    fn test_validation_zero_retry_budget() {
        let yaml = format!("{MINIMAL}run:\n  retry_budget: 0\n");
        let result = Config::parse(&yaml);
        assert!(result.unwrap_err().to_string().contains("at least 1"));
    }

    #[test]
    fn test_validation_conflicting_start() {
        let yaml = format!("{MINIMAL}run:\n  start_page: 2\n  start_position: 40\n");
        let result = Config::parse(&yaml);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("either 'start_page' or 'start_position'"));
    }

    #[test]
    fn test_validation_widen_steps_increasing() {
        let yaml = MINIMAL.replace(
            "  next:\n",
            "  widen:\n    control:\n      selector: \"#size\"\n    steps: [100, 20]\n  next:\n",
        );
        assert!(Config::parse(&yaml).is_err());
    }

    #[test]
    fn test_params_fill_numeric_fields() {
        let yaml = format!(
            "{}{MINIMAL}run:\n  start_page: ${{start}}\n  pages: ${{pages}}\n",
            "params:\n  start:\n    default: \"1\"\n  pages:\n    required: true\n"
        );
        let params = Params::new().set("start", "10").set("pages", "2");
        let config = Config::parse_with_params(&yaml, &params).unwrap();
        assert_eq!(config.run.start_page, Some(10));
        assert_eq!(config.run.pages, Some(2));

        let missing = Config::parse(&yaml);
        assert!(missing.unwrap_err().to_string().contains("pages"));
    }

    #[test]
    fn test_load_shipped_config() {
        let config = Config::load("configs/cg-rera.yaml").unwrap();
        assert_eq!(
            config.target.url,
            "https://rera.cgstate.gov.in/Approved_project_List.aspx"
        );
        assert_eq!(
            config.detail.ready,
            "#ContentPlaceHolder1_ApplicantType"
        );
        assert_eq!(config.list.next.text.as_deref(), Some("Next"));
    }
}
