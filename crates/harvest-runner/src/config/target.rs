use serde::Deserialize;
use std::fmt;

/// A control on the page - either by CSS selector or visible text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
pub struct Target {
    /// CSS selector.
    pub selector: Option<String>,
    /// Visible text of a link or button.
    pub text: Option<String>,
}

impl Target {
    pub fn selector(selector: impl Into<String>) -> Self {
        Self {
            selector: Some(selector.into()),
            text: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            selector: None,
            text: Some(text.into()),
        }
    }

    /// True when neither a selector nor a text is set.
    pub fn is_empty(&self) -> bool {
        self.selector.as_deref().map_or(true, str::is_empty)
            && self.text.as_deref().map_or(true, str::is_empty)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.selector, &self.text) {
            (Some(s), _) => write!(f, "selector '{}'", s),
            (_, Some(t)) => write!(f, "text '{}'", t),
            _ => write!(f, "unknown"),
        }
    }
}
