//! [`InteractiveSession`] backed by an eoka browser tab.

use super::{InteractiveSession, RenderedRow, SessionFactory};
use crate::config::{BrowserConfig, Target};
use crate::{Error, Result};
use async_trait::async_trait;
use eoka::{Browser, Page};
use std::time::{Duration, Instant};
use tracing::debug;

/// Poll interval of [`BrowserSession::wait_for`].
const POLL_MS: u64 = 200;

/// Read a field's value: selected option text, form value, or text.
const READ_FIELD_JS: &str = r#"((sel) => {
    const el = document.querySelector(sel);
    if (!el) return null;
    const tag = el.tagName.toLowerCase();
    if (tag === 'select') {
        const opt = el.options[el.selectedIndex];
        return opt ? opt.textContent.trim() : '';
    }
    if (tag === 'input' || tag === 'textarea') return el.value ?? '';
    return (el.textContent || '').trim();
})"#;

/// Find a link or button by exact visible text - returns CSS selector.
const FIND_CONTROL_JS: &str = r#"((text) => {
    const want = text.trim();
    const candidates = document.querySelectorAll('a, button, input[type="submit"], input[type="button"]');
    for (const el of candidates) {
        const label = (el.tagName === 'INPUT' ? el.value : el.textContent || '').trim();
        if (label !== want) continue;
        if (el.id) return '#' + CSS.escape(el.id);
        const path = [];
        let node = el;
        while (node && node !== document.body) {
            if (node.id) { path.unshift('#' + CSS.escape(node.id)); break; }
            const siblings = Array.from(node.parentNode?.children || []);
            path.unshift(node.tagName.toLowerCase() + ':nth-child(' + (siblings.indexOf(node) + 1) + ')');
            node = node.parentNode;
        }
        return path.join(' > ');
    }
    return null;
})"#;

/// Enumerate table rows as cells of {text, href, control}.
const LIST_ROWS_JS: &str = r#"((sel) => {
    const rows = Array.from(document.querySelectorAll(sel));
    return JSON.stringify(rows.map(tr => Array.from(tr.children)
        .filter(td => td.tagName === 'TD')
        .map(td => {
            const a = td.querySelector('a');
            return {
                text: (td.textContent || '').trim(),
                href: a ? a.getAttribute('href') : null,
                control: a && a.id ? '#' + CSS.escape(a.id) : null,
            };
        })));
})"#;

/// Choose an option by value or text and fire `change` (triggers postback).
const SELECT_JS: &str = r#"((sel, val) => {
    const el = document.querySelector(sel);
    if (!el) return 'element_not_found';
    const opt = Array.from(el.options).find(o => o.value === val || o.text.trim() === val);
    if (!opt) return 'option_not_found';
    if (el.value === opt.value) return 'unchanged';
    el.value = opt.value;
    el.dispatchEvent(new Event('change', { bubbles: true }));
    return 'ok';
})"#;

fn js_arg(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".into())
}

/// Launches one browser per session.
#[derive(Debug, Clone)]
pub struct BrowserSessionFactory {
    config: BrowserConfig,
}

impl BrowserSessionFactory {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for BrowserSessionFactory {
    type Session = BrowserSession;

    async fn create(&self) -> Result<BrowserSession> {
        BrowserSession::launch(&self.config).await
    }
}

/// A browser and its single tab.
pub struct BrowserSession {
    browser: Option<Browser>,
    page: Page,
}

impl BrowserSession {
    /// Launch a browser with config.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let stealth = eoka::StealthConfig {
            headless: config.headless,
            proxy: config.proxy.clone(),
            user_agent: config.user_agent.clone(),
            viewport_width: config.viewport.as_ref().map(|v| v.width).unwrap_or(1920),
            viewport_height: config.viewport.as_ref().map(|v| v.height).unwrap_or(1080),
            ..Default::default()
        };

        debug!(
            "Launching browser (headless: {}, proxy: {:?})",
            config.headless, config.proxy
        );
        let browser = Browser::launch_with_config(stealth).await?;
        let page = browser.new_page("about:blank").await?;

        Ok(Self {
            browser: Some(browser),
            page,
        })
    }

    async fn resolve(&self, control: &Target) -> Result<Option<String>> {
        if let Some(ref sel) = control.selector {
            let js = format!("!!document.querySelector({})", js_arg(sel));
            let exists: bool = self.page.evaluate(&js).await?;
            return Ok(exists.then(|| sel.clone()));
        }
        if let Some(ref text) = control.text {
            let js = format!("{}({})", FIND_CONTROL_JS, js_arg(text));
            return Ok(self.page.evaluate(&js).await?);
        }
        Err(Error::Session(
            "either selector or text must be provided".into(),
        ))
    }
}

#[async_trait]
impl InteractiveSession for BrowserSession {
    async fn open(&mut self, url: &str) -> Result<()> {
        debug!("open: {}", url);
        self.page.goto(url).await?;
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<Option<String>> {
        let js = format!("{}({})", READ_FIELD_JS, js_arg(selector));
        let deadline = Instant::now() + timeout;
        loop {
            let value: Option<String> = self.page.evaluate(&js).await?;
            if value.is_some() {
                return Ok(value);
            }
            if Instant::now() >= deadline {
                debug!("wait_for {} timed out after {:?}", selector, timeout);
                return Ok(None);
            }
            self.page.wait(POLL_MS).await;
        }
    }

    async fn click(&mut self, control: &Target) -> Result<()> {
        let selector = self
            .resolve(control)
            .await?
            .ok_or_else(|| Error::ControlNotFound(control.to_string()))?;
        debug!("click: {}", control);
        self.page.click(&selector).await?;
        Ok(())
    }

    async fn has_control(&mut self, control: &Target) -> Result<bool> {
        Ok(self.resolve(control).await?.is_some())
    }

    async fn select(&mut self, control: &Target, value: &str) -> Result<()> {
        let selector = self
            .resolve(control)
            .await?
            .ok_or_else(|| Error::ControlNotFound(control.to_string()))?;
        let js = format!("{}({}, {})", SELECT_JS, js_arg(&selector), js_arg(value));
        let result: String = self.page.evaluate(&js).await?;
        debug!("select {} = {}: {}", control, value, result);
        match result.as_str() {
            "ok" | "unchanged" => Ok(()),
            "element_not_found" => Err(Error::ControlNotFound(control.to_string())),
            "option_not_found" => Err(Error::Session(format!(
                "option '{}' not found in {}",
                value, control
            ))),
            other => Err(Error::Session(format!("select {} failed: {}", control, other))),
        }
    }

    async fn list_rows(&mut self, selector: &str) -> Result<Vec<RenderedRow>> {
        let js = format!("{}({})", LIST_ROWS_JS, js_arg(selector));
        let json: String = self.page.evaluate(&js).await?;
        serde_json::from_str(&json)
            .map_err(|e| Error::Session(format!("failed to parse rows of {}: {}", selector, e)))
    }

    async fn current_view(&mut self) -> Result<String> {
        Ok(self.page.url().await?)
    }

    async fn back(&mut self) -> Result<()> {
        debug!("back");
        self.page.back().await?;
        Ok(())
    }

    async fn refresh(&mut self) -> Result<()> {
        debug!("reload");
        self.page.reload().await?;
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>> {
        Ok(self.page.screenshot().await?)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(browser) = self.browser.take() {
            browser.close().await?;
        }
        Ok(())
    }
}
