//! An in-memory list site behind the session traits.
//!
//! Behaves like the real source where it matters: the list falls back to
//! page 1 at its default size after `back` or a reload, a direct jump to
//! the largest page size is ignored, and the detail view is a separate
//! view reached through a per-row control.

#![allow(dead_code)]

use async_trait::async_trait;
use harvest_runner::{
    Config, Error, InteractiveSession, RenderedCell, RenderedRow, Result, SessionFactory, Target,
};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const LIST_URL: &str = "https://fake.test/list.aspx";

/// Something that goes wrong while a record's detail view is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The detail view never becomes ready.
    DetailTimeout,
    /// The detail view renders without its address field.
    MissingField,
    /// The session dies when the row's detail control is clicked.
    SessionDead,
    /// The row's detail control is gone when clicked; the session lives on.
    ControlMissing,
}

/// What sessions did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open,
    Next { to_page: usize },
    Select { size: usize },
    Detail { position: u64 },
    Back,
    Refresh,
}

#[derive(Debug, Clone)]
pub struct SiteRecord {
    pub name: String,
    pub registration: String,
    pub email: Option<String>,
    pub mobile: Option<String>,
}

#[derive(Debug)]
struct SiteState {
    records: Vec<SiteRecord>,
    default_size: usize,
    largest_size: usize,
    faults: HashMap<u64, VecDeque<Fault>>,
    events: Vec<Event>,
    sessions_created: u32,
    session_limit: Option<u32>,
    added_on_restart: usize,
}

/// A fake site; clones share state.
#[derive(Debug, Clone)]
pub struct FakeSite {
    state: Arc<Mutex<SiteState>>,
}

impl FakeSite {
    /// `count` records named `Project {i}` / `REG-{i:05}`, all fields present.
    pub fn new(count: usize) -> Self {
        let records = (0..count)
            .map(|i| SiteRecord {
                name: format!("Project {}", i),
                registration: format!("REG-{:05}", i),
                email: Some(format!("p{}@example.in", i)),
                mobile: Some(format!("98{:08}", i)),
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(SiteState {
                records,
                default_size: 10,
                largest_size: 100,
                faults: HashMap::new(),
                events: Vec::new(),
                sessions_created: 0,
                session_limit: None,
                added_on_restart: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SiteState> {
        self.state.lock().unwrap()
    }

    pub fn without_email(self, position: usize) -> Self {
        self.lock().records[position].email = None;
        self
    }

    pub fn with_fault(self, position: u64, fault: Fault, times: usize) -> Self {
        self.lock()
            .faults
            .entry(position)
            .or_default()
            .extend(std::iter::repeat(fault).take(times));
        self
    }

    /// Give the record at `position` the identity of the record at `of`.
    pub fn with_duplicate(self, position: usize, of: usize) -> Self {
        {
            let mut state = self.lock();
            let original = state.records[of].clone();
            let record = &mut state.records[position];
            record.name = original.name;
            record.registration = original.registration;
        }
        self
    }

    /// `count` new records appear at the top of the list when the second
    /// session is created.
    pub fn with_records_added_on_restart(self, count: usize) -> Self {
        self.lock().added_on_restart = count;
        self
    }

    /// Only `limit` sessions can ever be created.
    pub fn with_session_limit(self, limit: u32) -> Self {
        self.lock().session_limit = Some(limit);
        self
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    pub fn sessions_created(&self) -> u32 {
        self.lock().sessions_created
    }

    /// Next clicks issued before the first detail view was opened.
    pub fn next_clicks_before_first_detail(&self) -> usize {
        self.events()
            .iter()
            .take_while(|e| !matches!(e, Event::Detail { .. }))
            .filter(|e| matches!(e, Event::Next { .. }))
            .count()
    }

    /// Positions whose detail view was opened, in order.
    pub fn opened(&self) -> Vec<u64> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                Event::Detail { position } => Some(*position),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SessionFactory for FakeSite {
    type Session = FakeSession;

    async fn create(&self) -> Result<FakeSession> {
        let mut state = self.lock();
        if state
            .session_limit
            .is_some_and(|limit| state.sessions_created >= limit)
        {
            return Err(Error::Session("browser failed to launch".into()));
        }
        state.sessions_created += 1;
        if state.sessions_created == 2 {
            let added = std::mem::take(&mut state.added_on_restart);
            for i in (0..added).rev() {
                state.records.insert(
                    0,
                    SiteRecord {
                        name: format!("Late {}", i),
                        registration: format!("LATE-{:05}", i),
                        email: None,
                        mobile: None,
                    },
                );
            }
        }
        Ok(FakeSession {
            site: self.clone(),
            view: View::Blank,
            dead: false,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Blank,
    List { page: usize, size: usize },
    Detail { position: u64 },
}

pub struct FakeSession {
    site: FakeSite,
    view: View,
    dead: bool,
}

impl FakeSession {
    fn alive(&self) -> Result<()> {
        if self.dead {
            return Err(Error::Session("target closed".into()));
        }
        Ok(())
    }

    fn record(&self, event: Event) {
        self.site.lock().events.push(event);
    }

    fn fresh_list(&self) -> View {
        View::List {
            page: 1,
            size: self.site.lock().default_size,
        }
    }

    fn has_next(&self) -> bool {
        match self.view {
            View::List { page, size } => page * size < self.site.lock().records.len(),
            _ => false,
        }
    }

    fn on_page(&self, position: u64) -> bool {
        match self.view {
            View::List { page, size } => {
                let first = ((page - 1) * size) as u64;
                let len = self.site.lock().records.len() as u64;
                position >= first && position < (first + size as u64).min(len)
            }
            _ => false,
        }
    }

    fn take_fault(&self, position: u64, fault: Fault) -> bool {
        let mut state = self.site.lock();
        let Some(queue) = state.faults.get_mut(&position) else {
            return false;
        };
        if queue.front() == Some(&fault) {
            queue.pop_front();
            true
        } else {
            false
        }
    }

    fn detail_position(control: &Target) -> Option<u64> {
        control.selector.as_deref()?.strip_prefix("#detail-")?.parse().ok()
    }
}

fn row(position: usize, record: &SiteRecord) -> RenderedRow {
    let mut cells: Vec<RenderedCell> = (0..14).map(|_| RenderedCell::default()).collect();
    cells[0] = RenderedCell::text((position + 1).to_string());
    cells[1] = RenderedCell::text(&record.name);
    cells[2] = RenderedCell::text(&record.registration);
    cells[3] = RenderedCell::text("Authorised Person");
    cells[4] = RenderedCell::text("Promoter Ltd");
    cells[5] = RenderedCell::text("Residential");
    cells[6] = RenderedCell::text("Durg");
    cells[7] = RenderedCell::text("Bhilai");
    cells[8] = RenderedCell::text("01-04-2021");
    cells[9] = RenderedCell::text("31-03-2024");
    cells[10] = RenderedCell::text("");
    cells[11] = RenderedCell {
        text: "Website".into(),
        href: Some(format!("https://project{}.example.in", position)),
        control: None,
    };
    cells[12] = RenderedCell::text("Approved");
    cells[13] = RenderedCell {
        text: "View".into(),
        href: Some("javascript:__doPostBack()".into()),
        control: Some(format!("#detail-{}", position)),
    };
    RenderedRow { cells }
}

#[async_trait]
impl InteractiveSession for FakeSession {
    async fn open(&mut self, url: &str) -> Result<()> {
        self.alive()?;
        if url != LIST_URL {
            return Err(Error::Session(format!("unknown url {}", url)));
        }
        self.view = self.fresh_list();
        self.record(Event::Open);
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, _timeout: Duration) -> Result<Option<String>> {
        self.alive()?;
        match self.view {
            View::Blank => Ok(None),
            View::List { .. } => Ok((selector == "#grid").then(String::new)),
            View::Detail { position } => {
                let record = self.site.lock().records[position as usize].clone();
                let value = match selector {
                    "#status" => {
                        if self.take_fault(position, Fault::DetailTimeout) {
                            return Ok(None);
                        }
                        Some("Ongoing".to_string())
                    }
                    "#address" => {
                        if self.take_fault(position, Fault::MissingField) {
                            return Ok(None);
                        }
                        Some(format!("Plot {}, Sector 5", position))
                    }
                    "#state" => Some("Chhattisgarh".to_string()),
                    "#district" => Some("Durg".to_string()),
                    "#tehsil" => Some("Bhilai".to_string()),
                    "#email" => record.email,
                    "#mobile" => record.mobile,
                    _ => None,
                };
                Ok(value)
            }
        }
    }

    async fn click(&mut self, control: &Target) -> Result<()> {
        self.alive()?;
        if control.text.as_deref() == Some("Next") {
            let View::List { page, size } = self.view else {
                return Err(Error::Session("Next is not on this view".into()));
            };
            if !self.has_next() {
                return Err(Error::ControlNotFound(control.to_string()));
            }
            self.view = View::List {
                page: page + 1,
                size,
            };
            self.record(Event::Next { to_page: page + 1 });
            return Ok(());
        }
        if let Some(position) = Self::detail_position(control) {
            if !self.on_page(position) || self.take_fault(position, Fault::ControlMissing) {
                return Err(Error::ControlNotFound(control.to_string()));
            }
            if self.take_fault(position, Fault::SessionDead) {
                self.dead = true;
                return Err(Error::Session("target crashed".into()));
            }
            self.view = View::Detail { position };
            self.record(Event::Detail { position });
            return Ok(());
        }
        Err(Error::ControlNotFound(control.to_string()))
    }

    async fn has_control(&mut self, control: &Target) -> Result<bool> {
        self.alive()?;
        if control.text.as_deref() == Some("Next") {
            return Ok(self.has_next());
        }
        if control.selector.as_deref() == Some("#size") {
            return Ok(matches!(self.view, View::List { .. }));
        }
        Ok(Self::detail_position(control).is_some_and(|p| self.on_page(p)))
    }

    async fn select(&mut self, control: &Target, value: &str) -> Result<()> {
        self.alive()?;
        let View::List { size: current, .. } = self.view else {
            return Err(Error::ControlNotFound(control.to_string()));
        };
        let size: usize = value
            .parse()
            .map_err(|_| Error::Session(format!("option '{}' not found", value)))?;
        let (default, largest) = {
            let state = self.site.lock();
            (state.default_size, state.largest_size)
        };
        if size > largest {
            return Err(Error::Session(format!("option '{}' not found", value)));
        }
        self.record(Event::Select { size });
        if current == default && size == largest {
            return Ok(());
        }
        self.view = View::List { page: 1, size };
        Ok(())
    }

    async fn list_rows(&mut self, _selector: &str) -> Result<Vec<RenderedRow>> {
        self.alive()?;
        let View::List { page, size } = self.view else {
            return Ok(Vec::new());
        };
        let state = self.site.lock();
        let first = (page - 1) * size;
        let last = (first + size).min(state.records.len());
        let mut rows = vec![RenderedRow {
            cells: vec![RenderedCell::text("S.No"), RenderedCell::text("Project Name")],
        }];
        rows.extend((first..last).map(|i| row(i, &state.records[i])));
        rows.push(RenderedRow {
            cells: vec![RenderedCell::text("Previous Next")],
        });
        Ok(rows)
    }

    async fn current_view(&mut self) -> Result<String> {
        self.alive()?;
        Ok(match self.view {
            View::Blank => "about:blank".to_string(),
            View::List { .. } => LIST_URL.to_string(),
            View::Detail { position } => {
                format!("https://fake.test/detail_view.aspx?id={}", position)
            }
        })
    }

    async fn back(&mut self) -> Result<()> {
        self.alive()?;
        self.view = self.fresh_list();
        self.record(Event::Back);
        Ok(())
    }

    async fn refresh(&mut self) -> Result<()> {
        self.alive()?;
        if matches!(self.view, View::List { .. }) {
            self.view = self.fresh_list();
        }
        self.record(Event::Refresh);
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>> {
        self.alive()?;
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn close(&mut self) -> Result<()> {
        self.dead = true;
        Ok(())
    }
}

/// Config for the fake site writing into `dir`. `extra` is appended.
pub fn config(dir: &Path, extra: &str) -> Config {
    let yaml = format!(
        r##"
name: "fake"
target:
  url: "{url}"
list:
  table: "#grid"
  rows: "#grid tr"
  next:
    text: "Next"
detail:
  ready: "#status"
  view_contains: "detail"
  fields:
    status: "#status"
    address: "#address"
    state: "#state"
    district: "#district"
    tehsil: "#tehsil"
    email: "#email"
    mobile: "#mobile"
output:
  path: "{out}"
{extra}
"##,
        url = LIST_URL,
        out = dir.join("records.csv").display(),
        extra = extra,
    );
    let mut config = Config::parse(&yaml).unwrap();
    config.run.wait_timeout_ms = 20;
    config.run.optional_field_timeout_ms = 5;
    config.run.gate_timeout_ms = 50;
    config.run.poll_interval_ms = 1;
    config.run.retry_delay_ms = 0;
    config
}

/// Widen with the given steps through the `#size` dropdown.
pub fn widen(config: &mut Config, steps: &[u32]) {
    config.list.widen = Some(harvest_runner::Widen {
        control: Target::selector("#size"),
        steps: steps.to_vec(),
    });
}

/// Data rows of the CSV output, header excluded.
pub fn output_rows(dir: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::Reader::from_path(dir.join("records.csv")).unwrap();
    reader
        .records()
        .map(|r| r.unwrap().iter().map(String::from).collect())
        .collect()
}

/// Project names in the CSV output.
pub fn output_names(dir: &Path) -> Vec<String> {
    output_rows(dir).into_iter().map(|r| r[0].clone()).collect()
}

pub fn names(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("Project {}", i)).collect()
}
