//! Records as they are read from the list and detail views.

use std::fmt;

/// Output header, list columns first, then detail columns.
pub const COLUMNS: [&str; 19] = [
    "Project Name",
    "Registration Number",
    "Authorized Name",
    "Promoter Name",
    "Project Type",
    "District",
    "Tehsil",
    "Approved Date",
    "Proposed End Date",
    "Extended Proposed End Date",
    "Website",
    "Project Status",
    "Detail Authorized Name",
    "Project Address",
    "State",
    "District (Detail)",
    "Tehsil (Detail)",
    "Email",
    "Mobile",
];

/// The only stable key the source offers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordIdentity {
    pub name: String,
    pub registration_number: String,
}

impl RecordIdentity {
    pub fn new(name: impl Into<String>, registration_number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registration_number: registration_number.into(),
        }
    }
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.registration_number)
    }
}

/// Columns visible in the list view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFields {
    pub project_name: String,
    pub registration_number: String,
    pub authorized_name: String,
    pub promoter_name: String,
    pub project_type: String,
    pub district: String,
    pub tehsil: String,
    pub approved_date: String,
    pub proposed_end_date: String,
    pub extended_end_date: String,
    /// Empty when the row has no website link.
    pub website: String,
}

impl ListFields {
    pub fn identity(&self) -> RecordIdentity {
        RecordIdentity::new(&self.project_name, &self.registration_number)
    }
}

/// A detail field the source may legitimately leave out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionalField {
    Present(String),
    Unavailable,
}

impl OptionalField {
    /// Blank values count as unavailable.
    pub fn from_read(value: Option<String>) -> Self {
        match value {
            Some(v) if !v.trim().is_empty() => Self::Present(v.trim().to_string()),
            _ => Self::Unavailable,
        }
    }

    /// Render for output, substituting `marker` when unavailable.
    pub fn or_marker<'a>(&'a self, marker: &'a str) -> &'a str {
        match self {
            Self::Present(v) => v,
            Self::Unavailable => marker,
        }
    }
}

/// Fields only visible after expanding a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailFields {
    pub status: String,
    pub address: String,
    pub state: String,
    pub district: String,
    pub tehsil: String,
    pub email: OptionalField,
    pub mobile: OptionalField,
}

/// List fields plus, once expanded, detail fields.
///
/// `detail` is `None` until expansion succeeds; only complete records are
/// emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub position: u64,
    pub list: ListFields,
    pub detail: Option<DetailFields>,
}

impl Record {
    pub fn new(position: u64, list: ListFields) -> Self {
        Self {
            position,
            list,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: DetailFields) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn identity(&self) -> RecordIdentity {
        self.list.identity()
    }

    /// One output row in [`COLUMNS`] order, `None` while detail is missing.
    pub fn to_row(&self, unavailable: &str) -> Option<Vec<String>> {
        let detail = self.detail.as_ref()?;
        let l = &self.list;
        Some(vec![
            l.project_name.clone(),
            l.registration_number.clone(),
            l.authorized_name.clone(),
            l.promoter_name.clone(),
            l.project_type.clone(),
            l.district.clone(),
            l.tehsil.clone(),
            l.approved_date.clone(),
            l.proposed_end_date.clone(),
            l.extended_end_date.clone(),
            l.website.clone(),
            detail.status.clone(),
            l.authorized_name.clone(),
            detail.address.clone(),
            detail.state.clone(),
            detail.district.clone(),
            detail.tehsil.clone(),
            detail.email.or_marker(unavailable).to_string(),
            detail.mobile.or_marker(unavailable).to_string(),
        ])
    }
}
