//! Finds a record's row on the rendered page.

use super::recovery::Failure;
use crate::config::Columns;
use crate::model::{ListFields, RecordIdentity};
use crate::session::RenderedRow;
use tracing::warn;

/// A row on the current page and its zero-based ordinal among data rows.
#[derive(Debug, Clone, Copy)]
pub struct LocatedRow<'r> {
    pub ordinal: usize,
    pub row: &'r RenderedRow,
}

pub struct RecordLocator<'a> {
    columns: &'a Columns,
}

impl<'a> RecordLocator<'a> {
    pub fn new(columns: &'a Columns) -> Self {
        Self { columns }
    }

    /// Drop header, pager and spacer rows.
    pub fn data_rows(&self, rows: Vec<RenderedRow>) -> Vec<RenderedRow> {
        let min = self.columns.min_cells();
        rows.into_iter().filter(|r| r.cells.len() >= min).collect()
    }

    pub fn by_ordinal<'r>(
        &self,
        rows: &'r [RenderedRow],
        ordinal: usize,
    ) -> Option<LocatedRow<'r>> {
        rows.get(ordinal).map(|row| LocatedRow { ordinal, row })
    }

    /// Scan for `identity`. When it appears more than once the row at
    /// `expected` wins; otherwise the match is ambiguous.
    pub fn by_identity<'r>(
        &self,
        rows: &'r [RenderedRow],
        identity: &RecordIdentity,
        expected: usize,
    ) -> Result<Option<LocatedRow<'r>>, Failure> {
        let ordinals: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| self.identity_of(row).as_ref() == Some(identity))
            .map(|(i, _)| i)
            .collect();

        match ordinals.as_slice() {
            [] => Ok(None),
            [ordinal] => Ok(self.by_ordinal(rows, *ordinal)),
            many if many.contains(&expected) => {
                warn!(
                    "{} appears at rows {:?}; using row {}",
                    identity, many, expected
                );
                Ok(self.by_ordinal(rows, expected))
            }
            _ => Err(Failure::AmbiguousIdentity {
                identity: identity.clone(),
                ordinals,
            }),
        }
    }

    pub fn identity_of(&self, row: &RenderedRow) -> Option<RecordIdentity> {
        let name = row.cell(self.columns.project_name)?;
        let reg = row.cell(self.columns.registration_number)?;
        Some(RecordIdentity::new(&name.text, &reg.text))
    }

    /// List columns of `row`, `None` when the row is missing cells.
    pub fn list_fields(&self, row: &RenderedRow) -> Option<ListFields> {
        let c = self.columns;
        let text = |i: usize| row.cell(i).map(|cell| cell.text.clone());
        Some(ListFields {
            project_name: text(c.project_name)?,
            registration_number: text(c.registration_number)?,
            authorized_name: text(c.authorized_name)?,
            promoter_name: text(c.promoter_name)?,
            project_type: text(c.project_type)?,
            district: text(c.district)?,
            tehsil: text(c.tehsil)?,
            approved_date: text(c.approved_date)?,
            proposed_end_date: text(c.proposed_end_date)?,
            extended_end_date: text(c.extended_end_date)?,
            website: row
                .cell(c.website)?
                .href
                .clone()
                .unwrap_or_default(),
        })
    }

    /// Selector of the row's detail control.
    pub fn detail_control(&self, row: &RenderedRow) -> Option<String> {
        row.cell(self.columns.details)?.control.clone()
    }
}
