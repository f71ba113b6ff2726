// ⚖️ Reference Reconciliation
// Keeps only rows whose merchant and card scheme are on the allow-lists

use crate::error::{PipelineError, Result};
use crate::schema::SourceRow;
use std::collections::HashSet;

// ============================================================================
// FILTER REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterReport {
    pub kept: usize,
    pub unknown_merchant: usize,
    pub unknown_card_scheme: usize,
}

impl FilterReport {
    pub fn dropped(&self) -> usize {
        self.unknown_merchant + self.unknown_card_scheme
    }
}

// ============================================================================
// REFERENCE FILTER
// ============================================================================

/// Filters ingested rows against the Merchants and CardSchemes reference sets.
/// Rows that fail either check are dropped silently; only an empty result is
/// reported, as `EmptyAfterFilter`.
pub struct ReferenceFilter {
    merchants: HashSet<String>,
    card_schemes: HashSet<String>,
}

impl ReferenceFilter {
    pub fn new<M, C>(merchants: M, card_schemes: C) -> Self
    where
        M: IntoIterator<Item = String>,
        C: IntoIterator<Item = String>,
    {
        ReferenceFilter {
            merchants: merchants.into_iter().collect(),
            card_schemes: card_schemes.into_iter().collect(),
        }
    }

    fn merchant_known(&self, row: &SourceRow) -> bool {
        row.merchant_name
            .as_text()
            .map(|name| self.merchants.contains(&name))
            .unwrap_or(false)
    }

    fn card_scheme_known(&self, row: &SourceRow) -> bool {
        row.card_scheme
            .as_text()
            .map(|scheme| self.card_schemes.contains(&scheme))
            .unwrap_or(false)
    }

    /// Apply the filter, failing with `EmptyAfterFilter` if nothing survives
    pub fn apply(&self, rows: Vec<SourceRow>) -> Result<(Vec<SourceRow>, FilterReport)> {
        let mut report = FilterReport::default();
        let mut kept = Vec::with_capacity(rows.len());

        for row in rows {
            if !self.merchant_known(&row) {
                report.unknown_merchant += 1;
            } else if !self.card_scheme_known(&row) {
                report.unknown_card_scheme += 1;
            } else {
                kept.push(row);
            }
        }

        report.kept = kept.len();
        if kept.is_empty() {
            return Err(PipelineError::EmptyAfterFilter);
        }

        Ok((kept, report))
    }
}
