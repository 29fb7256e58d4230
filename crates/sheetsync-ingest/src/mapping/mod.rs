//! Mapping/transformation engine
//!
//! Turns the normalized rows of an ingested file into sales orders through
//! the directory and catalog collaborators, one order per row or one per
//! group key, and records a per-row outcome for audit.

pub mod context;
pub mod engine;
pub mod lookup;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::directory::OrderRef;
use crate::models::{FileStatus, RecordPatch};

pub use context::{Granularity, MappingContext, Role};
pub use engine::MappingEngine;
pub use lookup::UnmatchedReference;

/// Result of one row or group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Created,
    SkippedIncomplete,
    SkippedNoMatch,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowOutcome {
    pub sheet: String,

    /// 1-based data row number (first row of the group in group mode)
    pub row: usize,
    pub group: Option<String>,
    pub kind: OutcomeKind,
    pub order: Option<OrderRef>,

    /// Audit line for the processing log
    pub trace: String,
}

/// Order created by a mapping pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedOrder {
    pub order: OrderRef,
    pub sheet: String,
    pub row: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingResult {
    pub success: bool,
    pub entities_created: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub unmatched: Vec<UnmatchedReference>,
    pub row_log: Vec<String>,
    pub outcomes: Vec<RowOutcome>,
    pub orders: Vec<CreatedOrder>,
    pub rows_processed: usize,
    pub rows_skipped: usize,
}

impl MappingResult {
    /// Result of a pass that could not read the file content at all
    pub fn aborted(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            ..Self::default()
        }
    }

    pub(crate) fn push(&mut self, outcome: RowOutcome) {
        match outcome.kind {
            OutcomeKind::Created => {
                self.entities_created += 1;
                self.rows_processed += 1;
                if let Some(order) = &outcome.order {
                    self.orders.push(CreatedOrder {
                        order: order.clone(),
                        sheet: outcome.sheet.clone(),
                        row: outcome.row,
                    });
                }
                tracing::info!(sheet = %outcome.sheet, row = outcome.row, "{}", outcome.trace);
            },
            OutcomeKind::Error => {
                self.rows_skipped += 1;
                tracing::error!(sheet = %outcome.sheet, row = outcome.row, "{}", outcome.trace);
            },
            OutcomeKind::SkippedIncomplete | OutcomeKind::SkippedNoMatch => {
                self.rows_skipped += 1;
                tracing::debug!(sheet = %outcome.sheet, row = outcome.row, "{}", outcome.trace);
            },
        }
        self.row_log.push(outcome.trace.clone());
        self.outcomes.push(outcome);
        self.success = self.entities_created > 0;
    }

    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.iter().filter(|o| o.kind == kind).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "=== PROCESSING SUMMARY ===\n\
             Orders created: {}\n\
             Rows processed: {}\n\
             Rows skipped: {}\n\
             Errors: {}\n\
             Warnings: {}",
            self.entities_created,
            self.rows_processed,
            self.rows_skipped,
            self.errors.len(),
            self.warnings.len()
        )
    }

    /// Row log followed by the summary block
    pub fn processing_log(&self) -> String {
        let mut lines = self.row_log.clone();
        lines.push(String::new());
        lines.push(self.summary());
        lines.join("\n")
    }

    /// Error text for the file record: row errors, then the unmatched-code block
    pub fn error_detail(&self) -> Option<String> {
        let mut blocks = Vec::new();
        if !self.errors.is_empty() {
            blocks.push(self.errors.join("\n"));
        }
        if !self.unmatched.is_empty() {
            let mut block = String::from("=== CATALOG CODES NOT FOUND ===");
            for missing in &self.unmatched {
                block.push_str(&format!(
                    "\n- SKU: {} | Description: {} | Quantity: {}",
                    missing.key, missing.description, missing.quantity
                ));
            }
            blocks.push(block);
        }
        (!blocks.is_empty()).then(|| blocks.join("\n\n"))
    }

    /// Status after this pass, given the record's status before it
    ///
    /// Any created order makes the record `processed` (`moved` stays
    /// `moved`); otherwise row errors make it `error` and a clean pass keeps
    /// the prior status.
    pub fn final_status(&self, prior: FileStatus) -> FileStatus {
        if self.entities_created > 0 {
            match prior {
                FileStatus::Moved => FileStatus::Moved,
                _ => FileStatus::Processed,
            }
        } else if !self.errors.is_empty() {
            FileStatus::Error
        } else {
            prior
        }
    }

    /// Field updates persisting this pass onto the file record
    pub fn record_patch(&self, prior: FileStatus) -> RecordPatch {
        RecordPatch {
            status: Some(self.final_status(prior)),
            error_message: Some(self.error_detail()),
            processing_log: Some(self.processing_log()),
            orders_created: Some(self.entities_created),
            moved_path: None,
            processed_at: (self.entities_created > 0).then(Utc::now),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn outcome(kind: OutcomeKind, row: usize) -> RowOutcome {
        RowOutcome {
            sheet: "Hoja1".to_string(),
            row,
            group: None,
            kind,
            order: (kind == OutcomeKind::Created).then(|| OrderRef {
                id: Uuid::new_v4(),
                name: format!("SO{:05}", row),
            }),
            trace: format!("row {}", row),
        }
    }

    #[test]
    fn test_counts_follow_outcomes() {
        let mut result = MappingResult::default();
        result.push(outcome(OutcomeKind::Created, 1));
        result.push(outcome(OutcomeKind::SkippedIncomplete, 2));
        result.push(outcome(OutcomeKind::Error, 3));

        assert!(result.success);
        assert_eq!(result.entities_created, 1);
        assert_eq!(result.rows_processed, 1);
        assert_eq!(result.rows_skipped, 2);
        assert_eq!(result.orders[0].row, 1);
        assert_eq!(result.row_log, vec!["row 1", "row 2", "row 3"]);
    }

    #[test]
    fn test_final_status_rules() {
        let mut created = MappingResult::default();
        created.push(outcome(OutcomeKind::Created, 1));
        assert_eq!(created.final_status(FileStatus::Processed), FileStatus::Processed);
        assert_eq!(created.final_status(FileStatus::Moved), FileStatus::Moved);
        assert_eq!(created.final_status(FileStatus::Error), FileStatus::Processed);

        let failed = MappingResult::aborted("boom");
        assert_eq!(failed.final_status(FileStatus::Moved), FileStatus::Error);

        let mut quiet = MappingResult::default();
        quiet.push(outcome(OutcomeKind::SkippedNoMatch, 1));
        assert_eq!(quiet.final_status(FileStatus::Moved), FileStatus::Moved);
    }

    #[test]
    fn test_error_detail_appends_unmatched_block() {
        let mut result = MappingResult::aborted("Error in row 2: catalog offline");
        result.unmatched.push(UnmatchedReference {
            key: "ZZ-9".to_string(),
            description: "Cable".to_string(),
            quantity: 2.0,
        });

        let detail = result.error_detail().unwrap();
        assert!(detail.starts_with("Error in row 2: catalog offline\n\n=== CATALOG CODES NOT FOUND ==="));
        assert!(detail.contains("- SKU: ZZ-9 | Description: Cable | Quantity: 2"));
        assert!(MappingResult::default().error_detail().is_none());
    }

    #[test]
    fn test_processing_log_ends_with_summary() {
        let mut result = MappingResult::default();
        result.push(outcome(OutcomeKind::Created, 1));
        let log = result.processing_log();
        assert!(log.starts_with("row 1\n"));
        assert!(log.ends_with("Warnings: 0"));
        assert!(log.contains("Orders created: 1"));
    }
}
