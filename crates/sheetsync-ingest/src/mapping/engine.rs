//! Order creation from normalized rows

use indexmap::IndexMap;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use super::context::{Granularity, MappingContext, Role};
use super::lookup::{self, ProductLookup};
use super::{MappingResult, OutcomeKind, RowOutcome};
use crate::directory::{OrderBook, OrderDraft, OrderLineDraft, PartnerDirectory, ProductCatalog};
use crate::error::{LookupError, StoreError};
use crate::models::{FileStatus, RecordPatch};
use crate::normalize::{self, RowRecord, SheetContent};
use crate::registry::FileTypeRegistry;
use crate::store::IngestStore;

const NOT_AVAILABLE: &str = "N/A";

/// Applies a [`MappingContext`] to sheet content
///
/// Failures are isolated per row (or per group): a lookup error becomes an
/// `error` outcome and the remaining rows are still processed.
pub struct MappingEngine<'a> {
    partners: &'a dyn PartnerDirectory,
    catalog: &'a dyn ProductCatalog,
    orders: &'a dyn OrderBook,
}

impl<'a> MappingEngine<'a> {
    pub fn new(
        partners: &'a dyn PartnerDirectory,
        catalog: &'a dyn ProductCatalog,
        orders: &'a dyn OrderBook,
    ) -> Self {
        Self {
            partners,
            catalog,
            orders,
        }
    }

    /// Engine over one collaborator implementing every contract
    pub fn with_directory<D>(directory: &'a D) -> Self
    where
        D: PartnerDirectory + ProductCatalog + OrderBook,
    {
        Self::new(directory, directory, directory)
    }

    /// Run a mapping pass over a stored record and persist its outcome
    ///
    /// Only missing content aborts the whole pass (the record becomes
    /// `error`); row failures are reported in the returned result.
    pub fn transform(
        &self,
        store: &dyn IngestStore,
        registry: &FileTypeRegistry,
        record_id: Uuid,
    ) -> Result<MappingResult, StoreError> {
        let record = store.record(record_id)?;
        let span = info_span!("transform", file = %record.filename);
        let _enter = span.enter();

        let Some(content) = record.content.as_ref().filter(|c| !c.is_empty()) else {
            let message = "No content found in file";
            warn!("{}", message);
            store.update_record(
                record_id,
                RecordPatch {
                    status: Some(FileStatus::Error),
                    error_message: Some(Some(message.to_string())),
                    ..RecordPatch::default()
                },
            )?;
            return Ok(MappingResult::aborted(message));
        };

        let headers = normalize::headers(content);
        let descriptor = registry.identify(&record.filename, Some(headers.as_slice()));
        match descriptor {
            Some(d) => info!(file_type = %d.name, "file type identified"),
            None => warn!("file type not identified, using auto-detected columns"),
        }

        let ctx = MappingContext::resolve(descriptor);
        let result = self.map_content(&ctx, &record.filename, content);
        store.update_record(record_id, result.record_patch(record.status))?;

        info!(
            created = result.entities_created,
            skipped = result.rows_skipped,
            errors = result.errors.len(),
            "mapping pass finished"
        );
        Ok(result)
    }

    /// Map every sheet of `content`; `origin` is recorded on created orders
    pub fn map_content(&self, ctx: &MappingContext, origin: &str, content: &SheetContent) -> MappingResult {
        let mut result = MappingResult::default();

        for (sheet, rows) in content {
            info!(sheet = %sheet, rows = rows.len(), "processing sheet");
            result.row_log.push(format!("=== Processing sheet: {} ===", sheet));
            match ctx.granularity {
                Granularity::Row => {
                    for (index, row) in rows.iter().enumerate() {
                        let outcome = self.map_row(ctx, origin, sheet, index + 1, row, &mut result);
                        result.push(outcome);
                    }
                },
                Granularity::Group => self.map_groups(ctx, origin, sheet, rows, &mut result),
            }
        }

        result
    }

    fn map_row(
        &self,
        ctx: &MappingContext,
        origin: &str,
        sheet: &str,
        row_number: usize,
        row: &RowRecord,
        result: &mut MappingResult,
    ) -> RowOutcome {
        let sku = ctx.value(Role::Sku, row);
        let outcome = |kind, order, trace| RowOutcome {
            sheet: sheet.to_string(),
            row: row_number,
            group: None,
            kind,
            order,
            trace,
        };

        if sku.is_none() && ctx.value(Role::Description, row).is_none() {
            result.warnings.push(format!("Row {} skipped: incomplete data", row_number));
            return outcome(
                OutcomeKind::SkippedIncomplete,
                None,
                format!("⚠ Row {} skipped - incomplete data", row_number),
            );
        }

        match self.create_from_row(ctx, origin, sheet, row_number, row, result) {
            Ok(Ok(created)) => created,
            Ok(Err(reason)) => {
                result.warnings.push(format!("Row {}: {}", row_number, reason));
                outcome(
                    OutcomeKind::SkippedNoMatch,
                    None,
                    format!("⚠ Row {} skipped - {}", row_number, reason),
                )
            },
            Err(e) => {
                result.errors.push(format!("Error in row {}: {}", row_number, e));
                outcome(
                    OutcomeKind::Error,
                    None,
                    format!(
                        "✗ Error processing row {} | Error: {} | SKU: {}",
                        row_number,
                        e,
                        sku.as_deref().unwrap_or(NOT_AVAILABLE)
                    ),
                )
            },
        }
    }

    /// `Ok(Err(reason))` is a skip; `Err` is a collaborator failure
    fn create_from_row(
        &self,
        ctx: &MappingContext,
        origin: &str,
        sheet: &str,
        row_number: usize,
        row: &RowRecord,
        result: &mut MappingResult,
    ) -> Result<Result<RowOutcome, String>, LookupError> {
        let Some(resolved) = lookup::resolve_partner(ctx, row, self.partners)? else {
            return Ok(Err(format!(
                "no customer found for tax id {}",
                ctx.value(Role::PartnerVat, row).as_deref().unwrap_or(NOT_AVAILABLE)
            )));
        };

        let product = match lookup::resolve_product(ctx, row, self.catalog)? {
            ProductLookup::Found(product) => product,
            ProductLookup::Missing(missing) => {
                let reason = format!("no product found with SKU {}", missing.key);
                result.unmatched.push(missing);
                return Ok(Err(reason));
            },
            ProductLookup::NoCode => return Ok(Err("row has no product code".to_string())),
        };

        let technician = resolved
            .location
            .as_ref()
            .map(|l| l.name.clone())
            .or_else(|| ctx.value(Role::TechnicianName, row));
        let draft = OrderDraft {
            partner: resolved.partner.clone(),
            client_order_ref: Some(
                ctx.value(Role::ClientRef, row)
                    .unwrap_or_else(|| format!("FTP-{}-Row{}", sheet, row_number)),
            ),
            date_order: ctx.value(Role::ScheduleDate, row),
            technician: technician.clone(),
            origin: origin.to_string(),
            note: lookup::order_notes(ctx, row, sheet, row_number),
            lines: vec![OrderLineDraft {
                description: product.name.clone(),
                quantity: lookup::quantity(ctx, row),
                product: product.clone(),
            }],
        };
        let order = self.orders.create_order(draft)?;

        let trace = format!(
            "✓ Row {} processed | Order: {} | Customer: {} | SKU: {} | Technician: {}",
            row_number,
            order.name,
            resolved.partner.name,
            product.code,
            technician.as_deref().unwrap_or(NOT_AVAILABLE)
        );
        Ok(Ok(RowOutcome {
            sheet: sheet.to_string(),
            row: row_number,
            group: None,
            kind: OutcomeKind::Created,
            order: Some(order),
            trace,
        }))
    }

    fn map_groups(
        &self,
        ctx: &MappingContext,
        origin: &str,
        sheet: &str,
        rows: &[RowRecord],
        result: &mut MappingResult,
    ) {
        let mut groups: IndexMap<String, Vec<(usize, &RowRecord)>> = IndexMap::new();
        for (index, row) in rows.iter().enumerate() {
            let row_number = index + 1;
            match ctx.value(Role::GroupKey, row) {
                Some(key) => groups.entry(key).or_default().push((row_number, row)),
                None => {
                    result.warnings.push(format!("Row {} skipped: no group key", row_number));
                    result.push(RowOutcome {
                        sheet: sheet.to_string(),
                        row: row_number,
                        group: None,
                        kind: OutcomeKind::SkippedIncomplete,
                        order: None,
                        trace: format!("⚠ Row {} skipped - no group key", row_number),
                    });
                },
            }
        }

        for (key, members) in groups {
            let first_row = members.first().map(|(n, _)| *n).unwrap_or_default();
            let outcome = |kind, order, trace| RowOutcome {
                sheet: sheet.to_string(),
                row: first_row,
                group: Some(key.clone()),
                kind,
                order,
                trace,
            };

            let next = match self.create_from_group(ctx, origin, sheet, &key, &members, result) {
                Ok(Ok(created)) => created,
                Ok(Err(reason)) => {
                    result.warnings.push(format!("Group {}: {}", key, reason));
                    outcome(
                        OutcomeKind::SkippedNoMatch,
                        None,
                        format!("⚠ Group {} skipped - {}", key, reason),
                    )
                },
                Err(e) => {
                    result.errors.push(format!("Error in group {}: {}", key, e));
                    outcome(
                        OutcomeKind::Error,
                        None,
                        format!("✗ Error processing group {} | Error: {}", key, e),
                    )
                },
            };
            result.push(next);
        }
    }

    fn create_from_group(
        &self,
        ctx: &MappingContext,
        origin: &str,
        sheet: &str,
        key: &str,
        members: &[(usize, &RowRecord)],
        result: &mut MappingResult,
    ) -> Result<Result<RowOutcome, String>, LookupError> {
        let mut resolved = None;
        for (_, row) in members {
            if let Some(found) = lookup::resolve_partner(ctx, row, self.partners)? {
                resolved = Some(found);
                break;
            }
        }
        let Some(resolved) = resolved else {
            return Ok(Err("no customer found for any row".to_string()));
        };

        let mut lines = Vec::new();
        for (row_number, row) in members {
            match lookup::resolve_product(ctx, row, self.catalog)? {
                ProductLookup::Found(product) => lines.push(OrderLineDraft {
                    description: product.name.clone(),
                    quantity: lookup::quantity(ctx, row),
                    product,
                }),
                ProductLookup::Missing(missing) => {
                    result
                        .warnings
                        .push(format!("Row {}: no product found with SKU {}", row_number, missing.key));
                    result.unmatched.push(missing);
                },
                ProductLookup::NoCode => {
                    result.warnings.push(format!("Row {}: row has no product code", row_number));
                },
            }
        }
        if lines.is_empty() {
            return Ok(Err("no valid products, order not created".to_string()));
        }

        let (first_row, first) = members[0];
        let row_numbers = members
            .iter()
            .map(|(n, _)| n.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let mut note = vec![
            "=== Imported from FTP ===".to_string(),
            format!("Sheet: {} | Group: {} | Rows: {}", sheet, key, row_numbers),
            String::new(),
        ];
        lookup::append_row_details(ctx, first, &mut note);

        let line_count = lines.len();
        let draft = OrderDraft {
            partner: resolved.partner.clone(),
            client_order_ref: Some(ctx.value(Role::ClientRef, first).unwrap_or_else(|| key.to_string())),
            date_order: ctx.value(Role::ScheduleDate, first),
            technician: resolved
                .location
                .as_ref()
                .map(|l| l.name.clone())
                .or_else(|| ctx.value(Role::TechnicianName, first)),
            origin: origin.to_string(),
            note: note.join("\n"),
            lines,
        };
        let order = self.orders.create_order(draft)?;

        let trace = format!(
            "✓ Group {} processed | Order: {} | Customer: {} | Lines: {} | Rows: {}",
            key, order.name, resolved.partner.name, line_count, row_numbers
        );
        Ok(Ok(RowOutcome {
            sheet: sheet.to_string(),
            row: first_row,
            group: Some(key.to_string()),
            kind: OutcomeKind::Created,
            order: Some(order),
            trace,
        }))
    }
}
