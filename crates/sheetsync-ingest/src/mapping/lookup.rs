//! Per-row lookups: customer, catalog item, quantity and order notes

use serde::{Deserialize, Serialize};

use super::context::{MappingContext, Role};
use crate::directory::{
    identifier_variants, LocationEntry, PartnerDirectory, PartnerRef, ProductCatalog, ProductRef,
};
use crate::error::LookupError;
use crate::normalize::RowRecord;
use crate::registry::MappingStrategy;

/// Catalog code that resolved to nothing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmatchedReference {
    pub key: String,
    pub description: String,
    pub quantity: f64,
}

/// Customer resolved for a row, with the technician location it came through
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPartner {
    pub partner: PartnerRef,
    pub location: Option<LocationEntry>,
    pub created: bool,
}

/// Resolve the customer of a row
///
/// First through the technician/location directory (tax id variants, then
/// location name, then partner name), then by direct directory search on the
/// customer tax id. A missing
/// customer is created only when the binding strategy is create-or-link.
pub fn resolve_partner(
    ctx: &MappingContext,
    row: &RowRecord,
    directory: &dyn PartnerDirectory,
) -> Result<Option<ResolvedPartner>, LookupError> {
    let via_location = |location: LocationEntry| {
        location.partner.clone().map(|partner| ResolvedPartner {
            partner,
            location: Some(location),
            created: false,
        })
    };

    for vat in ctx.values(Role::TechnicianVat, row) {
        for variant in identifier_variants(&vat) {
            if let Some(found) = directory.find_location_by_vat(&variant)?.and_then(via_location) {
                return Ok(Some(found));
            }
        }
    }

    for name in ctx.values(Role::TechnicianName, row) {
        if let Some(found) = directory.find_location_by_name(&name)?.and_then(via_location) {
            return Ok(Some(found));
        }
        if let Some(partner) = directory.find_partner_by_name(&name)? {
            return Ok(Some(ResolvedPartner {
                partner,
                location: None,
                created: false,
            }));
        }
    }

    let vats = ctx.values(Role::PartnerVat, row);
    for vat in &vats {
        for variant in identifier_variants(vat) {
            if let Some(partner) = directory.find_partner_by_vat(&variant)? {
                return Ok(Some(ResolvedPartner {
                    partner,
                    location: None,
                    created: false,
                }));
            }
        }
    }

    if ctx.partner_strategy == MappingStrategy::CreateOrLink {
        if let Some(vat) = vats.first() {
            let name = ctx.value(Role::TechnicianName, row).unwrap_or_else(|| vat.clone());
            let partner = directory.create_partner(&name, Some(vat))?;
            return Ok(Some(ResolvedPartner {
                partner,
                location: None,
                created: true,
            }));
        }
    }

    Ok(None)
}

/// Outcome of a catalog lookup for one row
#[derive(Debug, Clone, PartialEq)]
pub enum ProductLookup {
    Found(ProductRef),
    Missing(UnmatchedReference),
    /// The row carries no catalog code
    NoCode,
}

/// Exact code match in the catalog, then the template's first variant
pub fn resolve_product(
    ctx: &MappingContext,
    row: &RowRecord,
    catalog: &dyn ProductCatalog,
) -> Result<ProductLookup, LookupError> {
    let Some(code) = ctx.value(Role::Sku, row) else {
        return Ok(ProductLookup::NoCode);
    };

    if let Some(product) = catalog.find_by_code(&code)? {
        return Ok(ProductLookup::Found(product));
    }
    if let Some(product) = catalog.find_template_variant(&code)? {
        return Ok(ProductLookup::Found(product));
    }

    tracing::warn!(sku = %code, "product not found in catalog");
    Ok(ProductLookup::Missing(UnmatchedReference {
        key: code,
        description: ctx
            .value(Role::Description, row)
            .unwrap_or_else(|| "No description".to_string()),
        quantity: quantity(ctx, row),
    }))
}

/// First positive number among the quantity columns, else 1
pub fn quantity(ctx: &MappingContext, row: &RowRecord) -> f64 {
    ctx.values(Role::Quantity, row)
        .iter()
        .filter_map(|v| parse_number(v))
        .find(|q| *q > 0.0)
        .unwrap_or(1.0)
}

fn parse_number(value: &str) -> Option<f64> {
    let value = value.trim();
    value
        .parse::<f64>()
        .ok()
        .or_else(|| value.replace(',', ".").parse::<f64>().ok())
        .filter(|q| q.is_finite())
}

/// Human-readable note block for a created order
///
/// Absent fields are left out.
pub fn order_notes(ctx: &MappingContext, row: &RowRecord, sheet: &str, row_number: usize) -> String {
    let mut notes = vec![
        "=== Imported from FTP ===".to_string(),
        format!("Sheet: {} | Row: {}", sheet, row_number),
        String::new(),
    ];
    append_row_details(ctx, row, &mut notes);
    notes.join("\n")
}

pub(crate) fn append_row_details(ctx: &MappingContext, row: &RowRecord, notes: &mut Vec<String>) {
    let labelled = [
        (Role::TechnicianName, "Assigned technician"),
        (Role::ScheduleDate, "Scheduled date"),
        (Role::Region, "Region"),
        (Role::RequestType, "Request type"),
        (Role::Remarks, "Remarks"),
        (Role::GroupKey, "Backpack id"),
    ];
    for (role, label) in labelled {
        if let Some(value) = ctx.value(role, row) {
            notes.push(format!("{}: {}", label, value));
        }
    }
    for (column, value) in ctx.extras(row) {
        notes.push(format!("{}: {}", column, value));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::directory::memory::{DirectorySnapshot, MemoryDirectory, Partner, Product, ProductTemplate};
    use crate::registry::fields::TargetEntity;
    use crate::registry::{ColumnDescriptor, FileTypeDescriptor};

    fn row(pairs: &[(&str, &str)]) -> RowRecord {
        pairs.iter().copied().collect()
    }

    fn directory() -> MemoryDirectory {
        let customer = Partner::new("Cliente Uno", Some("11.111.111-1"));
        let customer_id = customer.id;
        let d = MemoryDirectory::new(DirectorySnapshot {
            partners: vec![customer],
            products: vec![Product::new("A1", "Router")],
            templates: vec![ProductTemplate {
                code: "T9".to_string(),
                name: "Modem".to_string(),
                variants: vec![Product::new("T9-1", "Modem v1")],
            }],
            ..DirectorySnapshot::default()
        });
        d.add_location("Pedro Soto", Some("9.876.543-2"), Some(customer_id)).unwrap();
        d.add_location("Sin Cliente", Some("5.555.555-5"), None).unwrap();
        d
    }

    #[test]
    fn test_quantity_defaults_to_one() {
        let ctx = MappingContext::auto();
        assert_eq!(quantity(&ctx, &row(&[("cantidad", "3")])), 3.0);
        assert_eq!(quantity(&ctx, &row(&[("cantidad", "2,5")])), 2.5);
        assert_eq!(quantity(&ctx, &row(&[("cantidad", "abc"), ("qty", "4")])), 4.0);
        assert_eq!(quantity(&ctx, &row(&[("cantidad", "0")])), 1.0);
        assert_eq!(quantity(&ctx, &row(&[("cantidad", "-2")])), 1.0);
        assert_eq!(quantity(&ctx, &row(&[("sku", "A1")])), 1.0);
    }

    #[test]
    fn test_partner_through_technician_location() {
        let d = directory();
        let ctx = MappingContext::auto();

        let found = resolve_partner(&ctx, &row(&[("rut_tecnico", "98765432")]), &d).unwrap().unwrap();
        assert_eq!(found.partner.name, "Cliente Uno");
        assert_eq!(found.location.unwrap().name, "Pedro Soto");

        let by_name = resolve_partner(&ctx, &row(&[("tecnico", "pedro soto")]), &d).unwrap().unwrap();
        assert_eq!(by_name.partner.name, "Cliente Uno");
    }

    #[test]
    fn test_technician_name_falls_back_to_partner_name() {
        let d = directory();
        let ctx = MappingContext::auto();

        let found = resolve_partner(&ctx, &row(&[("nombre_tecnico", " CLIENTE uno ")]), &d).unwrap().unwrap();
        assert_eq!(found.partner.name, "Cliente Uno");
        assert!(found.location.is_none());
        assert!(!found.created);

        assert!(resolve_partner(&ctx, &row(&[("tecnico", "Nadie")]), &d).unwrap().is_none());
    }

    #[test]
    fn test_partner_direct_fallback_and_miss() {
        let d = directory();
        let ctx = MappingContext::auto();

        let found = resolve_partner(&ctx, &row(&[("rut", "11111111-1")]), &d).unwrap().unwrap();
        assert!(found.location.is_none());
        assert_eq!(found.partner.name, "Cliente Uno");

        // location without a linked partner falls through to the direct search
        let unlinked = resolve_partner(&ctx, &row(&[("rut_tecnico", "5.555.555-5")]), &d).unwrap();
        assert!(unlinked.is_none());
        assert!(resolve_partner(&ctx, &row(&[("rut", "1-9")]), &d).unwrap().is_none());
    }

    #[test]
    fn test_partner_created_when_strategy_allows() {
        let d = directory();
        let descriptor = FileTypeDescriptor::new("Altas", "altas").with_column(
            ColumnDescriptor::new("rut")
                .bind(TargetEntity::Order, "partner_id")
                .strategy(MappingStrategy::CreateOrLink),
        );
        let ctx = MappingContext::resolve(Some(&descriptor));

        let created = resolve_partner(&ctx, &row(&[("rut", "7.777.777-7")]), &d).unwrap().unwrap();
        assert!(created.created);
        assert!(d.find_partner_by_vat("77777777").unwrap().is_some());
    }

    #[test]
    fn test_product_lookup_with_template_fallback() {
        let d = directory();
        let ctx = MappingContext::auto();

        assert!(matches!(
            resolve_product(&ctx, &row(&[("sku", "A1")]), &d).unwrap(),
            ProductLookup::Found(p) if p.name == "Router"
        ));
        assert!(matches!(
            resolve_product(&ctx, &row(&[("sku", "T9")]), &d).unwrap(),
            ProductLookup::Found(p) if p.code == "T9-1"
        ));
        assert_eq!(resolve_product(&ctx, &row(&[("descripcion", "x")]), &d).unwrap(), ProductLookup::NoCode);

        match resolve_product(&ctx, &row(&[("sku", "ZZ"), ("descripcion", "Cable"), ("cantidad", "2")]), &d).unwrap() {
            ProductLookup::Missing(missing) => {
                assert_eq!(missing.key, "ZZ");
                assert_eq!(missing.description, "Cable");
                assert_eq!(missing.quantity, 2.0);
            },
            other => panic!("unexpected lookup {:?}", other),
        }
    }

    #[test]
    fn test_notes_include_present_fields_only() {
        let ctx = MappingContext::auto();
        let notes = order_notes(
            &ctx,
            &row(&[("tecnico", "Ana"), ("fecha.agenda", "2024-05-02"), ("id_mochila", "M-9"), ("region", "")]),
            "Hoja1",
            4,
        );

        assert!(notes.starts_with("=== Imported from FTP ===\nSheet: Hoja1 | Row: 4"));
        assert!(notes.contains("Assigned technician: Ana"));
        assert!(notes.contains("Scheduled date: 2024-05-02"));
        assert!(notes.contains("Backpack id: M-9"));
        assert!(!notes.contains("Region"));
    }
}
