//! Directory and catalog collaborators
//!
//! The mapping engine only depends on these query contracts. The customer
//! directory, product catalog and order book live outside this crate;
//! [`memory::MemoryDirectory`] is a self-contained implementation backed by a
//! JSON snapshot.

pub mod memory;

pub use memory::MemoryDirectory;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LookupError;

/// Customer the created order belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerRef {
    pub id: Uuid,
    pub name: String,
    pub vat: Option<String>,
}

/// Technician or service location linked to a partner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationEntry {
    pub id: Uuid,
    pub name: String,
    pub vat: Option<String>,
    pub partner: Option<PartnerRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: Uuid,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLineDraft {
    pub product: ProductRef,
    pub quantity: f64,
    pub description: String,
}

/// Order to create, with at least one line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub partner: PartnerRef,
    pub client_order_ref: Option<String>,
    pub date_order: Option<String>,
    pub technician: Option<String>,
    pub origin: String,
    pub note: String,
    pub lines: Vec<OrderLineDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    pub id: Uuid,
    pub name: String,
}

/// Customer and technician/location directory
pub trait PartnerDirectory: Send + Sync {
    /// Partner whose tax id equals `vat` in any textual variant
    fn find_partner_by_vat(&self, vat: &str) -> Result<Option<PartnerRef>, LookupError>;

    /// Partner whose name equals `name`, ignoring case
    fn find_partner_by_name(&self, name: &str) -> Result<Option<PartnerRef>, LookupError>;

    fn create_partner(&self, name: &str, vat: Option<&str>) -> Result<PartnerRef, LookupError>;

    fn find_location_by_vat(&self, vat: &str) -> Result<Option<LocationEntry>, LookupError>;

    fn find_location_by_name(&self, name: &str) -> Result<Option<LocationEntry>, LookupError>;
}

/// Product catalog with a template-level fallback
pub trait ProductCatalog: Send + Sync {
    /// Product whose code matches exactly
    fn find_by_code(&self, code: &str) -> Result<Option<ProductRef>, LookupError>;

    /// First variant of the template whose code matches exactly
    fn find_template_variant(&self, code: &str) -> Result<Option<ProductRef>, LookupError>;
}

pub trait OrderBook: Send + Sync {
    fn create_order(&self, draft: OrderDraft) -> Result<OrderRef, LookupError>;
}

/// Textual variants of a tax identifier: as given, without `-`, without `.`,
/// without both
///
/// Case is normalized to upper so a trailing check letter compares equal.
pub fn identifier_variants(raw: &str) -> Vec<String> {
    let base = raw.trim().to_uppercase();
    let mut variants = Vec::with_capacity(4);
    for candidate in [
        base.clone(),
        base.replace('-', ""),
        base.replace('.', ""),
        base.replace(['-', '.'], ""),
    ] {
        if !candidate.is_empty() && !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}

/// Whether two identifiers share a textual variant
pub fn identifiers_match(left: &str, right: &str) -> bool {
    let right = identifier_variants(right);
    identifier_variants(left).iter().any(|v| right.contains(v))
}
