//! In-memory directory, catalog and order book
//!
//! State is a plain [`DirectorySnapshot`] that round-trips through JSON, so
//! the CLI can load it from `SHEETSYNC_DIRECTORY_FILE` and write created
//! orders back.

use serde::{Deserialize, Serialize};
use sheetsync_common::SheetSyncError;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    identifiers_match, LocationEntry, OrderBook, OrderDraft, OrderRef, PartnerDirectory,
    PartnerRef, ProductCatalog, ProductRef,
};
use crate::error::LookupError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partner {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub vat: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub vat: Option<String>,
    /// Id of the linked partner
    #[serde(default)]
    pub partner_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub code: String,
    pub name: String,
}

/// Template whose variants are used when no product carries the code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductTemplate {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub variants: Vec<Product>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub name: String,
    #[serde(flatten)]
    pub draft: OrderDraft,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    #[serde(default)]
    pub partners: Vec<Partner>,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub templates: Vec<ProductTemplate>,
    #[serde(default)]
    pub orders: Vec<Order>,
}

impl DirectorySnapshot {
    fn partner_ref(&self, id: Uuid) -> Option<PartnerRef> {
        self.partners.iter().find(|p| p.id == id).map(Partner::to_ref)
    }

    fn location_entry(&self, location: &Location) -> LocationEntry {
        LocationEntry {
            id: location.id,
            name: location.name.clone(),
            vat: location.vat.clone(),
            partner: location.partner_id.and_then(|id| self.partner_ref(id)),
        }
    }
}

impl Partner {
    pub fn new(name: impl Into<String>, vat: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            vat: vat.map(str::to_string),
        }
    }

    fn to_ref(&self) -> PartnerRef {
        PartnerRef {
            id: self.id,
            name: self.name.clone(),
            vat: self.vat.clone(),
        }
    }
}

impl Product {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            name: name.into(),
        }
    }

    fn to_ref(&self) -> ProductRef {
        ProductRef {
            id: self.id,
            code: self.code.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: Mutex<DirectorySnapshot>,
}

impl MemoryDirectory {
    pub fn new(snapshot: DirectorySnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
        }
    }

    /// Load a snapshot; a missing file yields an empty directory
    pub fn load(path: &Path) -> sheetsync_common::Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "directory file not found, starting empty");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let snapshot: DirectorySnapshot = serde_json::from_str(&text)?;
        Ok(Self::new(snapshot))
    }

    /// Write the snapshot through a temporary file renamed over `path`
    pub fn save(&self, path: &Path) -> sheetsync_common::Result<()> {
        let snapshot = self.snapshot().map_err(SheetSyncError::state)?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(tmp.as_file(), &snapshot)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn snapshot(&self) -> Result<DirectorySnapshot, LookupError> {
        Ok(self.lock()?.clone())
    }

    /// Link a new location to `partner_id`
    pub fn add_location(&self, name: &str, vat: Option<&str>, partner_id: Option<Uuid>) -> Result<Uuid, LookupError> {
        let location = Location {
            id: Uuid::new_v4(),
            name: name.to_string(),
            vat: vat.map(str::to_string),
            partner_id,
        };
        let id = location.id;
        self.lock()?.locations.push(location);
        Ok(id)
    }

    fn lock(&self) -> Result<MutexGuard<'_, DirectorySnapshot>, LookupError> {
        self.state
            .lock()
            .map_err(|_| LookupError::Unavailable("directory lock poisoned".to_string()))
    }
}

impl PartnerDirectory for MemoryDirectory {
    fn find_partner_by_vat(&self, vat: &str) -> Result<Option<PartnerRef>, LookupError> {
        let state = self.lock()?;
        Ok(state
            .partners
            .iter()
            .find(|p| p.vat.as_deref().is_some_and(|stored| identifiers_match(vat, stored)))
            .map(Partner::to_ref))
    }

    fn find_partner_by_name(&self, name: &str) -> Result<Option<PartnerRef>, LookupError> {
        let wanted = name.trim().to_lowercase();
        let state = self.lock()?;
        Ok(state
            .partners
            .iter()
            .find(|p| p.name.trim().to_lowercase() == wanted)
            .map(Partner::to_ref))
    }

    fn create_partner(&self, name: &str, vat: Option<&str>) -> Result<PartnerRef, LookupError> {
        let partner = Partner::new(name, vat);
        let created = partner.to_ref();
        self.lock()?.partners.push(partner);
        tracing::info!(partner = %created.name, "partner created");
        Ok(created)
    }

    fn find_location_by_vat(&self, vat: &str) -> Result<Option<LocationEntry>, LookupError> {
        let state = self.lock()?;
        Ok(state
            .locations
            .iter()
            .find(|l| l.vat.as_deref().is_some_and(|stored| identifiers_match(vat, stored)))
            .map(|l| state.location_entry(l)))
    }

    fn find_location_by_name(&self, name: &str) -> Result<Option<LocationEntry>, LookupError> {
        let wanted = name.trim().to_lowercase();
        let state = self.lock()?;
        Ok(state
            .locations
            .iter()
            .find(|l| l.name.trim().to_lowercase() == wanted)
            .map(|l| state.location_entry(l)))
    }
}

impl ProductCatalog for MemoryDirectory {
    fn find_by_code(&self, code: &str) -> Result<Option<ProductRef>, LookupError> {
        let state = self.lock()?;
        Ok(state.products.iter().find(|p| p.code == code).map(Product::to_ref))
    }

    fn find_template_variant(&self, code: &str) -> Result<Option<ProductRef>, LookupError> {
        let state = self.lock()?;
        Ok(state
            .templates
            .iter()
            .find(|t| t.code == code)
            .and_then(|t| t.variants.first())
            .map(Product::to_ref))
    }
}

impl OrderBook for MemoryDirectory {
    fn create_order(&self, draft: OrderDraft) -> Result<OrderRef, LookupError> {
        let mut state = self.lock()?;
        let order = Order {
            id: Uuid::new_v4(),
            name: format!("SO{:05}", state.orders.len() + 1),
            draft,
        };
        let created = OrderRef {
            id: order.id,
            name: order.name.clone(),
        };
        state.orders.push(order);
        Ok(created)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn directory() -> MemoryDirectory {
        let acme = Partner::new("ACME Ltda", Some("12.345.678-9"));
        let acme_id = acme.id;
        let directory = MemoryDirectory::new(DirectorySnapshot {
            partners: vec![acme],
            products: vec![Product::new("A1", "Router")],
            templates: vec![ProductTemplate {
                code: "T9".to_string(),
                name: "Modem".to_string(),
                variants: vec![Product::new("T9-BLK", "Modem black"), Product::new("T9-WHT", "Modem white")],
            }],
            ..DirectorySnapshot::default()
        });
        directory.add_location("Juan Perez", Some("9.876.543-2"), Some(acme_id)).unwrap();
        directory
    }

    #[test]
    fn test_partner_lookup_by_vat_variants_and_name() {
        let d = directory();
        for vat in ["12345678-9", "12.345.6789", "123456789"] {
            assert_eq!(d.find_partner_by_vat(vat).unwrap().unwrap().name, "ACME Ltda");
        }
        assert!(d.find_partner_by_name("acme ltda").unwrap().is_some());
        assert!(d.find_partner_by_vat("1-9").unwrap().is_none());
    }

    #[test]
    fn test_location_links_to_partner() {
        let d = directory();
        let location = d.find_location_by_vat("98765432").unwrap().unwrap();
        assert_eq!(location.partner.unwrap().name, "ACME Ltda");
        assert!(d.find_location_by_name("JUAN PEREZ").unwrap().is_some());
    }

    #[test]
    fn test_catalog_template_fallback_uses_first_variant() {
        let d = directory();
        assert_eq!(d.find_by_code("A1").unwrap().unwrap().name, "Router");
        assert!(d.find_by_code("a1").unwrap().is_none());
        assert_eq!(d.find_template_variant("T9").unwrap().unwrap().code, "T9-BLK");
    }

    #[test]
    fn test_orders_are_numbered_and_saved() {
        let d = directory();
        let partner = d.find_partner_by_vat("123456789").unwrap().unwrap();
        let product = d.find_by_code("A1").unwrap().unwrap();
        let draft = OrderDraft {
            partner,
            client_order_ref: None,
            date_order: None,
            technician: None,
            origin: "orders.xlsx".to_string(),
            note: String::new(),
            lines: vec![super::super::OrderLineDraft {
                product,
                quantity: 2.0,
                description: "Router".to_string(),
            }],
        };
        assert_eq!(d.create_order(draft.clone()).unwrap().name, "SO00001");
        assert_eq!(d.create_order(draft).unwrap().name, "SO00002");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directory.json");
        d.save(&path).unwrap();
        let restored = MemoryDirectory::load(&path).unwrap();
        assert_eq!(restored.snapshot().unwrap().orders.len(), 2);
    }

    #[test]
    fn test_save_replaces_file_and_leaves_no_temporaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("directory.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{\"partners\": [").unwrap();

        let d = MemoryDirectory::default();
        d.create_partner("Cliente Dos", Some("22.222.222-2")).unwrap();
        d.save(&path).unwrap();

        let restored = MemoryDirectory::load(&path).unwrap();
        assert!(restored.find_partner_by_vat("222222222").unwrap().is_some());

        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("directory.json")]);
    }
}
