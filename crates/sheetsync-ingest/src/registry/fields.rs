//! Static registry of bindable target fields
//!
//! Each target entity exposes a fixed list of fields a column may bind to,
//! with the semantic type used for compatibility checks. The same module
//! holds the name patterns used to guess a binding from a column name.

use serde::{Deserialize, Serialize};

use super::ColumnType;

/// Kind of record a column can feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetEntity {
    Order,
    Product,
    Location,
}

impl std::fmt::Display for TargetEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetEntity::Order => write!(f, "order"),
            TargetEntity::Product => write!(f, "product"),
            TargetEntity::Location => write!(f, "location"),
        }
    }
}

/// Semantic type of a target field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Float,
    Date,
    DateTime,
    Boolean,
    /// Link to another record, resolved by lookup
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub field_type: FieldType,
}

const fn spec(name: &'static str, label: &'static str, field_type: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        label,
        field_type,
    }
}

const ORDER_FIELDS: &[FieldSpec] = &[
    spec("partner_id", "Customer", FieldType::Reference),
    spec("date_order", "Order date", FieldType::DateTime),
    spec("client_order_ref", "Customer reference", FieldType::Text),
    spec("note", "Notes", FieldType::Text),
    spec("user_id", "Technician", FieldType::Reference),
    spec("product_uom_qty", "Quantity", FieldType::Float),
    spec("origin", "Source document", FieldType::Text),
];

const PRODUCT_FIELDS: &[FieldSpec] = &[
    spec("default_code", "Internal reference", FieldType::Text),
    spec("name", "Name", FieldType::Text),
    spec("categ_id", "Category", FieldType::Reference),
];

const LOCATION_FIELDS: &[FieldSpec] = &[
    spec("name", "Name", FieldType::Text),
    spec("vat", "Technician tax id", FieldType::Text),
    spec("street", "Street", FieldType::Text),
    spec("city", "City", FieldType::Text),
    spec("state_id", "Region", FieldType::Reference),
    spec("ref", "Commerce code", FieldType::Text),
];

/// Permitted bindings for `entity`
pub fn fields(entity: TargetEntity) -> &'static [FieldSpec] {
    match entity {
        TargetEntity::Order => ORDER_FIELDS,
        TargetEntity::Product => PRODUCT_FIELDS,
        TargetEntity::Location => LOCATION_FIELDS,
    }
}

pub fn field(entity: TargetEntity, name: &str) -> Option<&'static FieldSpec> {
    fields(entity).iter().find(|f| f.name == name)
}

/// Whether a column of `column` type may feed a field of `field` type
///
/// Text columns may feed references since references resolve by text key.
pub fn is_compatible(column: ColumnType, field: FieldType) -> bool {
    use FieldType as F;
    match column {
        ColumnType::Text => matches!(field, F::Text | F::Reference),
        ColumnType::Integer => matches!(field, F::Integer | F::Float | F::Reference),
        ColumnType::Float => matches!(field, F::Float),
        ColumnType::Date => matches!(field, F::Date | F::DateTime),
        ColumnType::DateTime => matches!(field, F::DateTime),
        ColumnType::Boolean => matches!(field, F::Boolean),
    }
}

/// Column name fragments and the binding they suggest, most specific first
const AUTO_PATTERNS: &[(&str, TargetEntity, &str)] = &[
    ("rut_tecnico", TargetEntity::Location, "vat"),
    ("tecnico_rut", TargetEntity::Location, "vat"),
    ("rut_del_tecnico", TargetEntity::Location, "vat"),
    ("nombre_tecnico", TargetEntity::Order, "user_id"),
    ("tecnico_nombre", TargetEntity::Order, "user_id"),
    ("rut", TargetEntity::Order, "partner_id"),
    ("fecha", TargetEntity::Order, "date_order"),
    ("ticket", TargetEntity::Order, "client_order_ref"),
    ("id_mochila", TargetEntity::Order, "client_order_ref"),
    ("comentario", TargetEntity::Order, "note"),
    ("observacion", TargetEntity::Order, "note"),
    ("tecnico", TargetEntity::Order, "user_id"),
    ("cantidad", TargetEntity::Order, "product_uom_qty"),
    ("quantity", TargetEntity::Order, "product_uom_qty"),
    ("qty", TargetEntity::Order, "product_uom_qty"),
    ("unidades", TargetEntity::Order, "product_uom_qty"),
    ("codigo_producto", TargetEntity::Product, "default_code"),
    ("sku", TargetEntity::Product, "default_code"),
    ("codigo", TargetEntity::Product, "default_code"),
    ("descripcion", TargetEntity::Product, "name"),
    ("tipo_equipo", TargetEntity::Product, "categ_id"),
    ("ubicacion", TargetEntity::Location, "name"),
    ("nombre_fantasia", TargetEntity::Location, "name"),
    ("direccion", TargetEntity::Location, "street"),
    ("comuna", TargetEntity::Location, "city"),
    ("region", TargetEntity::Location, "state_id"),
    ("cod_comercio", TargetEntity::Location, "ref"),
];

/// Guess a binding for a column from its technical name
///
/// Restrict the guess to one entity with `entity`.
pub fn suggest_binding(
    technical_name: &str,
    entity: Option<TargetEntity>,
) -> Option<(TargetEntity, &'static str)> {
    let name = technical_name_of(technical_name);
    AUTO_PATTERNS
        .iter()
        .filter(|(_, e, _)| entity.map_or(true, |wanted| wanted == *e))
        .find(|(pattern, _, _)| name.contains(pattern))
        .map(|(_, e, f)| (*e, *f))
}

/// Default technical name of a column: lowercase, `.` and spaces become `_`
pub fn technical_name_of(column: &str) -> String {
    column.trim().to_lowercase().replace(['.', ' '], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_entity_has_fields() {
        for entity in [TargetEntity::Order, TargetEntity::Product, TargetEntity::Location] {
            assert!(!fields(entity).is_empty());
        }
        assert_eq!(field(TargetEntity::Order, "partner_id").map(|f| f.field_type), Some(FieldType::Reference));
        assert!(field(TargetEntity::Product, "partner_id").is_none());
    }

    #[test]
    fn test_compatibility() {
        assert!(is_compatible(ColumnType::Text, FieldType::Reference));
        assert!(is_compatible(ColumnType::Date, FieldType::DateTime));
        assert!(!is_compatible(ColumnType::Boolean, FieldType::Text));
        assert!(!is_compatible(ColumnType::Float, FieldType::Integer));
    }

    #[test]
    fn test_technical_name() {
        assert_eq!(technical_name_of("Rut.Tecnico"), "rut_tecnico");
        assert_eq!(technical_name_of(" Fecha Agenda "), "fecha_agenda");
    }

    #[test]
    fn test_suggestions_prefer_specific_patterns() {
        assert_eq!(suggest_binding("rut.tecnico", None), Some((TargetEntity::Location, "vat")));
        assert_eq!(suggest_binding("RUT", None), Some((TargetEntity::Order, "partner_id")));
        assert_eq!(suggest_binding("fecha_agendada", None), Some((TargetEntity::Order, "date_order")));
        assert_eq!(suggest_binding("Codigo Producto", None), Some((TargetEntity::Product, "default_code")));
        assert_eq!(suggest_binding("descripcion", Some(TargetEntity::Order)), None);
        assert_eq!(suggest_binding("color", None), None);
    }
}
