//! Column mapping resolved once per file type
//!
//! A [`MappingContext`] turns a descriptor's column bindings (or, without
//! them, the built-in name patterns) into a fixed table of [`Role`]s the
//! engine reads rows through.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{HashMap, HashSet};

use crate::normalize::RowRecord;
use crate::registry::fields::{suggest_binding, TargetEntity};
use crate::registry::{ColumnDescriptor, ComputeTransform, FileTypeDescriptor, MappingStrategy};

/// What a column means to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Customer tax id
    PartnerVat,
    TechnicianVat,
    TechnicianName,
    Sku,
    Description,
    Quantity,
    ClientRef,
    ScheduleDate,
    Region,
    RequestType,
    Remarks,
    GroupKey,
}

impl Role {
    /// Column names read when nothing is bound to the role
    pub fn default_columns(self) -> &'static [&'static str] {
        match self {
            Role::PartnerVat => &["rut", "rut.tecnico", "rut_tecnico", "tecnico_rut", "rut.del.tecnico"],
            Role::TechnicianVat => &["rut.tecnico", "rut_tecnico", "tecnico_rut", "rut.del.tecnico"],
            Role::TechnicianName => &["tecnico", "nombre.tecnico", "nombre_tecnico", "tecnico.nombre"],
            Role::Sku => &["sku", "codigo", "codigo_producto"],
            Role::Description => &["descripcion"],
            Role::Quantity => &["cantidad", "qty", "quantity", "cant", "unidades"],
            Role::ClientRef => &[],
            Role::ScheduleDate => &["fecha_agenda", "fecha.agenda"],
            Role::Region => &["region"],
            Role::RequestType => &["tipo_solicitud", "tipo.solicitud"],
            Role::Remarks => &["observacion", "observaciones"],
            Role::GroupKey => &["id.mochila", "id_mochila"],
        }
    }

    fn for_binding(entity: TargetEntity, field: &str) -> Option<Role> {
        match (entity, field) {
            (TargetEntity::Order, "partner_id") => Some(Role::PartnerVat),
            (TargetEntity::Location, "vat") => Some(Role::TechnicianVat),
            (TargetEntity::Order, "user_id") | (TargetEntity::Location, "name") => {
                Some(Role::TechnicianName)
            },
            (TargetEntity::Product, "default_code") => Some(Role::Sku),
            (TargetEntity::Product, "name") => Some(Role::Description),
            (TargetEntity::Order, "product_uom_qty") => Some(Role::Quantity),
            (TargetEntity::Order, "client_order_ref") => Some(Role::ClientRef),
            (TargetEntity::Order, "date_order") => Some(Role::ScheduleDate),
            (TargetEntity::Location, "state_id") => Some(Role::Region),
            (TargetEntity::Order, "note") => Some(Role::Remarks),
            _ => None,
        }
    }
}

/// How one column is read
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRule {
    pub column: String,
    pub strategy: MappingStrategy,
    pub transform: Option<ComputeTransform>,
    pub date_format: Option<String>,
    pub default_value: Option<String>,
}

impl ColumnRule {
    fn named(column: &str) -> Self {
        Self {
            column: column.to_string(),
            strategy: MappingStrategy::Direct,
            transform: None,
            date_format: None,
            default_value: None,
        }
    }

    fn from_descriptor(column: &ColumnDescriptor) -> Self {
        Self {
            column: column.name.clone(),
            strategy: column.strategy,
            transform: column.transform,
            date_format: column.date_format.clone(),
            default_value: column.default_value.clone(),
        }
    }

    /// Cell value after defaulting and transforms; `None` when empty
    pub fn read(&self, row: &RowRecord) -> Option<String> {
        let raw = row
            .value(&self.column)
            .map(str::to_string)
            .or_else(|| self.default_value.clone().filter(|v| !v.trim().is_empty()))?;

        match (self.strategy, self.transform) {
            (MappingStrategy::Compute, Some(transform)) => {
                Some(apply_transform(transform, &raw, self.date_format.as_deref()))
            },
            _ => Some(raw),
        }
    }
}

/// Apply a compute transform; a date that does not parse is kept as-is
pub fn apply_transform(transform: ComputeTransform, value: &str, date_format: Option<&str>) -> String {
    match transform {
        ComputeTransform::Trim => value.trim().to_string(),
        ComputeTransform::Upper => value.trim().to_uppercase(),
        ComputeTransform::Lower => value.trim().to_lowercase(),
        ComputeTransform::DigitsOnly => value.chars().filter(char::is_ascii_digit).collect(),
        ComputeTransform::Date => {
            let value = value.trim();
            let format = date_format.unwrap_or("%d/%m/%Y");
            if let Ok(at) = NaiveDateTime::parse_from_str(value, format) {
                at.format("%Y-%m-%dT%H:%M:%S").to_string()
            } else if let Ok(date) = NaiveDate::parse_from_str(value, format) {
                date.format("%Y-%m-%d").to_string()
            } else {
                value.to_string()
            }
        },
    }
}

/// Whether orders are created per row or per group key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Row,
    Group,
}

/// Resolved mapping for one file type
#[derive(Debug, Clone)]
pub struct MappingContext {
    pub file_type: Option<String>,
    pub granularity: Granularity,
    roles: HashMap<Role, Vec<ColumnRule>>,

    /// Bound columns with no dedicated role; shown in order notes
    extras: Vec<ColumnRule>,

    /// Strategy for the customer lookup; `CreateOrLink` allows creation
    pub partner_strategy: MappingStrategy,
}

impl MappingContext {
    /// Built-in patterns only
    pub fn auto() -> Self {
        Self::resolve(None)
    }

    pub fn resolve(descriptor: Option<&FileTypeDescriptor>) -> Self {
        let mut roles: HashMap<Role, Vec<ColumnRule>> = HashMap::new();
        let mut extras = Vec::new();
        let mut ignored = HashSet::new();
        let mut partner_strategy = MappingStrategy::LinkOnly;

        let columns = descriptor.map(|d| d.columns.as_slice()).unwrap_or_default();
        for column in columns {
            if column.strategy == MappingStrategy::Ignore {
                ignored.insert(column.name.trim().to_lowercase());
                continue;
            }
            let binding = match &column.target {
                Some(b) => Some((b.entity, b.field.as_str())),
                None => suggest_binding(&column.technical_name, None),
            };
            let Some((entity, field)) = binding else {
                continue;
            };

            let rule = ColumnRule::from_descriptor(column);
            match Role::for_binding(entity, field) {
                Some(role) => {
                    if role == Role::PartnerVat && !roles.contains_key(&role) {
                        partner_strategy = column.strategy;
                    }
                    roles.entry(role).or_default().push(rule);
                },
                None => extras.push(rule),
            }
        }

        let group_field = descriptor.and_then(|d| d.group_by_field.clone());
        if let Some(field) = &group_field {
            roles.entry(Role::GroupKey).or_default().insert(0, ColumnRule::named(field));
        }

        for role in ALL_ROLES {
            let rules = roles.entry(role).or_default();
            for name in role.default_columns() {
                let known = rules.iter().any(|r| r.column.eq_ignore_ascii_case(name));
                if !known && !ignored.contains(*name) {
                    rules.push(ColumnRule::named(name));
                }
            }
        }

        Self {
            file_type: descriptor.map(|d| d.name.clone()),
            granularity: match descriptor {
                Some(d) if d.create_per_group => Granularity::Group,
                _ => Granularity::Row,
            },
            roles,
            extras,
            partner_strategy: match partner_strategy {
                MappingStrategy::CreateOrLink => MappingStrategy::CreateOrLink,
                _ => MappingStrategy::LinkOnly,
            },
        }
    }

    pub fn rules(&self, role: Role) -> &[ColumnRule] {
        self.roles.get(&role).map(Vec::as_slice).unwrap_or_default()
    }

    /// Value of `role` in `row`
    ///
    /// Concatenated bindings join every non-empty value with a space;
    /// otherwise the first non-empty column wins.
    pub fn value(&self, role: Role, row: &RowRecord) -> Option<String> {
        let rules = self.rules(role);
        if rules.iter().any(|r| r.strategy == MappingStrategy::Concatenate) {
            let joined = rules
                .iter()
                .filter(|r| r.strategy == MappingStrategy::Concatenate)
                .filter_map(|r| r.read(row))
                .collect::<Vec<_>>()
                .join(" ");
            if !joined.is_empty() {
                return Some(joined);
            }
        }
        rules.iter().find_map(|r| r.read(row))
    }

    /// Every candidate value of `role`, in rule order
    pub fn values(&self, role: Role, row: &RowRecord) -> Vec<String> {
        self.rules(role).iter().filter_map(|r| r.read(row)).collect()
    }

    /// Extra bound columns with a value, as `(column, value)`
    pub fn extras(&self, row: &RowRecord) -> Vec<(String, String)> {
        self.extras
            .iter()
            .filter_map(|r| r.read(row).map(|v| (r.column.clone(), v)))
            .collect()
    }
}

const ALL_ROLES: [Role; 12] = [
    Role::PartnerVat,
    Role::TechnicianVat,
    Role::TechnicianName,
    Role::Sku,
    Role::Description,
    Role::Quantity,
    Role::ClientRef,
    Role::ScheduleDate,
    Role::Region,
    Role::RequestType,
    Role::Remarks,
    Role::GroupKey,
];

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::registry::ColumnDescriptor;

    fn row(pairs: &[(&str, &str)]) -> RowRecord {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_auto_context_reads_default_columns() {
        let ctx = MappingContext::auto();
        let r = row(&[("codigo", "A1"), ("rut", "11.111.111-1"), ("Tecnico", "Ana")]);

        assert_eq!(ctx.granularity, Granularity::Row);
        assert_eq!(ctx.value(Role::Sku, &r).as_deref(), Some("A1"));
        assert_eq!(ctx.value(Role::PartnerVat, &r).as_deref(), Some("11.111.111-1"));
        assert_eq!(ctx.value(Role::TechnicianName, &r).as_deref(), Some("Ana"));
        assert_eq!(ctx.value(Role::TechnicianVat, &r), None);
        assert_eq!(ctx.partner_strategy, MappingStrategy::LinkOnly);
    }

    #[test]
    fn test_bound_columns_take_precedence() {
        let descriptor = FileTypeDescriptor::new("Installs", "inst")
            .with_column(
                ColumnDescriptor::new("RUT Cliente")
                    .bind(TargetEntity::Order, "partner_id")
                    .strategy(MappingStrategy::CreateOrLink),
            )
            .with_column(ColumnDescriptor::new("Modelo").bind(TargetEntity::Product, "default_code"));
        let ctx = MappingContext::resolve(Some(&descriptor));
        let r = row(&[("RUT Cliente", "1-9"), ("rut", "2-7"), ("Modelo", "X"), ("sku", "Y")]);

        assert_eq!(ctx.value(Role::PartnerVat, &r).as_deref(), Some("1-9"));
        assert_eq!(ctx.value(Role::Sku, &r).as_deref(), Some("X"));
        assert_eq!(ctx.partner_strategy, MappingStrategy::CreateOrLink);
        assert_eq!(ctx.file_type.as_deref(), Some("Installs"));
    }

    #[test]
    fn test_unbound_columns_are_auto_detected_and_ignored_columns_dropped() {
        let descriptor = FileTypeDescriptor::new("Installs", "inst")
            .with_column(ColumnDescriptor::new("Rut.Tecnico"))
            .with_column(ColumnDescriptor::new("rut").strategy(MappingStrategy::Ignore));
        let ctx = MappingContext::resolve(Some(&descriptor));
        let r = row(&[("Rut.Tecnico", "9.876.543-2"), ("rut", "1-9")]);

        assert_eq!(ctx.value(Role::TechnicianVat, &r).as_deref(), Some("9.876.543-2"));
        assert!(!ctx.rules(Role::PartnerVat).iter().any(|rule| rule.column == "rut"));
    }

    #[test]
    fn test_concatenate_and_compute() {
        let mut first = ColumnDescriptor::new("obs1")
            .bind(TargetEntity::Order, "note")
            .strategy(MappingStrategy::Concatenate);
        first.default_value = Some("n/a".to_string());
        let second = ColumnDescriptor::new("obs2")
            .bind(TargetEntity::Order, "note")
            .strategy(MappingStrategy::Concatenate);
        let mut code = ColumnDescriptor::new("code")
            .bind(TargetEntity::Product, "default_code")
            .strategy(MappingStrategy::Compute);
        code.transform = Some(ComputeTransform::Upper);
        let descriptor = FileTypeDescriptor::new("T", "t")
            .with_column(first)
            .with_column(second)
            .with_column(code);
        let ctx = MappingContext::resolve(Some(&descriptor));

        let r = row(&[("obs1", ""), ("obs2", "ring twice"), ("code", " ab-1 ")]);
        assert_eq!(ctx.value(Role::Remarks, &r).as_deref(), Some("n/a ring twice"));
        assert_eq!(ctx.value(Role::Sku, &r).as_deref(), Some("AB-1"));
    }

    #[test]
    fn test_group_mode_uses_configured_field_first() {
        let mut descriptor = FileTypeDescriptor::new("Backpacks", "moch");
        descriptor.create_per_group = true;
        descriptor.group_by_field = Some("bolso".to_string());
        let ctx = MappingContext::resolve(Some(&descriptor));

        assert_eq!(ctx.granularity, Granularity::Group);
        let r = row(&[("bolso", "B-7"), ("id_mochila", "M-1")]);
        assert_eq!(ctx.value(Role::GroupKey, &r).as_deref(), Some("B-7"));
    }

    #[test]
    fn test_transforms() {
        assert_eq!(apply_transform(ComputeTransform::DigitsOnly, "12.345.678-9", None), "123456789");
        assert_eq!(apply_transform(ComputeTransform::Date, "05/03/2024", None), "2024-03-05");
        assert_eq!(
            apply_transform(ComputeTransform::Date, "2024.03.05 08:30", Some("%Y.%m.%d %H:%M")),
            "2024-03-05T08:30:00"
        );
        assert_eq!(apply_transform(ComputeTransform::Date, "soon", None), "soon");
        assert_eq!(apply_transform(ComputeTransform::Lower, " ABC ", None), "abc");
    }
}
