//! File type registry
//!
//! A [`FileTypeDescriptor`] describes one category of incoming file: the
//! filename code used to recognise it, codec settings, whether its rows drive
//! order creation, and its [`ColumnDescriptor`]s. [`FileTypeRegistry`]
//! resolves which descriptor applies to a file.

pub mod fields;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::ConfigurationError;
use crate::normalize::{NormalizeOptions, TextEncoding};
use fields::{TargetEntity, technical_name_of};

/// Declared data type of a source column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    #[serde(alias = "char")]
    Text,
    Integer,
    Float,
    Date,
    DateTime,
    Boolean,
}

/// How a column value reaches its target field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MappingStrategy {
    /// Copy the value as-is
    #[default]
    Direct,
    /// Look the value up, creating the referenced record when missing
    #[serde(alias = "create")]
    CreateOrLink,
    /// Look the value up, never create
    #[serde(alias = "search")]
    LinkOnly,
    /// Join with the other columns bound to the same field
    #[serde(alias = "concat")]
    Concatenate,
    /// Apply the column's [`ComputeTransform`]
    Compute,
    Ignore,
}

/// Closed set of value transforms for [`MappingStrategy::Compute`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeTransform {
    Trim,
    Upper,
    Lower,
    DigitsOnly,
    /// Reformat using the column's `date_format` as input pattern
    Date,
}

/// Target entity and field a column feeds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldBinding {
    pub entity: TargetEntity,
    pub field: String,
}

impl FieldBinding {
    pub fn new(entity: TargetEntity, field: impl Into<String>) -> Self {
        Self {
            entity,
            field: field.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column header as it appears in the file
    pub name: String,

    /// Filled from `name` when left empty
    #[serde(default)]
    pub technical_name: String,

    #[serde(default)]
    pub data_type: ColumnType,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub key: bool,

    #[serde(default)]
    pub target: Option<FieldBinding>,

    #[serde(default)]
    pub strategy: MappingStrategy,

    #[serde(default)]
    pub transform: Option<ComputeTransform>,

    /// chrono format string, e.g. "%d/%m/%Y"
    #[serde(default)]
    pub date_format: Option<String>,

    #[serde(default)]
    pub default_value: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            technical_name: technical_name_of(&name),
            name,
            data_type: ColumnType::Text,
            required: false,
            key: false,
            target: None,
            strategy: MappingStrategy::Direct,
            transform: None,
            date_format: None,
            default_value: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn bind(mut self, entity: TargetEntity, field: &str) -> Self {
        self.target = Some(FieldBinding::new(entity, field));
        self
    }

    pub fn strategy(mut self, strategy: MappingStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

fn default_extension() -> String {
    "xlsx".to_string()
}

fn default_delimiter() -> char {
    ','
}

fn default_sequence() -> i32 {
    10
}

fn default_true() -> bool {
    true
}

/// Configuration for one category of incoming file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTypeDescriptor {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,

    /// Matched case-insensitively as a substring of the file name
    pub code: String,

    #[serde(default = "default_extension")]
    pub extension: String,

    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    #[serde(default)]
    pub encoding: TextEncoding,

    /// Rows of this file type create orders
    #[serde(default = "default_true")]
    pub create_orders: bool,

    /// Aggregate rows sharing `group_by_field` into one order
    #[serde(default)]
    pub create_per_group: bool,

    #[serde(default)]
    pub group_by_field: Option<String>,

    #[serde(default = "default_sequence")]
    pub sequence: i32,

    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
}

impl FileTypeDescriptor {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            code: code.into(),
            extension: default_extension(),
            delimiter: default_delimiter(),
            encoding: TextEncoding::Utf8,
            create_orders: true,
            create_per_group: false,
            group_by_field: None,
            sequence: default_sequence(),
            active: true,
            columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    /// Reject empty names, duplicate columns and unknown target fields
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::EmptyField("name"));
        }
        if self.code.trim().is_empty() {
            return Err(ConfigurationError::EmptyField("code"));
        }
        if !self.delimiter.is_ascii() {
            return Err(ConfigurationError::InvalidDelimiter(self.delimiter));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.trim().is_empty() {
                return Err(ConfigurationError::EmptyField("column name"));
            }
            if !seen.insert(column.name.trim()) {
                return Err(ConfigurationError::DuplicateColumn {
                    file_type: self.name.clone(),
                    column: column.name.clone(),
                });
            }
            if let Some(binding) = &column.target {
                if fields::field(binding.entity, &binding.field).is_none() {
                    return Err(ConfigurationError::UnknownField {
                        entity: binding.entity.to_string(),
                        field: binding.field.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Fill empty technical names from the column name
    pub fn backfill_technical_names(&mut self) {
        for column in &mut self.columns {
            if column.technical_name.trim().is_empty() {
                column.technical_name = technical_name_of(&column.name);
            }
        }
    }

    /// Bindings whose column type cannot feed the target field
    pub fn incompatible_bindings(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter_map(|column| {
                let binding = column.target.as_ref()?;
                let spec = fields::field(binding.entity, &binding.field)?;
                (!fields::is_compatible(column.data_type, spec.field_type)).then(|| {
                    format!(
                        "column '{}' ({:?}) cannot feed {}.{} ({:?})",
                        column.name, column.data_type, binding.entity, binding.field, spec.field_type
                    )
                })
            })
            .collect()
    }

    pub fn required_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| c.required)
    }

    pub fn has_bindings(&self) -> bool {
        self.columns.iter().any(|c| c.target.is_some())
    }

    /// Codec settings for a file of this type
    pub fn normalize_options(&self, sheet_name: impl Into<String>) -> NormalizeOptions {
        NormalizeOptions {
            // validate() guarantees ASCII
            delimiter: u8::try_from(self.delimiter).unwrap_or(b','),
            encoding: self.encoding,
            sheet_name: sheet_name.into(),
        }
    }
}

/// Active descriptors in evaluation order: ascending sequence, then name
#[derive(Debug, Clone, Default)]
pub struct FileTypeRegistry {
    descriptors: Vec<FileTypeDescriptor>,
}

impl FileTypeRegistry {
    pub fn new(descriptors: impl IntoIterator<Item = FileTypeDescriptor>) -> Self {
        let mut descriptors: Vec<_> = descriptors.into_iter().filter(|d| d.active).collect();
        descriptors.sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.name.cmp(&b.name)));
        Self { descriptors }
    }

    pub fn descriptors(&self) -> &[FileTypeDescriptor] {
        &self.descriptors
    }

    pub fn by_name(&self, name: &str) -> Option<&FileTypeDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Resolve the descriptor for a file
    ///
    /// The filename code match wins. Otherwise, when `headers` is given, the
    /// first descriptor whose required columns are all present applies;
    /// descriptors without required columns never match on headers. `None`
    /// means the file is unmapped and callers fall back to auto-detection.
    pub fn identify<S: AsRef<str>>(
        &self,
        filename: &str,
        headers: Option<&[S]>,
    ) -> Option<&FileTypeDescriptor> {
        let lowered = filename.to_lowercase();
        let by_name = self.descriptors.iter().find(|d| {
            let code = d.code.trim().to_lowercase();
            !code.is_empty() && lowered.contains(&code)
        });
        if by_name.is_some() {
            return by_name;
        }

        let headers: HashSet<String> = headers?
            .iter()
            .map(|h| h.as_ref().trim().to_lowercase())
            .collect();

        self.descriptors.iter().find(|d| {
            let mut required = d.required_columns().peekable();
            required.peek().is_some()
                && required.all(|c| headers.contains(&c.name.trim().to_lowercase()))
        })
    }
}
