//! Partition schema: fields, indexes and pack attributes.
//!
//! The schema is stored as `schema.json` at the partition root. Two
//! partitions can only be merged when their schemas compare equal.

use std::collections::BTreeMap;
use std::fmt;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{IndexlibError, Result};

/// Separator between the values of a multi-value field in raw documents and
/// in string renderings of attribute values.
pub const MULTI_VALUE_SEPARATOR: char = '\x1D';

/// Field types known to the index layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    String,
    Hash64,
    Hash128,
    Text,
    Location,
}

impl FieldType {
    /// Width in bytes of a single fixed-size value, or `None` for
    /// variable-length types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            FieldType::Int8 | FieldType::UInt8 => Some(1),
            FieldType::Int16 | FieldType::UInt16 => Some(2),
            FieldType::Int32 | FieldType::UInt32 | FieldType::Float => Some(4),
            FieldType::Int64 | FieldType::UInt64 | FieldType::Double | FieldType::Hash64 => {
                Some(8)
            }
            FieldType::Hash128 => Some(16),
            FieldType::String | FieldType::Text | FieldType::Location => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Int8
                | FieldType::UInt8
                | FieldType::Int16
                | FieldType::UInt16
                | FieldType::Int32
                | FieldType::UInt32
                | FieldType::Int64
                | FieldType::UInt64
                | FieldType::Float
                | FieldType::Double
                | FieldType::Hash64
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Int8 => "int8",
            FieldType::UInt8 => "uint8",
            FieldType::Int16 => "int16",
            FieldType::UInt16 => "uint16",
            FieldType::Int32 => "int32",
            FieldType::UInt32 => "uint32",
            FieldType::Int64 => "int64",
            FieldType::UInt64 => "uint64",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::String => "string",
            FieldType::Hash64 => "hash64",
            FieldType::Hash128 => "hash128",
            FieldType::Text => "text",
            FieldType::Location => "location",
        };
        f.write_str(name)
    }
}

/// A field of the schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    pub field_type: FieldType,

    /// The field holds a list of values.
    #[serde(default)]
    pub multi_value: bool,

    /// Missing values are stored as null instead of a type default.
    #[serde(default)]
    pub nullable: bool,

    /// Store single-value strings in a fixed slot of this many bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_length: Option<usize>,
}

impl FieldConfig {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldConfig {
            name: name.into(),
            field_type,
            multi_value: false,
            nullable: false,
            fixed_length: None,
        }
    }

    pub fn multi_value(mut self) -> Self {
        self.multi_value = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn fixed_length(mut self, length: usize) -> Self {
        self.fixed_length = Some(length);
        self
    }
}

/// An index declared over schema fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexConfig {
    /// One presence bitmap per distinct token of `field`.
    Bitmap { name: String, field: String },

    /// A pluggable index whose build and merge logic is provided by the
    /// factory registered under `module`.
    Customized {
        name: String,
        fields: Vec<String>,
        module: String,
        #[serde(default)]
        parameters: BTreeMap<String, String>,
    },
}

impl IndexConfig {
    pub fn name(&self) -> &str {
        match self {
            IndexConfig::Bitmap { name, .. } | IndexConfig::Customized { name, .. } => name,
        }
    }

    pub fn fields(&self) -> Vec<&str> {
        match self {
            IndexConfig::Bitmap { field, .. } => vec![field.as_str()],
            IndexConfig::Customized { fields, .. } => fields.iter().map(String::as_str).collect(),
        }
    }
}

/// Several attribute fields stored together as one record per document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackAttributeConfig {
    pub name: String,
    pub sub_attributes: Vec<String>,
}

impl PackAttributeConfig {
    pub fn new<S: Into<String>>(name: impl Into<String>, sub_attributes: Vec<S>) -> Self {
        PackAttributeConfig {
            name: name.into(),
            sub_attributes: sub_attributes.into_iter().map(Into::into).collect(),
        }
    }
}

/// The schema of a partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
    #[serde(default)]
    pub pack_attributes: Vec<PackAttributeConfig>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Schema {
            name: name.into(),
            fields: Vec::new(),
            indexes: Vec::new(),
            pack_attributes: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldConfig) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_index(mut self, index: IndexConfig) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_pack_attribute(mut self, pack: PackAttributeConfig) -> Self {
        self.pack_attributes.push(pack);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldConfig> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexConfig> {
        self.indexes.iter().find(|i| i.name() == name)
    }

    pub fn pack_attribute(&self, name: &str) -> Option<&PackAttributeConfig> {
        self.pack_attributes.iter().find(|p| p.name == name)
    }

    /// The pack attribute holding sub-attribute `field`, if any.
    pub fn pack_attribute_of(&self, field: &str) -> Option<&PackAttributeConfig> {
        self.pack_attributes
            .iter()
            .find(|p| p.sub_attributes.iter().any(|s| s == field))
    }

    /// Check names are unique and every reference resolves.
    pub fn validate(&self) -> Result<()> {
        let mut names = AHashSet::new();
        for field in &self.fields {
            if !names.insert(field.name.as_str()) {
                return Err(IndexlibError::schema(format!(
                    "duplicate field '{}'",
                    field.name
                )));
            }
            if field.fixed_length.is_some()
                && (field.field_type != FieldType::String || field.multi_value)
            {
                return Err(IndexlibError::schema(format!(
                    "fixed_length is only valid for single-value string field '{}'",
                    field.name
                )));
            }
        }

        let mut index_names = AHashSet::new();
        for index in &self.indexes {
            if !index_names.insert(index.name()) {
                return Err(IndexlibError::schema(format!(
                    "duplicate index '{}'",
                    index.name()
                )));
            }
            for field in index.fields() {
                let config = self.field(field).ok_or_else(|| {
                    IndexlibError::schema(format!(
                        "index '{}' references unknown field '{field}'",
                        index.name()
                    ))
                })?;
                if matches!(index, IndexConfig::Bitmap { .. })
                    && !matches!(config.field_type, FieldType::String | FieldType::Text)
                {
                    return Err(IndexlibError::schema(format!(
                        "bitmap index '{}' needs a string or text field, '{field}' is {}",
                        index.name(),
                        config.field_type
                    )));
                }
            }
        }

        let mut pack_names = AHashSet::new();
        let mut packed = AHashSet::new();
        for pack in &self.pack_attributes {
            if !pack_names.insert(pack.name.as_str()) {
                return Err(IndexlibError::schema(format!(
                    "duplicate pack attribute '{}'",
                    pack.name
                )));
            }
            if pack.sub_attributes.is_empty() {
                return Err(IndexlibError::schema(format!(
                    "pack attribute '{}' has no sub-attribute",
                    pack.name
                )));
            }
            for sub in &pack.sub_attributes {
                if self.field(sub).is_none() {
                    return Err(IndexlibError::schema(format!(
                        "pack attribute '{}' references unknown field '{sub}'",
                        pack.name
                    )));
                }
                if !packed.insert(sub.as_str()) {
                    return Err(IndexlibError::schema(format!(
                        "field '{sub}' belongs to more than one pack attribute"
                    )));
                }
            }
        }
        Ok(())
    }
}
