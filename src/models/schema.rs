//! Schema-related data models.
//!
//! This module defines types for database schema introspection.

use serde::{Deserialize, Serialize};

/// A database visible through a connection, with best-effort details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    /// Human-readable, e.g. "12.50 MB"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_count: Option<u64>,
}

impl DatabaseInfo {
    /// Name-only entry, used when details are unavailable.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            table_count: None,
        }
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    pub fn with_table_count(mut self, count: u64) -> Self {
        self.table_count = Some(count);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    /// Estimated on MySQL and PostgreSQL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    /// Human-readable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl TableInfo {
    /// Create a new table info.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            row_count: None,
            size: None,
        }
    }

    /// Set the row count.
    pub fn with_row_count(mut self, row_count: u64) -> Self {
        self.row_count = Some(row_count);
        self
    }

    /// Set the size from a byte count.
    pub fn with_size_bytes(mut self, bytes: u64) -> Self {
        self.size = Some(humansize::format_size(bytes, humansize::BINARY));
        self
    }
}

/// Role a column plays in the table's keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRole {
    Primary,
    Unique,
    Index,
}

impl KeyRole {
    /// Parse MySQL's `COLUMN_KEY` value (`PRI`, `UNI`, `MUL`).
    pub fn from_mysql(column_key: &str) -> Option<Self> {
        match column_key.to_uppercase().as_str() {
            "PRI" => Some(Self::Primary),
            "UNI" => Some(Self::Unique),
            "MUL" => Some(Self::Index),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type (e.g., `varchar(30)`, `bigint unsigned`)
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<KeyRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// e.g., `auto_increment`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

impl ColumnInfo {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            key: None,
            default_value: None,
            extra: None,
        }
    }

    pub fn with_key(mut self, key: Option<KeyRole>) -> Self {
        self.key = key;
        self
    }

    pub fn with_default(mut self, default_value: Option<String>) -> Self {
        self.default_value = default_value;
        self
    }

    /// Set the extra attribute, ignoring empty strings.
    pub fn with_extra(mut self, extra: Option<String>) -> Self {
        self.extra = extra.filter(|e| !e.is_empty());
        self
    }

    pub fn is_primary_key(&self) -> bool {
        self.key == Some(KeyRole::Primary)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStructure {
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
    pub primary_keys: Vec<String>,
    pub indexes: Vec<IndexInfo>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableStructure {
    /// Assemble a structure, deriving primary keys from the columns when not given.
    pub fn new(
        table_name: impl Into<String>,
        columns: Vec<ColumnInfo>,
        primary_keys: Vec<String>,
        indexes: Vec<IndexInfo>,
        foreign_keys: Vec<ForeignKey>,
    ) -> Self {
        let primary_keys = if primary_keys.is_empty() {
            columns
                .iter()
                .filter(|c| c.is_primary_key())
                .map(|c| c.name.clone())
                .collect()
        } else {
            primary_keys
        };
        Self {
            table_name: table_name.into(),
            columns,
            primary_keys,
            indexes,
            foreign_keys,
        }
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
}

impl ForeignKey {
    /// Create a new foreign key with no columns yet.
    pub fn new(name: Option<String>, referenced_table: impl Into<String>) -> Self {
        Self {
            name,
            columns: Vec::new(),
            referenced_table: referenced_table.into(),
            referenced_columns: Vec::new(),
            on_delete: ForeignKeyAction::NoAction,
            on_update: ForeignKeyAction::NoAction,
        }
    }

    /// Append one column pair.
    pub fn with_column_pair(
        mut self,
        column: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        self.columns.push(column.into());
        self.referenced_columns.push(referenced_column.into());
        self
    }

    pub fn with_on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn with_on_update(mut self, action: ForeignKeyAction) -> Self {
        self.on_update = action;
        self
    }
}

/// Foreign key referential action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeyAction {
    /// No action (error if referenced)
    #[default]
    NoAction,
    /// Restrict (same as NoAction in most databases)
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ForeignKeyAction {
    /// Parse from database-specific string.
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "CASCADE" => Self::Cascade,
            "SET NULL" => Self::SetNull,
            "SET DEFAULT" => Self::SetDefault,
            "RESTRICT" => Self::Restrict,
            _ => Self::NoAction,
        }
    }
}

impl std::fmt::Display for ForeignKeyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAction => write!(f, "NO ACTION"),
            Self::Restrict => write!(f, "RESTRICT"),
            Self::Cascade => write!(f, "CASCADE"),
            Self::SetNull => write!(f, "SET NULL"),
            Self::SetDefault => write!(f, "SET DEFAULT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
}

impl IndexInfo {
    pub fn new(name: impl Into<String>, columns: Vec<String>, is_unique: bool) -> Self {
        Self {
            name: name.into(),
            columns,
            is_unique,
        }
    }
}

/// First rows of a table, as returned by `preview_table`.
#[derive(Debug, Clone, Serialize)]
pub struct TablePreview {
    pub table_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
}
