//! Table schema builder.
//!
//! Produces validated [`TableSchema`] values. Identifiers are normalised
//! to upper case, the way SQL treats unquoted names.

use std::collections::HashSet;

use zonegrid_core::ColumnType;
use zonegrid_state::{ColumnDef, IndexDef, TableSchema};

use crate::error::{SchemaError, SchemaResult};
use crate::normalize_ident;
use crate::registry::DEFAULT_ZONE;

/// Entry point for `TableSchema::builder(name)`.
pub trait TableSchemaExt {
    fn builder(name: &str) -> TableSchemaBuilder;
}

impl TableSchemaExt for TableSchema {
    fn builder(name: &str) -> TableSchemaBuilder {
        TableSchemaBuilder::new(name)
    }
}

/// Incremental table schema definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchemaBuilder {
    name: String,
    zone: Option<String>,
    columns: Vec<ColumnDef>,
    primary_key: Vec<String>,
    colocate_by: Option<Vec<String>>,
    colocate_with: Option<String>,
    indexes: Vec<IndexDef>,
}

impl TableSchemaBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            zone: None,
            columns: Vec::new(),
            primary_key: Vec::new(),
            colocate_by: None,
            colocate_with: None,
            indexes: Vec::new(),
        }
    }

    pub fn name(&self) -> String {
        normalize_ident(&self.name)
    }

    /// Add a `NOT NULL` column.
    pub fn column(self, name: &str, ty: ColumnType) -> Self {
        self.column_def(ColumnDef {
            name: name.to_string(),
            ty,
            nullable: false,
            length: None,
        })
    }

    /// Add a nullable column.
    pub fn nullable_column(self, name: &str, ty: ColumnType) -> Self {
        self.column_def(ColumnDef {
            name: name.to_string(),
            ty,
            nullable: true,
            length: None,
        })
    }

    /// Add a nullable `VARCHAR(len)` column.
    pub fn varchar(self, name: &str, len: u32) -> Self {
        self.column_def(ColumnDef {
            name: name.to_string(),
            ty: ColumnType::Varchar,
            nullable: true,
            length: Some(len),
        })
    }

    pub fn column_def(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Partition by a subset of the primary key instead of all of it.
    pub fn colocate_by(mut self, columns: &[&str]) -> Self {
        self.colocate_by = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Delegate partitioning to `parent`'s partition function.
    pub fn colocate_with(mut self, parent: &str) -> Self {
        self.colocate_with = Some(parent.to_string());
        self
    }

    pub fn zone(mut self, zone: &str) -> Self {
        self.zone = Some(zone.to_string());
        self
    }

    pub fn index(mut self, name: &str, columns: &[&str]) -> Self {
        self.indexes.push(IndexDef {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    /// Mark columns `NOT NULL`; used for primary-key columns declared
    /// without an explicit constraint.
    pub(crate) fn require_non_null(&mut self, names: &[String]) {
        for column in &mut self.columns {
            if names.iter().any(|n| n.eq_ignore_ascii_case(&column.name)) {
                column.nullable = false;
            }
        }
    }

    pub fn build(self) -> SchemaResult<TableSchema> {
        let name = normalize_ident(&self.name);
        let invalid = |reason: String| SchemaError::Invalid {
            table: name.clone(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("table name is empty".to_string()));
        }
        if self.columns.is_empty() {
            return Err(invalid("a table needs at least one column".to_string()));
        }

        let columns: Vec<ColumnDef> = self
            .columns
            .into_iter()
            .map(|c| ColumnDef {
                name: normalize_ident(&c.name),
                ..c
            })
            .collect();

        let mut seen = HashSet::new();
        for column in &columns {
            if column.name.is_empty() {
                return Err(invalid("column name is empty".to_string()));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(invalid(format!("duplicate column {}", column.name)));
            }
            if column.length == Some(0) {
                return Err(invalid(format!("column {} has zero length", column.name)));
            }
        }

        let primary_key = normalize_list(&self.primary_key);
        if primary_key.is_empty() {
            return Err(invalid("primary key is empty".to_string()));
        }
        ensure_distinct(&primary_key, "primary key").map_err(&invalid)?;
        for key in &primary_key {
            match columns.iter().find(|c| &c.name == key) {
                None => return Err(invalid(format!("primary key column {key} is not declared"))),
                Some(c) if c.nullable => {
                    return Err(invalid(format!("primary key column {key} is nullable")));
                }
                Some(_) => {}
            }
        }

        let colocation_key = match &self.colocate_by {
            Some(cols) => normalize_list(cols),
            None => primary_key.clone(),
        };
        if colocation_key.is_empty() {
            return Err(invalid("colocation key is empty".to_string()));
        }
        ensure_distinct(&colocation_key, "colocation key").map_err(&invalid)?;
        if let Some(stray) = colocation_key.iter().find(|c| !primary_key.contains(*c)) {
            return Err(invalid(format!(
                "colocation column {stray} is not part of the primary key"
            )));
        }

        let mut indexes = Vec::with_capacity(self.indexes.len());
        let mut index_names = HashSet::new();
        for index in self.indexes {
            let index = IndexDef {
                name: normalize_ident(&index.name),
                columns: normalize_list(&index.columns),
            };
            if index.columns.is_empty() {
                return Err(invalid(format!("index {} has no columns", index.name)));
            }
            if let Some(stray) = index
                .columns
                .iter()
                .find(|c| !columns.iter().any(|col| &col.name == *c))
            {
                return Err(invalid(format!(
                    "index {} references unknown column {stray}",
                    index.name
                )));
            }
            if !index_names.insert(index.name.clone()) {
                return Err(invalid(format!("duplicate index {}", index.name)));
            }
            indexes.push(index);
        }

        let zone = self
            .zone
            .as_deref()
            .map(normalize_ident)
            .unwrap_or_else(|| DEFAULT_ZONE.to_string());

        Ok(TableSchema {
            name,
            zone,
            columns,
            primary_key,
            colocation_key,
            colocate_with: self.colocate_with.as_deref().map(normalize_ident),
            indexes,
        })
    }
}

fn normalize_list(names: &[String]) -> Vec<String> {
    names.iter().map(|n| normalize_ident(n)).collect()
}

fn ensure_distinct(names: &[String], what: &str) -> Result<(), String> {
    let mut seen = HashSet::new();
    match names.iter().find(|n| !seen.insert(n.as_str())) {
        Some(dup) => Err(format!("{what} lists {dup} twice")),
        None => Ok(()),
    }
}
