use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Join hint: `column` of the owning table references `references_table.references_column`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, data_type: impl Into<String>) -> Self {
        self.columns.push(Column {
            name: name.into(),
            data_type: data_type.into(),
            description: None,
        });
        self
    }

    pub fn with_foreign_key(
        mut self,
        column: impl Into<String>,
        references_table: impl Into<String>,
        references_column: impl Into<String>,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.into(),
            references_table: references_table.into(),
            references_column: references_column.into(),
        });
        self
    }

    /// Whether this table holds a foreign key into `other`, or `other` into this one.
    pub fn is_linked_to(&self, other: &Table) -> bool {
        self.foreign_keys
            .iter()
            .any(|fk| fk.references_table.eq_ignore_ascii_case(&other.name))
            || other
                .foreign_keys
                .iter()
                .any(|fk| fk.references_table.eq_ignore_ascii_case(&self.name))
    }
}

/// Static description of the queryable schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaCatalog {
    pub database: String,
    pub tables: Vec<Table>,
}

impl SchemaCatalog {
    pub fn new(database: impl Into<String>, tables: Vec<Table>) -> Result<Self> {
        let catalog = Self {
            database: database.into(),
            tables,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Metadata(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json_str(&content)
            .map_err(|e| AgentError::Metadata(format!("Failed to load {}: {}", path.display(), e)))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let catalog: SchemaCatalog = serde_json::from_str(content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Reject duplicate table names and join hints pointing outside the catalog.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for table in &self.tables {
            if !seen.insert(table.name.to_lowercase()) {
                return Err(AgentError::Metadata(format!("Duplicate table: {}", table.name)));
            }
        }

        for table in &self.tables {
            for fk in &table.foreign_keys {
                if !seen.contains(&fk.references_table.to_lowercase()) {
                    return Err(AgentError::Metadata(format!(
                        "Foreign key {}.{} references unknown table {}",
                        table.name, fk.column, fk.references_table
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }
}
