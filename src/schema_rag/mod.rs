//! Schema Context
//!
//! Builds the textual schema description handed to the SQL generator, either as a
//! full dump of the catalog or ranked by relevance to the question.

pub mod retriever;

pub use retriever::RankedRetriever;

use crate::config::{ContextConfig, ContextStrategy};
use crate::metadata::{SchemaCatalog, Table};
use async_trait::async_trait;
use std::sync::Arc;

/// Supplies schema context for a question. Never fails: with nothing relevant to
/// say it returns a minimal header and generation proceeds with less context.
#[async_trait]
pub trait SchemaContextProvider: Send + Sync {
    async fn build_context(&self, question: &str) -> String;
}

/// Renders every table of the catalog regardless of the question.
pub struct FullDumpProvider {
    catalog: Arc<SchemaCatalog>,
}

impl FullDumpProvider {
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        Self { catalog }
    }

    pub fn render(&self) -> String {
        let tables: Vec<&Table> = self.catalog.tables.iter().collect();
        render_tables(&self.catalog.database, &tables, usize::MAX)
    }
}

#[async_trait]
impl SchemaContextProvider for FullDumpProvider {
    async fn build_context(&self, _question: &str) -> String {
        self.render()
    }
}

/// Pick the provider the deployment asked for.
pub fn provider_for(catalog: Arc<SchemaCatalog>, config: &ContextConfig) -> Arc<dyn SchemaContextProvider> {
    match config.strategy {
        ContextStrategy::FullDump => Arc::new(FullDumpProvider::new(catalog)),
        ContextStrategy::Ranked => Arc::new(RankedRetriever::new(catalog, config.top_tables, config.char_budget)),
    }
}

pub(crate) fn database_header(database: &str) -> String {
    format!("Database: {}\n", database)
}

pub(crate) fn render_table(table: &Table) -> String {
    let mut block = if table.description.is_empty() {
        format!("Table {}\n", table.name)
    } else {
        format!("Table {}: {}\n", table.name, table.description)
    };

    for column in &table.columns {
        match &column.description {
            Some(desc) => block.push_str(&format!("  - {} ({}): {}\n", column.name, column.data_type, desc)),
            None => block.push_str(&format!("  - {} ({})\n", column.name, column.data_type)),
        }
    }

    for fk in &table.foreign_keys {
        block.push_str(&format!(
            "  FK {}.{} -> {}.{}\n",
            table.name, fk.column, fk.references_table, fk.references_column
        ));
    }

    block
}

/// Render `tables` in order, stopping before the first table that would push the
/// text past `char_budget`. The first table is always included, truncated if needed.
pub(crate) fn render_tables(database: &str, tables: &[&Table], char_budget: usize) -> String {
    let mut out = database_header(database);

    for (idx, table) in tables.iter().enumerate() {
        let block = render_table(table);
        let used = out.chars().count();
        let needed = block.chars().count();

        if used + needed <= char_budget {
            out.push_str(&block);
        } else if idx == 0 {
            let room = char_budget.saturating_sub(used);
            out.extend(block.chars().take(room));
            break;
        } else {
            break;
        }
    }

    out
}
