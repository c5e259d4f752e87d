//! Schema Retriever
//!
//! Ranks tables by keyword overlap with the question, keeps the best few plus
//! their foreign-key neighbours, and renders them under a size budget.

use crate::metadata::{SchemaCatalog, Table};
use crate::schema_rag::{database_header, render_tables, SchemaContextProvider};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"[a-z0-9_]+").unwrap();
}

const STOP_WORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "any", "are", "as", "at", "be", "by", "can", "do", "does",
    "each", "for", "from", "give", "have", "how", "i", "in", "is", "it", "list", "many", "me",
    "much", "of", "on", "or", "per", "show", "than", "that", "the", "there", "their", "to",
    "top", "was", "were", "what", "when", "where", "which", "who", "whose", "with",
];

const NAME_WEIGHT: u32 = 3;
const COLUMN_WEIGHT: u32 = 2;
const DESCRIPTION_WEIGHT: u32 = 1;
const FUZZY_THRESHOLD: f64 = 0.92;

/// Scored match of one table against the question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableScore {
    pub table: String,
    pub score: u32,
}

pub struct RankedRetriever {
    catalog: Arc<SchemaCatalog>,
    top_n: usize,
    char_budget: usize,
}

impl RankedRetriever {
    pub fn new(catalog: Arc<SchemaCatalog>, top_n: usize, char_budget: usize) -> Self {
        Self {
            catalog,
            top_n,
            char_budget,
        }
    }

    /// Positive scores only, best first, ties broken by table name.
    pub fn score_tables(&self, question: &str) -> Vec<TableScore> {
        let terms = question_terms(question);
        let mut scores: Vec<TableScore> = self
            .catalog
            .tables
            .iter()
            .map(|table| TableScore {
                table: table.name.clone(),
                score: score_table(table, &terms),
            })
            .filter(|s| s.score > 0)
            .collect();

        scores.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.table.cmp(&b.table)));
        scores
    }

    /// Tables selected for the question, in rendering order.
    pub fn select_tables(&self, question: &str) -> Vec<&Table> {
        let kept: Vec<&Table> = self
            .score_tables(question)
            .iter()
            .take(self.top_n)
            .filter_map(|s| self.catalog.get_table(&s.table))
            .collect();

        let mut seen: HashSet<&str> = kept.iter().map(|t| t.name.as_str()).collect();
        let mut selected = kept.clone();

        for table in &self.catalog.tables {
            if seen.contains(table.name.as_str()) {
                continue;
            }
            if kept.iter().any(|k| k.is_linked_to(table)) {
                seen.insert(table.name.as_str());
                selected.push(table);
            }
        }

        selected
    }
}

#[async_trait]
impl SchemaContextProvider for RankedRetriever {
    async fn build_context(&self, question: &str) -> String {
        let tables = self.select_tables(question);
        debug!(
            "Schema retrieval kept {} of {} tables",
            tables.len(),
            self.catalog.tables.len()
        );

        if tables.is_empty() {
            return format!(
                "{}(no tables matched the question)\n",
                database_header(&self.catalog.database)
            );
        }

        render_tables(&self.catalog.database, &tables, self.char_budget)
    }
}

fn question_terms(question: &str) -> Vec<String> {
    let lowered = question.to_lowercase();
    let mut terms: Vec<String> = Vec::new();
    for m in WORD.find_iter(&lowered) {
        let word = m.as_str();
        if word.len() < 2 || STOP_WORDS.contains(&word) || word.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if !terms.iter().any(|t| t == word) {
            terms.push(word.to_string());
        }
    }
    terms
}

fn vocabulary(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut words = Vec::new();
    for m in WORD.find_iter(&lowered) {
        let word = m.as_str();
        words.push(word.to_string());
        if word.contains('_') {
            words.extend(word.split('_').filter(|p| !p.is_empty()).map(str::to_string));
        }
    }
    words
}

fn score_table(table: &Table, terms: &[String]) -> u32 {
    let name_words = vocabulary(&table.name);
    let column_words: Vec<String> = table
        .columns
        .iter()
        .flat_map(|c| vocabulary(&c.name))
        .collect();
    let description_words = vocabulary(&table.description);

    terms
        .iter()
        .map(|term| {
            if name_words.iter().any(|w| term_matches(term, w)) {
                NAME_WEIGHT
            } else if column_words.iter().any(|w| term_matches(term, w)) {
                COLUMN_WEIGHT
            } else if description_words.iter().any(|w| term_matches(term, w)) {
                DESCRIPTION_WEIGHT
            } else {
                0
            }
        })
        .sum()
}

fn term_matches(term: &str, word: &str) -> bool {
    if term == word || singular(term) == singular(word) {
        return true;
    }
    term.len() >= 4 && word.len() >= 4 && strsim::jaro_winkler(term, word) >= FUZZY_THRESHOLD
}

fn singular(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        format!("{}y", stem)
    } else if let Some(stem) = word.strip_suffix("ses") {
        format!("{}s", stem)
    } else if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Arc<SchemaCatalog> {
        Arc::new(
            SchemaCatalog::new(
                "employees",
                vec![
                    Table::new("employees", "One row per employee")
                        .with_column("emp_no", "int")
                        .with_column("hire_date", "date"),
                    Table::new("departments", "Company departments")
                        .with_column("dept_no", "char(4)")
                        .with_column("dept_name", "varchar(40)"),
                    Table::new("dept_emp", "Department assignment history")
                        .with_column("emp_no", "int")
                        .with_column("dept_no", "char(4)")
                        .with_foreign_key("emp_no", "employees", "emp_no")
                        .with_foreign_key("dept_no", "departments", "dept_no"),
                    Table::new("salaries", "Salary history")
                        .with_column("emp_no", "int")
                        .with_column("salary", "int")
                        .with_foreign_key("emp_no", "employees", "emp_no"),
                    Table::new("warehouses", "Storage sites")
                        .with_column("site_id", "int"),
                ],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_question_terms_drop_stop_words_and_numbers() {
        let terms = question_terms("List all employees hired in 1990");
        assert_eq!(terms, vec!["employees".to_string(), "hired".to_string()]);
    }

    #[test]
    fn test_plural_and_singular_forms_match() {
        assert!(term_matches("salary", "salaries"));
        assert!(term_matches("employee", "employees"));
        assert!(!term_matches("emp", "employees"));
    }

    #[test]
    fn test_table_name_outranks_description() {
        let retriever = RankedRetriever::new(catalog(), 3, 10_000);
        let scores = retriever.score_tables("average salary per department");
        assert_eq!(scores[0].score, NAME_WEIGHT);
        assert!(scores.iter().any(|s| s.table == "salaries"));
        let dept_emp = scores.iter().find(|s| s.table == "dept_emp").unwrap();
        assert_eq!(dept_emp.score, DESCRIPTION_WEIGHT);
        assert!(!scores.iter().any(|s| s.table == "warehouses"));
    }

    #[test]
    fn test_foreign_key_neighbours_are_added() {
        let retriever = RankedRetriever::new(catalog(), 1, 10_000);
        let names: Vec<&str> = retriever
            .select_tables("salary figures")
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(names, vec!["salaries", "employees"]);
    }

    #[tokio::test]
    async fn test_no_overlap_gives_minimal_context() {
        let retriever = RankedRetriever::new(catalog(), 3, 10_000);
        let context = retriever.build_context("what's the weather like?").await;
        assert!(context.starts_with("Database: employees"));
        assert!(!context.contains("Table "));
    }
}
