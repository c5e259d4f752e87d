//! Agent Prompts - prompts for SQL generation and self-correction
//!
//! Both prompts share one policy block so the model sees the same rules the
//! safety validator enforces.

/// System prompt sent with every generation and correction call
pub const SQL_SYSTEM_PROMPT: &str =
    "You are a precise JSON-only responder. Always return valid JSON, no other text.";

/// Rules shared by the generation and correction prompts
pub const SQL_POLICY: &str = r#"You are a MySQL Text2SQL assistant.

Hard rules:
- Return exactly one SQL statement in the `sql_query` field.
- Only SELECT is allowed.
- Never use INSERT, UPDATE, DELETE, REPLACE, ALTER, DROP, TRUNCATE, CREATE, GRANT, REVOKE.
- Use only tables/columns from the provided schema context.
- Prefer explicit JOIN conditions.
- For non-aggregate queries, include LIMIT 100 or lower.

Output format:
- Return strict JSON with exactly two keys:
  - "explanation": short rationale for query design
  - "sql_query": the SQL statement
- Do not include markdown fences or any extra text."#;

pub fn sql_generation_prompt(user_query: &str, schema_context: &str) -> String {
    format!(
        r#"{policy}

Schema context:
{schema_context}

User question:
{user_query}

Produce structured JSON output only.
"#,
        policy = SQL_POLICY,
        schema_context = schema_context,
        user_query = user_query,
    )
}

pub fn sql_correction_prompt(
    user_query: &str,
    schema_context: &str,
    failed_sql: &str,
    validation_error: &str,
) -> String {
    format!(
        r#"{policy}

The previous SQL failed.
User question:
{user_query}

Schema context:
{schema_context}

Failed SQL:
{failed_sql}

Validation error:
{validation_error}

Return a different query that fixes the validation error.
Produce corrected structured JSON output only.
"#,
        policy = SQL_POLICY,
        user_query = user_query,
        schema_context = schema_context,
        failed_sql = failed_sql,
        validation_error = validation_error,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_prompt_carries_context_and_question() {
        let prompt = sql_generation_prompt("How many employees are there?", "Table employees");
        assert!(prompt.starts_with(SQL_POLICY));
        assert!(prompt.contains("Schema context:\nTable employees"));
        assert!(prompt.contains("User question:\nHow many employees are there?"));
    }

    #[test]
    fn test_correction_prompt_carries_failure() {
        let prompt = sql_correction_prompt(
            "List employees",
            "Table employees",
            "SELECT * FROM employees",
            "Non-aggregate queries must include a LIMIT clause.",
        );
        assert!(prompt.contains("Failed SQL:\nSELECT * FROM employees"));
        assert!(prompt.contains("Validation error:\nNon-aggregate queries must include a LIMIT clause."));
    }
}
