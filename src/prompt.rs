//! Prompt Assembler
//!
//! Pure, deterministic rendering of schema, retrieved knowledge, the user
//! question and (on retry) the prior failure into a single oracle input.
//! No state is retained between calls: identical inputs produce
//! byte-identical prompts.

use crate::knowledge::KnowledgeDocument;
use crate::schema::Schema;
use std::sync::Arc;

/// Safety rules handed to the oracle as the system prompt: statement-type
/// allow-list, mandatory row limit and the identifiers-must-exist rule.
pub const SYSTEM_PROMPT: &str = "\
You are a SQL expert assistant. Your task is to convert natural language questions into valid SQLite SQL queries.

RULES:
1. Generate ONLY valid SQLite SQL syntax.
2. Return ONLY the SQL query, no explanations or markdown formatting.
3. Use only tables and columns from the provided schema.
4. Do NOT generate INSERT, UPDATE, DELETE, DROP, or ALTER statements.
5. Always include LIMIT clause if not specified (default: 100).
6. Use proper JOIN syntax when crossing tables.
7. Handle NULL values appropriately with IS NULL / IS NOT NULL.
8. Use strftime() for date operations in SQLite.
9. Pay close attention to any DOMAIN KNOWLEDGE provided - it contains critical business logic.

Return ONLY the SQL query, nothing else. No ```sql blocks, no explanations.";

pub struct PromptBuilder {
    schema: Arc<Schema>,
}

impl PromptBuilder {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    pub fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    /// Assemble the full prompt: schema, knowledge, prior error (retries
    /// only), question. Section order is fixed.
    pub fn build_query_prompt(
        &self,
        question: &str,
        knowledge: &[&KnowledgeDocument],
        error_context: Option<&str>,
    ) -> String {
        let mut parts = vec![self.schema.to_prompt_string()];

        if !knowledge.is_empty() {
            let mut section = vec!["DOMAIN KNOWLEDGE:".to_string(), String::new()];
            for doc in knowledge {
                section.push(format!("### {}", doc.name));
                section.push(doc.content.trim().to_string());
                section.push(String::new());
            }
            parts.push(section.join("\n"));
        }

        if let Some(error) = error_context {
            parts.push(format!(
                "PREVIOUS ATTEMPT FAILED:\n{}\n\nPlease generate a corrected SQL query.\n",
                error
            ));
        }

        parts.push(format!("USER QUESTION: {}\n\nSQL:", question));

        parts.join("\n")
    }

    /// Frame a failed candidate and its error for the next attempt.
    pub fn build_error_context(sql: &str, error: &str) -> String {
        format!("SQL: {}\nError: {}", sql, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, Schema, Table};

    fn test_schema() -> Arc<Schema> {
        Arc::new(Schema {
            tables: vec![Table {
                name: "users".to_string(),
                columns: vec![
                    Column {
                        name: "id".to_string(),
                        data_type: "INTEGER".to_string(),
                        is_primary_key: true,
                        is_nullable: true,
                    },
                    Column {
                        name: "name".to_string(),
                        data_type: "TEXT".to_string(),
                        is_primary_key: false,
                        is_nullable: false,
                    },
                ],
                primary_keys: vec!["id".to_string()],
                foreign_keys: vec![],
            }],
            foreign_keys: vec![],
        })
    }

    #[test]
    fn identical_inputs_produce_identical_prompts() {
        let builder = PromptBuilder::new(test_schema());
        let a = builder.build_query_prompt("List all users", &[], Some("SQL: x\nError: y"));
        let b = builder.build_query_prompt("List all users", &[], Some("SQL: x\nError: y"));
        assert_eq!(a, b);
    }

    #[test]
    fn sections_appear_in_fixed_order() {
        let builder = PromptBuilder::new(test_schema());
        let doc = crate::knowledge::KnowledgeDocument {
            name: "users.md".to_string(),
            content: "Users are people.".to_string(),
            keywords: Default::default(),
            tables: vec!["users".to_string()],
            is_join_recipe: false,
        };
        let prompt = builder.build_query_prompt(
            "List all users",
            &[&doc],
            Some("SQL: SELECT * FROM ghost\nError: no such table"),
        );

        let schema_pos = prompt.find("DATABASE SCHEMA:").unwrap();
        let knowledge_pos = prompt.find("DOMAIN KNOWLEDGE:").unwrap();
        let error_pos = prompt.find("PREVIOUS ATTEMPT FAILED:").unwrap();
        let question_pos = prompt.find("USER QUESTION:").unwrap();
        assert!(schema_pos < knowledge_pos);
        assert!(knowledge_pos < error_pos);
        assert!(error_pos < question_pos);
        assert!(prompt.ends_with("SQL:"));
        assert!(prompt.contains("Users are people."));
    }

    #[test]
    fn error_block_absent_on_first_attempt() {
        let builder = PromptBuilder::new(test_schema());
        let prompt = builder.build_query_prompt("List all users", &[], None);
        assert!(!prompt.contains("PREVIOUS ATTEMPT FAILED:"));
    }

    #[test]
    fn system_prompt_names_the_safety_rules() {
        assert!(SYSTEM_PROMPT.contains("Do NOT generate INSERT"));
        assert!(SYSTEM_PROMPT.contains("LIMIT"));
        assert!(SYSTEM_PROMPT.contains("tables and columns from the provided schema"));
    }
}
