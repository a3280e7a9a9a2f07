//! Correction Loop
//!
//! Orchestrates generate -> validate -> execute with a bounded number of
//! attempts. Each failure, whatever its kind, is recorded and fed back to
//! the oracle as corrective context for the next prompt. The full ordered
//! attempt trail is returned on both terminal states, so a failure is
//! explainable rather than silent.

use crate::error::EngineError;
use crate::executor::{QueryExecutor, QueryRows};
use crate::knowledge::KnowledgeBase;
use crate::oracle::Oracle;
use crate::prompt::PromptBuilder;
use crate::schema::Schema;
use crate::validator::{Rejection, SqlValidator};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Validator verdict recorded in the audit trail.
#[derive(Debug, Clone, Serialize)]
pub enum Verdict {
    Accepted,
    Rejected { reason: String },
}

/// What happened after the statement was accepted (or the oracle failed).
#[derive(Debug, Clone, Serialize)]
pub enum AttemptOutcome {
    Rows { row_count: usize, truncated: bool },
    Error { message: String },
}

/// One generate -> validate -> execute cycle.
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    pub attempt_number: u32,
    pub prompt: String,
    /// Absent when the oracle call itself failed.
    pub raw_output: Option<String>,
    /// Canonical text of the parsed statement, recorded for rejected
    /// attempts too; absent only when no statement could be extracted.
    pub candidate_sql: Option<String>,
    pub verdict: Option<Verdict>,
    pub outcome: Option<AttemptOutcome>,
    pub timestamp: DateTime<Utc>,
}

/// Terminal result of resolving one question.
#[derive(Debug, Serialize)]
pub enum Outcome {
    Succeeded { rows: QueryRows, sql: String },
    Failed { reason: String },
}

#[derive(Debug, Serialize)]
pub struct Resolution {
    pub outcome: Outcome,
    pub attempts: Vec<Attempt>,
}

impl Resolution {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, Outcome::Succeeded { .. })
    }
}

/// Resolves one question per call. The schema and knowledge base are shared
/// read-only; all per-question state lives in the attempt list owned by the
/// call.
pub struct QueryResolver {
    prompt_builder: PromptBuilder,
    knowledge: Arc<KnowledgeBase>,
    validator: SqlValidator,
    executor: QueryExecutor,
    oracle: Box<dyn Oracle>,
    max_attempts: u32,
}

impl QueryResolver {
    pub fn new(
        schema: Arc<Schema>,
        knowledge: Arc<KnowledgeBase>,
        oracle: Box<dyn Oracle>,
        executor: QueryExecutor,
        default_limit: u64,
        max_attempts: u32,
    ) -> Self {
        Self {
            prompt_builder: PromptBuilder::new(Arc::clone(&schema)),
            knowledge,
            validator: SqlValidator::new(schema, default_limit),
            executor,
            oracle,
            max_attempts,
        }
    }

    /// Resolve a question end to end: retrieve knowledge once, then loop
    /// generate -> validate -> execute until success or exhaustion.
    pub async fn resolve(&self, question: &str) -> Resolution {
        self.run(question, true).await
    }

    /// Generate and validate only, without touching the database. Used by
    /// the CLI's --sql-only mode.
    pub async fn resolve_sql_only(&self, question: &str) -> Resolution {
        self.run(question, false).await
    }

    async fn run(&self, question: &str, execute: bool) -> Resolution {
        let documents = self.knowledge.retrieve(question);
        if !documents.is_empty() {
            info!(
                "retrieved {} knowledge document(s): {}",
                documents.len(),
                documents
                    .iter()
                    .map(|d| d.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        let mut attempts: Vec<Attempt> = Vec::new();
        let mut error_context: Option<String> = None;

        for attempt_number in 1..=self.max_attempts {
            info!("attempt {} of {}", attempt_number, self.max_attempts);
            let prompt =
                self.prompt_builder
                    .build_query_prompt(question, &documents, error_context.as_deref());

            let mut attempt = Attempt {
                attempt_number,
                prompt: prompt.clone(),
                raw_output: None,
                candidate_sql: None,
                verdict: None,
                outcome: None,
                timestamp: Utc::now(),
            };

            // GENERATING
            let raw_output = match self
                .oracle
                .generate(&prompt, self.prompt_builder.system_prompt())
                .await
            {
                Ok(text) => text,
                Err(e) => {
                    warn!("oracle call failed: {}", e);
                    attempt.outcome = Some(AttemptOutcome::Error {
                        message: e.to_string(),
                    });
                    attempts.push(attempt);
                    error_context = Some(format!("Error: {}", e));
                    continue;
                }
            };
            attempt.raw_output = Some(raw_output.clone());

            // VALIDATING
            let sql = match self.validator.validate(&raw_output) {
                Ok(sql) => {
                    attempt.verdict = Some(Verdict::Accepted);
                    attempt.candidate_sql = Some(sql.clone());
                    sql
                }
                Err(Rejection { reason, candidate }) => {
                    warn!("statement rejected: {}", reason);
                    let message = EngineError::Rejected(reason).to_string();
                    attempt.candidate_sql = candidate;
                    attempt.verdict = Some(Verdict::Rejected {
                        reason: message.clone(),
                    });
                    attempts.push(attempt);
                    error_context =
                        Some(PromptBuilder::build_error_context(raw_output.trim(), &message));
                    continue;
                }
            };

            if !execute {
                attempts.push(attempt);
                return Resolution {
                    outcome: Outcome::Succeeded {
                        rows: QueryRows {
                            columns: vec![],
                            rows: vec![],
                            row_count: 0,
                            truncated: false,
                        },
                        sql,
                    },
                    attempts,
                };
            }

            // EXECUTING
            match self.executor.execute(&sql).await {
                Ok(rows) => {
                    attempt.outcome = Some(AttemptOutcome::Rows {
                        row_count: rows.row_count,
                        truncated: rows.truncated,
                    });
                    attempts.push(attempt);
                    info!("resolved on attempt {}", attempt_number);
                    return Resolution {
                        outcome: Outcome::Succeeded { rows, sql },
                        attempts,
                    };
                }
                Err(e) => {
                    warn!("execution failed: {}", e);
                    attempt.outcome = Some(AttemptOutcome::Error {
                        message: e.to_string(),
                    });
                    attempts.push(attempt);
                    error_context =
                        Some(PromptBuilder::build_error_context(&sql, &e.to_string()));
                }
            }
        }

        let reason = match error_context {
            Some(last) => format!(
                "exhausted {} attempt(s); last failure: {}",
                self.max_attempts, last
            ),
            None => "no attempts were made".to_string(),
        };
        Resolution {
            outcome: Outcome::Failed { reason },
            attempts,
        }
    }
}
