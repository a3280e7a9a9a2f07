//! End-to-end resolution scenarios with a scripted oracle and a temporary
//! SQLite database. No network and no real LLM: the oracle returns canned
//! responses in order, so every path through the correction loop is
//! deterministic.

use async_trait::async_trait;
use rusqlite::Connection;
use sqlscribe::error::Result;
use sqlscribe::executor::QueryExecutor;
use sqlscribe::knowledge::KnowledgeBase;
use sqlscribe::oracle::Oracle;
use sqlscribe::resolver::{Outcome, QueryResolver, Verdict};
use sqlscribe::schema::SchemaExtractor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Returns its canned responses in order; repeats the last one when the
/// script runs out. Counts calls so tests can assert the attempt bound.
struct ScriptedOracle {
    responses: Vec<String>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedOracle {
    fn new(responses: &[&str]) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                responses: responses.iter().map(|r| r.to_string()).collect(),
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn generate(&self, _prompt: &str, _system_prompt: &str) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let index = call.min(self.responses.len() - 1);
        Ok(self.responses[index].clone())
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

fn seeded_db() -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    let conn = Connection::open(file.path()).unwrap();
    conn.execute_batch(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         CREATE TABLE orders (
             id INTEGER PRIMARY KEY,
             user_id INTEGER NOT NULL REFERENCES users(id),
             amount REAL
         );
         INSERT INTO users (id, name) VALUES (1, 'alice'), (2, 'bob');
         INSERT INTO orders (id, user_id, amount) VALUES (1, 1, 9.5), (2, 2, 12.0);",
    )
    .unwrap();
    file
}

fn resolver_for(
    db: &tempfile::NamedTempFile,
    oracle: ScriptedOracle,
    max_attempts: u32,
) -> QueryResolver {
    let schema = Arc::new(SchemaExtractor::new(db.path()).unwrap().extract().unwrap());
    let knowledge = Arc::new(KnowledgeBase::from_documents(vec![], 5));
    let executor = QueryExecutor::new(db.path(), Duration::from_secs(5), 100);
    QueryResolver::new(schema, knowledge, Box::new(oracle), executor, 100, max_attempts)
}

#[tokio::test]
async fn list_all_users_succeeds_with_injected_limit() {
    let db = seeded_db();
    let (oracle, _) = ScriptedOracle::new(&["SELECT * FROM users"]);
    let resolver = resolver_for(&db, oracle, 3);

    let resolution = resolver.resolve("List all users").await;
    assert!(resolution.succeeded());
    assert_eq!(resolution.attempts.len(), 1);
    match &resolution.outcome {
        Outcome::Succeeded { rows, sql } => {
            assert!(sql.contains("LIMIT 100"));
            assert_eq!(rows.row_count, 2);
            assert_eq!(rows.columns, vec!["id", "name"]);
        }
        Outcome::Failed { reason } => panic!("unexpected failure: {}", reason),
    }
}

#[tokio::test]
async fn disallowed_statement_is_rejected_then_corrected() {
    let db = seeded_db();
    let (oracle, calls) = ScriptedOracle::new(&["DROP TABLE users;", "SELECT name FROM users"]);
    let resolver = resolver_for(&db, oracle, 3);

    let resolution = resolver.resolve("remove everything").await;
    assert!(resolution.succeeded());
    assert_eq!(resolution.attempts.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    match &resolution.attempts[0].verdict {
        Some(Verdict::Rejected { reason }) => assert!(reason.contains("DROP")),
        other => panic!("expected rejection, got {:?}", other),
    }
    // The rejected statement still appears in the structured trail.
    assert_eq!(
        resolution.attempts[0].candidate_sql.as_deref(),
        Some("DROP TABLE users")
    );
    // The retry prompt carries the prior failure as corrective context.
    let retry_prompt = &resolution.attempts[1].prompt;
    assert!(retry_prompt.contains("PREVIOUS ATTEMPT FAILED:"));
    assert!(retry_prompt.contains("DROP TABLE users"));
    assert!(retry_prompt.contains("not allowed"));
}

#[tokio::test]
async fn unknown_identifier_is_named_in_the_rejection() {
    let db = seeded_db();
    let (oracle, _) =
        ScriptedOracle::new(&["SELECT * FROM ghost_table;", "SELECT id FROM users"]);
    let resolver = resolver_for(&db, oracle, 3);

    let resolution = resolver.resolve("anything").await;
    assert!(resolution.succeeded());
    match &resolution.attempts[0].verdict {
        Some(Verdict::Rejected { reason }) => assert!(reason.contains("ghost_table")),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(resolution.attempts[1].prompt.contains("ghost_table"));
}

#[tokio::test]
async fn exhaustion_returns_the_full_attempt_trail() {
    let db = seeded_db();
    let (oracle, calls) = ScriptedOracle::new(&["DROP TABLE users;"]);
    let resolver = resolver_for(&db, oracle, 3);

    let resolution = resolver.resolve("hopeless question").await;
    assert!(!resolution.succeeded());
    assert_eq!(resolution.attempts.len(), 3);
    // The attempt bound also bounds oracle calls.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match &resolution.outcome {
        Outcome::Failed { reason } => assert!(reason.contains("exhausted 3 attempt(s)")),
        Outcome::Succeeded { .. } => panic!("expected failure"),
    }
}

#[tokio::test]
async fn execution_errors_feed_the_next_prompt() {
    let db = seeded_db();
    // Passes identifier checks but fails at runtime: abs() takes one
    // argument, which only SQLite itself notices.
    let (oracle, _) = ScriptedOracle::new(&[
        "SELECT abs(id, name) FROM users",
        "SELECT name FROM users",
    ]);
    let resolver = resolver_for(&db, oracle, 3);

    let resolution = resolver.resolve("names please").await;
    assert!(resolution.succeeded());
    assert_eq!(resolution.attempts.len(), 2);
    assert!(resolution.attempts[1].prompt.contains("PREVIOUS ATTEMPT FAILED:"));
}

#[tokio::test]
async fn oracle_failure_consumes_an_attempt() {
    struct FlakyOracle {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Oracle for FlakyOracle {
        async fn generate(&self, _prompt: &str, _system_prompt: &str) -> Result<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(sqlscribe::error::EngineError::OracleTransport(
                    "connection reset".to_string(),
                ))
            } else {
                Ok("SELECT id FROM users".to_string())
            }
        }

        fn model(&self) -> &str {
            "flaky"
        }
    }

    let db = seeded_db();
    let schema = Arc::new(SchemaExtractor::new(db.path()).unwrap().extract().unwrap());
    let knowledge = Arc::new(KnowledgeBase::from_documents(vec![], 5));
    let executor = QueryExecutor::new(db.path(), Duration::from_secs(5), 100);
    let resolver = QueryResolver::new(
        schema,
        knowledge,
        Box::new(FlakyOracle {
            calls: AtomicUsize::new(0),
        }),
        executor,
        100,
        3,
    );

    let resolution = resolver.resolve("ids").await;
    assert!(resolution.succeeded());
    assert_eq!(resolution.attempts.len(), 2);
    assert!(resolution.attempts[0].raw_output.is_none());
    assert!(resolution.attempts[1].prompt.contains("connection reset"));
}

#[tokio::test]
async fn sql_only_mode_validates_without_executing() {
    let db = seeded_db();
    let (oracle, _) = ScriptedOracle::new(&["SELECT name FROM users"]);
    let resolver = resolver_for(&db, oracle, 3);

    let resolution = resolver.resolve_sql_only("names").await;
    assert!(resolution.succeeded());
    match &resolution.outcome {
        Outcome::Succeeded { rows, sql } => {
            assert!(sql.contains("SELECT name FROM users"));
            assert_eq!(rows.row_count, 0);
        }
        Outcome::Failed { reason } => panic!("unexpected failure: {}", reason),
    }
}

#[tokio::test]
async fn knowledge_documents_appear_in_the_prompt() {
    let db = seeded_db();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("users.md"),
        "# Users\nThe users table holds customer accounts.",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("orders.md"),
        "# Orders\nThe orders table holds purchases.",
    )
    .unwrap();
    // The recipe's indexed keywords (headings + join-key lines) share no
    // term with the question; only the escalation rule can pull it in.
    std::fs::write(
        dir.path().join("_joins.md"),
        "# Multi-hop recipes\nJoin key: user_id\n\nConnect orders to users through user_id.",
    )
    .unwrap();

    let schema = Arc::new(SchemaExtractor::new(db.path()).unwrap().extract().unwrap());
    let knowledge =
        Arc::new(KnowledgeBase::load(dir.path(), &schema.table_names(), 5).unwrap());
    let executor = QueryExecutor::new(db.path(), Duration::from_secs(5), 100);
    let (oracle, _) = ScriptedOracle::new(&[
        "SELECT u.name, SUM(o.amount) AS spend FROM users u JOIN orders o ON o.user_id = u.id GROUP BY u.name",
    ]);
    let resolver = QueryResolver::new(schema, knowledge, Box::new(oracle), executor, 100, 3);

    let resolution = resolver.resolve("orders per users account").await;
    assert!(resolution.succeeded());
    let prompt = &resolution.attempts[0].prompt;
    assert!(prompt.contains("### users.md"));
    assert!(prompt.contains("### orders.md"));
    // Multi-hop escalation: the join recipe rides along despite scoring zero.
    assert!(prompt.contains("### _joins.md"));
    assert!(prompt.contains("DOMAIN KNOWLEDGE:"));
}
