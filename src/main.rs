use anyhow::{Context, Result};
use clap::Parser;
use sqlscribe::config::EngineConfig;
use sqlscribe::executor::QueryExecutor;
use sqlscribe::formatter::{self, OutputFormat};
use sqlscribe::knowledge::KnowledgeBase;
use sqlscribe::oracle::create_oracle;
use sqlscribe::resolver::{Attempt, AttemptOutcome, Outcome, QueryResolver, Verdict};
use sqlscribe::schema::SchemaExtractor;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlscribe")]
#[command(about = "Natural language to SQL query tool for SQLite")]
#[command(version)]
struct Args {
    /// Path to the SQLite database file
    #[arg(short, long)]
    db: PathBuf,

    /// Natural language question (omit to enter interactive mode)
    #[arg(short, long)]
    query: Option<String>,

    /// Path to the config file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to the knowledge directory
    #[arg(short, long, default_value = "knowledge")]
    knowledge: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Only show the accepted SQL, don't execute it
    #[arg(long)]
    sql_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = EngineConfig::load(&args.config)?;

    println!("Analyzing database schema...");
    let schema = Arc::new(SchemaExtractor::new(&args.db)?.extract()?);
    let table_names = schema.table_names();
    println!("  Found {} tables: {}", table_names.len(), table_names.join(", "));

    let knowledge = Arc::new(KnowledgeBase::load(
        &args.knowledge,
        &table_names,
        config.knowledge.budget,
    )?);
    if !knowledge.is_empty() {
        println!("  Knowledge files: {}", knowledge.file_names().join(", "));
    }

    let oracle = create_oracle(&config.llm)?;
    println!("  Using LLM: {}", oracle.model());

    let executor = QueryExecutor::new(
        &args.db,
        Duration::from_secs(config.safety.query_timeout),
        config.safety.max_results,
    );
    let resolver = QueryResolver::new(
        schema,
        knowledge,
        oracle,
        executor,
        config.safety.max_results as u64,
        config.safety.max_retries,
    );

    match args.query {
        Some(question) => run_question(&resolver, &question, args.format, args.sql_only).await,
        None => interactive(&resolver, args.format, args.sql_only).await,
    }
}

async fn run_question(
    resolver: &QueryResolver,
    question: &str,
    format: OutputFormat,
    sql_only: bool,
) -> Result<()> {
    println!("\nQuestion: {}", question);

    let resolution = if sql_only {
        resolver.resolve_sql_only(question).await
    } else {
        resolver.resolve(question).await
    };

    match &resolution.outcome {
        Outcome::Succeeded { rows, sql } => {
            println!("\nGenerated SQL:\n{}\n", sql);
            if !sql_only {
                println!("{}", formatter::render(rows, format)?);
            }
        }
        Outcome::Failed { reason } => {
            println!("\nFailed: {}", reason);
            print_attempt_trail(&resolution.attempts);
        }
    }
    Ok(())
}

fn print_attempt_trail(attempts: &[Attempt]) {
    println!("\nAttempts:");
    for attempt in attempts {
        let summary = match (&attempt.verdict, &attempt.outcome) {
            (Some(Verdict::Rejected { reason }), _) => format!("rejected: {}", reason),
            (_, Some(AttemptOutcome::Error { message })) => format!("error: {}", message),
            (Some(Verdict::Accepted), Some(AttemptOutcome::Rows { row_count, .. })) => {
                format!("succeeded with {} row(s)", row_count)
            }
            _ => "no outcome recorded".to_string(),
        };
        println!("  {}. {}", attempt.attempt_number, summary);
    }
}

async fn interactive(
    resolver: &QueryResolver,
    format: OutputFormat,
    sql_only: bool,
) -> Result<()> {
    println!("\nInteractive mode (type 'exit' or 'quit' to leave)");
    println!("Ask questions in natural language...\n");

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush().context("flush stdout")?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "exit" | "quit" | "q") {
            break;
        }

        run_question(resolver, question, format, sql_only).await?;
        println!();
    }

    println!("Goodbye!");
    Ok(())
}
