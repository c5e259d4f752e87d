use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use query_staff::config::{AgentConfig, ContextStrategy};
use query_staff::execution_loop::{QueryWorkflow, WorkflowOutcome};
use query_staff::generator::LlmSqlGenerator;
use query_staff::llm::LlmClient;
use query_staff::metadata::SchemaCatalog;
use query_staff::safety_guardrails::{SafetyValidator, ValidationVerdict};
use query_staff::schema_rag::provider_for;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "query-staff")]
#[command(about = "Turn natural-language questions into safe, bounded SQL for review")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a validated SQL query for a question
    Ask {
        /// The question in natural language
        question: String,

        #[command(flatten)]
        schema: SchemaArgs,

        /// Maximum number of correction attempts
        #[arg(long)]
        max_retries: Option<u32>,

        /// Timeout for each model call, in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run only the safety validator on a SQL statement
    Check {
        sql: String,
    },

    /// Show the schema context that would be sent to the model
    Context {
        question: String,

        #[command(flatten)]
        schema: SchemaArgs,
    },
}

#[derive(Args)]
struct SchemaArgs {
    /// Path to the schema catalog JSON (or set QUERY_STAFF_SCHEMA)
    #[arg(long)]
    schema: Option<PathBuf>,

    /// How schema context is built
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Full,
    Ranked,
}

impl From<StrategyArg> for ContextStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Full => ContextStrategy::FullDump,
            StrategyArg::Ranked => ContextStrategy::Ranked,
        }
    }
}

impl SchemaArgs {
    fn apply(&self, config: &mut AgentConfig) {
        if let Some(ref path) = self.schema {
            config.schema_path = path.clone();
        }
        if let Some(strategy) = self.strategy {
            config.context.strategy = strategy.into();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AgentConfig::from_env()?;

    match cli.command {
        Command::Ask {
            question,
            schema,
            max_retries,
            timeout_secs,
            json,
        } => {
            schema.apply(&mut config);
            if let Some(max_retries) = max_retries {
                config.workflow.max_retries = max_retries;
            }
            if let Some(secs) = timeout_secs {
                config.workflow.generation_timeout = Duration::from_secs(secs);
            }
            let accepted = ask(&config, &question, json).await?;
            if !accepted {
                std::process::exit(1);
            }
        }
        Command::Check { sql } => {
            let verdict = SafetyValidator::new(config.validator).validate(&sql);
            match verdict {
                ValidationVerdict::Accepted => println!("Accepted"),
                ValidationVerdict::Rejected { reason } => {
                    println!("Rejected ({}): {}", reason, reason.describe());
                    std::process::exit(1);
                }
            }
        }
        Command::Context { question, schema } => {
            schema.apply(&mut config);
            let catalog = load_catalog(&config)?;
            let provider = provider_for(catalog, &config.context);
            println!("{}", provider.build_context(&question).await);
        }
    }

    Ok(())
}

fn load_catalog(config: &AgentConfig) -> Result<Arc<SchemaCatalog>> {
    let catalog = SchemaCatalog::load(&config.schema_path)
        .with_context(|| format!("loading schema catalog from {}", config.schema_path.display()))?;
    info!(
        "Loaded schema '{}' with {} tables",
        catalog.database,
        catalog.tables.len()
    );
    Ok(Arc::new(catalog))
}

async fn ask(config: &AgentConfig, question: &str, json: bool) -> Result<bool> {
    if config.llm.api_key.is_empty() {
        warn!("OPENAI_API_KEY is not set; the model endpoint will likely reject requests");
    }

    let catalog = load_catalog(config)?;
    let llm = LlmClient::from_settings(&config.llm);
    info!("Using model {}", llm.model());
    let generator = Arc::new(LlmSqlGenerator::new(Arc::new(llm)));
    let workflow = QueryWorkflow::from_config(config, catalog, generator);

    let state = workflow.run(question).await;
    let outcome = state
        .outcome()
        .context("workflow returned without reaching a terminal state")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        match &outcome {
            WorkflowOutcome::Accepted {
                generated_sql,
                explanation,
                ..
            } => {
                if let Some(ref answer) = state.final_answer {
                    println!("{}\n", answer);
                }
                println!("Explanation:\n{}\n", explanation);
                println!("SQL:\n{}", generated_sql);
            }
            WorkflowOutcome::Failed { final_answer, .. } => println!("{}", final_answer),
        }
    }

    Ok(matches!(outcome, WorkflowOutcome::Accepted { .. }))
}
