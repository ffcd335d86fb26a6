mod config;
mod server;

use anyhow::bail;
use chrono::Utc;
use clap::{Parser, Subcommand};
use config::{AppConfig, AppContext};
use std::path::PathBuf;
use std::sync::Arc;
use textbook_rag_core::{chunk_text_corpus, extract_questions_from_pdf, QueryResult, VectorIndex};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "textbook-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    config: AppConfig,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a PDF, or every PDF under a folder, into cleaned text.
    Process {
        #[arg(long)]
        input: PathBuf,
    },
    /// Embed and store every processed text file not yet in the index.
    Index {
        /// Clear the index first so changed files are fully re-indexed.
        #[arg(long, default_value_t = false)]
        reset: bool,
    },
    /// Answer one question, or every question found in a PDF.
    Query {
        #[arg(long, conflicts_with = "pdf", required_unless_present = "pdf")]
        question: Option<String>,
        #[arg(long)]
        pdf: Option<PathBuf>,
    },
    /// Run the HTTP API.
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:5000")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "textbook-rag boot"
    );

    let context = AppContext::build(cli.config).await?;

    match cli.command {
        Command::Process { input } => process(&context, input)?,
        Command::Index { reset } => index(&context, reset).await?,
        Command::Query { question, pdf } => query(&context, question, pdf).await?,
        Command::Serve { bind } => server::run_server(Arc::new(context), &bind).await?,
    }

    Ok(())
}

fn process(context: &AppContext, input: PathBuf) -> anyhow::Result<()> {
    if input.is_dir() {
        let report = context.processor.process_folder(&input)?;
        for skipped in &report.skipped_files {
            warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
        }
        for document in &report.processed {
            println!(
                "{} -> {} ({} chars, ocr={})",
                document.source_name,
                document.text_path.display(),
                document.char_count,
                document.ocr_applied
            );
        }
        println!(
            "{} processed, {} skipped",
            report.processed.len(),
            report.skipped_files.len()
        );
    } else {
        let document = context.processor.process_pdf(&input)?;
        println!("{}", document.text_path.display());
    }
    Ok(())
}

async fn index(context: &AppContext, reset: bool) -> anyhow::Result<()> {
    if reset {
        info!("clearing index");
        context.index.reset().await?;
    }

    let data_dir = &context.config.data_dir;
    if !data_dir.is_dir() {
        bail!("processed text folder {} does not exist", data_dir.display());
    }

    let chunks = chunk_text_corpus(data_dir, &context.chunker)?;
    info!(chunks = chunks.len(), "corpus chunked");
    let report = context.indexer.upsert(&chunks).await?;

    println!(
        "{} existing, {} added in {} batch(es) at {}",
        report.existing,
        report.added,
        report.batches.len(),
        Utc::now().to_rfc3339()
    );
    Ok(())
}

async fn query(
    context: &AppContext,
    question: Option<String>,
    pdf: Option<PathBuf>,
) -> anyhow::Result<()> {
    let exposure = context.config.exposure();

    let results = match (question, pdf) {
        (Some(question), _) => {
            let outcome = context.engine.answer(&question).await;
            vec![QueryResult::from_outcome(question, outcome, exposure)]
        }
        (None, Some(pdf)) => {
            let workdir = tempfile::tempdir()?;
            let questions = extract_questions_from_pdf(
                &pdf,
                workdir.path(),
                context.processor.extractor().ocr_engine(),
                context.questions.as_ref(),
            )?;
            if questions.is_empty() {
                bail!("no questions found in {}", pdf.display());
            }
            context.engine.answer_all(&questions, exposure).await
        }
        (None, None) => bail!("either --question or --pdf is required"),
    };

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
