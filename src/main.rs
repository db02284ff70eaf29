//! # testforge CLI (`tforge`)
//!
//! ## Usage
//!
//! ```bash
//! tforge --config ./config/testforge.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tforge init` | Create the SQLite database and run schema migrations |
//! | `tforge ingest <path>` | Register a text file as a document and process it |
//! | `tforge reprocess <id>` | Re-chunk and re-embed a document |
//! | `tforge docs` | List documents |
//! | `tforge delete <id>` | Delete a document and its chunks |
//! | `tforge generate --doc <id>` | Submit a generation job and wait for it |
//! | `tforge status <job-id>` | Show a job's state |
//! | `tforge cases` | List stored test cases |
//! | `tforge mindmap build <case-id>...` | Build a mind map |
//! | `tforge mindmap rebuild <id>` | Rebuild a mind map |
//! | `tforge mindmap list` | List mind maps |
//! | `tforge serve` | Start the HTTP API |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use testforge::config::{self, Config};
use testforge::services::Services;
use testforge::{migrate, server};
use testforge_core::mindmap::{build_mind_map, rebuild_mind_map};
use testforge_core::models::{
    Complexity, DocumentStatus, GenerationConfig, GenerationJob, JobScope, LayoutHint, MindMap,
    MindMapStatus, Priority, TestCaseFilter, TestCaseStatus, TestType,
};

/// testforge: generate test cases from requirement documents.
#[derive(Parser)]
#[command(name = "tforge", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/testforge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Register a UTF-8 text file as a document, then chunk, embed and index it.
    Ingest {
        path: PathBuf,

        /// Document title (defaults to the file name).
        #[arg(long)]
        title: Option<String>,
    },

    /// Re-run processing for an existing document, replacing its chunks.
    Reprocess { id: String },

    /// List documents, newest first.
    Docs {
        #[arg(long)]
        status: Option<DocumentStatus>,
    },

    /// Delete a document and remove its chunks from the index.
    Delete { id: String },

    /// Submit a generation job and wait until it finishes.
    Generate {
        /// Document id to draw context from. Repeatable.
        #[arg(long = "doc")]
        docs: Vec<String>,

        /// Free-text requirement, alone or alongside documents.
        #[arg(long)]
        text: Option<String>,

        #[arg(long)]
        scenario: Option<String>,

        #[arg(long = "type", default_value = "functional")]
        test_type: TestType,

        #[arg(long, default_value_t = 10)]
        count: u32,

        #[arg(long, default_value = "medium")]
        complexity: Complexity,

        /// Priority given to generated cases that do not state one.
        #[arg(long, default_value = "medium")]
        priority: Priority,
    },

    /// Show the state of a generation job.
    Status { job_id: String },

    /// List stored test cases.
    Cases {
        #[arg(long = "doc")]
        document_id: Option<String>,

        #[arg(long)]
        status: Option<TestCaseStatus>,
    },

    Mindmap {
        #[command(subcommand)]
        action: MindmapAction,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum MindmapAction {
    /// Build a new mind map over the given test cases.
    Build {
        #[arg(required = true)]
        case_ids: Vec<String>,

        #[arg(long, default_value = "hierarchical")]
        layout: LayoutHint,

        #[arg(long)]
        title: Option<String>,
    },
    /// Rebuild a mind map from the current state of its test cases.
    Rebuild { id: String },
    /// List mind maps, newest first.
    List {
        #[arg(long)]
        status: Option<MindMapStatus>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path, title } => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let title = title.or_else(|| {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            });
            let services = Services::open(&cfg).await?;
            let doc = services.create_document(title, text).await?;
            let chunks = services.process_document(&doc.id).await?;
            println!("Document {} processed: {} chunks", doc.id, chunks);
        }
        Commands::Reprocess { id } => {
            let services = Services::open(&cfg).await?;
            let chunks = services.process_document(&id).await?;
            println!("Document {} reprocessed: {} chunks", id, chunks);
        }
        Commands::Docs { status } => {
            let services = Services::open(&cfg).await?;
            let docs = services.store.list_documents(status).await?;
            if docs.is_empty() {
                println!("No documents.");
            }
            for doc in docs {
                println!(
                    "{}  [{}]  {}",
                    doc.id,
                    doc.status,
                    doc.title.as_deref().unwrap_or("(untitled)")
                );
            }
        }
        Commands::Delete { id } => {
            let services = Services::open(&cfg).await?;
            services.delete_document(&id).await?;
            println!("Document {} deleted.", id);
        }
        Commands::Generate {
            docs,
            text,
            scenario,
            test_type,
            count,
            complexity,
            priority,
        } => {
            run_generate(
                &cfg,
                JobScope {
                    document_ids: docs,
                    free_text: text,
                    scenario,
                },
                GenerationConfig {
                    test_type,
                    count,
                    complexity,
                    default_priority: priority,
                },
            )
            .await?;
        }
        Commands::Status { job_id } => {
            let services = Services::open(&cfg).await?;
            let job = services.orchestrator.status(&job_id).await?;
            print_job(&job);
        }
        Commands::Cases {
            document_id,
            status,
        } => {
            let services = Services::open(&cfg).await?;
            let filter = TestCaseFilter {
                document_id,
                status,
                priority: None,
            };
            let cases = services.store.list_test_cases(&filter).await?;
            if cases.is_empty() {
                println!("No test cases.");
            }
            for tc in cases {
                println!(
                    "{}  [{}/{}]  {}",
                    tc.id, tc.priority, tc.status, tc.title
                );
            }
        }
        Commands::Mindmap { action } => {
            let services = Services::open(&cfg).await?;
            match action {
                MindmapAction::Build {
                    case_ids,
                    layout,
                    title,
                } => {
                    let map = build_mind_map(
                        services.store.as_ref(),
                        &case_ids,
                        layout,
                        title.as_deref(),
                    )
                    .await?;
                    print_map(&map);
                }
                MindmapAction::Rebuild { id } => {
                    print_map(&rebuild_mind_map(services.store.as_ref(), &id).await?);
                }
                MindmapAction::List { status } => {
                    let maps = services.store.list_mind_maps(status).await?;
                    if maps.is_empty() {
                        println!("No mind maps.");
                    }
                    for map in &maps {
                        print_map(map);
                    }
                }
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_generate(cfg: &Config, scope: JobScope, config: GenerationConfig) -> anyhow::Result<()> {
    let services = Services::open(cfg).await?;
    let submission = services.orchestrator.submit(scope, config).await?;
    println!("Job {} submitted; waiting...", submission.job_id);

    let job = services.orchestrator.wait(&submission.job_id).await?;
    print_job(&job);

    for id in &job.result_ids {
        if let Some(tc) = services.store.get_test_case(id).await? {
            println!("  {}  [{}]  {}", tc.id, tc.priority, tc.title);
        }
    }
    Ok(())
}

fn print_job(job: &GenerationJob) {
    println!(
        "Job {}: {} after {} attempt(s), {} test case(s)",
        job.id,
        job.status,
        job.attempts,
        job.result_ids.len()
    );
    if let Some(err) = &job.last_error {
        println!("  last error [{}]: {}", err.code, err.message);
    }
    for w in &job.warnings {
        println!("  dropped: {}", w);
    }
}

fn print_map(map: &MindMap) {
    println!(
        "Mind map {} (v{}, {}): {} nodes, {} edges  {}",
        map.id,
        map.version,
        map.status,
        map.nodes.len(),
        map.edges.len(),
        map.title
    );
}
