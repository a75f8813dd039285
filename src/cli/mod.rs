//! Command-line interface.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "veridoc")]
#[command(about = "Distributed document analysis orchestration engine")]
#[command(version)]
pub struct Cli {
    /// Config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run the background worker pool
    Worker,

    /// Submit a document for analysis
    Submit {
        /// Document reference (path, URL, or storage key)
        document_ref: String,
        /// Analysis kinds to run (similarity, ai_detect, image_similarity)
        #[arg(short, long = "kind", default_values = ["similarity", "ai_detect"])]
        kinds: Vec<String>,
        /// Image references for image similarity analysis
        #[arg(long = "image")]
        images: Vec<String>,
        /// Submitting identity, used for quota accounting
        #[arg(long)]
        user: Option<String>,
        /// Quota tier of the submitting identity
        #[arg(long, default_value = "free")]
        tier: String,
        /// Tail progress until the task finishes
        #[arg(short, long)]
        wait: bool,
    },

    /// Show the status of a task
    Status {
        task_id: String,
    },

    /// Cancel a running task
    Cancel {
        task_id: String,
    },

    /// Ask a question grounded in indexed documents
    Ask {
        question: String,
        /// Restrict retrieval to one document
        #[arg(long)]
        document: Option<String>,
        /// Number of context chunks to retrieve
        #[arg(long, default_value = "5")]
        top_k: usize,
        /// Memory id to append this chat round to
        #[arg(long)]
        memory: Option<String>,
        /// Asking identity, used for quota accounting
        #[arg(long)]
        user: Option<String>,
        /// Quota tier of the asking identity
        #[arg(long, default_value = "free")]
        tier: String,
    },

    /// Chunk and index a document file into the retrieval backends
    Index {
        /// Document id to index under
        document_id: String,
        /// Text file to read
        file: PathBuf,
    },

    /// Manage analysis memories
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// List stored memories
    List,
    /// Show one memory with its chat history
    Show { id: String },
    /// Delete a memory
    Delete { id: String },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Worker => commands::cmd_worker(&settings).await,
        Commands::Submit {
            document_ref,
            kinds,
            images,
            user,
            tier,
            wait,
        } => {
            commands::cmd_submit(
                &settings,
                &document_ref,
                &kinds,
                images,
                user.as_deref(),
                &tier,
                wait,
            )
            .await
        }
        Commands::Status { task_id } => commands::cmd_status(&settings, &task_id).await,
        Commands::Cancel { task_id } => commands::cmd_cancel(&settings, &task_id).await,
        Commands::Ask {
            question,
            document,
            top_k,
            memory,
            user,
            tier,
        } => {
            commands::cmd_ask(
                &settings,
                &question,
                document.as_deref(),
                top_k,
                memory.as_deref(),
                user.as_deref(),
                &tier,
            )
            .await
        }
        Commands::Index { document_id, file } => {
            commands::cmd_index(&settings, &document_id, &file).await
        }
        Commands::Memory { command } => match command {
            MemoryCommands::List => commands::cmd_memory_list(&settings).await,
            MemoryCommands::Show { id } => commands::cmd_memory_show(&settings, &id).await,
            MemoryCommands::Delete { id } => commands::cmd_memory_delete(&settings, &id).await,
        },
    }
}
