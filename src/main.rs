//! # Book RAG CLI (`bookrag`)
//!
//! ## Usage
//!
//! ```bash
//! bookrag --config ./config/bookrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bookrag init` | Create the SQLite database and run schema migrations |
//! | `bookrag ingest` | Chunk and embed the book's Markdown files |
//! | `bookrag retrieve "<query>"` | Show the chunks retrieved for a question |
//! | `bookrag ask "<query>"` | Answer one question and print the JSON response |
//! | `bookrag session show <id>` | Print a session's history |
//! | `bookrag session end <id>` | Deactivate a session |
//! | `bookrag serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Re-embed every file, ignoring stored content hashes
//! bookrag ingest --full
//!
//! # Ask about a highlighted passage, continuing a conversation
//! bookrag ask "explain this" --selected "ros2 launch" --session 0b4e...
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use book_rag::{chat_cmd, config, ingest, logging, migrate, retrieve_cmd, server};

/// Book RAG: retrieval-augmented question answering over a book.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/bookrag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "bookrag",
    about = "Retrieval-augmented question answering over a book's Markdown sources",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/bookrag.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the sessions, documents and
    /// chunks tables. Running it more than once is safe.
    Init,

    /// Ingest the book.
    ///
    /// Walks `[ingest].root`, chunks each Markdown file, embeds the chunks
    /// and stores them. Files whose content is unchanged since the last
    /// run are skipped.
    Ingest {
        /// Re-embed every file, even if unchanged.
        #[arg(long)]
        full: bool,

        /// Show file and chunk counts without embedding or writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the chunks and citations retrieved for a question.
    Retrieve {
        query: String,

        /// Passage the user selected; biases retrieval towards it.
        #[arg(long)]
        selected: Option<String>,
    },

    /// Answer one question and print the JSON response.
    Ask {
        query: String,

        /// Passage the user selected; biases retrieval towards it.
        #[arg(long)]
        selected: Option<String>,

        /// Continue an existing conversation.
        #[arg(long)]
        session: Option<String>,
    },

    /// Inspect or end conversation sessions.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Print a session's state and history.
    Show { id: String },
    /// Deactivate a session.
    End { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { full, dry_run } => {
            ingest::run_ingest(&cfg, full, dry_run).await?;
        }
        Commands::Retrieve { query, selected } => {
            retrieve_cmd::run_retrieve(&cfg, &query, selected.as_deref()).await?;
        }
        Commands::Ask {
            query,
            selected,
            session,
        } => {
            chat_cmd::run_ask(&cfg, &query, selected, session).await?;
        }
        Commands::Session { action } => match action {
            SessionAction::Show { id } => chat_cmd::run_session_show(&cfg, &id).await?,
            SessionAction::End { id } => chat_cmd::run_session_end(&cfg, &id).await?,
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
