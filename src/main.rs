use clap::{Parser, Subcommand};
use std::path::PathBuf;

use knowledge_store::commands::{
    create_collection, list_collections, search, show_status, upload_file,
};
use knowledge_store::config::{Config, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "knowledge-store")]
#[command(about = "Embed documents into named collections and search them by meaning")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the embedding service, vector index and store
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Create a new collection
    Create {
        /// Collection title; ASCII letters, digits, '-' and '_'
        title: String,
        /// Topic to attach to the collection, may be repeated
        #[arg(long = "topic")]
        topics: Vec<String>,
    },
    /// Chunk, embed and upload a text file into a collection
    Upload {
        /// Target collection title
        collection: String,
        /// Path of the text or markdown file
        file: PathBuf,
        /// Document name, defaults to the file stem
        #[arg(long)]
        name: Option<String>,
        /// Document topic
        #[arg(long)]
        topic: Option<String>,
    },
    /// List all collections
    List,
    /// Search for chunks similar to a query
    Search {
        query: String,
        /// Collection to search; otherwise the default collection is used
        #[arg(long)]
        collection: Option<String>,
        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show service health and reconciliation results
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Create { title, topics } => {
            create_collection(&Config::load()?, &title, topics).await?;
        }
        Commands::Upload {
            collection,
            file,
            name,
            topic,
        } => {
            upload_file(&Config::load()?, &collection, &file, name, topic).await?;
        }
        Commands::List => {
            list_collections(&Config::load()?).await?;
        }
        Commands::Search {
            query,
            collection,
            limit,
        } => {
            search(&Config::load()?, &query, collection, limit).await?;
        }
        Commands::Status => {
            show_status(&Config::load()?).await?;
        }
    }

    Ok(())
}
