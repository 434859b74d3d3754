use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use fileshelf::{StorageConfig, StorageEngine};

#[derive(Parser)]
#[command(name = "fileshelf")]
#[command(about = "Named file storage with content deduplication", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding the sqlite database and stored files
    #[arg(long, global = true, env = "FILESHELF_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Host name and port for the server to listen on
        #[arg(long, env = "FILESHELF_HOST", default_value = "localhost:8080")]
        host: String,
    },

    /// Store a local file under a name
    Put {
        /// Name to register the file under
        name: String,

        /// Path to the file to store
        file: PathBuf,
    },

    /// Write a stored file's contents to stdout or a path
    Get {
        name: String,

        /// Write to this path instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Show the record stored under a name
    Info { name: String },

    /// Delete a stored file
    Rm { name: String },

    /// List all stored files
    Ls,

    /// Remove blobs no file references
    Gc {
        /// Dry run - don't actually delete anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match cli.data_dir {
        Some(dir) => StorageConfig::with_root(dir),
        None => StorageConfig::load().await?,
    };

    let engine = StorageEngine::open(config.clone())
        .await
        .with_context(|| format!("Failed to open storage at {}", config.root.display()))?;
    let engine = Arc::new(engine);

    let result = run(cli.command, Arc::clone(&engine)).await;
    engine.close().await;
    result
}

async fn run(command: Commands, engine: Arc<StorageEngine>) -> Result<()> {
    match command {
        Commands::Serve { host } => fileshelf::server::serve(engine, &host, shutdown_signal()).await,
        Commands::Put { name, file } => {
            let reader = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("Failed to open file: {}", file.display()))?;
            let id = engine.save(&name, reader).await?;
            println!("{}", id);
            Ok(())
        }
        Commands::Get { name, output } => {
            let info = engine.get_info_by_name(&name).await?;
            let mut reader = engine.get_contents(&info.content_hash).await?;

            match output {
                Some(path) => {
                    let mut out = tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("Failed to create file: {}", path.display()))?;
                    tokio::io::copy(&mut reader, &mut out).await?;
                    out.flush().await?;
                }
                None => {
                    let mut out = tokio::io::stdout();
                    tokio::io::copy(&mut reader, &mut out).await?;
                    out.flush().await?;
                }
            }
            Ok(())
        }
        Commands::Info { name } => {
            let info = engine.get_info_by_name(&name).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        Commands::Rm { name } => {
            let info = engine.get_info_by_name(&name).await?;
            engine.delete(&info).await?;
            Ok(())
        }
        Commands::Ls => {
            for record in engine.list().await? {
                println!("{}\t{}\t{}", record.name, record.id, record.content_hash.to_hex());
            }
            Ok(())
        }
        Commands::Gc { dry_run } => {
            let report = engine.collect_garbage(dry_run).await?;
            for hash in &report.orphans {
                println!("{}", hash);
            }
            println!(
                "scanned {} blobs, {} orphaned, {} removed",
                report.scanned,
                report.orphans.len(),
                report.removed
            );
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
