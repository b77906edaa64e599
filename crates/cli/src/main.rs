use clap::{Parser, Subcommand};
use filegate_core::config::{
    allowed_media_types_from_env_value, index_path_from_env_value, max_body_bytes_from_env_value,
    storage_root_from_env_value,
};
use filegate_core::constants::{
    ENV_ALLOWED_MEDIA_TYPES, ENV_INDEX_PATH, ENV_MAX_BODY_BYTES, ENV_PUBLIC_BASE_URL,
    ENV_STORAGE_ROOT,
};
use filegate_core::{EntryKind, SqliteTokenIndex, StorageConfig, StorageService};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "filegate")]
#[command(about = "Filegate storage administration CLI")]
struct Cli {
    /// Storage root (defaults to FILEGATE_STORAGE_ROOT, then ./uploads)
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,
    /// Token index file (defaults to FILEGATE_INDEX_PATH, then ./filegate.sqlite3)
    #[arg(long, global = true)]
    index: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a local file and print its token
    Upload {
        /// File to upload
        file: PathBuf,
        /// Target directory relative to the storage root
        #[arg(long, default_value = "")]
        dir: String,
        /// Media type; detected from content if omitted
        #[arg(long)]
        media_type: Option<String>,
    },
    /// List a directory (the storage root if omitted)
    List {
        /// Directory relative to the storage root
        dir: Option<String>,
    },
    /// Print the token of a stored file
    Token {
        /// File path relative to the storage root
        path: String,
    },
    /// Check a token against a path and print where the file lives
    Resolve {
        /// File path relative to the storage root
        path: String,
        /// Access token
        token: String,
    },
    /// Delete a file or directory and its tokens
    Delete {
        /// Path relative to the storage root
        path: String,
    },
}

fn open_service(cli: &Cli) -> Result<StorageService, Box<dyn std::error::Error>> {
    let storage_root = cli
        .storage_root
        .clone()
        .unwrap_or_else(|| storage_root_from_env_value(std::env::var(ENV_STORAGE_ROOT).ok()));
    std::fs::create_dir_all(&storage_root)?;

    let index_path = cli
        .index
        .clone()
        .unwrap_or_else(|| index_path_from_env_value(std::env::var(ENV_INDEX_PATH).ok()));

    let cfg = StorageConfig::new(
        storage_root,
        index_path,
        allowed_media_types_from_env_value(std::env::var(ENV_ALLOWED_MEDIA_TYPES).ok()),
        max_body_bytes_from_env_value(std::env::var(ENV_MAX_BODY_BYTES).ok())?,
        std::env::var(ENV_PUBLIC_BASE_URL).unwrap_or_default(),
    )?;
    let index = SqliteTokenIndex::open(cfg.index_path())?;

    Ok(StorageService::new(Arc::new(cfg), Arc::new(index))?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let Some(command) = &cli.command else {
        println!("No command given. Run `filegate --help` for usage.");
        return Ok(());
    };

    let service = open_service(&cli)?;

    match command {
        Commands::Upload {
            file,
            dir,
            media_type,
        } => {
            let content = std::fs::read(file)?;
            if content.len() > service.config().max_body_bytes() {
                eprintln!(
                    "Error uploading file: {} exceeds the {} byte limit",
                    file.display(),
                    service.config().max_body_bytes()
                );
                return Ok(());
            }
            let display_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            match service.upload(dir, &display_name, media_type.as_deref(), &content) {
                Ok(receipt) => {
                    println!("Path: {}", receipt.canonical_path);
                    println!("Token: {}", receipt.token);
                    println!("Media type: {}", receipt.media_type);
                }
                Err(e) => eprintln!("Error uploading file: {}", e),
            }
        }
        Commands::List { dir } => match service.list(dir.as_deref().unwrap_or_default()) {
            Ok(entries) => {
                for entry in entries {
                    let kind = match entry.kind {
                        EntryKind::File => "file",
                        EntryKind::Directory => "dir ",
                    };
                    let flag = if entry.missing_metadata {
                        "  [no token]"
                    } else {
                        ""
                    };
                    println!("{} {} ({}){}", kind, entry.name, entry.path, flag);
                }
            }
            Err(e) => eprintln!("Error listing files: {}", e),
        },
        Commands::Token { path } => match service.issue_token(path) {
            Ok(record) => println!("Token: {}", record.token),
            Err(e) => eprintln!("Error fetching token: {}", e),
        },
        Commands::Resolve { path, token } => match service.resolve(path, token) {
            Ok(resolved) => println!(
                "{} ({})",
                resolved.absolute_path.display(),
                resolved.record.display_name
            ),
            Err(e) => eprintln!("Error resolving file: {}", e),
        },
        Commands::Delete { path } => match service.delete(path) {
            Ok(outcome) => println!(
                "Deleted {} ({} file(s), {} empty director(ies) pruned)",
                outcome.path, outcome.removed_files, outcome.pruned_directories
            ),
            Err(e) => eprintln!("Error deleting: {}", e),
        },
    }

    Ok(())
}
