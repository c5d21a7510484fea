//! darkibox: run one filesystem operation against a darkibox remote.
//!
//! # Usage
//!
//! ```bash
//! # List a directory
//! darkibox --config darkibox.toml ls photos
//!
//! # Upload a local file
//! darkibox --config darkibox.toml put ./cat.jpg photos/cat.jpg
//! ```

use clap::{Parser, Subcommand};
use darkibox_fs::{CancellationToken, Object, RemoteConfig, RemoteFs, Upload};
use env_logger::Env;
use log::{error, info, warn};
use std::path::PathBuf;
use std::process;

/// Access a darkibox file-hosting account from the command line.
#[derive(Parser, Debug)]
#[command(name = "darkibox")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the remote configuration (TOML)
    #[arg(short, long, value_name = "FILE", default_value = "darkibox.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "")]
        path: String,
    },
    /// Show the metadata of one entry
    Stat { path: String },
    /// Upload a local file
    Put {
        /// Local file to upload
        source: PathBuf,
        /// Remote destination path
        dest: String,
    },
    /// Create a directory
    Mkdir { path: String },
    /// Remove an empty directory
    Rmdir { path: String },
    /// Remove a file
    Rm { path: String },
    /// Show account information
    About,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    let config = match RemoteConfig::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {}", e);
            process::exit(1);
        }
    };

    let fs = match RemoteFs::new(&config) {
        Ok(fs) => fs,
        Err(e) => {
            error!("Failed to create remote: {}", e);
            process::exit(1);
        }
    };
    info!("Using {}", fs);

    // Ctrl+C aborts the in-flight request
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    if let Err(e) = run(&fs, &cancel, args.command).await {
        error!("{}", e);
        process::exit(1);
    }
}

async fn run(fs: &RemoteFs, cancel: &CancellationToken, command: Command) -> darkibox_fs::Result<()> {
    match command {
        Command::Ls { path } => {
            let mut entries = fs.list(cancel, &path).await?;
            entries.sort_by(|a, b| a.remote().cmp(b.remote()));
            for entry in &entries {
                print_entry(entry);
            }
            info!("{} entries", entries.len());
        }
        Command::Stat { path } => {
            let object = fs.stat(cancel, &path).await?;
            println!("{}", serde_json::to_string_pretty(object.info()).unwrap_or_default());
        }
        Command::Put { source, dest } => {
            let file = tokio::fs::File::open(&source).await?;
            let size = file.metadata().await?.len();
            info!("Uploading {} ({} bytes)", source.display(), size);
            let object = fs.put(cancel, &dest, Upload::from_reader(file, size)).await?;
            print_entry(&object);
        }
        Command::Mkdir { path } => fs.mkdir(cancel, &path).await?,
        Command::Rmdir { path } => fs.rmdir(cancel, &path).await?,
        Command::Rm { path } => fs.remove(cancel, &path).await?,
        Command::About => {
            let about = fs.about(cancel).await?;
            println!("{}", serde_json::to_string_pretty(&about).unwrap_or_default());
        }
    }
    Ok(())
}

fn print_entry(entry: &Object) {
    let kind = if entry.is_dir() { "d" } else { "-" };
    let modified = entry
        .mod_time()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("{} {:>12} {} {}", kind, entry.size(), modified, entry);
}
