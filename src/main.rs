use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use safe_tgz::secure_fs::mark_executable;
use safe_tgz::{interrupt, list, pack, Extractor, Limits};

/// Hardened tar.gz extractor for untrusted archives.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract an archive into a directory
    Extract {
        archive: PathBuf,
        directory: PathBuf,
        /// Relative path of a program inside the archive to make executable
        #[arg(long, value_name = "REL")]
        exec: Option<String>,
    },
    /// List the entries of an archive
    List { archive: PathBuf },
    /// Create an archive (.tar, .tgz or .tar.gz) from files
    Pack {
        archive: PathBuf,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if interrupt::is_interrupted() {
                ExitCode::from(130)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(command: Command) -> Result<()> {
    let limits = Limits::from_env().context("Invalid extraction limits")?;
    match command {
        Command::Extract {
            archive,
            directory,
            exec,
        } => {
            let summary = Extractor::new(limits.clone())
                .with_cancel_flag(interrupt::install_handlers())
                .extract(&archive, &directory)
                .with_context(|| format!("Failed to extract {}", archive.display()))?;
            println!(
                "Extracted {} file(s) and {} dir(s), {} bytes, to {}",
                summary.files_written,
                summary.directories_created,
                summary.bytes_extracted,
                directory.display()
            );
            if let Some(rel) = exec {
                let root = std::path::absolute(&directory)?;
                let path = mark_executable(&root, &rel, &limits)
                    .with_context(|| format!("Failed to prepare {}", rel))?;
                println!("Executable: {}", path.display());
            }
        }
        Command::List { archive } => {
            let headers = list(&archive, &limits)
                .with_context(|| format!("Failed to list {}", archive.display()))?;
            println!("Files in {}:", archive.display());
            println!("{:>10}  {:>4}  Name", "Size", "Type");
            println!("{}", "-".repeat(50));
            for header in &headers {
                println!(
                    "{:>10}  {:>4}  {}",
                    header.size,
                    type_label(header.kind()),
                    header.full_path()
                );
            }
            println!("\nTotal: {} entries", headers.len());
        }
        Command::Pack { archive, files } => {
            let count = pack(&archive, &files)
                .with_context(|| format!("Failed to write {}", archive.display()))?;
            println!("Created {} with {} file(s)", archive.display(), count);
        }
    }
    Ok(())
}

fn type_label(kind: safe_tgz::EntryKind) -> &'static str {
    use safe_tgz::EntryKind;
    match kind {
        EntryKind::Directory => "dir",
        EntryKind::Regular => "file",
        EntryKind::HardLink => "hard",
        EntryKind::Symlink => "link",
        EntryKind::Other(_) => "?",
    }
}
