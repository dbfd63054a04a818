//! Vellum CLI - open, check and normalize Vellum document files.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use vellum_document::Session;

#[derive(Parser, Debug)]
#[command(name = "vellum")]
#[command(author, version, about = "Vellum document tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a document and report recoverable data problems
    Validate {
        /// Input document file
        file: PathBuf,

        /// Treat warnings as failures
        #[arg(long)]
        strict: bool,
    },

    /// Re-export a document in normalized form
    Fmt {
        /// Input document file
        file: PathBuf,

        /// Output path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print one node (or the whole tree) as serialized data
    Inspect {
        /// Input document file
        file: PathBuf,

        /// Node path to inspect, e.g. "card-1/title"
        #[arg(short, long)]
        path: Option<String>,
    },
}

fn open_session(file: &PathBuf) -> anyhow::Result<(Session, usize)> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let mut session = Session::new();
    let report = session
        .open(&raw, Some(file.clone()))
        .with_context(|| format!("failed to open {}", file.display()))?;
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    Ok((session, report.warnings.len()))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Validate { file, strict } => {
            let (session, warning_count) = open_session(&file)?;
            println!(
                "{}: {} node(s), {} connection(s), {} warning(s)",
                file.display(),
                session.node_count() - 1,
                session.connections().len(),
                warning_count
            );
            if strict && warning_count > 0 {
                bail!("{warning_count} warning(s) in strict mode");
            }
        }

        Command::Fmt { file, output } => {
            let (session, _) = open_session(&file)?;
            let normalized = session.export_string();
            match output {
                Some(path) => std::fs::write(&path, normalized)
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => println!("{normalized}"),
            }
        }

        Command::Inspect { file, path } => {
            let (session, _) = open_session(&file)?;
            let value = match path {
                Some(path) => {
                    let canonical = session.canonicalize(&path);
                    let Some(key) = canonical.as_deref().and_then(|p| session.resolve_path(p))
                    else {
                        bail!("no node found at '{path}'");
                    };
                    session.serialize_node(key)
                }
                None => session.export(),
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(())
}
