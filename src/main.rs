use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use nestsync::{Fixture, NestError};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nestsync")]
#[command(about = "Reconcile nested collections described by a JSON scenario file")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the parent and its current collection
    Show {
        fixture: PathBuf,
    },
    /// Print what the save would do, without writing
    Plan {
        fixture: PathBuf,
    },
    /// Run the save and print the refreshed parent and collection
    Apply {
        fixture: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Show { fixture } => show(&fixture).await,
        Command::Plan { fixture } => plan(&fixture).await,
        Command::Apply { fixture } => apply(&fixture).await,
    }
}

fn read_fixture(path: &Path) -> Result<Fixture> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture '{}'", path.display()))?;
    Fixture::from_json(&text).with_context(|| format!("invalid fixture '{}'", path.display()))
}

async fn show(path: &Path) -> Result<()> {
    let fixture = read_fixture(path)?;
    let writer = fixture.writer().await?;
    let request = &fixture.request;
    let graph = writer
        .load(&request.parent_table, request.parent_id, &request.association)
        .await?;
    print_json(&graph)
}

async fn plan(path: &Path) -> Result<()> {
    let fixture = read_fixture(path)?;
    let writer = fixture.writer().await?;
    let request = fixture.save_request(&writer)?;
    let plan = writer.plan(&request).await?;
    print_json(&plan)
}

async fn apply(path: &Path) -> Result<()> {
    let fixture = read_fixture(path)?;
    let writer = fixture.writer().await?;
    let request = fixture.save_request(&writer)?;
    match writer.save(request).await {
        Ok(outcome) => print_json(&outcome),
        Err(NestError::Validation(failures)) => {
            print_json(&serde_json::json!({ "failures": &failures }))?;
            bail!("save rejected, nothing was written: {}", failures)
        }
        Err(err) => Err(err.into()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
