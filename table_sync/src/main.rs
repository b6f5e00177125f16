//! table_sync CLI - compare table data and schemas between two databases.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use table_sync::config::{self, StatementOrder};
use table_sync::data::{FragmentSink, MemorySink, OutputDialect, ScriptSink};
use table_sync::schema::render_changelog;
use table_sync::utils::logging::init_logging;
use table_sync::{CancelToken, TableSyncClient};

#[derive(Parser)]
#[command(name = "table_sync")]
#[command(about = "Compare table data and schemas between a reference and a target database")]
#[command(version)]
struct Cli {
    /// Path to the configuration file (YAML or TOML)
    #[arg(short, long, default_value = "table_sync.yaml")]
    config: PathBuf,

    /// Override the chunk size used for target lookups
    #[arg(long)]
    chunk_size: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate INSERT and UPDATE statements for one table
    DataDiff {
        #[arg(long)]
        reference_table: String,

        /// Defaults to the reference table name
        #[arg(long)]
        target_table: Option<String>,

        /// Write INSERT statements to this file
        #[arg(long)]
        inserts: Option<PathBuf>,

        /// Write UPDATE statements to this file
        #[arg(long)]
        updates: Option<PathBuf>,

        /// Run the generated script against the target afterwards
        #[arg(long)]
        apply: bool,
    },

    /// Generate DELETE statements for target rows missing from the reference
    DeleteSync {
        #[arg(long)]
        reference_table: String,

        #[arg(long)]
        target_table: Option<String>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Delete the rows on the target instead of writing a script
        #[arg(long)]
        execute: bool,
    },

    /// Compare the two schemas
    SchemaDiff {
        #[arg(long, value_enum, default_value = "sql")]
        format: SchemaFormat,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a script against the target in one transaction
    Apply {
        #[arg(long)]
        script: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemaFormat {
    Sql,
    Xml,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.to_string_lossy().to_string();
    let mut config = config::load_from_file(&config_path)
        .with_context(|| format!("loading {}", config_path))?;
    if let Some(chunk_size) = cli.chunk_size {
        if chunk_size == 0 {
            bail!("--chunk-size must be at least 1");
        }
        config.data_diff.chunk_size = chunk_size;
        config.delete_sync.chunk_size = chunk_size;
    }
    if let Commands::DeleteSync { execute: true, .. } = cli.command {
        config.delete_sync.execute_deletes = true;
    }

    init_logging(&config.logging)?;
    info!("Loaded configuration from {}", config_path);

    let client = TableSyncClient::new(config).await?;
    watch_ctrl_c(client.cancel_token());

    match cli.command {
        Commands::DataDiff {
            reference_table,
            target_table,
            inserts,
            updates,
            apply,
        } => {
            let target_table = target_table.unwrap_or_else(|| reference_table.clone());
            run_data_diff(&client, &reference_table, &target_table, inserts, updates, apply).await
        }
        Commands::DeleteSync {
            reference_table,
            target_table,
            output,
            ..
        } => {
            let target_table = target_table.unwrap_or_else(|| reference_table.clone());
            let sink = if client.config().delete_sync.execute_deletes {
                None
            } else {
                Some(open_sink(output)?)
            };
            let report = client.delete_sync(&reference_table, &target_table, sink).await?;
            print_report(&report)?;
            Ok(())
        }
        Commands::SchemaDiff { format, output } => {
            let diff = client.schema_diff().await?;
            let output_config = &client.config().output;
            let text = match format {
                SchemaFormat::Sql => {
                    let newline = output_config.line_ending.as_str();
                    client
                        .generate_migrations(&diff)?
                        .into_iter()
                        .map(|statement| format!("{}{}", statement, newline))
                        .collect::<String>()
                }
                SchemaFormat::Xml => {
                    render_changelog(&diff, &output_config.encoding, output_config.line_ending)
                }
                SchemaFormat::Json => serde_json::to_string_pretty(&diff)?,
            };
            let mut sink = open_sink(output)?;
            sink.write_text(&text)?;
            sink.flush()?;
            Ok(())
        }
        Commands::Apply { script } => {
            let text = std::fs::read_to_string(&script)
                .with_context(|| format!("reading {}", script.display()))?;
            let affected = client.apply_script(&text).await?;
            info!("Applied {} ({} rows affected)", script.display(), affected);
            Ok(())
        }
    }
}

async fn run_data_diff(
    client: &TableSyncClient,
    reference_table: &str,
    target_table: &str,
    inserts: Option<PathBuf>,
    updates: Option<PathBuf>,
    apply: bool,
) -> anyhow::Result<()> {
    let insert_buffer = MemorySink::new();
    let update_buffer = MemorySink::new();

    let insert_sink: Box<dyn FragmentSink> = match &inserts {
        Some(path) => file_sink(path)?,
        None => Box::new(insert_buffer.clone()),
    };
    let update_sink: Box<dyn FragmentSink> = match &updates {
        Some(path) => file_sink(path)?,
        None => Box::new(update_buffer.clone()),
    };

    let report = client
        .data_diff(reference_table, target_table, insert_sink, update_sink)
        .await?;

    let (first, second) = match client.config().data_diff.statement_order {
        StatementOrder::InsertsFirst => (&insert_buffer, &update_buffer),
        StatementOrder::UpdatesFirst => (&update_buffer, &insert_buffer),
    };
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(first.text().as_bytes())?;
    stdout.write_all(second.text().as_bytes())?;
    stdout.flush()?;
    drop(stdout);

    print_report(&report)?;

    if apply {
        if client.config().output.format != OutputDialect::SqlText {
            bail!("--apply needs SQL output, the configured output format is XML");
        }
        if report.cancelled {
            warn!("Run was cancelled, not applying the partial script");
            return Ok(());
        }
        let mut scripts = Vec::new();
        for (path, buffer) in [(&inserts, &insert_buffer), (&updates, &update_buffer)] {
            match path {
                Some(path) => scripts.push(std::fs::read_to_string(path)?),
                None => scripts.push(buffer.text()),
            }
        }
        if client.config().data_diff.statement_order == StatementOrder::UpdatesFirst {
            scripts.reverse();
        }
        let scripts: Vec<&str> = scripts.iter().map(String::as_str).collect();
        let affected = client.apply_scripts(&scripts).await?;
        info!("Applied changes to {} ({} rows affected)", target_table, affected);
    }

    Ok(())
}

fn file_sink(path: &PathBuf) -> anyhow::Result<Box<dyn FragmentSink>> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(Box::new(ScriptSink::new(BufWriter::new(file))))
}

fn open_sink(path: Option<PathBuf>) -> anyhow::Result<Box<dyn FragmentSink>> {
    match path {
        Some(path) => file_sink(&path),
        None => Ok(Box::new(ScriptSink::new(std::io::stdout()))),
    }
}

/// Reports go to stderr so scripts on stdout stay clean
fn print_report<T: serde::Serialize>(report: &T) -> anyhow::Result<()> {
    eprintln!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

fn watch_ctrl_c(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current chunk");
            cancel.cancel();
        }
    });
}
