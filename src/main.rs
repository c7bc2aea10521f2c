use clap::Parser;
use miette::{IntoDiagnostic, Result};
use paygate::application::gateway::Gateway;
use paygate::config::Settings;
use paygate::interfaces::jsonl::command_reader::CommandReader;
use paygate::interfaces::jsonl::result_writer::{CommandResult, ResultWriter};
use paygate::interfaces::jsonl::runner::run_command;
use paygate::telemetry;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::time::Duration;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Gateway commands, one JSON object per line. Reads stdin when omitted.
    input: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// TOML settings file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[cfg(feature = "storage-rocksdb")]
fn with_storage(
    builder: paygate::application::gateway::GatewayBuilder,
    db_path: Option<PathBuf>,
) -> Result<paygate::application::gateway::GatewayBuilder> {
    use paygate::infrastructure::rocksdb::RocksDBStore;
    use std::sync::Arc;

    Ok(match db_path {
        Some(db_path) => {
            let store = RocksDBStore::open(db_path).into_diagnostic()?;
            builder
                .config_store(Arc::new(store.clone()))
                .event_sink(Arc::new(store.clone()))
                .state_ledger(Arc::new(store))
        }
        None => builder,
    })
}

#[cfg(not(feature = "storage-rocksdb"))]
fn with_storage(
    builder: paygate::application::gateway::GatewayBuilder,
    db_path: Option<PathBuf>,
) -> Result<paygate::application::gateway::GatewayBuilder> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(builder)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).into_diagnostic()?;
    telemetry::init(&settings.log);

    let gateway = with_storage(Gateway::builder(settings), cli.db_path)?.build();

    let source: Box<dyn BufRead> = match cli.input {
        Some(path) => Box::new(BufReader::new(File::open(path).into_diagnostic()?)),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let stdout = io::stdout();
    let mut writer = ResultWriter::new(stdout.lock());

    for (line, parsed) in CommandReader::new(source).commands() {
        let command = match parsed {
            Ok(command) => command,
            Err(e) => {
                eprintln!("Error reading command on line {}: {}", line, e);
                writer
                    .write_result(&CommandResult::failure(line, "unknown", &e))
                    .into_diagnostic()?;
                continue;
            }
        };

        let name = command.command.name();
        let result = match run_command(&gateway, command).await {
            Ok(value) => CommandResult::success(line, name, value),
            Err(e) => {
                eprintln!("Error processing {} on line {}: {}", name, line, e);
                CommandResult::failure(line, name, &e)
            }
        };
        writer.write_result(&result).into_diagnostic()?;
    }
    writer.flush().into_diagnostic()?;

    gateway.shutdown(SHUTDOWN_GRACE).await;
    Ok(())
}
