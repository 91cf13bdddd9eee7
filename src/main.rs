use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{BufReader, BufWriter};

use envelope_keys::config::ConfigStore;
use envelope_keys::crypto::EnvelopeCipher;
use envelope_keys::lifecycle::{KeyWrapperSource, Services, Signal, SignalListener, StartupOptions};
use envelope_keys::observability::logging::{self, LogFormat, DEFAULT_FILTER};
use envelope_keys::observability::metrics;

#[derive(Parser)]
#[command(name = "envelope-keys")]
#[command(
    about = "Per-principal envelope encryption with hot-reloaded settings",
    long_about = None
)]
struct Cli {
    /// Settings file (JSON, or TOML by extension)
    #[arg(short, long, default_value = "envelope-keys.json")]
    config: PathBuf,

    /// Log output: text or json
    #[arg(long, default_value = "text")]
    log_format: LogFormat,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics_address: Option<SocketAddr>,

    /// Wrap keys locally with a base64 master key read from this environment variable
    #[arg(long, value_name = "VAR")]
    local_master_key_env: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run with a watched settings file until terminated; SIGHUP forces a reload
    Serve,
    /// Print every value at a dotted settings path
    Get { path: String },
    /// Encrypt a file with the principal's data key
    Encrypt {
        #[arg(long)]
        principal: String,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Decrypt a file produced by `encrypt`
    Decrypt {
        #[arg(long)]
        principal: String,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    logging::init(cli.log_format, DEFAULT_FILTER)?;

    if let Some(addr) = cli.metrics_address {
        metrics::init_metrics(addr)?;
        tracing::info!(address = %addr, "Metrics exporter listening");
    }

    let key_wrapper = match &cli.local_master_key_env {
        Some(var) => KeyWrapperSource::LocalMasterKeyEnv(var.clone()),
        None => KeyWrapperSource::CloudKms,
    };

    match cli.command {
        Commands::Serve => {
            let options = StartupOptions {
                key_wrapper,
                ..StartupOptions::new(&cli.config)
            };
            serve(options).await?;
        }
        Commands::Get { path } => {
            let config = ConfigStore::load(&cli.config)?;
            for value in config.get_all(&path) {
                println!("{}", value);
            }
        }
        Commands::Encrypt {
            principal,
            input,
            output,
        } => {
            let options = StartupOptions {
                watch: None,
                key_wrapper,
                ..StartupOptions::new(&cli.config)
            };
            transform(options, &principal, &input, &output, Direction::Encrypt).await?;
        }
        Commands::Decrypt {
            principal,
            input,
            output,
        } => {
            let options = StartupOptions {
                watch: None,
                key_wrapper,
                ..StartupOptions::new(&cli.config)
            };
            transform(options, &principal, &input, &output, Direction::Decrypt).await?;
        }
    }

    Ok(())
}

async fn serve(options: StartupOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut signals = SignalListener::new()?;
    let services = Services::start(options).await?;

    tracing::info!("envelope-keys v{} running", env!("CARGO_PKG_VERSION"));

    loop {
        match signals.recv().await? {
            Signal::Reload => {
                // reload() logs its own outcome; a failed reload keeps the current settings.
                let _ = services.config.reload().await;
            }
            Signal::Terminate => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    services.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn transform(
    options: StartupOptions,
    principal: &str,
    input: &Path,
    output: &Path,
    direction: Direction,
) -> Result<(), Box<dyn std::error::Error>> {
    let services = Services::start(options).await?;
    let key = services.provisioner.get_or_create(principal).await?;

    let reader = BufReader::new(File::open(input).await?);
    let writer = BufWriter::new(File::create(output).await?);
    let cipher = EnvelopeCipher::new();

    let bytes = match direction {
        Direction::Encrypt => cipher.encrypt(&key, reader, writer).await?,
        Direction::Decrypt => cipher.decrypt(&key, reader, writer).await?,
    };

    tracing::info!(
        principal = %principal,
        input = %input.display(),
        output = %output.display(),
        bytes,
        "File processed"
    );

    services.shutdown().await;
    Ok(())
}
