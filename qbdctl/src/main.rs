use std::path::PathBuf;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use libqbd::{AttachmentReconciler, Protocol, QbdConfig, SystemExecutor};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qbdctl")]
#[command(about = "Attach and inspect NeonSAN volumes through qbd", long_about = None)]
struct Cli {
    /// qbd configuration file (overrides QBD_CONFIG_FILE)
    #[arg(short = 'c', long, global = true, value_name = "PATH")]
    config_file: Option<PathBuf>,

    /// Transport protocol, tcp or rdma (overrides QBD_PROTOCOL)
    #[arg(long, global = true)]
    protocol: Option<Protocol>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Attach a volume and print its device using ./qbdctl attach pool volume")]
    Attach {
        #[arg(value_name = "POOL")]
        pool: String,
        #[arg(value_name = "VOLUME")]
        volume: String,
    },
    #[command(about = "Detach a volume using ./qbdctl detach pool volume")]
    Detach {
        #[arg(value_name = "POOL")]
        pool: String,
        #[arg(value_name = "VOLUME")]
        volume: String,
    },
    #[command(about = "Print the device of an attached volume using ./qbdctl device pool volume")]
    Device {
        #[arg(value_name = "POOL")]
        pool: String,
        #[arg(value_name = "VOLUME")]
        volume: String,
    },
    #[command(about = "Print the attachment record of a volume as JSON")]
    Status {
        #[arg(value_name = "POOL")]
        pool: String,
        #[arg(value_name = "VOLUME")]
        volume: String,
    },
    #[command(about = "Print every attachment as JSON")]
    List,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = QbdConfig::from_env().context("load qbd configuration")?;
    if let Some(path) = cli.config_file {
        config.config_file = path;
    }
    if let Some(protocol) = cli.protocol {
        config.protocol = protocol;
    }

    let reconciler =
        AttachmentReconciler::new(SystemExecutor::from_timeout(config.exec_timeout), &config);
    let conf = config.config_file.as_path();

    match cli.command {
        Commands::Attach { pool, volume } => {
            let device = reconciler.attach(conf, config.protocol, &pool, &volume)?;
            println!("{device}");
        }
        Commands::Detach { pool, volume } => {
            reconciler.detach(conf, config.protocol, &pool, &volume)?;
        }
        Commands::Device { pool, volume } => {
            let device = reconciler
                .resolve_device(conf, &pool, &volume)?
                .ok_or_else(|| anyhow!("volume {pool}/{volume} is not attached"))?;
            println!("{device}");
        }
        Commands::Status { pool, volume } => {
            let record = reconciler.list_attached(conf, &pool, &volume)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::List => {
            let records = reconciler.list_all(conf)?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }
    Ok(())
}
