use std::path::PathBuf;

use clap::{Parser, Subcommand};
use simrelay_apdu_transport_pcsc::PcscDeviceManager;
use simrelay_mitm::{InterceptLog, InterceptPipeline, SessionRelay, UsbHandset};
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

mod config;

use config::{BackendKind, Config};

#[derive(Parser)]
#[command(version, about = "Man-in-the-middle relay between a handset and its SIM")]
struct Cli {
    /// Configuration file (default: ~/.simrelay/simrelay.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More output; repeat for trace level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Relay the handset to the configured card backend
    Run {
        /// Use the emulated card regardless of the configuration
        #[arg(long)]
        emulate: bool,

        /// PC/SC reader to open, overriding the configuration
        #[arg(short, long)]
        reader: Option<String>,
    },

    /// List PC/SC readers and their cards
    Readers,

    /// Print the effective configuration
    Config,
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let mut config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { emulate, reader } => {
            if emulate {
                config.backend.kind = BackendKind::Emulator;
            }
            if reader.is_some() {
                config.backend.reader = reader;
            }
            run(&config)
        }
        Commands::Readers => list_readers(),
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn run(config: &Config) -> eyre::Result<()> {
    let log = InterceptLog::new();
    let pipeline = InterceptPipeline::new(config.pattern_table()?).with_log(log.clone());
    let sink = config.sink()?;
    let backend = config.connect_backend()?;
    let handset = UsbHandset::open(config.usb_config())?;

    let mut relay = SessionRelay::new(handset, backend, pipeline, sink, config.relay_config());
    let result = relay.run();

    let stats = relay.session().stats();
    let substituted = log.records().iter().filter(|r| r.substituted()).count();
    info!(
        session = relay.session().id(),
        commands = stats.commands,
        violations = stats.violations,
        intercepted = log.len(),
        substituted,
        "Relay finished"
    );
    Ok(result?)
}

fn list_readers() -> eyre::Result<()> {
    let manager = PcscDeviceManager::new()?;
    let readers = manager.list_readers()?;

    if readers.is_empty() {
        println!("No readers found!");
        return Ok(());
    }

    println!("Available readers:");
    for (i, reader) in readers.iter().enumerate() {
        println!("{}. {}", i + 1, reader);
    }
    Ok(())
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_ansi(true)
        .init();
}
