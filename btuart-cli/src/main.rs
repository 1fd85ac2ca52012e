//! btuart CLI - Command-line tool for bringing up CC256x Bluetooth controllers.
//!
//! ## Features
//!
//! - Upload the baseband service pack and BLE add-on over UART
//! - Inspect and convert TI `.bts` init scripts
//! - Serial port listing
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use btuart::{DEFAULT_BAUD, ErrorKind, FlowControl};
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress bars and colors should be used.
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was received.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Errors that map to a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Missing or inconsistent user input.
    #[error("{0}")]
    Usage(String),
    /// The user aborted the operation.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map an error chain to a process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }
    if let Some(lib_err) = err.downcast_ref::<btuart::Error>() {
        if lib_err.kind() == ErrorKind::Interrupted {
            return 130;
        }
    }
    1
}

/// btuart - Load init scripts into UART-attached TI CC256x Bluetooth controllers.
///
/// Environment variables:
///   BTUART_PORT           - Default serial port
///   BTUART_BAUD           - Default baud rate (default: 115200)
///   BTUART_FLOW_CONTROL   - Flow control (none, hardware, software)
#[derive(Parser)]
#[command(name = "btuart")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    btuart -p /dev/ttyUSB0 load --baseband TIInit_6.12.26.bts --extension cc256x_ble.bin\n  \
    btuart info TIInit_6.12.26.bts\n  \
    btuart convert TIInit_6.12.26.bts -o baseband.bin")]
struct Cli {
    /// Serial port the controller is attached to.
    #[arg(short, long, global = true, env = "BTUART_PORT")]
    port: Option<String>,

    /// Baud rate used for the upload.
    #[arg(short, long, global = true, env = "BTUART_BAUD")]
    baud: Option<u32>,

    /// Serial flow control.
    #[arg(long, global = true, value_enum, env = "BTUART_FLOW_CONTROL")]
    flow_control: Option<FlowArg>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Flow control as accepted on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum FlowArg {
    /// No flow control.
    None,
    /// RTS/CTS.
    Hardware,
    /// XON/XOFF.
    Software,
}

impl From<FlowArg> for FlowControl {
    fn from(flow: FlowArg) -> Self {
        match flow {
            FlowArg::None => FlowControl::None,
            FlowArg::Hardware => FlowControl::Hardware,
            FlowArg::Software => FlowControl::Software,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Upload the baseband service pack and BLE add-on to the controller.
    Load {
        /// Baseband service pack (packed image or .bts).
        #[arg(long)]
        baseband: Option<PathBuf>,

        /// BLE add-on init script (packed image or .bts).
        #[arg(long)]
        extension: Option<PathBuf>,

        /// Consecutive stalled transfers tolerated before giving up.
        #[arg(long)]
        max_stalls: Option<u32>,
    },

    /// Show the records of an init script.
    Info {
        /// Path to a packed image or .bts file.
        image: PathBuf,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Convert a TI .bts script into a packed image.
    Convert {
        /// Input .bts file.
        input: PathBuf,

        /// Output packed image.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// List available serial ports.
    ListPorts {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Connection settings after merging flags, environment, and config files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Connection {
    pub port: String,
    pub baud: u32,
    pub flow_control: FlowControl,
}

impl Cli {
    /// Resolve the serial connection. Flags and environment win over config.
    fn connection(&self, config: &Config) -> Result<Connection> {
        let port = self
            .port
            .clone()
            .or_else(|| config.connection.serial.clone())
            .ok_or_else(|| {
                CliError::Usage(
                    "no serial port given; use --port, BTUART_PORT, or [connection] serial in btuart.toml"
                        .to_string(),
                )
            })?;
        let baud = self
            .baud
            .or(config.connection.baud)
            .unwrap_or(DEFAULT_BAUD);
        let flow_control = self
            .flow_control
            .map(FlowControl::from)
            .or_else(|| config.connection.flow_control())
            .unwrap_or_default();

        Ok(Connection {
            port,
            baud,
            flow_control,
        })
    }
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    btuart::set_interrupt_checker(was_interrupted);

    debug!(
        "btuart v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Load {
            baseband,
            extension,
            max_stalls,
        } => commands::load::cmd_load(
            cli,
            &config,
            baseband.as_deref(),
            extension.as_deref(),
            *max_stalls,
        ),
        Commands::Info { image, json } => commands::info::cmd_info(image, *json),
        Commands::Convert { input, output } => commands::convert::cmd_convert(cli, input, output),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}
