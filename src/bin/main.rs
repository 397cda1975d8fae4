//! amd-smi: AMD GPU monitoring and management CLI.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use log::{debug, error, LevelFilter};

use asmi::commands::{self, CommandContext};
use asmi::logger::{Compatibility, OutputFormat, OutputLogger};
use asmi::registry::DeviceRegistry;
use asmi::smi::{Smi, SysfsSmi};
use asmi::{signals, AmdSmiError, Platform, Result};

#[derive(Parser)]
#[command(
    name = "amd-smi",
    version,
    about = "AMD System Management Interface",
    arg_required_else_help = false
)]
struct Cli {
    /// Output in JSON (takes precedence over --csv)
    #[arg(long, global = true)]
    json: bool,

    /// Output in CSV (ignored when --json is also given)
    #[arg(long, global = true)]
    csv: bool,

    /// Write output to PATH instead of stdout
    #[arg(long, global = true, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Severity of messages printed to stderr
    #[arg(long, global = true, value_name = "LEVEL", default_value = "ERROR", ignore_case = true)]
    loglevel: LogLevel,

    /// Output schema family
    #[arg(long, global = true, value_name = "MODE", default_value = "amdsmi", ignore_case = true)]
    compatibility: CompatibilityMode,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    #[value(name = "DEBUG")]
    Debug,
    #[value(name = "INFO")]
    Info,
    #[value(name = "WARNING")]
    Warning,
    #[value(name = "ERROR")]
    Error,
    #[value(name = "CRITICAL")]
    Critical,
}

impl LogLevel {
    fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warning => LevelFilter::Warn,
            LogLevel::Error | LogLevel::Critical => LevelFilter::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CompatibilityMode {
    Amdsmi,
    #[value(name = "rocm-smi")]
    RocmSmi,
}

#[derive(Subcommand)]
enum Command {
    /// Tool, library, and kernel versions
    Version,
    /// List devices with index, BDF, and UUID
    Discovery(commands::discovery::DiscoveryArgs),
    /// Static identity blocks (ASIC, bus, driver, VBIOS, board)
    Static(commands::static_info::StaticArgs),
    /// Firmware block versions
    Firmware(commands::firmware::FirmwareArgs),
    /// Retired, pending, and unreservable VRAM pages
    BadPages(commands::bad_pages::BadPagesArgs),
    /// Live telemetry (usage, power, clocks, temperature, PCIe, ECC)
    Metric(commands::metric::MetricArgs),
    /// Processes with memory on each device
    Process(commands::process::ProcessArgs),
    /// Workload profiles (virtualized hosts only)
    Profile(commands::profile::ProfileArgs),
    /// Listen for RAS events until interrupted
    Event(commands::event::EventArgs),
    /// Link metrics between device pairs
    Topology(commands::topology::TopologyArgs),
    /// Set fan speed, power cap, or performance level
    SetValue(commands::set_value::SetValueArgs),
    /// Reset GPU, fans, or performance level
    Reset(commands::reset::ResetArgs),
    /// Legacy concise summary table
    RocmSmi(commands::rocm_smi::RocmSmiArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.loglevel.filter())
        .init();

    let Some(command) = cli.command else {
        // Bare invocation prints usage and succeeds.
        let _ = Cli::command().print_help();
        println!();
        return ExitCode::SUCCESS;
    };

    match run(cli.json, cli.csv, cli.file, cli.compatibility, command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            exit_code(&e)
        }
    }
}

fn run(
    json: bool,
    csv: bool,
    file: Option<PathBuf>,
    compatibility: CompatibilityMode,
    command: Command,
) -> Result<()> {
    signals::install_handlers()?;

    let platform = Platform::detect();
    debug!("platform: {}", platform.os_info());

    // --json beats --csv when both are given; documented in the help.
    let format = if json {
        OutputFormat::Json
    } else if csv {
        OutputFormat::Csv
    } else {
        OutputFormat::Text
    };
    let compatibility = match compatibility {
        CompatibilityMode::Amdsmi => Compatibility::Amdsmi,
        CompatibilityMode::RocmSmi => Compatibility::RocmSmi,
    };
    // The legacy subcommand always renders the legacy table.
    let compatibility = if matches!(command, Command::RocmSmi(_)) {
        Compatibility::RocmSmi
    } else {
        compatibility
    };

    let mut logger = OutputLogger::new(format, file)?.with_compatibility(compatibility);

    // Owns the library lifecycle; drop performs the shutdown on every
    // return path below.
    let mut smi = Smi::init_for_platform(Box::new(SysfsSmi::new()), &platform)?;

    let registry = DeviceRegistry::enumerate(smi.backend())?;
    let mut ctx = CommandContext {
        backend: smi.backend(),
        registry: &registry,
        logger: &mut logger,
    };

    let result = dispatch(&mut ctx, &command, &platform);

    if signals::termination_requested() {
        debug!("termination signal observed; shutting down");
    }
    smi.shut_down()?;
    result
}

fn dispatch(ctx: &mut CommandContext<'_>, command: &Command, platform: &Platform) -> Result<()> {
    match command {
        Command::Version => commands::version::run(ctx),
        Command::Discovery(args) => commands::discovery::run(ctx, args),
        Command::Static(args) => commands::static_info::run(ctx, args),
        Command::Firmware(args) => commands::firmware::run(ctx, args),
        Command::BadPages(args) => commands::bad_pages::run(ctx, args),
        Command::Metric(args) => commands::metric::run(ctx, args),
        Command::Process(args) => commands::process::run(ctx, args),
        Command::Profile(args) => commands::profile::run(ctx, args, platform),
        Command::Event(args) => commands::event::run(ctx, args, signals::termination_flag()),
        Command::Topology(args) => commands::topology::run(ctx, args),
        Command::SetValue(args) => commands::set_value::run(ctx, args),
        Command::Reset(args) => commands::reset::run(ctx, args),
        Command::RocmSmi(args) => commands::rocm_smi::run(ctx, args),
    }
}

fn exit_code(error: &AmdSmiError) -> ExitCode {
    // ExitCode is a u8 on every supported platform; -1 wraps to 255 the
    // same way a raw exit(-1) does.
    ExitCode::from(error.exit_code() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_grammar_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_json_beats_csv() {
        let cli = Cli::try_parse_from(["amd-smi", "--json", "--csv", "discovery"]).unwrap();
        assert!(cli.json && cli.csv);
    }

    #[test]
    fn test_watch_flags_parse_on_metric() {
        let cli = Cli::try_parse_from([
            "amd-smi", "metric", "-w", "1", "-W", "10", "-i", "3", "-g", "0",
        ])
        .unwrap();
        let Some(Command::Metric(args)) = cli.command else {
            panic!("expected metric");
        };
        assert_eq!(args.watch.watch, Some(1));
        assert_eq!(args.watch.watch_time, Some(10));
        assert_eq!(args.watch.iterations, Some(3));
        assert_eq!(args.gpu.gpu, vec!["0"]);
    }

    #[test]
    fn test_loglevel_accepts_uppercase_names() {
        let cli = Cli::try_parse_from(["amd-smi", "--loglevel", "WARNING", "version"]).unwrap();
        assert!(matches!(cli.loglevel, LogLevel::Warning));
        assert!(Cli::try_parse_from(["amd-smi", "--loglevel", "TRACE", "version"]).is_err());
    }

    #[test]
    fn test_driver_not_loaded_maps_to_255() {
        let e = AmdSmiError::DriverNotLoaded;
        assert_eq!(e.exit_code(), -1);
    }
}
