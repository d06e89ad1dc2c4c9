use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracery_core::types::{Address, ObjectFrame, ResolvedFrame};
use tracery_core::{CacheMode, ImageMap, LoadedImage, RawTrace, ResolverConfig, Symbolizer, TraceResult};
use tracery_utils::{debug, error, init_logging};

/// Resolve raw return addresses to functions, files and lines using DWARF.
#[derive(Parser, Debug)]
#[command(name = "tracery")]
#[command(version)]
#[command(about = "Resolve raw return addresses to source locations using DWARF debug info", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Resolve addresses inside one object file
    Resolve
    {
        /// Object file (executable or shared library) holding the code
        #[arg(short, long)]
        object: PathBuf,
        /// Runtime load address of the object; addresses are object-relative when omitted
        #[arg(long, value_parser = parse_address)]
        base: Option<u64>,
        /// Addresses to resolve (hex format: 0x1000 or decimal)
        #[arg(required = true, value_parser = parse_address)]
        addresses: Vec<u64>,
        /// Table retention policy: speed, memory or hybrid (default from TRACERY_CACHE_MODE)
        #[arg(long)]
        cache_mode: Option<CacheMode>,
        /// Do not report inlined calls as separate frames
        #[arg(long, default_value_t = false)]
        no_inlines: bool,
        /// Fail on the first unreadable object or malformed debug info
        #[arg(long, default_value_t = false)]
        strict: bool,
        /// Demangle Rust symbol names
        #[arg(long, default_value_t = false)]
        demangle: bool,
    },
}

fn main() -> ExitCode
{
    // Honours RUST_LOG, TRACERY_LOG_FORMAT and TRACERY_LOG_FILE
    let _guard = match init_logging() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Returning from `main` drops the guard, which flushes the log file.
    ExitCode::from(run(Cli::parse()))
}

/// Run one command and report failures; the result is the process status.
fn run(cli: Cli) -> u8
{
    match run_command(cli) {
        Ok(()) => 0,
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            1
        }
    }
}

fn run_command(cli: Cli) -> TraceResult<()>
{
    match cli.command {
        Commands::Resolve {
            object,
            base,
            addresses,
            cache_mode,
            no_inlines,
            strict,
            demangle,
        } => {
            let mut config = ResolverConfig::from_env()?;
            if let Some(mode) = cache_mode {
                config = config.with_cache_mode(mode);
            }
            if no_inlines {
                config = config.with_inlines(false);
            }
            if strict {
                config = config.with_absorb_errors(false);
            }
            debug!(object = %object.display(), ?config, "resolving {} addresses", addresses.len());

            let raw = RawTrace::new(addresses.into_iter().map(Address::new).collect());
            let mut symbolizer: Symbolizer = Symbolizer::new(config);
            let trace = match base {
                Some(base) => {
                    let mut images = ImageMap::new();
                    images.insert(LoadedImage::new(&object, base, u64::MAX - base));
                    raw.resolve(&images, &mut symbolizer)?
                }
                None => {
                    let relative = |address: Address| Some(ObjectFrame::new(address, address, object.clone()));
                    raw.resolve(&relative, &mut symbolizer)?
                }
            };

            for frames in trace.frames() {
                for frame in frames {
                    print_frame(frame, demangle);
                }
            }
            Ok(())
        }
    }
}

fn print_frame(frame: &ResolvedFrame, demangle: bool)
{
    let mut frame = frame.clone();
    if demangle {
        if let Ok(symbol) = rustc_demangle::try_demangle(&frame.symbol) {
            frame.symbol = format!("{symbol:#}");
        }
    }
    if frame.is_inline {
        println!("    {frame}");
    } else {
        println!("{frame}");
    }
}

fn parse_address(value: &str) -> Result<u64, String>
{
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{value}': {e}"))
}

#[cfg(test)]
mod tests
{
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition()
    {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_address()
    {
        assert_eq!(parse_address("0x1000"), Ok(0x1000));
        assert_eq!(parse_address("0XfF"), Ok(0xff));
        assert_eq!(parse_address("4096"), Ok(4096));
        assert!(parse_address("0xzz").is_err());
        assert!(parse_address("").is_err());
    }

    #[test]
    fn test_parse_resolve_command()
    {
        let cli = Cli::try_parse_from([
            "tracery",
            "resolve",
            "--object",
            "/bin/app",
            "--base",
            "0x400000",
            "--cache-mode",
            "memory",
            "--no-inlines",
            "0x401000",
            "4198400",
        ])
        .unwrap();
        let Commands::Resolve {
            object,
            base,
            addresses,
            cache_mode,
            no_inlines,
            strict,
            demangle,
        } = cli.command;
        assert_eq!(object, PathBuf::from("/bin/app"));
        assert_eq!(base, Some(0x40_0000));
        assert_eq!(addresses, vec![0x40_1000, 0x40_1000]);
        assert_eq!(cache_mode, Some(CacheMode::PrioritizeMemory));
        assert!(no_inlines);
        assert!(!strict);
        assert!(!demangle);
    }

    #[test]
    fn test_run_reports_status()
    {
        let missing = "/nonexistent/tracery-object";
        let strict = Cli::try_parse_from(["tracery", "resolve", "--strict", "--object", missing, "0x10"]).unwrap();
        assert_eq!(run(strict), 1);

        let absorbed = Cli::try_parse_from(["tracery", "resolve", "--object", missing, "0x10"]).unwrap();
        assert_eq!(run(absorbed), 0);
    }

    #[test]
    fn test_missing_addresses_rejected()
    {
        assert!(Cli::try_parse_from(["tracery", "resolve", "--object", "/bin/app"]).is_err());
    }
}
