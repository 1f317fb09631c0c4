// Command-line front end for rompatch.
//
// Subcommands map onto the file layer: `apply` and `create` run through
// `io::apply_file` / `io::create_file`, `info` parses a patch header and
// `formats` lists the registry.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::error::FileRole;
use crate::format::{ApplyOptions, CrcFlags, Format};
use crate::{engine, io};

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// IPS, IPS32, UPS and BPS patcher.
#[derive(Parser, Debug)]
#[command(
    name = "rompatch",
    version,
    about = "Apply and create IPS, IPS32, UPS and BPS patches",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (errors only).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Apply a patch to an input file.
    #[command(alias = "patch")]
    Apply(ApplyArgs),
    /// Create a patch; the format follows the output extension.
    Create(CreateArgs),
    /// Print the header of a patch file.
    Info(InfoArgs),
    /// List supported patch formats.
    Formats,
}

#[derive(Args, Debug)]
struct ChecksumArgs {
    /// Skip the patch checksum.
    #[arg(short = 't', long)]
    ignore_patch_crc: bool,

    /// Skip the input checksum.
    #[arg(short = 'y', long)]
    ignore_input_crc: bool,

    /// Skip the output checksum.
    #[arg(short = 'u', long)]
    ignore_output_crc: bool,

    /// Skip all checksums.
    #[arg(short = 'i', long)]
    ignore_crc: bool,

    /// Fail on a patch checksum mismatch. No short form: `-f` is `--force`.
    #[arg(long)]
    strict_patch_crc: bool,

    /// Fail on an input checksum mismatch.
    #[arg(short = 'g', long)]
    strict_input_crc: bool,

    /// Fail on an output checksum mismatch.
    #[arg(short = 'j', long)]
    strict_output_crc: bool,

    /// Fail on any checksum mismatch.
    #[arg(short = 'k', long)]
    strict_crc: bool,
}

#[derive(Args, Debug)]
struct ApplyArgs {
    /// Patch file.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    /// File to patch.
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Where to write the patched file.
    #[arg(value_hint = ValueHint::FilePath)]
    output: PathBuf,

    #[command(flatten)]
    checksums: ChecksumArgs,

    /// Read records that run past the end of the patch as zeros.
    #[arg(long)]
    allow_truncated: bool,
}

#[derive(Args, Debug)]
struct CreateArgs {
    /// Modified file.
    #[arg(value_hint = ValueHint::FilePath)]
    target: PathBuf,

    /// Original file.
    #[arg(value_hint = ValueHint::FilePath)]
    base: PathBuf,

    /// Patch file to write (.ips, .ups or .bps).
    #[arg(value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Patch file.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Apply {
        patch: PathBuf,
        input: PathBuf,
        output: PathBuf,
    },
    Create {
        target: PathBuf,
        base: PathBuf,
        output: PathBuf,
    },
    Info {
        patch: PathBuf,
    },
    Formats,
}

struct Options {
    command: Command,
    force: bool,
    quiet: bool,
    verbose: u8,
    json_output: bool,
    apply: ApplyOptions,
}

fn crc_flags(patch: bool, input: bool, output: bool, all: bool) -> CrcFlags {
    if all {
        return CrcFlags::all();
    }
    let mut flags = CrcFlags::empty();
    flags.set(CrcFlags::PATCH, patch);
    flags.set(CrcFlags::INPUT, input);
    flags.set(CrcFlags::OUTPUT, output);
    flags
}

fn resolve_options(cli: Cli) -> Options {
    let mut apply = ApplyOptions::default();
    let command = match cli.command {
        Cmd::Apply(args) => {
            let c = &args.checksums;
            apply = ApplyOptions {
                ignore: crc_flags(
                    c.ignore_patch_crc,
                    c.ignore_input_crc,
                    c.ignore_output_crc,
                    c.ignore_crc,
                ),
                strict: crc_flags(
                    c.strict_patch_crc,
                    c.strict_input_crc,
                    c.strict_output_crc,
                    c.strict_crc,
                ),
                allow_truncated: args.allow_truncated,
            };
            Command::Apply {
                patch: args.patch,
                input: args.input,
                output: args.output,
            }
        }
        Cmd::Create(args) => Command::Create {
            target: args.target,
            base: args.base,
            output: args.output,
        },
        Cmd::Info(args) => Command::Info { patch: args.patch },
        Cmd::Formats => Command::Formats,
    };

    Options {
        command,
        force: cli.force,
        quiet: cli.quiet,
        verbose: cli.verbose.min(2),
        json_output: cli.json_output,
        apply,
    }
}

#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_args(args: &[String]) {
    let argv: Vec<String> = std::iter::once("rompatch".to_string())
        .chain(args.iter().cloned())
        .collect();
    if let Ok(cli) = Cli::try_parse_from(argv) {
        let _ = resolve_options(cli);
    }
}

fn log_filter(opts: &Options) -> &'static str {
    if opts.quiet {
        return "error";
    }
    match opts.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

// ---------------------------------------------------------------------------
// Validation shared by apply and create
// ---------------------------------------------------------------------------

fn validate(opts: &Options, inputs: [(FileRole, &Path); 2], output: &Path) -> Result<(), String> {
    io::check_distinct(&[inputs[0], inputs[1], (FileRole::Output, output)])
        .map_err(|e| e.to_string())?;
    for (role, path) in inputs {
        io::check_exists(role, path).map_err(|e| e.to_string())?;
    }
    if output.exists() && !opts.force {
        return Err(format!(
            "output file exists, use -f to overwrite: {}",
            output.display()
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Apply command
// ---------------------------------------------------------------------------

fn cmd_apply(opts: &Options, patch: &Path, input: &Path, output: &Path) -> i32 {
    if let Err(msg) = validate(
        opts,
        [(FileRole::Patch, patch), (FileRole::Input, input)],
        output,
    ) {
        eprintln!("rompatch: {msg}");
        return 1;
    }

    let stats = match io::apply_file(patch, input, output, &opts.apply) {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("rompatch: apply error: {e}");
            return 1;
        }
    };

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "rompatch: applied {} patch: output size: {}, checksum warnings: {}",
            stats.format,
            stats.output_size,
            stats.warnings.len()
        );
        if let Some(sha) = &stats.output_sha256 {
            eprintln!("rompatch: output sha256: {}", hex(sha));
        }
    }
    if opts.json_output {
        let warnings: Vec<String> = stats.warnings.iter().map(|w| w.to_string()).collect();
        let json = serde_json::json!({
            "command": "apply",
            "format": stats.format.name(),
            "patch_size": stats.patch_size,
            "input_size": stats.input_size,
            "output_size": stats.output_size,
            "warnings": warnings,
            "output_sha256": stats.output_sha256.as_ref().map(|s| hex(s)),
        });
        eprintln!("{json:#}");
    }

    0
}

// ---------------------------------------------------------------------------
// Create command
// ---------------------------------------------------------------------------

fn cmd_create(opts: &Options, target: &Path, base: &Path, output: &Path) -> i32 {
    if let Err(msg) = validate(
        opts,
        [(FileRole::Target, target), (FileRole::Base, base)],
        output,
    ) {
        eprintln!("rompatch: {msg}");
        return 1;
    }

    let stats = match io::create_file(target, base, output) {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("rompatch: create error: {e}");
            return 1;
        }
    };

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "rompatch: created {} patch: patch size: {}",
            stats.format, stats.patch_size
        );
    }
    if opts.json_output {
        let json = serde_json::json!({
            "command": "create",
            "format": stats.format.name(),
            "base_size": stats.base_size,
            "target_size": stats.target_size,
            "patch_size": stats.patch_size,
            "patch_sha256": stats.patch_sha256.as_ref().map(|s| hex(s)),
        });
        eprintln!("{json:#}");
    }

    0
}

// ---------------------------------------------------------------------------
// Info command
// ---------------------------------------------------------------------------

fn cmd_info(opts: &Options, patch_path: &Path) -> i32 {
    let patch = match io::MappedBuffer::open(patch_path, io::MapMode::Read) {
        Ok(buf) => buf,
        Err(e) => {
            eprintln!("rompatch: patch file: {}: {e}", patch_path.display());
            return 1;
        }
    };
    let info = match engine::describe(patch.as_slice()) {
        Ok(info) => info,
        Err(e) => {
            eprintln!("rompatch: {}: {e}", patch_path.display());
            return 1;
        }
    };

    if opts.json_output {
        let json = serde_json::json!({
            "command": "info",
            "format": info.format.name(),
            "patch_size": info.patch_len,
            "source_size": info.source_size,
            "target_size": info.target_size,
            "records": info.records,
            "metadata_size": info.metadata.as_ref().map(|m| m.len()),
            "input_crc32": info.checksums.map(|c| c.input),
            "output_crc32": info.checksums.map(|c| c.output),
            "patch_crc32": info.checksums.map(|c| c.patch),
        });
        eprintln!("{json:#}");
        return 0;
    }

    println!("format:        {}", info.format);
    println!("patch size:    {}", info.patch_len);
    if let Some(size) = info.source_size {
        println!("source size:   {size}");
    }
    if let Some(size) = info.target_size {
        println!("target size:   {size}");
    }
    let unit = match info.format {
        Format::Ips | Format::Ips32 => "records",
        Format::Ups => "hunks",
        Format::Bps => "actions",
    };
    println!("{:<15}{}", format!("{unit}:"), info.records);
    if let Some(metadata) = &info.metadata {
        println!("metadata:      {} bytes", metadata.len());
        if opts.verbose > 0 && !metadata.is_empty() {
            println!("{}", String::from_utf8_lossy(metadata));
        }
    }
    if let Some(c) = info.checksums {
        println!("input crc32:   {:#010x}", c.input);
        println!("output crc32:  {:#010x}", c.output);
        println!("patch crc32:   {:#010x}", c.patch);
    }

    0
}

// ---------------------------------------------------------------------------
// Formats command
// ---------------------------------------------------------------------------

fn create_support(format: Format) -> &'static str {
    match format {
        Format::Ips => "targets up to 16 MiB",
        Format::Ips32 => "targets over 16 MiB, up to 4 GiB",
        Format::Ups => "yes",
        Format::Bps => "not implemented",
    }
}

fn cmd_formats() -> i32 {
    println!("{:<7}{:<7}{:<5}CREATE", "NAME", "MAGIC", "EXT");
    for format in Format::ALL {
        println!(
            "{:<7}{:<7}{:<5}{}",
            format.name(),
            String::from_utf8_lossy(format.magic()),
            format.extension(),
            create_support(format)
        );
    }
    0
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();
    let opts = resolve_options(cli);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_filter(&opts)))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let exit_code = match &opts.command {
        Command::Apply {
            patch,
            input,
            output,
        } => cmd_apply(&opts, patch, input, output),
        Command::Create {
            target,
            base,
            output,
        } => cmd_create(&opts, target, base, output),
        Command::Info { patch } => cmd_info(&opts, patch),
        Command::Formats => cmd_formats(),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
