use std::env;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use gridstore_cli::{run, CommandKind, CommonOptions, DemoOptions};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    init_tracing();
    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .compact()
        .init();
}

fn run_cli() -> Result<(), String> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        return Err(usage_text());
    }
    if args[0] == "-h" || args[0] == "--help" {
        print_usage();
        return Ok(());
    }

    let mut options = CommonOptions::default();
    let mut index = 0usize;
    while index < args.len() {
        match args[index].as_str() {
            "--prototypes" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --prototypes".to_string())?;
                options.prototypes_dir = Some(PathBuf::from(value));
                index += 2;
            }
            _ => break,
        }
    }

    let command = args
        .get(index)
        .ok_or_else(|| "missing subcommand".to_string())?
        .as_str();
    let command_args = &args[(index + 1)..];

    let kind = match command {
        "inspect" => match command_args {
            [path] => CommandKind::Inspect {
                path: PathBuf::from(path),
            },
            _ => return Err("inspect requires exactly one document path".to_string()),
        },
        "migrate" => match command_args {
            [input, output] => CommandKind::Migrate {
                input: PathBuf::from(input),
                output: PathBuf::from(output),
            },
            _ => return Err("migrate requires an input and an output path".to_string()),
        },
        "demo" => CommandKind::Demo(parse_demo_args(command_args)?),
        other => return Err(format!("unknown subcommand '{other}'")),
    };

    run(kind, options, &mut io::stdout())
}

fn parse_demo_args(args: &[String]) -> Result<DemoOptions, String> {
    let mut demo = DemoOptions::default();
    let mut index = 0usize;
    while index < args.len() {
        match args[index].as_str() {
            "--sync" => {
                demo.synchronous = true;
                index += 1;
            }
            "--entities-per-tick" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --entities-per-tick".to_string())?;
                let parsed = value
                    .parse::<usize>()
                    .ok()
                    .filter(|limit| *limit > 0)
                    .ok_or_else(|| {
                        format!("invalid --entities-per-tick value '{value}' (expected usize > 0)")
                    })?;
                demo.entities_per_tick = Some(parsed);
                index += 2;
            }
            "--out" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --out".to_string())?;
                demo.output = Some(PathBuf::from(value));
                index += 2;
            }
            other => {
                return Err(format!(
                    "unknown demo argument '{other}' (expected --sync, --entities-per-tick or --out)"
                ))
            }
        }
    }
    Ok(demo)
}

fn print_usage() {
    println!("{}", usage_text());
}

fn usage_text() -> String {
    [
        "gridstore_cli - grid save/load tooling",
        "",
        "Usage:",
        "  gridstore_cli [--prototypes <dir>] inspect <file>",
        "  gridstore_cli [--prototypes <dir>] migrate <in> <out>",
        "  gridstore_cli [--prototypes <dir>] demo [--sync] [--entities-per-tick <usize>] [--out <file>]",
        "",
        "Environment:",
        "  GRIDSTORE_INCREMENTAL, GRIDSTORE_ENTITIES_PER_TICK, GRIDSTORE_TILES_PER_TICK,",
        "  GRIDSTORE_TICK_BUDGET_MS, GRIDSTORE_PROTECTED_SLOTS, RUST_LOG",
    ]
    .join("\n")
}
