//! conbridge - run a console program inside a headless conhost
//!
//! conbridge launches `conhost.exe --headless` around a command line and
//! bridges the current console to it: keystrokes go in as text, rendered
//! VT output comes back and is written to the console. Resizing the
//! console window is forwarded through conhost's signal pipe.
//!
//! # Quick Start
//!
//! ```text
//! conbridge                          # cmd.exe at the current size
//! conbridge -- pwsh.exe -NoLogo      # any command line after --
//! conbridge --conhost OpenConsole.exe -e TERM=xterm-256color
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use conbridge::bridge::{exit_code, ConnectionState};
use conbridge::config::{Config, DEFAULT_LOG_LEVEL};
use conbridge::core::pty::PtyOptions;

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding a tracing filter
const LOG_ENV: &str = "CONBRIDGE_LOG";

/// Command line settings; `None` means "use config.toml".
#[derive(Debug, Default, PartialEq)]
struct Args {
    width: Option<u16>,
    height: Option<u16>,
    conhost: Option<String>,
    directory: Option<PathBuf>,
    env: Vec<String>,
    cmdline: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Command {
    Run(Args),
    Help,
    Version,
}

fn print_version() {
    eprintln!("conbridge {}", VERSION);
}

fn print_help() {
    eprintln!("conbridge {} - run a console program inside a headless conhost", VERSION);
    eprintln!();
    eprintln!("Usage: conbridge [OPTIONS] [-- COMMANDLINE...]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --width <N>           Initial columns (default: current terminal)");
    eprintln!("  --height <N>          Initial rows (default: current terminal)");
    eprintln!("  --conhost <PATH>      conhost binary (default: conhost.exe)");
    eprintln!("  -d, --directory <DIR> Starting directory");
    eprintln!("  -e, --env <NAME=VAL>  Extra environment variable (repeatable)");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Without a command line the shell from config.toml (or cmd.exe) runs.");
    eprintln!();
    eprintln!("Configuration: ~/.conbridge/config.toml");
    eprintln!("Log file:      ~/.conbridge/conbridge.log ({} sets the filter)", LOG_ENV);
    eprintln!();
    eprintln!("Exit status: 0 when the program closed normally, 1 otherwise");
}

fn parse_number(flag: &str, value: Option<&String>) -> Result<u16, String> {
    let value = value.ok_or_else(|| format!("Missing value for {}", flag))?;
    match value.parse::<u16>() {
        Ok(n) if n > 0 && n <= i16::MAX as u16 => Ok(n),
        _ => Err(format!("Invalid value for {}: {}", flag, value)),
    }
}

/// Quote an argument the way CommandLineToArgvW splits it back.
fn quote_argument(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
        return arg.to_string();
    }

    let mut quoted = String::from("\"");
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.push_str(&"\\".repeat(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.push_str(&"\\".repeat(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    quoted.push_str(&"\\".repeat(backslashes * 2));
    quoted.push('"');
    quoted
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut parsed = Args::default();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-v" | "--version" => return Ok(Command::Version),
            "--width" => {
                i += 1;
                parsed.width = Some(parse_number("--width", args.get(i))?);
            }
            "--height" => {
                i += 1;
                parsed.height = Some(parse_number("--height", args.get(i))?);
            }
            "--conhost" => {
                i += 1;
                let path = args.get(i).ok_or("Missing conhost path")?;
                parsed.conhost = Some(path.clone());
            }
            "-d" | "--directory" => {
                i += 1;
                let dir = args.get(i).ok_or("Missing directory")?;
                parsed.directory = Some(PathBuf::from(dir));
            }
            "-e" | "--env" => {
                i += 1;
                let assignment = args.get(i).ok_or("Missing NAME=VALUE")?;
                parsed.env.push(assignment.clone());
            }
            "--" => {
                let rest = &args[i + 1..];
                if rest.is_empty() {
                    return Err("Missing command line after --".to_string());
                }
                let quoted: Vec<String> = rest.iter().map(|arg| quote_argument(arg)).collect();
                parsed.cmdline = Some(quoted.join(" "));
                break;
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(Command::Run(parsed))
}

/// Log to `~/.conbridge/conbridge.log`; stdout belongs to the bridged program.
fn init_logging(config_level: &str) {
    let log_path = Config::config_dir()
        .map(|dir| dir.join("conbridge.log"))
        .unwrap_or_else(|| PathBuf::from("conbridge.log"));

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_new(config_level))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// Merge config file, command line and terminal size into launch options.
fn build_options(config: &Config, args: &Args, terminal_size: Option<(u16, u16)>) -> anyhow::Result<PtyOptions> {
    let mut options = config.pty_options().context("Invalid configuration")?;

    if let Some(cmdline) = &args.cmdline {
        options.cmdline = cmdline.clone();
    }
    if let Some(conhost) = &args.conhost {
        options.conhost = conhost.clone();
    }
    if let Some(dir) = &args.directory {
        options.starting_directory = Some(dir.clone());
    }
    for assignment in &args.env {
        options
            .extra_env
            .insert_assignment(assignment)
            .with_context(|| format!("Invalid --env {}", assignment))?;
    }

    let (columns, rows) = terminal_size.unwrap_or((0, 0));
    options.width = args.width.or(config.width).unwrap_or(columns);
    options.height = args.height.or(config.height).unwrap_or(rows);
    Ok(options)
}

/// Bridge this console to the hosted program (Windows only)
#[cfg(windows)]
fn run_bridge(options: PtyOptions) -> anyhow::Result<ConnectionState> {
    use std::sync::Arc;

    use conbridge::bridge::{
        run_connection_to_completion, CancelToken, ConptyConnection, ConsoleInput, ConsoleOutput,
        TerminalConnection,
    };
    use crossterm::terminal;

    let input = ConsoleInput::stdin().context("Failed to open console input")?;
    let output = ConsoleOutput::stdout().context("Failed to open console output")?;

    terminal::enable_raw_mode().context("Failed to enable raw mode")?;
    let saved_mode = input.enable_vt_input();
    if let Err(e) = &saved_mode {
        warn!("Could not enable VT input: {}", e);
    }

    let connection: Arc<dyn TerminalConnection> = Arc::new(ConptyConnection::new(options));
    let state = run_connection_to_completion(connection, input, output, CancelToken::new());

    if let Ok(mode) = saved_mode {
        if let Ok(console) = ConsoleInput::stdin() {
            let _ = console.restore_mode(mode);
        }
    }
    let _ = terminal::disable_raw_mode();

    Ok(state)
}

#[cfg(not(windows))]
fn run_bridge(options: PtyOptions) -> anyhow::Result<ConnectionState> {
    anyhow::bail!(
        "conbridge hosts {} and only runs on Windows",
        options.conhost
    )
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let args = match parse_args(&args) {
        Ok(Command::Run(args)) => args,
        Ok(Command::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Command::Version) => {
            print_version();
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(2);
        }
    };

    let loaded = Config::try_load();
    let config = loaded.as_ref().cloned().unwrap_or_default();
    init_logging(&config.log_level);
    if let Err(e) = &loaded {
        warn!("{}; using defaults", e);
        eprintln!("Warning: {}", e);
    }

    info!("conbridge {} starting", VERSION);

    let terminal_size = crossterm::terminal::size().ok();
    let options = build_options(&config, &args, terminal_size)?;
    info!(
        "Hosting {:?} in {} at {}x{}",
        options.cmdline, options.conhost, options.width, options.height
    );

    let state = run_bridge(options)?;
    std::process::exit(exit_code(state));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    fn run_args(args: &[&str]) -> Args {
        match parse_args(&strings(args)) {
            Ok(Command::Run(args)) => args,
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_full_command_line() {
        let args = run_args(&[
            "--width", "100", "--height", "40", "--conhost", "OpenConsole.exe", "-d", "C:\\src", "-e", "A=1",
            "--env", "B=2", "--", "pwsh.exe", "-Command", "Get-Date; exit",
        ]);

        assert_eq!((args.width, args.height), (Some(100), Some(40)));
        assert_eq!(args.conhost.as_deref(), Some("OpenConsole.exe"));
        assert_eq!(args.directory, Some(PathBuf::from("C:\\src")));
        assert_eq!(args.env, vec!["A=1", "B=2"]);
        assert_eq!(args.cmdline.as_deref(), Some("pwsh.exe -Command \"Get-Date; exit\""));
    }

    #[test]
    fn test_parse_help_and_errors() {
        assert_eq!(parse_args(&strings(&["-h"])), Ok(Command::Help));
        assert_eq!(parse_args(&strings(&["--version"])), Ok(Command::Version));
        assert!(parse_args(&strings(&["--width"])).is_err());
        assert!(parse_args(&strings(&["--width", "0"])).is_err());
        assert!(parse_args(&strings(&["--height", "40000"])).is_err());
        assert!(parse_args(&strings(&["--"])).is_err());
        assert!(parse_args(&strings(&["--bogus"])).is_err());
        assert_eq!(run_args(&[]), Args::default());
    }

    #[test]
    fn test_quote_argument() {
        assert_eq!(quote_argument("plain"), "plain");
        assert_eq!(quote_argument(""), "\"\"");
        assert_eq!(quote_argument("a b"), "\"a b\"");
        assert_eq!(quote_argument("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(quote_argument("C:\\dir with space\\"), "\"C:\\dir with space\\\\\"");
    }

    #[test]
    fn test_cli_overrides_config() {
        let config = Config::parse("shell = \"pwsh.exe\"\nwidth = 90\n[env]\nX = \"1\"").unwrap();
        let args = run_args(&["--height", "33", "-e", "x=2", "--", "cmd.exe"]);

        let options = build_options(&config, &args, Some((200, 50))).unwrap();
        assert_eq!(options.cmdline, "cmd.exe");
        assert_eq!((options.width, options.height), (90, 33));
        assert_eq!(options.extra_env.get("X"), Some("2"));
    }

    #[test]
    fn test_terminal_size_is_fallback() {
        let options = build_options(&Config::default(), &Args::default(), Some((132, 43))).unwrap();
        assert_eq!((options.width, options.height), (132, 43));
        assert_eq!(options.cmdline, "cmd.exe");

        let bad = run_args(&["-e", "NOEQUALS"]);
        assert!(build_options(&Config::default(), &bad, None).is_err());
    }
}
