//! Slug CLI
//!
//! Command-line interface for running and checking .slug programs.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use slug_runtime::value::Value;
use slug_runtime::{Interp, Settings, render_trace};
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "slug")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Slug language runtime - run .slug programs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a .slug program
    Run {
        /// Input .slug source file
        input: PathBuf,

        /// Project root for module resolution (defaults to the input's
        /// directory)
        #[arg(long)]
        root: Option<PathBuf>,

        /// Configuration override, key=value. Bare keys (no dot) are scoped
        /// to the main module FQN. Repeatable.
        #[arg(long = "set", value_name = "KEY=VALUE")]
        sets: Vec<String>,

        /// Restrict module imports to the configured sandbox allow list
        #[arg(long)]
        sandbox: bool,
    },

    /// Parse a .slug file and report errors without running it
    Check {
        /// Input .slug source file
        input: PathBuf,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            input,
            root,
            sets,
            sandbox,
        } => run(&input, root, &sets, sandbox),
        Commands::Check { input } => check(&input),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "slug", &mut io::stdout());
        }
    }
}

/// The main module FQN is the input file's stem.
fn main_fqn(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "main".to_string())
}

fn parse_set(raw: &str) -> Option<(String, String)> {
    let (key, value) = raw.split_once('=')?;
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

fn run(input: &Path, root: Option<PathBuf>, sets: &[String], sandbox: bool) {
    let root = root.unwrap_or_else(|| {
        input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    });

    let mut settings = match Settings::load(&root, main_fqn(input)) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };
    settings.apply_env_overrides();

    let mut pairs = Vec::new();
    for raw in sets {
        match parse_set(raw) {
            Some(pair) => pairs.push(pair),
            None => {
                eprintln!("error: invalid --set '{}', expected key=value", raw);
                process::exit(2);
            }
        }
    }
    settings.apply_cli_overrides(&pairs);
    if sandbox {
        settings.set("sandbox.enabled", toml::Value::Boolean(true));
    }

    let interp = Interp::new(settings);
    match interp.run_file(input) {
        Ok(result) => match &result.value {
            Value::Error(e) => {
                eprintln!("error: {}", e.message);
                process::exit(1);
            }
            Value::RuntimeError(re) => {
                eprintln!("runtime error: {}", re.payload.inspect());
                eprintln!("{}", render_trace(&re.trace));
                process::exit(1);
            }
            _ => process::exit(0),
        },
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

fn check(input: &Path) {
    let source = match std::fs::read_to_string(input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: cannot read {}: {}", input.display(), e);
            process::exit(1);
        }
    };
    match Interp::check_source(&source) {
        Ok(()) => {
            println!("{}: ok", input.display());
        }
        Err(errors) => {
            for error in errors {
                eprintln!("{}: {}", input.display(), error);
            }
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_fqn_uses_file_stem() {
        assert_eq!(main_fqn(Path::new("examples/app.slug")), "app");
        assert_eq!(main_fqn(Path::new("main.slug")), "main");
    }

    #[test]
    fn test_parse_set() {
        assert_eq!(
            parse_set("db.host=remote"),
            Some(("db.host".to_string(), "remote".to_string()))
        );
        assert_eq!(
            parse_set("verbose=true"),
            Some(("verbose".to_string(), "true".to_string()))
        );
        assert_eq!(parse_set("=x"), None);
        assert_eq!(parse_set("novalue"), None);
    }
}
