// hob-cli/src/main.rs
// `hob render` runs a template file against JSON data; `hob parse` prints
// the canonical tree for debugging.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context as _, Result};
use clap::{Parser, Subcommand};
use hob_ast::Template;
use hob_value::Value;

#[derive(Parser)]
#[command(name = "hob", version, about = "Text templates with Go template syntax")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a template file and write the result to stdout.
    Render {
        template: PathBuf,
        /// JSON file providing the data value (nil when omitted).
        #[arg(long)]
        data: Option<PathBuf>,
        /// Render this named sub-template instead of the root.
        #[arg(long)]
        name: Option<String>,
        /// Delimiter override as "open,close", e.g. "<%,%>".
        #[arg(long)]
        delims: Option<String>,
    },
    /// Parse a template file and print its canonical source.
    Parse {
        template: PathBuf,
        #[arg(long)]
        delims: Option<String>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Render { template, data, name, delims } => {
            let tmpl = load(&template, delims.as_deref())?;
            let value = match data {
                Some(path) => {
                    let raw = fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    let json: serde_json::Value = serde_json::from_str(&raw)
                        .with_context(|| format!("parsing {}", path.display()))?;
                    Value::from(json)
                }
                None => Value::Nil,
            };
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            match name {
                Some(sub) => hob_interpreter::execute_named(&tmpl, &mut out, &sub, value)?,
                None => hob_interpreter::execute(&tmpl, &mut out, value)?,
            }
            out.flush()?;
            Ok(())
        }
        Command::Parse { template, delims } => {
            let tmpl = load(&template, delims.as_deref())?;
            println!("{}", tmpl.dump());
            Ok(())
        }
    }
}

fn load(path: &Path, delims: Option<&str>) -> Result<Template> {
    let source =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "template".to_string());
    let (open, close) = match delims {
        Some(raw) => raw
            .split_once(',')
            .ok_or_else(|| anyhow!("--delims wants \"open,close\", got {:?}", raw))?,
        None => (hob_parser::DEFAULT_OPEN, hob_parser::DEFAULT_CLOSE),
    };
    hob_parser::parse_with_delims(&name, &source, open, close)
        .map_err(|diags| anyhow!("{}", hob_diagnostics::join(&diags)))
}
