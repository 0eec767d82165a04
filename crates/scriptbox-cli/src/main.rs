//! scriptbox CLI: run restricted scripts against local fixtures.

use clap::{Parser, Subcommand};
use scriptbox_core::config::SandboxConfig;
use scriptbox_core::wire::WireTable;
use scriptbox_exec::{Identity, InMemoryHost, Sandbox};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "scriptbox")]
#[command(about = "Run untrusted table-transform scripts in a restricted sandbox", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone, Default)]
struct ConfigArgs {
    /// YAML file with sandbox settings (overrides environment)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Extra importable modules, comma-separated (overrides config)
    #[arg(long)]
    allow_modules: Option<String>,

    /// Module search paths, comma-separated (overrides config)
    #[arg(long)]
    module_paths: Option<String>,

    /// Call depth limit (overrides config)
    #[arg(long)]
    max_call_depth: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a script and print the JSON result
    Run {
        /// Path to the script
        #[arg(short, long)]
        script: PathBuf,

        /// Wire table (JSON) to seed `result` with
        #[arg(long)]
        input: Option<PathBuf>,

        /// Host fixture (JSON) with data sources and stored query results
        #[arg(long)]
        host: Option<PathBuf>,

        /// Identity (JSON) the run executes on behalf of
        #[arg(long)]
        user: Option<PathBuf>,

        /// Print the run record to stderr
        #[arg(long)]
        record: bool,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Compile a script with the restriction checker, without running it
    Check {
        /// Path to the script
        #[arg(short, long)]
        script: PathBuf,
    },

    /// Print the effective sandbox configuration
    ExplainConfig {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

fn main() {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            script,
            input,
            host,
            user,
            record,
            config,
        } => match run_script(&script, input.as_deref(), host.as_deref(), user.as_deref(), record, &config) {
            Ok(true) => {}
            Ok(false) => std::process::exit(1),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Check { script } => {
            if let Err(e) = check_script(&script) {
                eprintln!("Check failed: {}", e);
                std::process::exit(1);
            }
            println!("✓ Script compiles");
        }
        Commands::ExplainConfig { config } => {
            if let Err(e) = explain_config(&config) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

/// Returns whether the script itself succeeded.
fn run_script(
    script_path: &Path,
    input: Option<&Path>,
    host: Option<&Path>,
    user: Option<&Path>,
    print_record: bool,
    args: &ConfigArgs,
) -> Result<bool, Box<dyn std::error::Error>> {
    let script = fs::read_to_string(script_path)?;
    let config = effective_config(args)?;

    let host = match host {
        Some(path) => InMemoryHost::from_fixture_json(&fs::read_to_string(path)?)?,
        None => InMemoryHost::new(),
    };
    let user: Identity = match user {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => Identity::anonymous(),
    };
    let input: Option<WireTable> = match input {
        Some(path) => Some(serde_json::from_str(&fs::read_to_string(path)?)?),
        None => None,
    };

    let mut sandbox = Sandbox::new(config, Arc::new(host))?;
    debug!(script = %script_path.display(), "running script");
    let outcome = sandbox.execute_with_input(&script, &user, input.as_ref());

    if print_record {
        if let Some(record) = sandbox.last_record() {
            eprintln!("{}", serde_json::to_string_pretty(record)?);
        }
    }

    match outcome {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(true)
        }
        Err(e) => {
            eprintln!("{}", e);
            Ok(false)
        }
    }
}

fn check_script(script_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let script = fs::read_to_string(script_path)?;
    scriptbox_lang::compile(&script)?;
    Ok(())
}

fn explain_config(args: &ConfigArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = effective_config(args)?;

    println!("Sandbox Configuration");
    println!("=====================");
    print!("{}", config.to_yaml()?);
    println!();
    println!("Importable modules:");
    for name in config.allowed_modules() {
        println!("  - {}", name);
    }
    let paths = config.module_paths();
    if !paths.is_empty() {
        println!("Module search paths:");
        for path in paths {
            println!("  - {}", path.display());
        }
    }
    Ok(())
}

/// Environment, then the config file, then command line flags.
fn effective_config(args: &ConfigArgs) -> Result<SandboxConfig, Box<dyn std::error::Error>> {
    let mut config = SandboxConfig::from_env();
    if let Some(path) = &args.config {
        let doc: ConfigDoc = serde_yaml::from_str(&fs::read_to_string(path)?)?;
        apply_config_doc(&mut config, &doc);
    }
    if let Some(modules) = &args.allow_modules {
        config.allowed_import_modules = modules.clone();
    }
    if let Some(paths) = &args.module_paths {
        config.additional_modules_paths = paths.clone();
    }
    if let Some(depth) = args.max_call_depth {
        config.max_call_depth = depth;
    }
    config.validate()?;
    Ok(config)
}

/// Config file contents; keys left out keep the value from the environment.
#[derive(Debug, Default, Deserialize)]
struct ConfigDoc {
    #[serde(default, alias = "allowedImportModules")]
    allowed_import_modules: Option<String>,
    #[serde(default, alias = "additionalModulesPaths")]
    additional_modules_paths: Option<String>,
    #[serde(default)]
    max_call_depth: Option<usize>,
    #[serde(default)]
    stack_size_bytes: Option<usize>,
}

fn apply_config_doc(cfg: &mut SandboxConfig, doc: &ConfigDoc) {
    if let Some(modules) = &doc.allowed_import_modules {
        cfg.allowed_import_modules = modules.clone();
    }
    if let Some(paths) = &doc.additional_modules_paths {
        cfg.additional_modules_paths = paths.clone();
    }
    if let Some(depth) = doc.max_call_depth {
        cfg.max_call_depth = depth;
    }
    if let Some(size) = doc.stack_size_bytes {
        cfg.stack_size_bytes = size;
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_config_doc, effective_config, ConfigArgs, ConfigDoc, SandboxConfig};

    #[test]
    fn config_file_overrides_only_present_keys() {
        let mut config = SandboxConfig::default();
        let doc: ConfigDoc = serde_yaml::from_str("allowedImportModules: \"re, csv\"\n").unwrap();
        apply_config_doc(&mut config, &doc);
        assert_eq!(config.allowed_import_modules, "re, csv");
        assert_eq!(config.max_call_depth, SandboxConfig::default().max_call_depth);
    }

    #[test]
    fn cli_flags_win_over_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandbox.yaml");
        std::fs::write(&path, "max_call_depth: 50\nallowed_import_modules: re\n").unwrap();
        let args = ConfigArgs {
            config: Some(path),
            allow_modules: Some("csv".into()),
            module_paths: None,
            max_call_depth: None,
        };
        let config = effective_config(&args).unwrap();
        assert_eq!(config.max_call_depth, 50);
        assert_eq!(config.allowed_import_modules, "csv");
    }
}
