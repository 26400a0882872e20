use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use vipflow::config::{self, Settings};
use vipflow::telemetry::init_logging;

#[derive(Parser)]
#[command(name = "vipflow")]
#[command(about = "SDN controller with MAC learning, host-pair firewall and virtual-IP load balancing")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run the controller
    Run {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate config.toml and print diagnostics
    Validate {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Config {
            action: ConfigAction::Validate {
                config: config_path,
            },
        }) => cmd_config_validate(&config_path),
        Some(Commands::Run {
            config: config_path,
        }) => cmd_run(&config_path),
        None => cmd_run(Path::new("config.toml")),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn cmd_run(config_path: &Path) -> Result<(), String> {
    use tokio::runtime::Runtime;

    let cfg = config::load(config_path).map_err(|e| format!("Failed to load config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();
    if validation.has_errors() {
        return Err("Validation failed".to_string());
    }
    let settings = Settings::from_config(&cfg).map_err(|e| e.to_string())?;

    init_logging(settings.logging.as_ref());
    info!("vipflow starting with {}", config_path.display());

    let rt = Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))?;
    rt.block_on(vipflow::controller::run(settings))
        .map_err(|e| e.to_string())
}

fn cmd_config_validate(config_path: &Path) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());

    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        Err("Validation failed".to_string())
    } else {
        println!("[INFO] Configuration is valid");
        Ok(())
    }
}
