use std::path::PathBuf;

use bombcard::auth::password::hash_password;
use bombcard::configuration::config::{Config, ConfigOverrides};
use bombcard::controller::Controller;
use clap::Parser;
use log::{error, info};

#[derive(Parser)]
#[command(name = "bombcard")]
#[command(version)]
#[command(about = "Backend for the bomb card-flip game")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(required_unless_present = "hash_password")]
    config_file: Option<PathBuf>,

    /// Print an argon2 hash for the [admin] section and exit
    #[arg(long, value_name = "PASSWORD")]
    hash_password: Option<String>,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let args = Args::parse();

    if let Some(password) = args.hash_password {
        match hash_password(&password) {
            Ok(hash) => println!("{}", hash),
            Err(e) => {
                error!("Unable to hash password: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let Some(config_file) = args.config_file else {
        error!("No configuration file given");
        std::process::exit(1);
    };

    info!("Importing configuration");
    let config = match Config::from_file(&config_file)
        .and_then(|config| config.apply_overrides(&args.overrides))
    {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration from file: {}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration imported successfully");

    let controller = match Controller::new(config).await {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = controller.run().await {
        error!("Error occured in the controller process: {}, exiting...", e);
        std::process::exit(1);
    }
}
