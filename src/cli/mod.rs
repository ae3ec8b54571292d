pub mod device;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use device::{handle_light, handle_list, handle_monitor, handle_rumble};

use crate::config::SessionConfig;
use crate::drivers::dualshock4::calibration::AxisOrdering;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Session config file (YAML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Gyro calibration field order: 'grouped' or 'paired'. Overrides the
    /// config file. Switch it if gyro axes look swapped or mis-scaled.
    #[arg(long, global = true)]
    pub axis_ordering: Option<AxisOrdering>,
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List connected DualShock 4 controllers
    List,
    /// Print input events from a controller
    Monitor {
        /// Device path (e.g. /dev/hidraw3)
        path: String,
    },
    /// Set the light bar color
    Light {
        /// Device path (e.g. /dev/hidraw3)
        path: String,
        red: u8,
        green: u8,
        blue: u8,
    },
    /// Rumble the controller
    Rumble {
        /// Device path (e.g. /dev/hidraw3)
        path: String,
        /// Left, heavy motor intensity
        strong: u8,
        /// Right, light motor intensity
        weak: u8,
        /// How long to rumble for
        #[arg(long, default_value_t = 1000)]
        duration_ms: u64,
    },
}

pub async fn main_cli(args: Args) -> Result<(), Box<dyn Error>> {
    match args.cmd.clone() {
        Commands::List => handle_list()?,
        Commands::Monitor { path } => {
            let config = session_config(&args)?;
            handle_monitor(&path, config).await?
        }
        Commands::Light {
            path,
            red,
            green,
            blue,
        } => {
            let config = session_config(&args)?;
            handle_light(&path, config, red, green, blue).await?
        }
        Commands::Rumble {
            path,
            strong,
            weak,
            duration_ms,
        } => {
            let config = session_config(&args)?;
            handle_rumble(&path, config, strong, weak, duration_ms).await?
        }
    }

    Ok(())
}

/// Build the session config from the config file and command line. The axis
/// ordering must come from one of them.
fn session_config(args: &Args) -> Result<SessionConfig, Box<dyn Error>> {
    let config = match (&args.config, args.axis_ordering) {
        (Some(path), ordering) => {
            let mut config = SessionConfig::from_yaml_file(path)?;
            if let Some(ordering) = ordering {
                config.axis_ordering = ordering;
            }
            config
        }
        (None, Some(ordering)) => SessionConfig::new(ordering),
        (None, None) => {
            return Err("no axis ordering given, use --axis-ordering or --config".into());
        }
    };
    log::debug!("Using session config: {config:?}");
    Ok(config)
}
