use clap::{Args, Subcommand};

use crate::config;

#[derive(Debug, Args, Clone)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Debug, Subcommand, Clone)]
enum ConfigSubcommand {
    #[command(about = "Parse the config file and validate its profiles")]
    Check {
        #[arg(long)]
        profile: Option<String>,
    },
    #[command(about = "Print where config and secrets are read from")]
    Path,
}

pub fn run(args: ConfigArgs) -> Result<(), String> {
    match args.command {
        ConfigSubcommand::Check { profile } => {
            let path = config::validate_config(profile.as_deref())?;
            println!("config OK: {}", path.display());
            Ok(())
        }
        ConfigSubcommand::Path => {
            println!("config: {}", config::config_path()?.display());
            println!("secrets: {}", config::secrets_path()?.display());
            Ok(())
        }
    }
}
