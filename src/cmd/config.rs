//! Configuration view and validation commands: `depla config`.

use anyhow::{Result, bail};
use depla::config::{Config, DeplaToml};

use super::super::ConfigCommands;

pub fn cmd_config(config: &Config, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Depla Configuration");
            println!("===================");
            println!();
            println!("Data dir:      {}", config.data_dir.display());
            println!("Templates dir: {}", config.templates_dir.display());
            println!("Log dir:       {}", config.log_dir.display());
            if config.sources.is_empty() {
                println!("Config files:  (none, using defaults)");
            } else {
                println!("Config files:");
                for source in &config.sources {
                    println!("  {}", source.display());
                }
            }
            println!();
            println!("Effective values (with env/CLI overrides):");
            println!();
            print!("{}", config.render()?);
        }
        Some(ConfigCommands::Validate) => {
            let mut problems = 0;
            for source in &config.sources {
                let content = std::fs::read_to_string(source)?;
                match DeplaToml::parse(&content) {
                    Ok(toml) => {
                        println!("{}: ok", source.display());
                        for warning in toml.validate() {
                            println!("  warning: {}", warning);
                        }
                    }
                    Err(e) => {
                        println!("{}: {:#}", source.display(), e);
                        problems += 1;
                    }
                }
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Effective configuration is valid.");
            } else {
                println!("Effective configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }

            if problems > 0 {
                bail!("{} config file(s) failed to parse", problems);
            }
        }
    }

    Ok(())
}
