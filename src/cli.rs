use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::{config::Config, error::Error};

/// The command line interface for the serial IMU bridge.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Also log to daily rotated files in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// List the USB serial devices present.
    List,

    /// Connect and print whatever the device sends.
    Monitor {
        /// Parse the received lines as orientation samples.
        #[arg(long)]
        imu: bool,

        /// Print events as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Connect, send some text, and disconnect.
    Send {
        /// What to send.
        text: String,

        /// Append a newline.
        #[arg(short, long)]
        newline: bool,
    },

    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,
}

/// Print the requested example.
pub fn handle_example(example: Examples) -> Result<(), Error> {
    match example {
        Examples::Config => {
            let c = Config::example();
            println!("{}", c.serialize_pretty()?);
        }
    }

    Ok(())
}
