// src/cli.rs
//! Command-line interface
//!
//! `-h` is taken by `--host`, so help is only available as `--help`.

use crate::utils::config::CliOverrides;
use clap::{ArgAction, Args, Parser};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "mqtt-bag",
    version,
    about = "Record MQTT traffic to a trace file and play it back with the original timing",
    disable_help_flag = true
)]
pub struct Cli {
    #[command(flatten)]
    pub mode: ModeArgs,

    /// Broker host
    #[arg(short = 'h', long, value_name = "HOST")]
    pub host: Option<String>,

    /// Broker port
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Username
    #[arg(short, long, value_name = "USER")]
    pub user: Option<String>,

    /// Password
    #[arg(short = 'P', long = "passw", value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Topic filters to record or play (default: everything)
    #[arg(
        short = 't',
        long = "topic",
        visible_alias = "topics",
        value_name = "FILTER",
        num_args = 1..,
        action = ArgAction::Append
    )]
    pub topics: Vec<String>,

    /// Topic filters to exclude
    #[arg(
        short = 'T',
        long = "no-topics",
        value_name = "FILTER",
        num_args = 1..,
        action = ArgAction::Append
    )]
    pub no_topics: Vec<String>,

    /// Restart playback at the end of the trace
    #[arg(short = 'l', long = "loop")]
    pub loop_playback: bool,

    /// No progress output during playback
    #[arg(short, long)]
    pub quiet: bool,

    /// Configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

/// Exactly one operating mode
#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct ModeArgs {
    /// Record into FILE
    #[arg(long, value_name = "FILE")]
    pub rec: Option<PathBuf>,

    /// Play FILE
    #[arg(long, value_name = "FILE")]
    pub play: Option<PathBuf>,

    /// Print a summary of FILE
    #[arg(long, value_name = "FILE")]
    pub info: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Record(PathBuf),
    Play(PathBuf),
    Info(PathBuf),
}

impl Cli {
    /// Selected mode; `None` only if clap's group check was bypassed
    pub fn mode(&self) -> Option<Mode> {
        let ModeArgs { rec, play, info } = &self.mode;
        match (rec, play, info) {
            (Some(path), None, None) => Some(Mode::Record(path.clone())),
            (None, Some(path), None) => Some(Mode::Play(path.clone())),
            (None, None, Some(path)) => Some(Mode::Info(path.clone())),
            _ => None,
        }
    }

    /// Connection flags that override configuration
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}
