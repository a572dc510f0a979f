use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Result};
use clap::Parser;
use nook_model::EventId;

#[derive(Parser, Debug)]
#[command(about = "Headless player that runs a nook project from scripted input", version)]
pub struct Args {
    /// Project JSON file to load
    #[arg(long)]
    pub project: PathBuf,

    /// Comma-separated inputs: up, down, left, right, skip, wait:<seconds>, touch:<id>, restart
    #[arg(long, value_delimiter = ',')]
    pub inputs: Vec<Input>,

    /// Seed for shuffled say-lists (default: entropy)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Seconds passed to update() after each input
    #[arg(long, default_value_t = 0.1)]
    pub frame_dt: f64,

    /// Path to write the play transcript as JSON
    #[arg(long)]
    pub transcript_json: Option<PathBuf>,

    /// Path to write the gameplay event log as JSON
    #[arg(long)]
    pub event_log_json: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Input {
    Up,
    Down,
    Left,
    Right,
    Skip,
    Wait(f64),
    Touch(EventId),
    Restart,
}

impl Input {
    /// Grid delta for the four movement inputs.
    pub fn step(self) -> Option<(i32, i32)> {
        match self {
            Input::Up => Some((0, -1)),
            Input::Down => Some((0, 1)),
            Input::Left => Some((-1, 0)),
            Input::Right => Some((1, 0)),
            _ => None,
        }
    }
}

impl FromStr for Input {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        match value.to_ascii_lowercase().as_str() {
            "up" => return Ok(Input::Up),
            "down" => return Ok(Input::Down),
            "left" => return Ok(Input::Left),
            "right" => return Ok(Input::Right),
            "skip" => return Ok(Input::Skip),
            "restart" => return Ok(Input::Restart),
            _ => {}
        }
        if let Some(seconds) = value.strip_prefix("wait:") {
            return seconds
                .parse::<f64>()
                .ok()
                .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
                .map(Input::Wait)
                .ok_or_else(|| format!("invalid wait duration '{seconds}'"));
        }
        if let Some(id) = value.strip_prefix("touch:") {
            return id
                .parse::<EventId>()
                .map(Input::Touch)
                .map_err(|_| format!("invalid event id '{id}'"));
        }
        Err(format!("unknown input '{value}'"))
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Up => f.write_str("up"),
            Input::Down => f.write_str("down"),
            Input::Left => f.write_str("left"),
            Input::Right => f.write_str("right"),
            Input::Skip => f.write_str("skip"),
            Input::Wait(seconds) => write!(f, "wait:{seconds}"),
            Input::Touch(id) => write!(f, "touch:{id}"),
            Input::Restart => f.write_str("restart"),
        }
    }
}

#[derive(Debug)]
pub struct PlayArgs {
    pub project: PathBuf,
    pub inputs: Vec<Input>,
    pub seed: Option<u64>,
    pub frame_dt: f64,
    pub transcript_json: Option<PathBuf>,
    pub event_log_json: Option<PathBuf>,
    pub verbose: bool,
}

pub fn parse() -> Result<PlayArgs> {
    let args = Args::parse();
    args.into_play_args()
}

impl Args {
    fn into_play_args(self) -> Result<PlayArgs> {
        if !self.frame_dt.is_finite() || self.frame_dt < 0.0 {
            bail!("--frame-dt must be a non-negative number of seconds");
        }
        Ok(PlayArgs {
            project: self.project,
            inputs: self.inputs,
            seed: self.seed,
            frame_dt: self.frame_dt,
            transcript_json: self.transcript_json,
            event_log_json: self.event_log_json,
            verbose: self.verbose,
        })
    }
}
