use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use rivulet::ChunkDownloadStrategy;

/// Fastest playback the simulated clock supports.
pub const MAX_SPEED: f64 = 1_000.0;

#[derive(Parser, Debug)]
#[command(
    name = "rivulet",
    version,
    about = "Drive the rivulet chunk scheduler against a simulated or HTTP transport"
)]
pub struct Args {
    /// Scheduler configuration file (TOML)
    #[arg(short, long, global = true, env = "RIVULET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Play back a chunk plan against a simulated transport
    Simulate {
        #[command(flatten)]
        plan: PlanArgs,

        #[command(flatten)]
        overrides: SchedulerOverrides,

        /// Simulated fetch latency in milliseconds
        #[arg(long, default_value_t = 200)]
        latency_ms: u64,

        /// Probability (0.0 to 1.0) that a simulated fetch fails
        #[arg(long, default_value_t = 0.0)]
        failure_rate: f64,

        /// Simulated chunk size in bytes
        #[arg(long, default_value_t = 64 * 1024)]
        chunk_size: usize,
    },

    /// Play back a chunk plan, fetching chunks over HTTP
    Fetch {
        /// URL template, `{track}` and `{timestamp_ms}` are substituted per chunk
        #[arg(long)]
        url_template: String,

        #[command(flatten)]
        plan: PlanArgs,

        #[command(flatten)]
        overrides: SchedulerOverrides,
    },
}

impl Commands {
    pub fn plan(&self) -> &PlanArgs {
        match self {
            Commands::Simulate { plan, .. } | Commands::Fetch { plan, .. } => plan,
        }
    }

    pub fn overrides(&self) -> &SchedulerOverrides {
        match self {
            Commands::Simulate { overrides, .. } | Commands::Fetch { overrides, .. } => overrides,
        }
    }
}

/// Shape of the chunk plan and of the simulated playback.
#[derive(ClapArgs, Debug, Clone)]
pub struct PlanArgs {
    /// Tracks to schedule, comma separated
    #[arg(long, value_delimiter = ',', default_value = "video,audio")]
    pub tracks: Vec<String>,

    /// Number of chunks per track
    #[arg(long, default_value_t = 30)]
    pub chunks: u64,

    /// Timeline span covered by one chunk, in milliseconds
    #[arg(long, default_value_t = 2_000)]
    pub chunk_duration_ms: u64,

    /// Playback speed multiplier
    #[arg(long, default_value_t = 1.0)]
    pub speed: f64,

    /// Seek to this position (milliseconds) during playback
    #[arg(long, requires = "seek_after_ms")]
    pub seek_to_ms: Option<u64>,

    /// Wall-clock delay before the seek, in milliseconds
    #[arg(long, requires = "seek_to_ms")]
    pub seek_after_ms: Option<u64>,

    /// Print events and the summary as JSON lines
    #[arg(long)]
    pub json: bool,
}

impl PlanArgs {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.speed.is_finite() || self.speed <= 0.0 || self.speed > MAX_SPEED {
            anyhow::bail!(
                "--speed must be greater than 0 and at most {MAX_SPEED}, got {}",
                self.speed
            );
        }
        if self.chunk_duration_ms == 0 {
            anyhow::bail!("--chunk-duration-ms must be greater than zero");
        }
        if self.chunks.checked_mul(self.chunk_duration_ms).is_none() {
            anyhow::bail!(
                "{} chunks of {}ms overflow the timeline",
                self.chunks,
                self.chunk_duration_ms
            );
        }
        if self.tracks.iter().all(|t| t.trim().is_empty()) {
            anyhow::bail!("at least one track is required");
        }
        Ok(())
    }
}

/// Per-field overrides applied on top of the configuration file.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct SchedulerOverrides {
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    #[arg(long)]
    pub max_retries: Option<u32>,

    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Dispatches allowed per rate window
    #[arg(long)]
    pub max_rate: Option<u32>,

    #[arg(long)]
    pub rate_window_ms: Option<u64>,

    /// as-needed, aggressive-future, aggressive-from-start or aggressive-from-current
    #[arg(long)]
    pub strategy: Option<ChunkDownloadStrategy>,

    /// AsNeeded look-ahead window in milliseconds
    #[arg(long)]
    pub window_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simulate() {
        let args = Args::parse_from([
            "rivulet",
            "simulate",
            "--tracks",
            "video,audio-en",
            "--max-concurrent",
            "4",
            "--strategy",
            "aggressive-from-start",
            "--failure-rate",
            "0.25",
        ]);
        let plan = args.command.plan();
        assert_eq!(plan.tracks, vec!["video", "audio-en"]);
        assert_eq!(plan.chunks, 30);
        let overrides = args.command.overrides();
        assert_eq!(overrides.max_concurrent, Some(4));
        assert_eq!(
            overrides.strategy,
            Some(ChunkDownloadStrategy::AggressiveFromStart)
        );
        assert!(matches!(
            args.command,
            Commands::Simulate { failure_rate, .. } if (failure_rate - 0.25).abs() < f64::EPSILON
        ));
    }

    #[test]
    fn test_plan_validation() {
        let args = Args::parse_from(["rivulet", "simulate", "--speed", "0"]);
        assert!(args.command.plan().validate().is_err());

        let args = Args::parse_from(["rivulet", "simulate", "--speed", "1e30"]);
        assert!(args.command.plan().validate().is_err());

        let args = Args::parse_from([
            "rivulet",
            "simulate",
            "--chunks",
            "4",
            "--chunk-duration-ms",
            u64::MAX.to_string().as_str(),
        ]);
        assert!(args.command.plan().validate().is_err());

        let args = Args::parse_from(["rivulet", "fetch", "--url-template", "http://x/{track}"]);
        assert!(args.command.plan().validate().is_ok());
    }

    #[test]
    fn test_seek_flags_go_together() {
        let result = Args::try_parse_from(["rivulet", "simulate", "--seek-to-ms", "1000"]);
        assert!(result.is_err());
    }
}
