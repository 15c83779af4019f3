use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "audio-worker")]
#[command(about = "Normalize, encode and publish uploaded audio")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that ffmpeg and ffprobe can be launched
    Check,

    /// Process local audio files and print the final job records as JSON
    Process {
        /// Audio files to process. Inputs are copied first and never modified.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Owner the uploads are stored under
        #[arg(short, long, env = "AUDIO_OWNER_ID")]
        owner: String,

        /// Post that receives the processing outcome (created if missing)
        #[arg(short, long)]
        post: Option<String>,

        /// Title for a newly created post
        #[arg(long, requires = "post")]
        title: Option<String>,

        /// Seconds to wait for all jobs before giving up
        #[arg(long, default_value_t = 900)]
        wait_secs: u64,

        /// Print compact JSON instead of pretty JSON
        #[arg(long)]
        compact: bool,
    },

    /// Render and attach waveforms for processed posts that have none
    BackfillWaveforms {
        /// Only list the posts that would be updated
        #[arg(long)]
        dry_run: bool,
    },
}
