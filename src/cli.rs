use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::player::Loop;

#[cfg(feature = "audio-device")]
const AUDIO_BACKEND: &str = "cpal";
#[cfg(not(feature = "audio-device"))]
const AUDIO_BACKEND: &str = "null (build with --features audio-device)";

const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Audio:  ", AUDIO_BACKEND, "\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LoopArg {
    Loop,
    Once,
    Pingpong,
}

impl From<LoopArg> for Loop {
    fn from(arg: LoopArg) -> Self {
        match arg {
            LoopArg::Loop => Loop::Loop,
            LoopArg::Once => Loop::Once,
            LoopArg::Pingpong => Loop::PingPong,
        }
    }
}

/// Headless timeline player: plays a timeline through the cache engine and reports cache state
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Timeline JSON or a media file (image, image sequence, WAV)
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Loop mode
    #[arg(long = "loop", value_enum, default_value = "loop")]
    pub loop_mode: LoopArg,

    /// Playback speed multiplier
    #[arg(short = 's', long = "speed", default_value_t = 1.0)]
    pub speed: f64,

    /// Play in reverse
    #[arg(short = 'r', long = "reverse")]
    pub reverse: bool,

    /// In point, seconds from the timeline start
    #[arg(long = "in", value_name = "SECONDS")]
    pub in_point: Option<f64>,

    /// Out point (inclusive), seconds from the timeline start
    #[arg(long = "out", value_name = "SECONDS")]
    pub out_point: Option<f64>,

    /// How long to play (wall clock)
    #[arg(short = 'n', long = "seconds", default_value_t = 10.0)]
    pub seconds: f64,

    /// Seconds cached ahead of the playhead
    #[arg(long = "read-ahead", value_name = "SECONDS")]
    pub read_ahead: Option<f64>,

    /// Seconds kept behind the playhead
    #[arg(long = "read-behind", value_name = "SECONDS")]
    pub read_behind: Option<f64>,

    /// Video cache budget (0 = auto)
    #[arg(long = "video-mb", value_name = "MB")]
    pub video_mb: Option<usize>,

    /// Audio cache budget (0 = auto)
    #[arg(long = "audio-mb", value_name = "MB")]
    pub audio_mb: Option<usize>,

    /// Audio offset in seconds (positive delays audio)
    #[arg(long = "audio-offset", value_name = "SECONDS", allow_hyphen_values = true)]
    pub audio_offset: Option<f64>,

    /// Play through the default audio device
    #[arg(short = 'a', long = "audio")]
    pub audio: bool,

    /// Decode threads (0 = auto)
    #[arg(long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Enable logging to file (default: tlplay.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_playback_flags() {
        let args = Args::try_parse_from([
            "tlplay", "cut.json", "--loop", "pingpong", "--speed", "2", "--in", "1.5", "--out", "4",
            "--audio-offset", "-0.25", "-vv",
        ])
        .unwrap();
        assert_eq!(args.input, PathBuf::from("cut.json"));
        assert_eq!(Loop::from(args.loop_mode), Loop::PingPong);
        assert_eq!(args.speed, 2.0);
        assert_eq!(args.in_point, Some(1.5));
        assert_eq!(args.out_point, Some(4.0));
        assert_eq!(args.audio_offset, Some(-0.25));
        assert_eq!(args.verbosity, 2);
        assert!(args.log_file.is_none());
    }

    #[test]
    fn test_log_flag_without_file() {
        let args = Args::try_parse_from(["tlplay", "a.wav", "--log"]).unwrap();
        assert_eq!(args.log_file, Some(None));
        assert_eq!(args.seconds, 10.0);
        assert_eq!(Loop::from(args.loop_mode), Loop::Loop);
    }
}
