use tlplay::cli::Args;
use tlplay::config::{LOG_FILE, PathConfig, SETTINGS_FILE, Settings};
use tlplay::core::time::{TimeRange, TimeValue};
use tlplay::core::workers::Workers;
use tlplay::io::IoRegistry;
use tlplay::player::device::open_output;
use tlplay::player::{CacheInfo, Playback, Player};
use tlplay::timeline::Timeline;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Playhead update interval
const TICK: Duration = Duration::from_millis(5);
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

const MB: f64 = 1024.0 * 1024.0;

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt.clone().unwrap_or_else(|| path_config.data_file(LOG_FILE));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;
        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging respects RUST_LOG if set
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn apply_args(settings: &mut Settings, args: &Args) {
    let cache = &mut settings.player.cache;
    if let Some(v) = args.read_ahead {
        cache.read_ahead = v;
    }
    if let Some(v) = args.read_behind {
        cache.read_behind = v;
    }
    if let Some(v) = args.video_mb {
        cache.video_mb = v;
    }
    if let Some(v) = args.audio_mb {
        cache.audio_mb = v;
    }
    if let Some(v) = args.workers {
        settings.workers = v;
    }
}

fn load_timeline(path: &Path, registry: &IoRegistry, settings: &Settings) -> Result<Timeline> {
    let is_json = path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let timeline = if is_json {
        Timeline::from_json_file(path)
    } else {
        Timeline::from_media(path, registry, &settings.timeline)
    };
    timeline.with_context(|| format!("Failed to open {}", path.display()))
}

fn cache_line(info: &CacheInfo) -> String {
    format!(
        "video {:.1}/{:.0} MB ({} frames, {:.0}% of window), audio {:.1}/{:.0} MB ({} s), requests {}/{}, hits {} misses {} evictions {} underruns {}",
        info.video_bytes as f64 / MB,
        info.video_limit as f64 / MB,
        info.video_frames,
        info.video_percentage,
        info.audio_bytes as f64 / MB,
        info.audio_limit as f64 / MB,
        info.audio_buckets,
        info.video_requests,
        info.audio_requests,
        info.hits,
        info.misses,
        info.evictions,
        info.underruns,
    )
}

fn in_out_range(timeline: &Timeline, args: &Args) -> Option<TimeRange> {
    if args.in_point.is_none() && args.out_point.is_none() {
        return None;
    }
    let range = timeline.time_range();
    let rate = timeline.rate;
    let start = args.in_point.map_or(range.start, |s| range.start + TimeValue::from_seconds(s, rate));
    let end = args.out_point.map_or(range.end_inclusive(), |s| range.start + TimeValue::from_seconds(s, rate));
    Some(TimeRange::from_start_end_inclusive(start, end))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = path_config.ensure_dirs() {
        eprintln!("Warning: {:#}", e);
    }
    init_logging(&args, &path_config)?;
    info!("tlplay {} starting", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);

    let settings_path = path_config.config_file(SETTINGS_FILE);
    info!("Config path: {}", settings_path.display());
    let mut settings = Settings::load(&settings_path)?;
    apply_args(&mut settings, &args);

    let workers = Arc::new(Workers::new(settings.worker_threads()));
    let registry = Arc::new(IoRegistry::with_defaults(Arc::clone(&workers)));
    let timeline = load_timeline(&args.input, &registry, &settings)?;
    let in_out = in_out_range(&timeline, &args);

    let mut player = Player::new(Arc::new(timeline), registry, settings.player.clone(), &settings.timeline)
        .context("Failed to start player")?;
    player.set_loop(args.loop_mode.into());
    player.set_speed(args.speed);
    if let Some(range) = in_out {
        player.set_in_out_range(range);
    }
    if let Some(offset) = args.audio_offset {
        player.set_audio_offset(offset);
    }
    let output = open_output(player.audio_sync(), args.audio);
    info!("Audio output: {}", output.name());

    let direction = if args.reverse { Playback::Reverse } else { Playback::Forward };
    if args.reverse {
        let last = player.in_out_range().get().end_inclusive();
        player.seek(last);
    }
    player.set_playback(direction);

    let started = Instant::now();
    let duration = Duration::from_secs_f64(args.seconds.max(0.0));
    let mut next_report = started + REPORT_INTERVAL;
    let mut frames_shown = 0u64;
    let frames = player.current_video().subscribe();

    while started.elapsed() < duration {
        player.tick();
        frames_shown += frames.drain().len() as u64;
        if Instant::now() >= next_report {
            next_report += REPORT_INTERVAL;
            info!("{} | {}", player.current_time().get(), cache_line(&player.cache_info().get()));
        }
        if player.playback().get() == Playback::Stop {
            info!("Playback finished at {}", player.current_time().get());
            break;
        }
        std::thread::sleep(TICK);
    }
    player.set_playback(Playback::Stop);

    let info = player.cache_info().get();
    if info.underruns > 0 && args.audio {
        warn!("{} audio underruns", info.underruns);
    }
    println!(
        "Played {:.2} s of '{}' ({}), {} frames presented, stopped at {}",
        started.elapsed().as_secs_f64(),
        player.timeline().name,
        player.time_range(),
        frames_shown,
        player.current_time().get(),
    );
    println!("Cache: {}", cache_line(&info));
    drop(output);
    Ok(())
}
