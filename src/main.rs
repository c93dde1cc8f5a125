use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, trace, warn};

use tlplay::cli::Args;
use tlplay::core::player::{AudioBridge, CacheOptions, Playback, Player};
use tlplay::core::timeline::Timeline;
use tlplay::io::PatternPlugin;
use tlplay::shell::{self, DriverConfig};

/// Owner loop period (~60 Hz)
const TICK: Duration = Duration::from_micros(16_667);
/// Cache info log period
const STATS_PERIOD: Duration = Duration::from_secs(1);
/// RAM kept free when deriving the cache budget from `--mem`
const RESERVE_GB: f64 = 2.0;

/// Stand-in for an output stream: pulls one buffer per device period.
struct SimulatedDevice {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<usize>>,
}

impl SimulatedDevice {
    fn start(bridge: AudioBridge) -> Result<Option<Self>> {
        let info = bridge.info();
        if !info.is_valid() {
            info!("Timeline has no audio, device not started");
            return Ok(None);
        }
        let frames = bridge.buffer_frame_count().max(1);
        let period = Duration::from_secs_f64(frames as f64 / info.sample_rate as f64);
        let name = bridge.device();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        bridge.connect();
        let thread = thread::Builder::new()
            .name("tlplay-audio".into())
            .spawn(move || {
                let mut buffer = vec![0.0f32; frames * info.channel_count];
                let mut audible = 0usize;
                let mut next = Instant::now();
                while flag.load(Ordering::Acquire) {
                    bridge.render(&mut buffer);
                    if buffer.iter().any(|s| *s != 0.0) {
                        audible += 1;
                    }
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    }
                }
                bridge.disconnect();
                audible
            })
            .context("Failed to spawn audio device thread")?;
        info!(
            "Audio device '{}': {} ch @ {} Hz, {} frames/buffer",
            if name.is_empty() { "default" } else { name.as_str() },
            info.channel_count,
            info.sample_rate,
            frames
        );
        Ok(Some(Self {
            running,
            thread: Some(thread),
        }))
    }

    /// Stop the device; returns the number of non-silent buffers rendered.
    fn stop(mut self) -> usize {
        self.running.store(false, Ordering::Release);
        self.thread.take().and_then(|t| t.join().ok()).unwrap_or(0)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    shell::init_logger(args.verbosity, args.log_file.as_ref())?;

    info!("tlplay {} starting", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);

    let mut config = match &args.config {
        Some(path) => DriverConfig::load(path)?,
        None => DriverConfig::default(),
    };
    if let Some(fraction) = args.mem {
        config.cache = CacheOptions {
            read_behind: config.cache.read_behind,
            ..CacheOptions::from_system_memory(fraction, RESERVE_GB)
        };
    }

    let plugin = Arc::new(PatternPlugin::new()?);
    let composition = shell::demo_composition(&args);
    let timeline = Arc::new(Timeline::new(composition, plugin, config.timeline.clone())?);
    let player = Player::new(Arc::clone(&timeline), config.player.clone())?;
    player.set_cache_options(config.cache.clone());
    player.set_loop(args.loop_mode.into());
    if let Some(speed) = args.speed {
        player.set_speed(speed);
    }
    player
        .observe_playback()
        .subscribe(|playback| info!("Playback -> {:?}", playback));

    let device = SimulatedDevice::start(player.audio_bridge())?;

    player.set_playback(if args.reverse { Playback::Reverse } else { Playback::Forward });

    let started = Instant::now();
    let duration = Duration::from_secs_f64(args.seconds.max(0.0));
    let current_video = player.observe_current_video();
    let mut last_stats = started;
    let mut shown = 0usize;
    let mut last_shown = None;
    while started.elapsed() < duration {
        let tick_start = Instant::now();
        player.tick();

        let time = player.current_time();
        let video = current_video.get();
        match video.first() {
            Some(data) if data.time == time => {
                if last_shown != Some(time) {
                    shown += 1;
                    last_shown = Some(time);
                }
            }
            _ => trace!("No cached frame at {}", time),
        }

        if tick_start.duration_since(last_stats) >= STATS_PERIOD {
            last_stats = tick_start;
            let info = player.observe_cache_info().get();
            info!(
                "t={} video cache {:.0}% {:?} audio cache {:.0}%",
                time, info.video_percentage, info.video_frames, info.audio_percentage
            );
        }

        let elapsed = tick_start.elapsed();
        if elapsed < TICK {
            thread::sleep(TICK - elapsed);
        }
    }

    player.set_playback(Playback::Stop);
    if let Some(device) = device {
        let audible = device.stop();
        info!("Audio buffers with signal: {}", audible);
    }
    if shown == 0 {
        warn!("No frame reached the cache during playback");
    }
    info!(
        "Played '{}' for {:.1}s: {} distinct frames shown, stopped at {}",
        timeline.name(),
        started.elapsed().as_secs_f64(),
        shown,
        player.current_time()
    );
    Ok(())
}
