//! Headless playback session against a simulated media element.

use anyhow::{Context, Result};
use clap::Parser;
use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use timeline_sync::core::{EngineConfig, VirtualSegment, VirtualTimeline};
use timeline_sync::playback::{ManualTimeSource, PlaybackController, TickOutcome};
use timeline_sync::video::SimulatedElement;

#[derive(Parser)]
#[command(name = "timeline-sync")]
#[command(about = "Play a virtual timeline against a simulated video element")]
#[command(version)]
struct Cli {
    /// Timeline JSON file (a built-in demo timeline is used when omitted)
    timeline: Option<PathBuf>,

    /// Engine config file (defaults to the per-user config)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Wall-clock seconds to simulate
    #[arg(long, default_value = "10")]
    seconds: f64,

    /// Display refresh rate of the simulated host
    #[arg(long, default_value = "60")]
    fps: f64,

    /// Playback rate
    #[arg(long, default_value = "1.0")]
    rate: f64,

    /// Drive the loop from the element's native per-frame callback
    #[arg(long)]
    native_callbacks: bool,

    /// Sleep between frames instead of simulating time
    #[arg(long)]
    realtime: bool,
}

fn demo_timeline() -> VirtualTimeline {
    // Reordered source with a cut and a gap before the last segment
    VirtualTimeline::new(vec![
        VirtualSegment::with_id("intro", 0.0, 2.0, 10.0, 12.0),
        VirtualSegment::with_id("cut", 2.0, 3.0, 12.0, 13.0).disabled(),
        VirtualSegment::with_id("main", 2.0, 5.0, 0.0, 3.0),
        VirtualSegment::with_id("outro", 6.0, 8.0, 20.0, 22.0),
    ])
}

fn load_timeline(path: Option<&PathBuf>) -> Result<VirtualTimeline> {
    let Some(path) = path else {
        return Ok(demo_timeline());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read timeline {}", path.display()))?;
    let timeline: VirtualTimeline = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse timeline {}", path.display()))?;
    let timeline = timeline.normalized();
    timeline
        .validate()
        .with_context(|| format!("Invalid timeline {}", path.display()))?;
    Ok(timeline)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if !(cli.fps.is_finite() && cli.fps > 0.0) {
        anyhow::bail!("--fps must be positive, got {}", cli.fps);
    }

    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };
    let timeline = load_timeline(cli.timeline.as_ref())?;
    log::info!(
        "Loaded timeline: {} segments, {:.2}s",
        timeline.segments.len(),
        timeline.duration
    );

    let source_duration = timeline
        .segments
        .iter()
        .map(|s| s.real_end_time)
        .fold(0.0, f64::max);
    let (element, handle) = if cli.native_callbacks {
        SimulatedElement::with_frame_callbacks(source_duration)
    } else {
        SimulatedElement::new(source_duration)
    };

    let time = ManualTimeSource::new(Instant::now());
    let mut controller = PlaybackController::new(timeline, config).with_time_source(time.clone());
    controller.attach_video(Box::new(element));
    controller.set_caption_renderer(|t: f64| log::trace!("Captions at {:.3}s", t));

    let ended = Rc::new(Cell::new(false));
    let ended_flag = Rc::clone(&ended);
    let _ended = controller.on_ended(move |t| {
        log::info!("Playback ended at {:.2}s", t);
        ended_flag.set(true);
    });

    controller.set_playback_rate(cli.rate)?;
    controller.play()?;

    let frame = Duration::from_secs_f64(1.0 / cli.fps);
    let frames = (cli.seconds * cli.fps).ceil().max(0.0) as u64;
    let mut processed = 0u64;
    for _ in 0..frames {
        if cli.realtime {
            std::thread::sleep(frame);
        }
        let now = time.advance(frame);
        handle.advance(frame);
        let native = handle.take_frame_callback(now);
        if controller.handle_frame(now, native) == TickOutcome::Processed {
            processed += 1;
        }
        if ended.get() {
            break;
        }
    }

    log::info!(
        "Session finished at {:.2}s ({}), {} ticks processed",
        controller.current_time(),
        controller.state().display_text(),
        processed
    );
    println!("{}", serde_json::to_string_pretty(&controller.stats())?);
    Ok(())
}
