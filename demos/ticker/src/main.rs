//! Plays the timelines of a configuration file and logs their events.
//!
//! `ticker [config.toml]`, without a file the bundled `ticker.toml` is used. Set `RUST_LOG=debug`
//! to see frame skips and scheduling.

use std::{env, sync::Arc, time::Duration};

use anyhow::Result;
use cadence_animation::{Playback, PoolRegistry, Timeline, TimelineEvent};
use cadence_shell::{EventLoop, ShellConfig, TokioClock};
use log::{info, warn};

const DEFAULT_CONFIG: &str = include_str!("../ticker.toml");

/// Looping timelines never complete on their own.
const MAX_RUN_TIME: Duration = Duration::from_secs(3);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    cadence_shell::init_logging();

    let config = match env::args().nth(1) {
        Some(path) => ShellConfig::load(path)?,
        None => ShellConfig::from_toml_str(DEFAULT_CONFIG)?,
    };

    let registry = PoolRegistry::new(config.scheduler, Arc::new(TokioClock::new()));
    let timelines = config.build_timelines(&registry)?;
    if timelines.is_empty() {
        warn!("No timelines configured");
        return Ok(());
    }

    for (name, timeline) in &timelines {
        log_events(name, timeline);
        timeline.add_marker_at_frame("halfway", timeline.n_frames() / 2);
        timeline.start();
    }

    let event_loop = EventLoop::new(&config.event_loop);
    let finished = tokio::time::timeout(
        MAX_RUN_TIME,
        event_loop.run_until(&registry, || {
            timelines
                .values()
                .all(|timeline| timeline.playback() == Playback::Idle)
        }),
    )
    .await;

    if finished.is_err() {
        info!("Stopping after {MAX_RUN_TIME:?}");
        for timeline in timelines.values() {
            timeline.stop();
        }
    }

    Ok(())
}

fn log_events(name: &str, timeline: &Timeline) {
    let name = name.to_owned();
    timeline.connect(move |timeline, event| match event {
        TimelineEvent::NewFrame(frame) => {
            let (frames, msecs) = timeline.delta();
            info!(
                "{name}: frame {frame} ({:.0}%, +{frames} in {msecs}ms)",
                timeline.progress() * 100.0
            );
        }
        TimelineEvent::MarkerReached { name: marker, frame } => {
            info!("{name}: marker `{marker}` at frame {frame}")
        }
        event => info!("{name}: {event:?}"),
    });
}
