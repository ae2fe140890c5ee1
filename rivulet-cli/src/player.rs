//! A fake player: feeds the chunk plan into the scheduler, moves the playhead
//! and reports what the scheduler does.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rivulet::{
    ChunkFetcher, ChunkSchedulerBuilder, ChunkTimestamp, SchedulerConfig, SeekCompleted, TrackId,
};

use crate::cli::PlanArgs;
use crate::output::{OutputFormat, RunTally, print_event, print_summary};

/// Playhead update granularity.
const CLOCK_STEP: Duration = Duration::from_millis(100);

/// Every (track, timestamp) pair of the plan, interleaved by timestamp.
///
/// Chunks whose start does not fit the timeline are dropped; a plan that
/// passed [`PlanArgs::validate`] has none.
pub fn build_plan(plan: &PlanArgs) -> Vec<(TrackId, ChunkTimestamp)> {
    let tracks: Vec<TrackId> = plan
        .tracks
        .iter()
        .map(|t| TrackId::from(t.trim()))
        .filter(|t| !t.as_str().is_empty())
        .collect();
    (0..plan.chunks)
        .map_while(|i| i.checked_mul(plan.chunk_duration_ms))
        .flat_map(|start_ms| {
            let timestamp = ChunkTimestamp::from_millis(start_ms);
            tracks.iter().map(move |track| (track.clone(), timestamp))
        })
        .collect()
}

pub async fn run_session(
    config: SchedulerConfig,
    fetcher: Arc<dyn ChunkFetcher>,
    plan: &PlanArgs,
) -> Result<()> {
    let format = OutputFormat::from_json_flag(plan.json);
    let token = CancellationToken::new();
    let (position_tx, position_rx) = watch::channel(Duration::ZERO);
    let (seek_tx, seek_rx) = broadcast::channel(16);

    let (handle, mut events, join) = ChunkSchedulerBuilder::new(config)
        .seek_notifications(seek_rx)
        .cancellation_token(token.clone())
        .spawn(fetcher, position_rx);

    let requests = build_plan(plan);
    let mut tally = RunTally {
        planned: requests.len(),
        ..RunTally::default()
    };
    handle
        .add_requests(requests)
        .await
        .context("failed to queue chunk plan")?;

    let end = Duration::from_millis(plan.chunks.saturating_mul(plan.chunk_duration_ms));
    let seek = plan
        .seek_after_ms
        .zip(plan.seek_to_ms)
        .map(|(after, to)| (Duration::from_millis(after), Duration::from_millis(to)));
    let clock = tokio::spawn(drive_clock(position_tx, seek_tx, end, plan.speed, seek));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut check = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                warn!("Interrupted, cancelling scheduler");
                break;
            }
            Some(event) = events.recv() => {
                tally.record(&event);
                print_event(format, &event);
                if tally.finished() >= tally.planned {
                    debug!("Every planned chunk reached a final state");
                    break;
                }
            }
            _ = check.tick() => {
                if clock.is_finished() {
                    let stats = handle.stats().await?;
                    if stats.in_flight == 0 {
                        info!(pending = stats.pending, "Playback finished");
                        break;
                    }
                }
            }
        }
    }

    let stats = handle.stats().await.ok();
    token.cancel();
    clock.abort();
    let outcome = join.await.context("scheduler task failed")?;
    debug!(?outcome, "Scheduler finished");

    print_summary(format, &tally, stats.as_ref());
    Ok(())
}

/// Advance the playhead at `speed` until `end`, optionally seeking once.
async fn drive_clock(
    position: watch::Sender<Duration>,
    seeks: broadcast::Sender<SeekCompleted>,
    end: Duration,
    speed: f64,
    mut seek: Option<(Duration, Duration)>,
) {
    let started = Instant::now();
    let step = CLOCK_STEP.mul_f64(speed);
    let mut ticker = tokio::time::interval(CLOCK_STEP);
    let mut current = Duration::ZERO;

    while current < end {
        ticker.tick().await;

        if let Some((after, to)) = seek
            && started.elapsed() >= after
        {
            seek = None;
            current = to.min(end);
            position.send_replace(current);
            info!(position = %ChunkTimestamp::new(current), "Seek completed");
            let _ = seeks.send(SeekCompleted {
                position: ChunkTimestamp::new(current),
            });
            continue;
        }

        current = (current + step).min(end);
        position.send_replace(current);
    }
    debug!("Playhead reached the end of the plan");
}
