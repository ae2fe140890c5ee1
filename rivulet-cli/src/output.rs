//! Human and JSON rendering of scheduler events and the final summary.

use rivulet::{DownloadEvent, SchedulerStats};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Pretty,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json { Self::Json } else { Self::Pretty }
    }
}

pub fn event_json(event: &DownloadEvent) -> serde_json::Value {
    match event {
        DownloadEvent::Completed {
            request_id,
            track,
            timestamp,
            data,
        } => json!({
            "event": "completed",
            "request_id": request_id.0,
            "track": track.as_str(),
            "timestamp_ms": timestamp.as_millis(),
            "bytes": data.len(),
        }),
        DownloadEvent::Retrying {
            request_id,
            track,
            timestamp,
            attempt,
            reason,
        } => json!({
            "event": "retrying",
            "request_id": request_id.0,
            "track": track.as_str(),
            "timestamp_ms": timestamp.as_millis(),
            "attempt": attempt,
            "reason": reason,
        }),
        DownloadEvent::ExceededMaximumRetries {
            request_id,
            track,
            timestamp,
            reason,
        } => json!({
            "event": "exceeded_maximum_retries",
            "request_id": request_id.0,
            "track": track.as_str(),
            "timestamp_ms": timestamp.as_millis(),
            "reason": reason,
        }),
    }
}

pub fn event_line(event: &DownloadEvent) -> String {
    match event {
        DownloadEvent::Completed {
            track,
            timestamp,
            data,
            ..
        } => format!(
            "completed  {:<12} {:>10}  {} bytes",
            track.as_str(),
            timestamp.to_string(),
            data.len()
        ),
        DownloadEvent::Retrying {
            track,
            timestamp,
            attempt,
            reason,
            ..
        } => format!(
            "retrying   {:<12} {:>10}  attempt {attempt}: {reason}",
            track.as_str(),
            timestamp.to_string()
        ),
        DownloadEvent::ExceededMaximumRetries {
            track,
            timestamp,
            reason,
            ..
        } => format!(
            "failed     {:<12} {:>10}  {reason}",
            track.as_str(),
            timestamp.to_string()
        ),
    }
}

pub fn print_event(format: OutputFormat, event: &DownloadEvent) {
    match format {
        OutputFormat::Json => println!("{}", event_json(event)),
        OutputFormat::Pretty => println!("{}", event_line(event)),
    }
}

/// Totals gathered while draining events.
#[derive(Debug, Default, Clone)]
pub struct RunTally {
    pub planned: usize,
    pub completed: usize,
    pub failed: usize,
    pub retries: usize,
    pub bytes: u64,
}

impl RunTally {
    pub fn record(&mut self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Completed { data, .. } => {
                self.completed += 1;
                self.bytes += data.len() as u64;
            }
            DownloadEvent::Retrying { .. } => self.retries += 1,
            DownloadEvent::ExceededMaximumRetries { .. } => self.failed += 1,
        }
    }

    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }
}

pub fn print_summary(format: OutputFormat, tally: &RunTally, stats: Option<&SchedulerStats>) {
    let skipped = tally.planned.saturating_sub(tally.finished());
    match format {
        OutputFormat::Json => {
            let summary = json!({
                "event": "summary",
                "planned": tally.planned,
                "completed": tally.completed,
                "failed": tally.failed,
                "skipped": skipped,
                "retries": tally.retries,
                "bytes": tally.bytes,
                "metrics": stats.map(|s| &s.metrics),
            });
            println!("{summary}");
        }
        OutputFormat::Pretty => {
            println!();
            println!("Summary");
            println!("  planned    {}", tally.planned);
            println!("  completed  {}", tally.completed);
            println!("  failed     {}", tally.failed);
            println!("  skipped    {skipped}");
            println!("  retries    {}", tally.retries);
            println!("  bytes      {}", tally.bytes);
            if let Some(stats) = stats {
                println!("  dispatched {}", stats.metrics.dispatched);
                println!("  delayed    {}", stats.metrics.rate_delayed);
                println!("  timed out  {}", stats.metrics.timed_out);
                println!("  rate       {:.3}/s", stats.current_rate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rivulet::{ChunkTimestamp, RequestId, TrackId};

    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = DownloadEvent::Completed {
            request_id: RequestId(9),
            track: TrackId::from("video"),
            timestamp: ChunkTimestamp::from_millis(6_000),
            data: Bytes::from_static(b"0123"),
        };
        let value = event_json(&event);
        assert_eq!(value["event"], "completed");
        assert_eq!(value["timestamp_ms"], 6_000);
        assert_eq!(value["bytes"], 4);
    }

    #[test]
    fn test_tally() {
        let mut tally = RunTally {
            planned: 3,
            ..RunTally::default()
        };
        let track = TrackId::from("audio");
        tally.record(&DownloadEvent::Retrying {
            request_id: RequestId(1),
            track: track.clone(),
            timestamp: ChunkTimestamp::ZERO,
            attempt: 1,
            reason: "reset".into(),
        });
        tally.record(&DownloadEvent::ExceededMaximumRetries {
            request_id: RequestId(1),
            track,
            timestamp: ChunkTimestamp::ZERO,
            reason: "reset".into(),
        });
        assert_eq!(tally.finished(), 1);
        assert_eq!(tally.retries, 1);
    }
}
