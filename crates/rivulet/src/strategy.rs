//! Chunk selection strategies.
//!
//! Every strategy is a pure function of the pending index, the playback
//! position and the AsNeeded window, so the same inputs always pick the same
//! chunk.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::index::OrderedRequestIndex;
use crate::request::ChunkTimestamp;

/// How far behind the playhead a chunk may start and still count as "current".
pub const LOOKBEHIND: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkDownloadStrategy {
    /// Accepted on input only, never stored: normalizes to [`Self::AsNeeded`].
    Unspecified,
    /// Fetch only what falls inside the near-term playback window.
    #[default]
    AsNeeded,
    /// Fetch forward from the playhead as fast as capacity allows.
    AggressiveFuture,
    /// Like `AggressiveFuture`, falling back to the earliest pending chunk.
    AggressiveFromStart,
    /// Like `AggressiveFuture`, falling back to the latest pending chunk.
    AggressiveFromCurrent,
}

impl ChunkDownloadStrategy {
    pub fn normalized(self) -> Self {
        match self {
            Self::Unspecified => Self::AsNeeded,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::AsNeeded => "as-needed",
            Self::AggressiveFuture => "aggressive-future",
            Self::AggressiveFromStart => "aggressive-from-start",
            Self::AggressiveFromCurrent => "aggressive-from-current",
        }
    }

    pub fn is_as_needed(&self) -> bool {
        matches!(self.normalized(), Self::AsNeeded)
    }

    /// Pick the position in `index` of the next chunk to dispatch, if any.
    ///
    /// `position` is the playback position and `window` the AsNeeded horizon.
    pub fn select(
        &self,
        index: &OrderedRequestIndex,
        position: ChunkTimestamp,
        window: Duration,
    ) -> Option<usize> {
        let current = index.position_from(position.saturating_sub(LOOKBEHIND));

        match self.normalized() {
            Self::AsNeeded | Self::Unspecified => {
                let horizon = position.saturating_add(window);
                let within_horizon = |at: usize| {
                    index
                        .get(at)
                        .is_some_and(|request| request.timestamp() <= horizon)
                };

                if let Some(at) = current.filter(|&at| within_horizon(at)) {
                    return Some(at);
                }

                // Closest-before candidate: the latest chunk no older than one window.
                index
                    .position_from(position.saturating_sub(window))
                    .map(|_| index.len() - 1)
                    .filter(|&at| within_horizon(at))
            }
            Self::AggressiveFuture => current,
            Self::AggressiveFromStart => current.or_else(|| (!index.is_empty()).then_some(0)),
            Self::AggressiveFromCurrent => current.or_else(|| index.len().checked_sub(1)),
        }
    }
}

impl fmt::Display for ChunkDownloadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkDownloadStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "unspecified" => Ok(Self::Unspecified),
            "as-needed" | "asneeded" => Ok(Self::AsNeeded),
            "aggressive-future" => Ok(Self::AggressiveFuture),
            "aggressive-from-start" => Ok(Self::AggressiveFromStart),
            "aggressive-from-current" => Ok(Self::AggressiveFromCurrent),
            other => Err(format!("unknown chunk download strategy `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{DownloadRequest, RequestId, SchedulableRequest, TrackId};

    const WINDOW: Duration = Duration::from_secs(60);

    fn index_of(secs: &[u64]) -> OrderedRequestIndex {
        let mut index = OrderedRequestIndex::new();
        for (id, &s) in secs.iter().enumerate() {
            index.insert(DownloadRequest::new(
                RequestId(id as u64),
                TrackId::from("video"),
                ChunkTimestamp::from_secs(s),
            ));
        }
        index
    }

    fn pick(
        strategy: ChunkDownloadStrategy,
        index: &OrderedRequestIndex,
        position_secs: u64,
    ) -> Option<u64> {
        strategy
            .select(index, ChunkTimestamp::from_secs(position_secs), WINDOW)
            .and_then(|at| index.get(at))
            .map(|r| r.timestamp().as_duration().as_secs())
    }

    #[test]
    fn test_as_needed_prefers_chunk_inside_window() {
        let index = index_of(&[10, 20, 70]);
        assert_eq!(pick(ChunkDownloadStrategy::AsNeeded, &index, 15), Some(20));
    }

    #[test]
    fn test_as_needed_respects_lookbehind() {
        let index = index_of(&[13, 20]);
        // 13 >= 15 - 3, so it is still current.
        assert_eq!(pick(ChunkDownloadStrategy::AsNeeded, &index, 15), Some(13));
    }

    #[test]
    fn test_as_needed_discards_chunks_beyond_horizon() {
        let index = index_of(&[80, 90]);
        assert_eq!(pick(ChunkDownloadStrategy::AsNeeded, &index, 10), None);
    }

    #[test]
    fn test_as_needed_falls_back_to_latest_recent_chunk() {
        // Nothing at or after 47s; the latest chunk within one window back is 40s.
        let index = index_of(&[5, 30, 40]);
        assert_eq!(pick(ChunkDownloadStrategy::AsNeeded, &index, 50), Some(40));

        // Everything older than one window: nothing to do.
        let stale = index_of(&[5, 10]);
        assert_eq!(pick(ChunkDownloadStrategy::AsNeeded, &stale, 100), None);
    }

    #[test]
    fn test_aggressive_future_ignores_window() {
        let index = index_of(&[10, 20, 70]);
        assert_eq!(pick(ChunkDownloadStrategy::AggressiveFuture, &index, 0), Some(10));

        let far = index_of(&[500]);
        assert_eq!(pick(ChunkDownloadStrategy::AggressiveFuture, &far, 0), Some(500));
        assert_eq!(pick(ChunkDownloadStrategy::AsNeeded, &far, 0), None);

        let behind = index_of(&[1, 2]);
        assert_eq!(pick(ChunkDownloadStrategy::AggressiveFuture, &behind, 100), None);
    }

    #[test]
    fn test_aggressive_fallbacks() {
        let behind = index_of(&[1, 2, 3]);
        assert_eq!(
            pick(ChunkDownloadStrategy::AggressiveFromStart, &behind, 100),
            Some(1)
        );
        assert_eq!(
            pick(ChunkDownloadStrategy::AggressiveFromCurrent, &behind, 100),
            Some(3)
        );

        let ahead = index_of(&[1, 50, 60]);
        assert_eq!(
            pick(ChunkDownloadStrategy::AggressiveFromStart, &ahead, 40),
            Some(50)
        );
        assert_eq!(
            pick(ChunkDownloadStrategy::AggressiveFromCurrent, &ahead, 40),
            Some(50)
        );
    }

    #[test]
    fn test_empty_index_selects_nothing() {
        let empty = OrderedRequestIndex::new();
        for strategy in [
            ChunkDownloadStrategy::AsNeeded,
            ChunkDownloadStrategy::AggressiveFuture,
            ChunkDownloadStrategy::AggressiveFromStart,
            ChunkDownloadStrategy::AggressiveFromCurrent,
        ] {
            assert_eq!(pick(strategy, &empty, 0), None);
        }
    }

    #[test]
    fn test_unspecified_normalizes_to_as_needed() {
        assert_eq!(
            ChunkDownloadStrategy::Unspecified.normalized(),
            ChunkDownloadStrategy::AsNeeded
        );
        let index = index_of(&[10, 20, 70]);
        assert_eq!(pick(ChunkDownloadStrategy::Unspecified, &index, 15), Some(20));
    }

    #[test]
    fn test_parse_and_serde() {
        assert_eq!(
            "aggressive_from_start".parse::<ChunkDownloadStrategy>(),
            Ok(ChunkDownloadStrategy::AggressiveFromStart)
        );
        assert!("eager".parse::<ChunkDownloadStrategy>().is_err());
        assert_eq!(
            serde_json::to_string(&ChunkDownloadStrategy::AggressiveFuture).unwrap(),
            "\"aggressive-future\""
        );
        let parsed: ChunkDownloadStrategy = serde_json::from_str("\"as-needed\"").unwrap();
        assert_eq!(parsed, ChunkDownloadStrategy::AsNeeded);
    }

    #[test]
    fn test_selection_is_deterministic_with_duplicates() {
        let mut index = OrderedRequestIndex::new();
        index.insert(DownloadRequest::new(
            RequestId(1),
            TrackId::from("video"),
            ChunkTimestamp::from_secs(10),
        ));
        index.insert(DownloadRequest::new(
            RequestId(2),
            TrackId::from("audio"),
            ChunkTimestamp::from_secs(10),
        ));
        let at = ChunkDownloadStrategy::AggressiveFuture
            .select(&index, ChunkTimestamp::ZERO, WINDOW)
            .unwrap();
        assert_eq!(index.get(at).unwrap().id(), RequestId(1));
    }
}
