//! Pending-request index ordered by chunk timestamp.
//!
//! Entries are kept in a `Vec` sorted non-decreasingly by timestamp; entries
//! sharing a timestamp keep their insertion order. Lookups binary-search the
//! timeline with `partition_point`, insertions shift the tail. Pending sets are
//! small (tens to low hundreds), so the shift is cheaper than a tree in practice.

use crate::request::{ChunkTimestamp, DownloadRequest, RequestId, SchedulableRequest, TrackId};

#[derive(Debug, Default, Clone)]
pub struct OrderedRequestIndex {
    entries: Vec<DownloadRequest>,
}

impl OrderedRequestIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a request after every entry with an equal or earlier timestamp.
    pub fn insert(&mut self, request: DownloadRequest) {
        let at = self
            .entries
            .partition_point(|entry| entry.timestamp() <= request.timestamp());
        self.entries.insert(at, request);
    }

    /// Remove a specific request. Returns `None` if it is not pending.
    pub fn remove(&mut self, request: &DownloadRequest) -> Option<DownloadRequest> {
        let start = self
            .entries
            .partition_point(|entry| entry.timestamp() < request.timestamp());
        let offset = self.entries[start..]
            .iter()
            .take_while(|entry| entry.timestamp() == request.timestamp())
            .position(|entry| entry.id() == request.id())?;
        Some(self.entries.remove(start + offset))
    }

    /// Position of the first entry with `timestamp >= position`.
    pub fn position_from(&self, position: ChunkTimestamp) -> Option<usize> {
        let at = self
            .entries
            .partition_point(|entry| entry.timestamp() < position);
        (at < self.entries.len()).then_some(at)
    }

    /// Snapshot of up to `limit` entries starting at the first one with
    /// `timestamp >= position`. `None` returns everything after that point.
    pub fn range_from(&self, position: ChunkTimestamp, limit: Option<usize>) -> Vec<DownloadRequest> {
        let Some(start) = self.position_from(position) else {
            return Vec::new();
        };
        let end = match limit {
            Some(limit) => start.saturating_add(limit).min(self.entries.len()),
            None => self.entries.len(),
        };
        self.entries[start..end].to_vec()
    }

    pub fn first(&self) -> Option<&DownloadRequest> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&DownloadRequest> {
        self.entries.last()
    }

    pub fn get(&self, at: usize) -> Option<&DownloadRequest> {
        self.entries.get(at)
    }

    /// Remove and return the entry at `at`, used when a request is selected for dispatch.
    pub fn take_at(&mut self, at: usize) -> Option<DownloadRequest> {
        (at < self.entries.len()).then(|| self.entries.remove(at))
    }

    /// Purge every pending entry belonging to `track`, preserving the order of the rest.
    pub fn remove_track(&mut self, track: &TrackId) -> Vec<DownloadRequest> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| entry.track() == track);
        self.entries = kept;
        removed
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.iter().any(|entry| entry.id() == id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DownloadRequest> {
        self.entries.iter()
    }
}
