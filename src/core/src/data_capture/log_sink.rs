use std::sync::{Mutex, MutexGuard};

use log::trace;

use super::correlation;
use super::types::{StageEvent, TrafficRecord};

/// Ordered, append-only store of the traffic observed during a session.
///
/// Every proxy task holds an `Arc<LogSink>`; appends are serialized by the
/// inner mutex so insertion order is the order in which appends completed.
/// Records are never removed or reordered while a session runs; `clear` is
/// only called by the controller before a new session starts.
#[derive(Debug, Default)]
pub struct LogSink {
    records: Mutex<Vec<TrafficRecord>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TrafficRecord>> {
        // A poisoned lock only means a writer panicked mid-push; the vector is still usable.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends `record`, overwriting its `id` with its position in the log.
    pub fn append(&self, mut record: TrafficRecord) -> u64 {
        let mut records = self.lock();
        let id = records.len() as u64;
        record.id = id;
        let preview: String = record.summary.chars().take(64).collect();
        trace!(
            "record #{} {} {} [{}] {}",
            id,
            record.timestamp.format("%H:%M:%S%.3f"),
            record.method,
            record.status,
            preview
        );
        records.push(record);
        id
    }

    pub fn snapshot(&self) -> Vec<TrafficRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Runs correlation over the stored records in place and returns how
    /// many records received a stage.
    pub fn assign_stages(&self, stages: &[StageEvent]) -> usize {
        let mut records = self.lock();
        correlation::correlate(&mut records, stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_capture::types::Direction;
    use std::sync::Arc;

    #[test]
    fn append_assigns_sequential_ids() {
        let sink = LogSink::new();
        for i in 0..3u64 {
            let id = sink.append(TrafficRecord::tcp_chunk(Direction::ClientToServer, 0, b"x"));
            assert_eq!(id, i);
        }
        let all = sink.snapshot();
        assert_eq!(all.len(), 3);
        assert!(all.iter().enumerate().all(|(i, r)| r.id == i as u64));
    }

    #[test]
    fn summary_preview_does_not_split_multibyte() {
        // 63 ASCII bytes then a 2-byte char straddling byte 64.
        let mut text = "a".repeat(63);
        text.push('é');
        let sink = LogSink::new();
        sink.append(TrafficRecord::tcp_chunk(Direction::ClientToServer, 0, text.as_bytes()));
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_are_not_lost() {
        let sink = Arc::new(LogSink::new());
        let mut handles = Vec::new();
        for t in 0..8u64 {
            let sink = Arc::clone(&sink);
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    sink.append(TrafficRecord::tcp_chunk(Direction::ServerToClient, t, b"chunk"));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let all = sink.snapshot();
        assert_eq!(all.len(), 400);
        for (i, r) in all.iter().enumerate() {
            assert_eq!(r.id, i as u64);
        }
    }

    #[test]
    fn clear_empties_the_log() {
        let sink = LogSink::new();
        sink.append(TrafficRecord::tcp_chunk(Direction::ClientToServer, 0, b"x"));
        assert!(!sink.is_empty());
        sink.clear();
        assert!(sink.is_empty());
    }
}
