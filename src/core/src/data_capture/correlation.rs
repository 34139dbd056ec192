//! Post-session correlation of traffic records with captured stages.
//!
//! A record is attributed to the stage it *caused*: the user acts, the
//! frontend talks to the backend, and only afterwards is the console
//! snapshot taken. Each record therefore rolls forward to the earliest
//! stage whose timestamp is strictly after its own. Records observed after
//! the last stage belong to the last stage.

use chrono::{DateTime, Utc};
use log::debug;

use super::types::{StageEvent, TrafficRecord};

/// Assigns a stage number to every record and returns how many were assigned.
///
/// `stages` may arrive in any order; they are sorted by timestamp first.
/// When there are no stages every record keeps `stage = None`.
pub fn correlate(records: &mut [TrafficRecord], stages: &[StageEvent]) -> usize {
    let mut timeline: Vec<(DateTime<Utc>, u32)> =
        stages.iter().map(|s| (s.timestamp, s.stage)).collect();
    timeline.sort_by_key(|(ts, _)| *ts);

    let Some(&(_, last_stage)) = timeline.last() else {
        debug!("no stages recorded, {} record(s) left unassigned", records.len());
        return 0;
    };

    for record in records.iter_mut() {
        record.stage = Some(stage_for(&timeline, record.timestamp).unwrap_or(last_stage));
    }

    debug!(
        "correlated {} record(s) against {} stage(s)",
        records.len(),
        timeline.len()
    );
    records.len()
}

/// First stage strictly after `at` in a timestamp-sorted timeline.
fn stage_for(timeline: &[(DateTime<Utc>, u32)], at: DateTime<Utc>) -> Option<u32> {
    let idx = timeline.partition_point(|(ts, _)| *ts <= at);
    timeline.get(idx).map(|(_, stage)| *stage)
}
