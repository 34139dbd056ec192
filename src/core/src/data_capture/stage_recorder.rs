use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedSender;

use super::types::StageEvent;

#[derive(Debug, Default)]
struct RecorderState {
    armed: bool,
    last_line: Option<String>,
    events: Vec<StageEvent>,
}

/// Turns external capture triggers into numbered [`StageEvent`]s.
///
/// Repeated polling of an unchanged console produces the same snapshot over
/// and over; a trigger whose trimmed text equals the last accepted one is
/// dropped, as is any blank snapshot. Accepted events are kept in order and
/// forwarded to the subscriber channel when one is attached.
#[derive(Debug, Default)]
pub struct StageRecorder {
    state: Mutex<RecorderState>,
    subscriber: Mutex<Option<UnboundedSender<StageEvent>>>,
}

impl StageRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the channel that receives every accepted stage.
    pub fn subscribe(&self, tx: UnboundedSender<StageEvent>) {
        *self.subscriber.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
    }

    /// Starts accepting triggers.
    pub fn arm(&self) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).armed = true;
        debug!("stage recorder armed");
    }

    /// Stops accepting triggers; recorded events are kept.
    pub fn disarm(&self) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).armed = false;
        debug!("stage recorder disarmed");
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).armed
    }

    /// Forgets all events and the last seen line, leaving the recorder disarmed.
    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = RecorderState::default();
    }

    /// Records a stage for `raw_line` unless it is blank or repeats the last one.
    pub fn on_trigger(
        &self,
        raw_line: &str,
        server_output: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<StageEvent> {
        let line = raw_line.trim();

        let event = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.armed {
                debug!("trigger ignored: recorder not armed");
                return None;
            }
            if line.is_empty() {
                debug!("trigger ignored: empty snapshot");
                return None;
            }
            if state.last_line.as_deref() == Some(line) {
                debug!("trigger ignored: snapshot unchanged");
                return None;
            }

            let event = StageEvent {
                stage: state.events.len() as u32 + 1,
                timestamp,
                raw_line: line.to_string(),
                server_output: server_output.to_string(),
            };
            state.last_line = Some(line.to_string());
            state.events.push(event.clone());
            event
        };

        info!(
            "Stage {} captured at {}",
            event.stage,
            event.timestamp.format("%H:%M:%S%.3f")
        );

        if let Some(tx) = self.subscriber.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            if tx.send(event.clone()).is_err() {
                warn!("stage subscriber dropped, stage {} not forwarded", event.stage);
            }
        }

        Some(event)
    }

    pub fn get_all(&self) -> Vec<StageEvent> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .events
            .clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tokio::sync::mpsc;

    fn armed() -> StageRecorder {
        let r = StageRecorder::new();
        r.arm();
        r
    }

    #[test]
    fn repeated_line_is_suppressed() {
        let rec = armed();
        let t1 = Utc::now();
        let t2 = t1 + Duration::milliseconds(10);
        let t3 = t2 + Duration::milliseconds(10);

        assert!(rec.on_trigger("go", "", t1).is_some());
        assert!(rec.on_trigger("go", "", t2).is_none());
        assert!(rec.on_trigger("stop", "", t3).is_some());

        let all = rec.get_all();
        assert_eq!(all.len(), 2);
        assert_eq!((all[0].stage, all[0].timestamp), (1, t1));
        assert_eq!((all[1].stage, all[1].timestamp), (2, t3));
    }

    #[test]
    fn comparison_is_made_after_trimming() {
        let rec = armed();
        rec.on_trigger("menu> ", "", Utc::now());
        assert!(rec.on_trigger("  menu>\r\n", "", Utc::now()).is_none());
        assert_eq!(rec.len(), 1);
    }

    #[test]
    fn blank_input_is_ignored() {
        let rec = armed();
        assert!(rec.on_trigger("", "", Utc::now()).is_none());
        assert!(rec.on_trigger(" \t\n", "", Utc::now()).is_none());
        assert!(rec.is_empty());
    }

    #[test]
    fn same_line_is_accepted_again_after_a_different_one() {
        let rec = armed();
        rec.on_trigger("a", "", Utc::now());
        rec.on_trigger("b", "", Utc::now());
        let third = rec.on_trigger("a", "", Utc::now()).unwrap();
        assert_eq!(third.stage, 3);
    }

    #[test]
    fn disarmed_recorder_ignores_triggers() {
        let rec = StageRecorder::new();
        assert!(rec.on_trigger("go", "", Utc::now()).is_none());
        rec.arm();
        rec.on_trigger("go", "", Utc::now());
        rec.disarm();
        assert!(rec.on_trigger("later", "", Utc::now()).is_none());
        assert_eq!(rec.len(), 1);
    }

    #[test]
    fn reset_clears_events_and_last_line() {
        let rec = armed();
        rec.on_trigger("go", "", Utc::now());
        rec.reset();
        assert!(rec.is_empty());
        assert!(!rec.is_armed());
        rec.arm();
        assert_eq!(rec.on_trigger("go", "", Utc::now()).unwrap().stage, 1);
    }

    #[test]
    fn accepted_stages_are_published() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let rec = armed();
        rec.subscribe(tx);

        rec.on_trigger("first", "server says hi", Utc::now());
        rec.on_trigger("first", "", Utc::now());

        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.stage, 1);
        assert_eq!(ev.server_output, "server says hi");
        assert!(rx.try_recv().is_err());
    }
}
