//! Traffic and stage capture for one grading session.
//!
//! - [`LogSink`]: the ordered, shared log every proxy task appends to.
//! - [`StageRecorder`]: deduplicates console snapshots into numbered stages.
//! - [`correlation`]: attaches a stage number to each record once the session stops.

pub mod correlation;
pub mod log_sink;
pub mod stage_recorder;
pub mod types;

pub use log_sink::LogSink;
pub use stage_recorder::StageRecorder;
pub use types::{Direction, StageEvent, TrafficRecord};
