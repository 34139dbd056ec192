/// Source of console text for a running process.
///
/// Implementations scrape whatever the platform offers (a console buffer, a
/// pty, a log file). Failures are reported as an empty string.
pub trait SnapshotProvider: Send + Sync {
    fn capture(&self, pid: u32) -> String;
}

/// Provider used when no console scraping is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSnapshotProvider;

impl SnapshotProvider for NullSnapshotProvider {
    fn capture(&self, _pid: u32) -> String {
        String::new()
    }
}
