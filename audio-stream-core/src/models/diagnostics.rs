/// Counters describing device traffic through one adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterDiagnostics {
    pub reads_issued: u64,
    pub reads_completed: u64,
    pub reads_dropped: u64,
    pub bytes_delivered: u64,
    pub writes_issued: u64,
    pub writes_completed: u64,
    pub writes_failed: u64,
    pub bytes_written: u64,
}
