/// The lifecycle of a pipeline, checked at every blocking point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// A stop was requested, blocked waits return and the producer winds down.
    Stopping,
    /// The producer thread exited.
    Stopped,
}

impl RunState {
    #[inline]
    pub fn is_running(self) -> bool {
        self == RunState::Running
    }
}

/// What the producer thread is doing with the current range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PipelineState {
    #[default]
    Idle,
    RangeSelected,
    FetchingRange,
    Parsing,
    Published,
}
