#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    #[error("timeline has no playable segments")]
    EmptyTimeline,

    #[error("segment index {index} out of range ({len} segments)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid duration {value} for segment {index}")]
    InvalidDuration { index: usize, value: f64 },
}
