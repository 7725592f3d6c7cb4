use stitch_timeline::TimelineError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("no track handles attached")]
    Detached,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("failed to load {role} media `{url}`: {reason}")]
    LoadFailure {
        role: &'static str,
        url: String,
        reason: String,
    },

    #[error("operation timed out: {reason}")]
    Timeout { reason: String },

    #[error("bandwidth probe failed: {reason}")]
    ProbeFailed { reason: String },

    #[error("quality switch to {tier} failed: {reason}")]
    QualitySwitchFailed { tier: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("timeline error: {source}")]
    Timeline {
        #[from]
        source: TimelineError,
    },

    #[error("no playable segment in the composition")]
    NoPlayableSegment,

    #[error("invalid segment descriptor: {reason}")]
    InvalidDescriptor { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl EngineError {
    pub fn load_failure(
        role: &'static str,
        url: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::LoadFailure {
            role,
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::Timeout {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Recoverable faults degrade (skip a track, fall back, revert a switch)
    /// and never abort the session. Only the total absence of any playable
    /// segment is fatal to the hosting application.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NoPlayableSegment => false,
            Self::Timeline {
                source: TimelineError::EmptyTimeline,
            } => false,
            Self::Cancelled
            | Self::Detached
            | Self::InvalidUrl { .. }
            | Self::LoadFailure { .. }
            | Self::Timeout { .. }
            | Self::ProbeFailed { .. }
            | Self::QualitySwitchFailed { .. }
            | Self::Network { .. }
            | Self::Timeline { .. }
            | Self::InvalidDescriptor { .. }
            | Self::Internal { .. } => true,
        }
    }
}
