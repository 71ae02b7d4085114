use thiserror::Error;

/// Whether a failure comes from the request or from a bug in curve construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCause {
    User,
    Internal,
}

/// Failures raised while building or querying envelopes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvelopeError {
    #[error("an envelope needs at least one part")]
    EmptyEnvelope,

    /// A part was built from inconsistent samples.
    #[error("invalid envelope part: {0}")]
    InvalidPart(&'static str),

    #[error("envelope parts are not contiguous: part ends at {end}, next begins at {begin}")]
    PartsNotContiguous { end: f64, begin: f64 },

    #[error("speed discontinuity at position {position}")]
    Discontinuity { position: f64 },

    /// The envelope constraint cursor lags behind the step being checked.
    #[error("envelope constraint cursor out of sync: step starts at {step_start}, cursor at {cursor}")]
    CursorOutOfSync { step_start: f64, cursor: f64 },

    #[error("constraint used before initialization")]
    ConstraintNotInitialized,

    #[error("position {0} is outside of the envelope")]
    PositionOutOfRange(f64),

    /// Max effort can't get the train moving.
    #[error("train stalled at position {position}")]
    TrainStalled { position: f64 },

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
}

impl EnvelopeError {
    pub fn cause(&self) -> ErrorCause {
        match self {
            EnvelopeError::InvalidParameter(_) => ErrorCause::User,
            _ => ErrorCause::Internal,
        }
    }
}

/// Failures raised while distributing an allowance over an envelope.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AllowanceError {
    /// The search input space is not continuous around the target.
    #[error("allowance convergence failed: discontinuity in the search space")]
    Discontinuity,

    /// Even the slowest feasible running time is shorter than requested.
    #[error("allowance convergence failed: too much time requested")]
    TooMuchTime,

    /// Even the fastest feasible running time is longer than requested.
    #[error("allowance convergence failed: not enough time")]
    NotEnoughTime,

    #[error("allowance range {begin}..{end} is out of bounds")]
    RangeOutOfBounds { begin: f64, end: f64 },

    #[error("allowance bounds {begin}..{end} fall outside of the envelope")]
    OutOfBounds { begin: f64, end: f64 },

    #[error("invalid allowance value: {0}")]
    InvalidValue(&'static str),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

impl AllowanceError {
    pub fn cause(&self) -> ErrorCause {
        match self {
            AllowanceError::TooMuchTime
            | AllowanceError::RangeOutOfBounds { .. }
            | AllowanceError::OutOfBounds { .. }
            | AllowanceError::InvalidValue(_) => ErrorCause::User,
            AllowanceError::Discontinuity | AllowanceError::NotEnoughTime => ErrorCause::Internal,
            AllowanceError::Envelope(err) => err.cause(),
        }
    }
}
