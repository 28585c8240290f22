use thiserror::Error;

use screen_ops::DisplayId;

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The request named a display the registry does not know.
    #[error("unknown display {0}")]
    UnknownDisplay(DisplayId),

    /// Opacity values must be finite; range is clamped to `[0.0, 1.0]`.
    #[error("opacity must be a finite number, got {0}")]
    InvalidOpacity(f64),

    /// The engine actor has stopped (shutdown or fatal overlay exhaustion).
    #[error("engine stopped")]
    Stopped,
}

/// Convenience alias for engine results.
pub type Result<T> = std::result::Result<T, Error>;
