//! Error taxonomy for the refinement engine and its detectors.
//!
//! Two classes with different blast radius:
//! - [`ConvergeError`] is terminal for a refinement run.
//! - [`DetectorError`] is advisory: the chained detector tries the next
//!   detector, and the engine skips the iteration's check rather than fail.

use thiserror::Error;

/// Terminal failures of a refinement run.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Configuration rejected before any work started.
    #[error("invalid refinement config: {0}")]
    InvalidConfig(String),

    /// Ambient cancellation or timeout fired mid-run.
    #[error("refinement canceled after {completed} completed iterations")]
    Canceled { completed: u32 },

    /// A refinement pass failed. Fatal: there is no valid artifact to
    /// continue from, so the engine never retries.
    #[error("refinement failed at iteration {iteration}: {source}")]
    RefineFailed {
        iteration: u32,
        #[source]
        source: anyhow::Error,
    },
}

/// Advisory failures of a convergence check.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// The AI detector's supervisor call or verdict parse failed.
    #[error("AI convergence check failed: {0}")]
    Ai(#[from] crate::supervisor::SupervisorError),

    /// Every detector in a chain was tried and the last one failed.
    #[error("detector chain exhausted, last detector failed: {source}")]
    ChainExhausted {
        #[source]
        source: Box<DetectorError>,
    },

    /// Anything else a custom detector reports.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
