use std::io;

use thiserror::Error;

/// Errors that can occur while publishing a metric.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The transport failed to send the payload.
    #[error("failed to send metric payload: {0}")]
    Transport(#[from] io::Error),

    /// A metric did not fit in a buffer sized by its own upper bound.
    ///
    /// This can only happen if the encoder's size calculation is wrong, and so it is never an input error.
    #[error("metric for bucket '{bucket}' did not fit in a buffer of {required} bytes sized for it")]
    EncodingInvariant {
        /// Bucket of the metric being encoded.
        bucket: String,

        /// Size of the buffer the metric failed to fit in.
        required: usize,
    },
}

impl PublishError {
    /// Returns `true` if the error points at a defect rather than an environmental failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PublishError::EncodingInvariant { .. })
    }
}

/// What the publisher should do with an error after handing it to the [`ErrorPolicy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorAction {
    /// Drop the error. The publishing call returns `Ok(())`.
    Swallow,

    /// Return the error from the publishing call.
    Propagate,

    /// Panic with the error.
    Abort,
}

impl From<bool> for ErrorAction {
    /// Maps a "was it handled?" answer to an action: `true` swallows, `false` propagates.
    fn from(handled: bool) -> Self {
        if handled {
            ErrorAction::Swallow
        } else {
            ErrorAction::Propagate
        }
    }
}

/// Decides the fate of every error raised while publishing.
///
/// Every failure in the emission path, whether from encoding or from the transport, is routed through a single policy.
/// Any closure of the form `Fn(&PublishError) -> ErrorAction` is a policy.
pub trait ErrorPolicy: Send + Sync {
    /// Handles an error, returning what the publisher should do next.
    fn handle(&self, error: &PublishError) -> ErrorAction;
}

impl<F> ErrorPolicy for F
where
    F: Fn(&PublishError) -> ErrorAction + Send + Sync,
{
    fn handle(&self, error: &PublishError) -> ErrorAction {
        self(error)
    }
}

/// Swallows every error, so instrumentation can never fail the caller.
///
/// This is the default policy.
#[derive(Clone, Copy, Debug, Default)]
pub struct SwallowErrors;

impl ErrorPolicy for SwallowErrors {
    fn handle(&self, _: &PublishError) -> ErrorAction {
        ErrorAction::Swallow
    }
}

/// Propagates every error back to the caller.
#[derive(Clone, Copy, Debug, Default)]
pub struct PropagateErrors;

impl ErrorPolicy for PropagateErrors {
    fn handle(&self, _: &PublishError) -> ErrorAction {
        ErrorAction::Propagate
    }
}

/// Adapts a predicate answering "was this error handled?" into a policy.
pub(crate) struct HandledPredicate<F>(pub(crate) F);

impl<F> ErrorPolicy for HandledPredicate<F>
where
    F: Fn(&PublishError) -> bool + Send + Sync,
{
    fn handle(&self, error: &PublishError) -> ErrorAction {
        ErrorAction::from((self.0)(error))
    }
}
