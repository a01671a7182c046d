use crate::Error;

/// Receives errors the decisioning engine recovered from.
///
/// Artifact download failures, unsupported rule set versions and rule evaluation failures are
/// never returned from the evaluation path. They are logged and handed to the handler configured
/// with [`ClientConfig::exception_handler`](crate::ClientConfig::exception_handler).
pub trait ExceptionHandler {
    /// Handle a recovered error.
    fn handle_exception(&self, error: &Error);
}

pub(crate) struct NoopExceptionHandler;
impl ExceptionHandler for NoopExceptionHandler {
    fn handle_exception(&self, _error: &Error) {}
}

impl<T: Fn(&Error)> ExceptionHandler for T {
    fn handle_exception(&self, error: &Error) {
        self(error);
    }
}
