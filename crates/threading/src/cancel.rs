use std::any::Any;
use std::panic;

/// Control-flow payload for cooperative cancellation.
///
/// A running task raises this to signal that whoever requested the work gave
/// up on it. The flush loop recognizes the payload and suppresses it instead
/// of reporting a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canceled;

/// Unwinds the current task with the cancellation signal.
pub fn cancel_current() -> ! {
	panic::panic_any(Canceled)
}

/// Returns whether an unwind payload is the cancellation signal.
pub(crate) fn is_cancellation(payload: &(dyn Any + Send)) -> bool {
	payload.is::<Canceled>()
}

/// Best-effort text for an unwind payload, for logging.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		msg
	} else if let Some(msg) = payload.downcast_ref::<String>() {
		msg
	} else {
		"<non-string panic payload>"
	}
}
