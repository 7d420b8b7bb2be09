use std::backtrace::Backtrace;

/// Reports a programmer-error contract violation and unwinds.
///
/// Violations (wrong thread, read access outside any lock) are not
/// recoverable at runtime; the event is logged with the offending thread's
/// identity and a captured backtrace, then the thread panics.
pub(crate) fn contract_violation(what: &str) -> ! {
	let thread = std::thread::current();
	let backtrace = Backtrace::force_capture();
	tracing::error!(
		thread.name = thread.name().unwrap_or("<unnamed>"),
		thread.id = ?thread.id(),
		%backtrace,
		"{what}"
	);
	panic!("{what}");
}
