use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Terminal state of one deferred task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
	/// Still queued (or currently running).
	Pending,
	/// Left the queue: ran to completion or expired without running.
	Done,
	/// Dropped at shutdown without running.
	Abandoned,
}

struct HandleInner {
	state: Mutex<HandleState>,
	signal: Condvar,
}

/// Handle observing completion of one deferred task.
///
/// Completion only means the task left the queue — it ran, expired, or was
/// dropped at shutdown. Whether the body succeeded is not reported.
#[derive(Clone)]
pub struct CompletionHandle {
	inner: Arc<HandleInner>,
}

impl CompletionHandle {
	pub(crate) fn new() -> Self {
		Self {
			inner: Arc::new(HandleInner {
				state: Mutex::new(HandleState::Pending),
				signal: Condvar::new(),
			}),
		}
	}

	/// Returns whether the task has completed (ran or expired).
	pub fn is_done(&self) -> bool {
		*self.inner.state.lock() == HandleState::Done
	}

	/// Blocks until the task completes or is abandoned at shutdown.
	pub fn wait(&self) {
		let _ = self.wait_done();
	}

	/// Blocks up to `timeout`. Returns true when the task settled in time.
	pub fn wait_timeout(&self, timeout: Duration) -> bool {
		let deadline = Instant::now() + timeout;
		let mut state = self.inner.state.lock();
		while *state == HandleState::Pending {
			if self.inner.signal.wait_until(&mut state, deadline).timed_out() {
				return *state != HandleState::Pending;
			}
		}
		true
	}

	/// Blocks until settled; true when the task completed, false when it was
	/// abandoned at shutdown.
	pub(crate) fn wait_done(&self) -> bool {
		let mut state = self.inner.state.lock();
		while *state == HandleState::Pending {
			self.inner.signal.wait(&mut state);
		}
		*state == HandleState::Done
	}

	pub(crate) fn complete(&self) {
		self.settle(HandleState::Done);
	}

	pub(crate) fn abandon(&self) {
		self.settle(HandleState::Abandoned);
	}

	fn settle(&self, next: HandleState) {
		let mut state = self.inner.state.lock();
		// Settles exactly once; late abandon must not demote a done task.
		if *state == HandleState::Pending {
			*state = next;
		}
		drop(state);
		self.inner.signal.notify_all();
	}
}

impl std::fmt::Debug for CompletionHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_tuple("CompletionHandle").field(&*self.inner.state.lock()).finish()
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[test]
	fn completes_exactly_once() {
		let handle = CompletionHandle::new();
		assert!(!handle.is_done());
		handle.complete();
		assert!(handle.is_done());
		handle.abandon();
		assert!(handle.is_done(), "late abandon must not demote a done handle");
	}

	#[test]
	fn wait_unblocks_on_complete() {
		let handle = CompletionHandle::new();
		let waiter = {
			let handle = handle.clone();
			std::thread::spawn(move || handle.wait_done())
		};
		std::thread::sleep(Duration::from_millis(20));
		handle.complete();
		assert!(waiter.join().unwrap());
	}

	#[test]
	fn wait_timeout_expires_on_pending() {
		let handle = CompletionHandle::new();
		assert!(!handle.wait_timeout(Duration::from_millis(20)));
		handle.abandon();
		assert!(handle.wait_timeout(Duration::from_millis(20)));
		assert!(!handle.is_done());
	}
}
