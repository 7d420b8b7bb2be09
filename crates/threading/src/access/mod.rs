use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::action_kind::ActionKind;
use crate::diagnostics;
use crate::listener::{LifecycleListener, ListenerId, ListenerRegistry};
use crate::status;

/// Reentrant multi-reader/single-writer gate over the application state.
///
/// Readers run on any thread and never block one another; the single writer
/// only ever runs on the owner thread. The owner thread is implicitly
/// read-capable and never touches the lock on the read path, and a thread
/// already holding read access re-enters inline rather than re-acquiring —
/// the short-circuit that keeps a reentrant read from deadlocking against a
/// writer waiting for that same thread.
pub struct AccessGate {
	lock: RwLock<()>,
	/// Identities of write actions currently on the owner thread's call
	/// stack, outermost first. Mutated only on the owner thread.
	write_stack: Mutex<Vec<ActionKind>>,
	/// Advisory: a writer was requested but may not hold the lock yet.
	write_pending: AtomicBool,
	/// Set once shutdown begins; owner-thread assertions are waived past it.
	exiting: AtomicBool,
	listeners: ListenerRegistry,
	owner: OnceLock<ThreadId>,
}

impl AccessGate {
	pub(crate) fn new() -> Self {
		Self {
			lock: RwLock::new(()),
			write_stack: Mutex::new(Vec::new()),
			write_pending: AtomicBool::new(false),
			exiting: AtomicBool::new(false),
			listeners: ListenerRegistry::new(),
			owner: OnceLock::new(),
		}
	}

	/// Binds the calling thread as the owner thread. Called exactly once,
	/// from the flusher thread, before the runtime constructor returns.
	pub(crate) fn bind_owner_thread(&self) {
		let id = std::thread::current().id();
		if self.owner.set(id).is_err() {
			diagnostics::contract_violation("owner thread is already bound");
		}
		status::with(status::ThreadStatus::mark_owner);
		tracing::debug!(thread.id = ?id, "threading.owner.bound");
	}

	/// Returns whether the calling thread is the owner thread.
	pub fn is_owner_thread(&self) -> bool {
		// Threads that never marked themselves can skip the id compare.
		if !status::with(status::ThreadStatus::is_owner) {
			return false;
		}
		self.owner.get().copied() == Some(std::thread::current().id())
	}

	/// Returns whether the calling thread may touch guarded state: it is the
	/// owner thread or currently holds the read lock.
	pub fn is_read_access_allowed(&self) -> bool {
		self.is_owner_thread() || status::with(|s| s.read_depth() > 0)
	}

	/// Fatal diagnostic if the calling thread has no read access.
	pub fn assert_read_access_allowed(&self) {
		if !self.is_read_access_allowed() {
			diagnostics::contract_violation("read access is not allowed on this thread; wrap the call in run_read_action");
		}
	}

	/// Fatal diagnostic if the calling thread is not the owner thread.
	///
	/// Waived inside a `run_reentrancy_safe` scope and during shutdown.
	pub fn assert_owner_thread(&self) {
		if self.is_owner_thread() {
			return;
		}
		if status::with(|s| s.safe_depth() > 0) {
			return;
		}
		if self.exiting.load(Ordering::Acquire) {
			return;
		}
		diagnostics::contract_violation("owner thread required");
	}

	/// Runs `action` with read access, blocking until the read lock is
	/// available when the thread does not already hold access.
	///
	/// Reentrant: the owner thread and threads already inside a read action
	/// run inline with no additional locking. The lock is released even when
	/// `action` unwinds.
	pub fn run_read_action<R>(&self, action: impl FnOnce() -> R) -> R {
		if self.is_read_access_allowed() {
			return action();
		}
		let _scope = ReadScope::enter(self.lock.read_recursive());
		action()
	}

	/// Non-blocking variant of [`Self::run_read_action`]: returns false
	/// without running `action` when the lock is unavailable right now.
	pub fn try_read_action(&self, action: impl FnOnce()) -> bool {
		if self.is_read_access_allowed() {
			action();
			return true;
		}
		let Some(guard) = self.lock.try_read_recursive() else {
			return false;
		};
		let _scope = ReadScope::enter(guard);
		action();
		true
	}

	/// Runs `action` as the exclusive writer. Owner thread only.
	///
	/// Blocks until every reader drains, then runs `action` with its identity
	/// on the write-action stack. Nested calls on the owner thread run inline
	/// under the already-held lock. Listener notifications fire at every
	/// nesting depth.
	pub fn run_write_action<R>(&self, kind: ActionKind, action: impl FnOnce() -> R) -> R {
		self.assert_owner_thread();
		self.listeners.notify(|l| l.before_write_start(kind));

		let nested = !self.write_stack.lock().is_empty();
		let guard = if nested {
			None
		} else {
			self.write_pending.store(true, Ordering::Release);
			let guard = self.lock.write();
			self.write_pending.store(false, Ordering::Release);
			Some(guard)
		};
		self.write_stack.lock().push(kind);
		tracing::trace!(kind = kind.name(), nested, "threading.write.start");

		let _scope = WriteScope {
			gate: self,
			kind,
			_guard: guard,
		};
		self.listeners.notify(|l| l.write_started(kind));
		action()
	}

	/// Owner-thread-only query: is a write action of `kind` (or any sub-kind
	/// of it) currently on the stack?
	pub fn has_active_write_action(&self, kind: ActionKind) -> bool {
		self.assert_owner_thread();
		self.write_stack.lock().iter().rev().any(|active| active.is_kind_of(kind))
	}

	/// Returns whether any write action is currently running.
	pub fn is_write_action_in_progress(&self) -> bool {
		!self.write_stack.lock().is_empty()
	}

	/// Advisory: a writer has been requested but may not hold the lock yet.
	/// Best-effort diagnostic signal, never a correctness gate.
	pub fn is_write_action_pending(&self) -> bool {
		self.write_pending.load(Ordering::Acquire)
	}

	/// Runs `action` with owner-thread assertions waived on this thread.
	///
	/// For internal re-entrant calls that are provably safe off the owner
	/// thread. The counter is restored even when `action` unwinds.
	pub fn run_reentrancy_safe<R>(&self, action: impl FnOnce() -> R) -> R {
		status::with(status::ThreadStatus::enter_safe);
		let _scope = SafeScope;
		action()
	}

	/// Registers a lifecycle listener; notifications run in registration order.
	pub fn add_listener(&self, listener: Arc<dyn LifecycleListener>) -> ListenerId {
		self.listeners.add(listener)
	}

	/// Removes a previously registered listener.
	pub fn remove_listener(&self, id: ListenerId) -> bool {
		self.listeners.remove(id)
	}

	/// Flips into the shutting-down state. Returns false when already set.
	pub(crate) fn mark_exiting(&self) -> bool {
		!self.exiting.swap(true, Ordering::AcqRel)
	}

	pub(crate) fn is_exiting(&self) -> bool {
		self.exiting.load(Ordering::Acquire)
	}

	pub(crate) fn fire_exiting(&self) {
		self.listeners.notify(|l| l.exiting());
	}
}

impl std::fmt::Debug for AccessGate {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AccessGate")
			.field("owner", &self.owner.get())
			.field("write_depth", &self.write_stack.lock().len())
			.field("write_pending", &self.is_write_action_pending())
			.field("exiting", &self.is_exiting())
			.finish()
	}
}

/// Holds the shared lock plus the thread-local read depth for one outermost
/// read action; both are released on drop, panic included.
struct ReadScope<'a> {
	_guard: RwLockReadGuard<'a, ()>,
}

impl<'a> ReadScope<'a> {
	fn enter(guard: RwLockReadGuard<'a, ()>) -> Self {
		status::with(status::ThreadStatus::enter_read);
		Self { _guard: guard }
	}
}

impl Drop for ReadScope<'_> {
	fn drop(&mut self) {
		status::with(status::ThreadStatus::exit_read);
	}
}

/// Pops the write-action stack and fires the finished notification on drop,
/// then releases the exclusive lock (outermost level only).
struct WriteScope<'a> {
	gate: &'a AccessGate,
	kind: ActionKind,
	_guard: Option<RwLockWriteGuard<'a, ()>>,
}

impl Drop for WriteScope<'_> {
	fn drop(&mut self) {
		self.gate.listeners.notify(|l| l.write_finished(self.kind));
		let popped = self.gate.write_stack.lock().pop();
		debug_assert!(popped.is_some(), "write stack underflow");
		tracing::trace!(kind = self.kind.name(), "threading.write.finish");
	}
}

struct SafeScope;

impl Drop for SafeScope {
	fn drop(&mut self) {
		status::with(status::ThreadStatus::exit_safe);
	}
}
