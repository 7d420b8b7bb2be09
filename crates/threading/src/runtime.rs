use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::access::AccessGate;
use crate::action_kind::ActionKind;
use crate::completion::CompletionHandle;
use crate::dispatch::{Dispatcher, SubmitError, WaitError};
use crate::listener::{LifecycleListener, ListenerId};
use crate::modality::{ModalEntity, ModalityState};

/// The application threading core.
///
/// Owns the access gate and the deferred-task dispatcher, and the dedicated
/// owner thread that drains the queue. Constructed explicitly at process
/// start and passed by shared reference; tests construct isolated instances.
///
/// All deferred work, write actions, and modal scope changes happen on the
/// owner thread; callers off that thread reach it through [`Self::submit`]
/// or [`Self::invoke_and_wait`].
pub struct ThreadingRuntime {
	gate: Arc<AccessGate>,
	dispatcher: Arc<Dispatcher>,
	flusher: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadingRuntime {
	/// Creates the runtime and spawns the owner thread.
	///
	/// Returns once the owner thread is bound, so owner-thread queries are
	/// reliable immediately.
	pub fn new() -> Self {
		let gate = Arc::new(AccessGate::new());
		let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&gate)));

		let ready = Arc::new((Mutex::new(false), Condvar::new()));
		let thread = {
			let gate = Arc::clone(&gate);
			let dispatcher = Arc::clone(&dispatcher);
			let ready = Arc::clone(&ready);
			std::thread::Builder::new()
				.name("quill-flush".into())
				.spawn(move || {
					gate.bind_owner_thread();
					{
						let (lock, signal) = &*ready;
						*lock.lock() = true;
						signal.notify_all();
					}
					dispatcher.flush_loop();
					tracing::debug!("threading.flusher.exit");
				})
				.expect("failed to spawn the quill-flush owner thread")
		};

		let (lock, signal) = &*ready;
		let mut bound = lock.lock();
		while !*bound {
			signal.wait(&mut bound);
		}
		drop(bound);

		Self {
			gate,
			dispatcher,
			flusher: Mutex::new(Some(thread)),
		}
	}

	/// The access gate, for collaborators that only need the lock surface.
	pub fn access(&self) -> &AccessGate {
		&self.gate
	}

	// ── Read/write access ──

	/// See [`AccessGate::run_read_action`].
	pub fn run_read_action<R>(&self, action: impl FnOnce() -> R) -> R {
		self.gate.run_read_action(action)
	}

	/// See [`AccessGate::try_read_action`].
	pub fn try_read_action(&self, action: impl FnOnce()) -> bool {
		self.gate.try_read_action(action)
	}

	/// See [`AccessGate::run_write_action`].
	pub fn run_write_action<R>(&self, kind: ActionKind, action: impl FnOnce() -> R) -> R {
		self.gate.run_write_action(kind, action)
	}

	/// See [`AccessGate::has_active_write_action`].
	pub fn has_active_write_action(&self, kind: ActionKind) -> bool {
		self.gate.has_active_write_action(kind)
	}

	pub fn is_read_access_allowed(&self) -> bool {
		self.gate.is_read_access_allowed()
	}

	pub fn assert_read_access_allowed(&self) {
		self.gate.assert_read_access_allowed();
	}

	pub fn assert_owner_thread(&self) {
		self.gate.assert_owner_thread();
	}

	pub fn is_owner_thread(&self) -> bool {
		self.gate.is_owner_thread()
	}

	/// See [`AccessGate::run_reentrancy_safe`].
	pub fn run_reentrancy_safe<R>(&self, action: impl FnOnce() -> R) -> R {
		self.gate.run_reentrancy_safe(action)
	}

	pub fn add_listener(&self, listener: Arc<dyn LifecycleListener>) -> ListenerId {
		self.gate.add_listener(listener)
	}

	pub fn remove_listener(&self, id: ListenerId) -> bool {
		self.gate.remove_listener(id)
	}

	// ── Deferred execution ──

	/// Queues `action` to run on the owner thread once `modality` permits.
	pub fn submit(&self, action: impl FnOnce() + Send + 'static, modality: ModalityState) -> Result<CompletionHandle, SubmitError> {
		self.dispatcher.submit(action, modality)
	}

	/// Queues `action` with an expiration predicate evaluated at flush time.
	pub fn submit_with_expiry(
		&self,
		action: impl FnOnce() + Send + 'static,
		modality: ModalityState,
		expired: impl Fn() -> bool + Send + 'static,
	) -> Result<CompletionHandle, SubmitError> {
		self.dispatcher.submit_with_expiry(action, modality, expired)
	}

	/// Queues `action` and blocks the calling thread until it has run.
	pub fn invoke_and_wait(&self, action: impl FnOnce() + Send + 'static, modality: ModalityState) -> Result<(), WaitError> {
		self.dispatcher.invoke_and_wait(action, modality)
	}

	// ── Modality ──

	pub fn current_modality(&self) -> ModalityState {
		self.dispatcher.current_modality()
	}

	pub fn none_modality(&self) -> ModalityState {
		ModalityState::none()
	}

	pub fn any_modality(&self) -> ModalityState {
		ModalityState::any()
	}

	/// Enters a modal scope. Owner thread only.
	pub fn enter_modal(&self, entity: ModalEntity) {
		self.dispatcher.enter_modal(entity);
	}

	/// Leaves a modal scope, force-promoting tasks pinned to it. Owner
	/// thread only.
	pub fn leave_modal(&self, entity: &ModalEntity) {
		self.dispatcher.leave_modal(entity);
	}

	pub fn is_in_modal_context(&self) -> bool {
		self.dispatcher.is_in_modal_context()
	}

	// ── Observability ──

	pub fn pending_count(&self) -> usize {
		self.dispatcher.pending_count()
	}

	pub fn submitted_total(&self) -> u64 {
		self.dispatcher.submitted_total()
	}

	pub fn run_total(&self) -> u64 {
		self.dispatcher.run_total()
	}

	pub fn expired_total(&self) -> u64 {
		self.dispatcher.expired_total()
	}

	// ── Lifecycle ──

	/// Shuts the runtime down: fires the exiting notification, stops the
	/// flush loop, abandons queued tasks, and joins the owner thread.
	///
	/// Idempotent. When called from the owner thread itself the join is
	/// skipped; the flusher exits after the current task returns.
	pub fn shutdown(&self) {
		if !self.gate.mark_exiting() {
			return;
		}
		self.gate.fire_exiting();
		self.dispatcher.shutdown();
		if let Some(handle) = self.flusher.lock().take()
			&& !self.gate.is_owner_thread()
		{
			let _ = handle.join();
		}
	}
}

impl Default for ThreadingRuntime {
	fn default() -> Self {
		Self::new()
	}
}

impl Drop for ThreadingRuntime {
	fn drop(&mut self) {
		self.shutdown();
	}
}

impl std::fmt::Debug for ThreadingRuntime {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ThreadingRuntime")
			.field("gate", &self.gate)
			.field("pending", &self.pending_count())
			.finish()
	}
}
