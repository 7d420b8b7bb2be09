use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::access::AccessGate;
use crate::cancel;
use crate::completion::CompletionHandle;
use crate::diagnostics;
use crate::modality::{ModalEntity, ModalityState};
use crate::queue::{DeferredTask, ExpiryFn, FlushQueue, TaskFn};

/// Error submitting a deferred task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
	/// The runtime is shut down; no further tasks are accepted.
	#[error("threading runtime is shut down")]
	ShutDown,
}

/// Error waiting for a submitted task to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
	/// The runtime shut down before the task ran.
	#[error("threading runtime shut down before the task ran")]
	Abandoned,
}

struct DispatchState {
	queue: FlushQueue,
	/// Live stack of entered modal entities. Mutated only on the owner thread.
	modal_stack: Vec<ModalEntity>,
	/// Snapshot of `modal_stack`, recomputed on every enter/leave.
	current: ModalityState,
	shutdown: bool,
	submitted_total: u64,
	run_total: u64,
	next_seq: u64,
}

/// Deferred-task dispatcher: accepts submissions from any thread and drains
/// them one at a time on the owner thread under the modality discipline.
pub(crate) struct Dispatcher {
	state: Mutex<DispatchState>,
	work: Condvar,
	gate: Arc<AccessGate>,
}

impl Dispatcher {
	pub fn new(gate: Arc<AccessGate>) -> Self {
		Self {
			state: Mutex::new(DispatchState {
				queue: FlushQueue::new(),
				modal_stack: Vec::new(),
				current: ModalityState::none(),
				shutdown: false,
				submitted_total: 0,
				run_total: 0,
				next_seq: 0,
			}),
			work: Condvar::new(),
			gate,
		}
	}

	/// Appends a task to the queue. Never blocks.
	pub fn submit(&self, action: impl FnOnce() + Send + 'static, modality: ModalityState) -> Result<CompletionHandle, SubmitError> {
		self.submit_task(Box::new(action), modality, None)
	}

	/// Appends a task whose `expired` predicate is re-evaluated at flush
	/// time; an expired task completes without running.
	pub fn submit_with_expiry(
		&self,
		action: impl FnOnce() + Send + 'static,
		modality: ModalityState,
		expired: impl Fn() -> bool + Send + 'static,
	) -> Result<CompletionHandle, SubmitError> {
		self.submit_task(Box::new(action), modality, Some(Box::new(expired)))
	}

	fn submit_task(&self, action: TaskFn, modality: ModalityState, expiry: Option<ExpiryFn>) -> Result<CompletionHandle, SubmitError> {
		let handle = CompletionHandle::new();
		let mut state = self.state.lock();
		if state.shutdown {
			return Err(SubmitError::ShutDown);
		}
		let seq = state.next_seq;
		state.next_seq += 1;
		state.submitted_total += 1;
		state.queue.push(DeferredTask {
			action,
			modality,
			expiry,
			handle: handle.clone(),
			seq,
		});
		let pending = state.queue.len();
		drop(state);

		tracing::trace!(seq, pending, "threading.submit");
		self.work.notify_one();
		Ok(handle)
	}

	/// Submits `action` and blocks until it has run.
	///
	/// On the owner thread the action runs inline instead of deadlocking
	/// against the caller's own flush turn.
	pub fn invoke_and_wait(&self, action: impl FnOnce() + Send + 'static, modality: ModalityState) -> Result<(), WaitError> {
		if self.gate.is_owner_thread() {
			action();
			return Ok(());
		}
		let handle = self.submit(action, modality).map_err(|_| WaitError::Abandoned)?;
		if handle.wait_done() { Ok(()) } else { Err(WaitError::Abandoned) }
	}

	/// Enters a modal scope. Owner thread only.
	pub fn enter_modal(&self, entity: ModalEntity) {
		self.gate.assert_owner_thread();
		let mut state = self.state.lock();
		state.modal_stack.push(entity.clone());
		state.current = ModalityState::from_entities(&state.modal_stack);
		// Dominance of every pending task may have changed.
		state.queue.reset_cursor();
		let depth = state.modal_stack.len();
		drop(state);

		tracing::debug!(entity = entity.label(), depth, "threading.modal.enter");
		self.work.notify_one();
	}

	/// Leaves a modal scope. Owner thread only.
	///
	/// Tasks pinned to the leaving entity move to the forced sub-queue: they
	/// were waiting specifically on this scope and run ahead of ordinary
	/// queued work now that it has closed.
	pub fn leave_modal(&self, entity: &ModalEntity) {
		self.gate.assert_owner_thread();
		let mut state = self.state.lock();
		let Some(position) = state.modal_stack.iter().rposition(|e| e.same_as(entity)) else {
			drop(state);
			diagnostics::contract_violation("leave_modal: entity is not in the modal stack");
		};
		state.modal_stack.remove(position);
		state.current = ModalityState::from_entities(&state.modal_stack);
		let forced = state.queue.evict_for_entity(entity);
		let depth = state.modal_stack.len();
		drop(state);

		tracing::debug!(entity = entity.label(), depth, forced, "threading.modal.leave");
		self.work.notify_one();
	}

	/// Modality snapshot of the live modal stack.
	pub fn current_modality(&self) -> ModalityState {
		self.state.lock().current.clone()
	}

	pub fn is_in_modal_context(&self) -> bool {
		!self.state.lock().modal_stack.is_empty()
	}

	pub fn pending_count(&self) -> usize {
		self.state.lock().queue.len()
	}

	pub fn submitted_total(&self) -> u64 {
		self.state.lock().submitted_total
	}

	pub fn run_total(&self) -> u64 {
		self.state.lock().run_total
	}

	pub fn expired_total(&self) -> u64 {
		self.state.lock().queue.expired_total()
	}

	/// Stops the flush loop and abandons everything still queued. Pending
	/// completion handles wake with the abandoned outcome.
	pub fn shutdown(&self) {
		let abandoned = {
			let mut state = self.state.lock();
			if state.shutdown {
				return;
			}
			state.shutdown = true;
			state.queue.take_all()
		};
		self.work.notify_all();

		let dropped = abandoned.len();
		for task in abandoned {
			task.handle.abandon();
		}
		tracing::debug!(dropped, "threading.dispatch.shutdown");
	}

	/// Cooperative flush loop; runs on the owner thread until shutdown.
	///
	/// One task per iteration: pop the next eligible task, run it outside the
	/// state lock, repeat. Parks on the condvar when nothing is eligible.
	pub fn flush_loop(&self) {
		loop {
			let task = {
				let mut state = self.state.lock();
				loop {
					if state.shutdown {
						return;
					}
					let live = state.current.clone();
					if let Some(task) = state.queue.pop_next(&live) {
						state.run_total += 1;
						break task;
					}
					self.work.wait(&mut state);
				}
			};
			self.run_task(task);
		}
	}

	/// Runs one flushed task, containing unwinds so the loop survives.
	fn run_task(&self, task: DeferredTask) {
		let seq = task.seq;
		tracing::trace!(seq, "threading.flush.run");
		match catch_unwind(AssertUnwindSafe(task.action)) {
			Ok(()) => {}
			Err(payload) if cancel::is_cancellation(payload.as_ref()) => {
				tracing::debug!(seq, "threading.flush.canceled");
			}
			Err(payload) => {
				tracing::error!(seq, message = cancel::panic_message(payload.as_ref()), "deferred task panicked");
			}
		}
		task.handle.complete();
	}
}
