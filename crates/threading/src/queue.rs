use std::collections::VecDeque;

use crate::completion::CompletionHandle;
use crate::modality::{ModalEntity, ModalityState};

pub(crate) type TaskFn = Box<dyn FnOnce() + Send + 'static>;
pub(crate) type ExpiryFn = Box<dyn Fn() -> bool + Send + 'static>;

/// One deferred unit of work tagged with the modality it was submitted under.
pub(crate) struct DeferredTask {
	pub action: TaskFn,
	pub modality: ModalityState,
	/// Re-evaluated at flush time, never captured at submission.
	pub expiry: Option<ExpiryFn>,
	pub handle: CompletionHandle,
	pub seq: u64,
}

impl DeferredTask {
	fn is_expired(&self) -> bool {
		self.expiry.as_ref().is_some_and(|expired| expired())
	}
}

/// Deferred-task store: a FIFO main queue gated by modality dominance plus a
/// forced sub-queue that runs ahead of everything once populated.
///
/// The skip cursor remembers how much of the main queue's prefix is known
/// ineligible under the current modality so repeated flushes do not rescan
/// it. It resets on every modal enter/leave, and it is an optimization only:
/// popping with a naive full rescan selects the same tasks in the same order.
pub(crate) struct FlushQueue {
	main: VecDeque<DeferredTask>,
	forced: VecDeque<DeferredTask>,
	cursor: usize,
	use_cursor: bool,
	expired_total: u64,
}

impl FlushQueue {
	pub fn new() -> Self {
		Self {
			main: VecDeque::new(),
			forced: VecDeque::new(),
			cursor: 0,
			use_cursor: true,
			expired_total: 0,
		}
	}

	/// Queue that rescans from the head on every pop. Test-only reference
	/// behavior for the cursor equivalence checks.
	#[cfg(test)]
	pub fn new_naive() -> Self {
		Self {
			use_cursor: false,
			..Self::new()
		}
	}

	pub fn push(&mut self, task: DeferredTask) {
		self.main.push_back(task);
	}

	pub fn len(&self) -> usize {
		self.main.len() + self.forced.len()
	}

	pub fn is_empty(&self) -> bool {
		self.main.is_empty() && self.forced.is_empty()
	}

	pub fn expired_total(&self) -> u64 {
		self.expired_total
	}

	/// Invalidates the known-ineligible prefix. Must be called whenever the
	/// live modality changes.
	pub fn reset_cursor(&mut self) {
		self.cursor = 0;
	}

	/// Pops the next task to run under the live modality.
	///
	/// Forced tasks run first, regardless of modality and submission order
	/// relative to the main queue. Tasks found expired are completed without
	/// running and never returned.
	pub fn pop_next(&mut self, live: &ModalityState) -> Option<DeferredTask> {
		while let Some(task) = self.forced.pop_front() {
			if task.is_expired() {
				self.retire_expired(task);
				continue;
			}
			return Some(task);
		}

		let mut index = if self.use_cursor { self.cursor.min(self.main.len()) } else { 0 };
		while index < self.main.len() {
			if self.main[index].is_expired() {
				let task = self.main.remove(index).expect("index in bounds");
				self.retire_expired(task);
				continue;
			}
			if live.permits(&self.main[index].modality) {
				return self.main.remove(index);
			}
			index += 1;
			if self.use_cursor {
				self.cursor = index;
			}
		}
		None
	}

	/// Moves every pending task whose modality contains `entity` into the
	/// forced sub-queue, preserving their relative order. Called when that
	/// entity's scope closes: such tasks were waiting specifically on it and
	/// must run promptly, ahead of ordinary dominance-ordered work.
	pub fn evict_for_entity(&mut self, entity: &ModalEntity) -> usize {
		let mut kept = VecDeque::with_capacity(self.main.len());
		let mut moved = 0;
		for task in self.main.drain(..) {
			if task.modality.contains(entity) {
				self.forced.push_back(task);
				moved += 1;
			} else {
				kept.push_back(task);
			}
		}
		self.main = kept;
		self.cursor = 0;
		moved
	}

	/// Empties both queues, returning every pending task. Shutdown path.
	pub fn take_all(&mut self) -> Vec<DeferredTask> {
		self.cursor = 0;
		self.forced.drain(..).chain(self.main.drain(..)).collect()
	}

	fn retire_expired(&mut self, task: DeferredTask) {
		self.expired_total += 1;
		task.handle.complete();
		tracing::trace!(seq = task.seq, "threading.flush.expired");
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicBool, Ordering};

	use super::*;

	fn task(seq: u64, modality: ModalityState) -> DeferredTask {
		DeferredTask {
			action: Box::new(|| {}),
			modality,
			expiry: None,
			handle: CompletionHandle::new(),
			seq,
		}
	}

	fn task_with_expiry(seq: u64, modality: ModalityState, expiry: impl Fn() -> bool + Send + 'static) -> DeferredTask {
		DeferredTask {
			expiry: Some(Box::new(expiry)),
			..task(seq, modality)
		}
	}

	fn pop_seq(queue: &mut FlushQueue, live: &ModalityState) -> Option<u64> {
		queue.pop_next(live).map(|t| t.seq)
	}

	// ── Golden behavior ──

	#[test]
	fn fifo_when_nothing_is_modal() {
		let none = ModalityState::none();
		let mut queue = FlushQueue::new();
		for seq in 0..3 {
			queue.push(task(seq, none.clone()));
		}

		assert_eq!(pop_seq(&mut queue, &none), Some(0));
		assert_eq!(pop_seq(&mut queue, &none), Some(1));
		assert_eq!(pop_seq(&mut queue, &none), Some(2));
		assert_eq!(pop_seq(&mut queue, &none), None);
	}

	#[test]
	fn ineligible_tasks_are_skipped_not_reordered() {
		let x = ModalEntity::new("x");
		let none = ModalityState::none();
		let with_x = none.with_entity(x.clone());

		let mut queue = FlushQueue::new();
		queue.push(task(0, none.clone())); // ineligible while x is live
		queue.push(task(1, with_x.clone()));
		queue.push(task(2, none.clone()));
		queue.push(task(3, with_x.clone()));

		assert_eq!(pop_seq(&mut queue, &with_x), Some(1));
		assert_eq!(pop_seq(&mut queue, &with_x), Some(3));
		assert_eq!(pop_seq(&mut queue, &with_x), None);

		// Back to non-modal: the skipped prefix runs in submission order.
		queue.reset_cursor();
		assert_eq!(pop_seq(&mut queue, &none), Some(0));
		assert_eq!(pop_seq(&mut queue, &none), Some(2));
		assert_eq!(pop_seq(&mut queue, &none), None);
	}

	#[test]
	fn wildcard_tasks_run_under_any_modality() {
		let x = ModalEntity::new("x");
		let with_x = ModalityState::none().with_entity(x);

		let mut queue = FlushQueue::new();
		queue.push(task(0, ModalityState::none()));
		queue.push(task(1, ModalityState::any()));

		assert_eq!(pop_seq(&mut queue, &with_x), Some(1));
		assert_eq!(pop_seq(&mut queue, &with_x), None);
	}

	#[test]
	fn expired_tasks_complete_without_running() {
		let none = ModalityState::none();
		let mut queue = FlushQueue::new();
		let dead = task_with_expiry(0, none.clone(), || true);
		let dead_handle = dead.handle.clone();
		queue.push(dead);
		queue.push(task(1, none.clone()));

		assert_eq!(pop_seq(&mut queue, &none), Some(1));
		assert!(dead_handle.is_done());
		assert_eq!(queue.expired_total(), 1);
	}

	#[test]
	fn expiry_is_evaluated_at_flush_time() {
		let none = ModalityState::none();
		let flag = Arc::new(AtomicBool::new(false));
		let probe = Arc::clone(&flag);

		let mut queue = FlushQueue::new();
		queue.push(task_with_expiry(0, none.clone(), move || probe.load(Ordering::SeqCst)));

		// Not expired yet: the task comes out.
		let popped = queue.pop_next(&none).unwrap();
		queue.push(popped);

		// Expired now: completed, never returned.
		flag.store(true, Ordering::SeqCst);
		assert_eq!(pop_seq(&mut queue, &none), None);
		assert_eq!(queue.expired_total(), 1);
	}

	#[test]
	fn forced_tasks_run_first_even_out_of_order() {
		let x = ModalEntity::new("x");
		let none = ModalityState::none();
		let with_x = none.with_entity(x.clone());

		let mut queue = FlushQueue::new();
		queue.push(task(0, none.clone()));
		queue.push(task(1, with_x.clone()));
		queue.push(task(2, none.clone()));

		assert_eq!(queue.evict_for_entity(&x), 1);
		assert_eq!(pop_seq(&mut queue, &none), Some(1), "forced task preempts older main-queue work");
		assert_eq!(pop_seq(&mut queue, &none), Some(0));
		assert_eq!(pop_seq(&mut queue, &none), Some(2));
	}

	#[test]
	fn forced_tasks_can_still_expire() {
		let x = ModalEntity::new("x");
		let with_x = ModalityState::none().with_entity(x.clone());

		let mut queue = FlushQueue::new();
		let dead = task_with_expiry(0, with_x.clone(), || true);
		let dead_handle = dead.handle.clone();
		queue.push(dead);
		queue.evict_for_entity(&x);

		assert_eq!(pop_seq(&mut queue, &ModalityState::none()), None);
		assert!(dead_handle.is_done());
	}

	#[test]
	fn take_all_empties_both_queues() {
		let x = ModalEntity::new("x");
		let none = ModalityState::none();
		let with_x = none.with_entity(x.clone());

		let mut queue = FlushQueue::new();
		queue.push(task(0, none.clone()));
		queue.push(task(1, with_x));
		queue.evict_for_entity(&x);
		queue.push(task(2, none));

		let drained: Vec<_> = queue.take_all().iter().map(|t| t.seq).collect();
		assert_eq!(drained, vec![1, 0, 2], "forced tasks drain first");
		assert!(queue.is_empty());
	}

	// ── Cursor equivalence (deterministic xorshift) ──

	/// Deterministic pseudo-random number generator for reproducible stress tests.
	struct Xorshift64(u64);

	impl Xorshift64 {
		fn new(seed: u64) -> Self {
			Self(seed)
		}

		fn next(&mut self) -> u64 {
			let mut x = self.0;
			x ^= x << 13;
			x ^= x >> 7;
			x ^= x << 17;
			self.0 = x;
			x
		}

		fn next_usize(&mut self, bound: usize) -> usize {
			(self.next() % bound as u64) as usize
		}
	}

	#[test]
	fn cursor_and_naive_scan_select_identical_tasks() {
		const OPS: usize = 5_000;

		let entities: Vec<_> = ["a", "b", "c"].into_iter().map(ModalEntity::new).collect();
		let mut rng = Xorshift64::new(0xDEAD_BEEF);
		let mut fast = FlushQueue::new();
		let mut naive = FlushQueue::new_naive();
		let mut live_stack: Vec<ModalEntity> = Vec::new();
		let mut seq = 0u64;

		let states = |stack: &[ModalEntity]| ModalityState::from_entities(stack);

		for op in 0..OPS {
			match rng.next_usize(10) {
				// Push a task tagged with a random sub-stack of the live state.
				0..=4 => {
					let depth = rng.next_usize(live_stack.len() + 1);
					let modality = if rng.next_usize(12) == 0 {
						ModalityState::any()
					} else {
						states(&live_stack[..depth])
					};
					fast.push(task(seq, modality.clone()));
					naive.push(task(seq, modality));
					seq += 1;
				}
				// Pop under the live state.
				5..=7 => {
					let live = states(&live_stack);
					let a = pop_seq(&mut fast, &live);
					let b = pop_seq(&mut naive, &live);
					assert_eq!(a, b, "op {op}: pop divergence");
				}
				// Enter a modal scope.
				8 => {
					let entity = entities[rng.next_usize(entities.len())].clone();
					if !live_stack.iter().any(|e| e.same_as(&entity)) {
						live_stack.push(entity);
						fast.reset_cursor();
						naive.reset_cursor();
					}
				}
				// Leave the innermost scope, forcing its pinned tasks.
				_ => {
					if let Some(entity) = live_stack.pop() {
						let moved_fast = fast.evict_for_entity(&entity);
						let moved_naive = naive.evict_for_entity(&entity);
						assert_eq!(moved_fast, moved_naive, "op {op}: eviction divergence");
					}
				}
			}
		}

		// Drain both to the end under a quiet modality.
		let live = states(&live_stack);
		loop {
			let a = pop_seq(&mut fast, &live);
			let b = pop_seq(&mut naive, &live);
			assert_eq!(a, b, "final drain divergence");
			if a.is_none() {
				break;
			}
		}
	}
}
