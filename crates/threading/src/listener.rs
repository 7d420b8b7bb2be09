use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::action_kind::ActionKind;

/// Observer for write-action lifecycle and process-exit notifications.
///
/// Collaborators register one of these to invalidate caches exactly around
/// write boundaries. All callbacks run synchronously on the thread driving
/// the event, in registration order; implementations must not re-enter the
/// write lock.
pub trait LifecycleListener: Send + Sync {
	/// A write action was requested; the write lock is not held yet.
	fn before_write_start(&self, _kind: ActionKind) {}

	/// The write lock is held; the action body is about to run.
	fn write_started(&self, _kind: ActionKind) {}

	/// The action body returned; the write lock is still held.
	fn write_finished(&self, _kind: ActionKind) {}

	/// The runtime has begun shutting down.
	fn exiting(&self) {}
}

/// Identifier for one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registered listener list with synchronous in-order multicast.
pub(crate) struct ListenerRegistry {
	next_id: AtomicU64,
	entries: RwLock<Vec<(ListenerId, Arc<dyn LifecycleListener>)>>,
}

impl ListenerRegistry {
	pub fn new() -> Self {
		Self {
			next_id: AtomicU64::new(1),
			entries: RwLock::new(Vec::new()),
		}
	}

	pub fn add(&self, listener: Arc<dyn LifecycleListener>) -> ListenerId {
		let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
		self.entries.write().push((id, listener));
		id
	}

	pub fn remove(&self, id: ListenerId) -> bool {
		let mut entries = self.entries.write();
		let before = entries.len();
		entries.retain(|(entry_id, _)| *entry_id != id);
		entries.len() != before
	}

	/// Invokes `f` for every listener in registration order.
	///
	/// Works on a snapshot so a listener may add or remove listeners without
	/// deadlocking against the registry lock.
	pub fn notify(&self, f: impl Fn(&dyn LifecycleListener)) {
		let snapshot: Vec<_> = self.entries.read().iter().map(|(_, l)| Arc::clone(l)).collect();
		for listener in snapshot {
			f(listener.as_ref());
		}
	}
}

#[cfg(test)]
mod tests {
	use parking_lot::Mutex;

	use super::*;

	struct Recorder {
		tag: &'static str,
		log: Arc<Mutex<Vec<&'static str>>>,
	}

	impl LifecycleListener for Recorder {
		fn exiting(&self) {
			self.log.lock().push(self.tag);
		}
	}

	#[test]
	fn notify_runs_in_registration_order() {
		let registry = ListenerRegistry::new();
		let log = Arc::new(Mutex::new(Vec::new()));
		registry.add(Arc::new(Recorder { tag: "first", log: log.clone() }));
		registry.add(Arc::new(Recorder { tag: "second", log: log.clone() }));

		registry.notify(|l| l.exiting());
		assert_eq!(*log.lock(), vec!["first", "second"]);
	}

	#[test]
	fn removed_listener_is_not_notified() {
		let registry = ListenerRegistry::new();
		let log = Arc::new(Mutex::new(Vec::new()));
		let keep = registry.add(Arc::new(Recorder { tag: "keep", log: log.clone() }));
		let drop_id = registry.add(Arc::new(Recorder { tag: "drop", log: log.clone() }));

		assert!(registry.remove(drop_id));
		assert!(!registry.remove(drop_id), "second remove is a no-op");
		registry.notify(|l| l.exiting());
		assert_eq!(*log.lock(), vec!["keep"]);

		assert!(registry.remove(keep));
	}
}
