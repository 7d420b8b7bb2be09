use std::cell::Cell;

/// Mutable per-thread status tracked by the access gate.
///
/// Three explicit fields rather than packed bit flags: the owner-thread mark,
/// the read-lock reentrancy depth, and the reentrancy-safe scope depth that
/// waives owner-thread assertions.
pub(crate) struct ThreadStatus {
	is_owner: Cell<bool>,
	read_depth: Cell<u32>,
	safe_depth: Cell<u32>,
}

thread_local! {
	static STATUS: ThreadStatus = const {
		ThreadStatus {
			is_owner: Cell::new(false),
			read_depth: Cell::new(0),
			safe_depth: Cell::new(0),
		}
	};
}

/// Runs `f` with the calling thread's status record.
pub(crate) fn with<R>(f: impl FnOnce(&ThreadStatus) -> R) -> R {
	STATUS.with(f)
}

impl ThreadStatus {
	pub fn mark_owner(&self) {
		self.is_owner.set(true);
	}

	pub fn is_owner(&self) -> bool {
		self.is_owner.get()
	}

	pub fn read_depth(&self) -> u32 {
		self.read_depth.get()
	}

	pub fn enter_read(&self) {
		self.read_depth.set(self.read_depth.get() + 1);
	}

	pub fn exit_read(&self) {
		let depth = self.read_depth.get();
		debug_assert!(depth > 0, "read depth underflow");
		self.read_depth.set(depth.saturating_sub(1));
	}

	pub fn safe_depth(&self) -> u32 {
		self.safe_depth.get()
	}

	pub fn enter_safe(&self) {
		self.safe_depth.set(self.safe_depth.get() + 1);
	}

	pub fn exit_safe(&self) {
		let depth = self.safe_depth.get();
		debug_assert!(depth > 0, "safe depth underflow");
		self.safe_depth.set(depth.saturating_sub(1));
	}
}
