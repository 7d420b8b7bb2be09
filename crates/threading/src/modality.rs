use std::fmt;
use std::sync::Arc;

/// Opaque token for one modal scope (a blocking dialog, a modal progress run).
///
/// Identity is pointer identity: two `ModalEntity` values denote the same
/// scope only when they are clones of one original token. Labels exist for
/// logging and carry no identity.
#[derive(Clone)]
pub struct ModalEntity {
	inner: Arc<EntityInner>,
}

#[derive(Debug)]
struct EntityInner {
	label: &'static str,
}

impl ModalEntity {
	/// Creates a fresh modal entity with a debug label.
	pub fn new(label: &'static str) -> Self {
		Self {
			inner: Arc::new(EntityInner { label }),
		}
	}

	/// Debug label supplied at creation.
	pub fn label(&self) -> &'static str {
		self.inner.label
	}

	/// Returns whether both handles denote the same scope.
	pub fn same_as(&self, other: &ModalEntity) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

impl PartialEq for ModalEntity {
	fn eq(&self, other: &Self) -> bool {
		self.same_as(other)
	}
}

impl Eq for ModalEntity {}

impl fmt::Debug for ModalEntity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ModalEntity({})", self.inner.label)
	}
}

/// Immutable snapshot of the modal entities active at capture time.
///
/// Tasks are tagged with the state that was current when they were
/// submitted; the flusher compares those snapshots against the live state to
/// decide eligibility. States are never mutated, only superseded.
#[derive(Clone)]
pub struct ModalityState {
	repr: Repr,
}

#[derive(Clone)]
enum Repr {
	/// Submission-time tag meaning "run under whatever modality is current".
	Any,
	/// Captured entity stack; empty means nothing was modal.
	Stack(Arc<[ModalEntity]>),
}

impl ModalityState {
	/// The empty state: nothing is modal.
	pub fn none() -> Self {
		Self {
			repr: Repr::Stack(Arc::from(Vec::new())),
		}
	}

	/// The wildcard state: eligible under every live modality.
	pub fn any() -> Self {
		Self { repr: Repr::Any }
	}

	pub(crate) fn from_entities(entities: &[ModalEntity]) -> Self {
		Self {
			repr: Repr::Stack(entities.to_vec().into()),
		}
	}

	/// Returns whether this is the wildcard state.
	pub fn is_any(&self) -> bool {
		matches!(self.repr, Repr::Any)
	}

	/// Returns whether no modal entities were active at capture.
	pub fn is_empty(&self) -> bool {
		match &self.repr {
			Repr::Any => false,
			Repr::Stack(entities) => entities.is_empty(),
		}
	}

	/// Returns whether the given entity was active at capture.
	///
	/// Always false for the wildcard state.
	pub fn contains(&self, entity: &ModalEntity) -> bool {
		match &self.repr {
			Repr::Any => false,
			Repr::Stack(entities) => entities.iter().any(|e| e.same_as(entity)),
		}
	}

	/// Returns a new state with `entity` appended to this state's stack.
	///
	/// Appending to the wildcard state is a contract violation.
	pub fn with_entity(&self, entity: ModalEntity) -> Self {
		let Repr::Stack(entities) = &self.repr else {
			panic!("cannot append a modal entity to ModalityState::any()");
		};
		let mut stack = entities.to_vec();
		stack.push(entity);
		Self {
			repr: Repr::Stack(stack.into()),
		}
	}

	/// Partial order: true when this state is at least as restrictive as
	/// `other`, i.e. every entity captured by `other` is still present here.
	///
	/// The empty state dominates nothing; any non-empty state dominates the
	/// empty state; the wildcard never participates in dominance.
	pub fn dominates(&self, other: &ModalityState) -> bool {
		let (Repr::Stack(mine), Repr::Stack(theirs)) = (&self.repr, &other.repr) else {
			return false;
		};
		if mine.is_empty() {
			return false;
		}
		theirs.iter().all(|entity| mine.iter().any(|e| e.same_as(entity)))
	}

	/// Eligibility gate used by the flusher, with `self` as the live state.
	///
	/// A task may run when it is tagged wildcard, or when its snapshot still
	/// carries every entity of the live state (it was submitted aware of
	/// every modal scope currently open).
	pub fn permits(&self, task: &ModalityState) -> bool {
		if task.is_any() {
			return true;
		}
		match &self.repr {
			// The live state is never the wildcard; treat it as empty.
			Repr::Any => true,
			Repr::Stack(live) => live.iter().all(|entity| task.contains(entity)),
		}
	}
}

impl PartialEq for ModalityState {
	fn eq(&self, other: &Self) -> bool {
		match (&self.repr, &other.repr) {
			(Repr::Any, Repr::Any) => true,
			(Repr::Stack(a), Repr::Stack(b)) => a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.same_as(y)),
			_ => false,
		}
	}
}

impl Eq for ModalityState {}

impl fmt::Debug for ModalityState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.repr {
			Repr::Any => write!(f, "ModalityState(any)"),
			Repr::Stack(entities) if entities.is_empty() => write!(f, "ModalityState(none)"),
			Repr::Stack(entities) => {
				let labels: Vec<_> = entities.iter().map(|e| e.label()).collect();
				write!(f, "ModalityState({})", labels.join(" > "))
			}
		}
	}
}
