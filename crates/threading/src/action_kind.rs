use std::fmt;

/// Static descriptor for one write-action kind.
///
/// Kinds form a hierarchy through parent links, so collaborators can ask
/// "is a write action of at least kind X active" without naming every
/// concrete sub-kind. Descriptors are compared by address: declare each kind
/// once as a `static` and pass references around.
pub struct ActionKindDef {
	name: &'static str,
	parent: Option<&'static ActionKindDef>,
}

/// Reference to a statically declared write-action kind.
pub type ActionKind = &'static ActionKindDef;

impl ActionKindDef {
	/// Declares a root kind with no parent.
	pub const fn root(name: &'static str) -> Self {
		Self { name, parent: None }
	}

	/// Declares a sub-kind of `parent`.
	pub const fn sub(name: &'static str, parent: &'static ActionKindDef) -> Self {
		Self {
			name,
			parent: Some(parent),
		}
	}

	/// Kind name used in logs.
	pub const fn name(&self) -> &'static str {
		self.name
	}

	/// Returns whether this kind is `ancestor` or one of its sub-kinds.
	pub fn is_kind_of(&self, ancestor: ActionKind) -> bool {
		let mut current = Some(self);
		while let Some(kind) = current {
			if std::ptr::eq(kind, ancestor) {
				return true;
			}
			current = kind.parent;
		}
		false
	}
}

impl fmt::Debug for ActionKindDef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ActionKind({})", self.name)
	}
}
