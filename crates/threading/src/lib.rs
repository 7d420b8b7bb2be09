//! Concurrency core for the Quill application.
//!
//! One privileged owner thread serializes exclusive write actions and drains
//! deferred tasks under a modality discipline; any number of other threads
//! run read actions concurrently. Every other subsystem (editors, search,
//! project model) consumes this crate through three surfaces:
//!
//! - [`AccessGate`]: reentrant multi-reader/single-writer access, with a
//!   write-action stack and lifecycle listeners around write boundaries.
//! - [`ThreadingRuntime::submit`] / [`ThreadingRuntime::invoke_and_wait`]:
//!   deferred execution on the owner thread, tagged with a [`ModalityState`]
//!   so queued work never runs inside a modal scope it was not aware of.
//! - [`ThreadingRuntime::enter_modal`] / [`ThreadingRuntime::leave_modal`]:
//!   the live modal scope stack; leaving a scope force-promotes the tasks
//!   that were pinned to it.

mod access;
mod action_kind;
mod cancel;
mod completion;
mod diagnostics;
mod dispatch;
mod listener;
mod modality;
mod queue;
mod runtime;
mod status;

pub use access::AccessGate;
pub use action_kind::{ActionKind, ActionKindDef};
pub use cancel::{Canceled, cancel_current};
pub use completion::CompletionHandle;
pub use dispatch::{SubmitError, WaitError};
pub use listener::{LifecycleListener, ListenerId};
pub use modality::{ModalEntity, ModalityState};
pub use runtime::ThreadingRuntime;
