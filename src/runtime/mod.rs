//! The execution substrate: VM, contexts, frames, fibers, the status
//! stack, scripts, errors, and the generic operations every script-visible
//! behavior funnels through.

pub mod builtins;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod fiber;
pub mod format;
pub mod frame;
pub mod operation;
pub mod script;
pub mod status;
pub mod vm;

pub use builtins::re_match;
pub use context::{Context, ContextId};
pub use dispatch::{Dispatch, DispatchCall, DispatchOutcome};
pub use error::{ErrorKind, Thrown};
pub use fiber::{Fiber, FiberState, fiber_next};
pub use frame::Frame;
pub use script::{BcScript, Script, ScriptBody, ScriptFunc, ScriptState};
pub use status::{StatusEntry, TryState};
pub use vm::{ObjId, StrId, Vm};
