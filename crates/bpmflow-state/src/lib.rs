//! bpmflow State
//!
//! Everything a running process instance needs to remember:
//! - [`VariableStore`]: values keyed by (scope element id, name)
//! - [`ExecutionPath`]: the ordered step history plus pending timers and
//!   continuations recorded while suspended
//! - [`StateLog`]: engine log lines kept with the state
//!
//! [`ProcessState`] aggregates them. Concurrent access goes through
//! [`SharedState`], which only hands out the state inside its lock.
//! [`ProcessSnapshot`] is the serialized form used for durability.

mod error;
mod log;
mod path;
mod shared;
mod snapshot;
mod state;
mod value;
mod variables;

pub use error::StateError;
pub use log::{LogEntry, StateLog, StateLogLevel};
pub use path::{Continuation, ExecutionPath, PendingTimer, StepRecord, StepStatus};
pub use shared::{SharedState, StepGuard};
pub use snapshot::{ProcessSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use state::{MergeOutcome, ProcessState};
pub use value::values_equal;
pub use variables::{Constants, Lookup, VariableRecord, VariableStore};
