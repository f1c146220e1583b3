//! bpmflow Engine
//!
//! Executes process instances over a validated [`ElementGraph`].
//!
//! An instance is driven from outside: [`ProcessInstance::begin_process`],
//! asynchronous task completions ([`TaskHandle`], [`ProcessInstance::complete_task`]),
//! and timer wakes each enter the dispatcher, which applies the transition of
//! every element it reaches until the path ends, waits on a host task or a
//! timer, or the instance is suspended.
//!
//! Host code plugs in through [`ProcessHooks`]: lifecycle notifications,
//! validity predicates, and one handler per [`TaskKind`].
//!
//! Failed steps never surface as errors to the caller. They are reported
//! through hooks and routed to catch events, or to the process-error hook.

mod completion;
mod config;
mod dispatcher;
mod error;
mod fault;
mod hooks;
mod instance;
mod suspension;
mod task;
mod timer;
mod variables;

pub use bpmflow_definition::{ElementGraph, TaskKind};
pub use bpmflow_state::{Lookup, ProcessSnapshot, StateLogLevel, StepRecord, StepStatus};
pub use config::EngineConfig;
pub use error::{EngineError, Fault, FaultKind};
pub use hooks::{
  AsyncTaskHandler, Lifecycle, LifecycleHook, LogHook, Predicate, ProcessErrorEvent, ProcessErrorHook,
  ProcessHooks, StateChangeHook, StepEvent, SyncTaskHandler, TaskHandler,
};
pub use instance::ProcessInstance;
pub use suspension::SuspensionState;
pub use task::{TaskContext, TaskHandle};
pub use variables::{ReadOnlyVariables, Variables};
