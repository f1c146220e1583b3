//! bpmflow Definition
//!
//! This crate provides the element graph a process instance executes against.
//! A definition document is the serializable form of a BPMN-style process
//! model; an [`ElementGraph`] is its validated, indexed form.
//!
//! Key differences from the raw [`DefinitionDocument`]:
//! - Element ids are unique across the whole graph
//! - Every element knows its enclosing container and owning process
//! - Flow endpoints, default flows and catch targets are checked
//! - Outgoing/incoming flows are precomputed in declaration order
//!
//! Validation reports every structural problem at once as [`DefinitionErrors`].

mod document;
mod element;
mod error;
mod graph;

pub use document::{DefinitionDocument, ElementDef, ElementDefKind, MessageFlowDef, ProcessDef};
pub use element::{Element, ElementKind, GatewayKind, TaskCatch, TaskKind, TimerDef, WILDCARD_ERROR_TYPE};
pub use error::{DefinitionError, DefinitionErrors};
pub use graph::ElementGraph;
