use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::document::{DefinitionDocument, ElementDef, ElementDefKind};
use crate::element::{Element, ElementKind};
use crate::error::{DefinitionError, DefinitionErrors};

/// Immutable, validated index of every element in one definition.
#[derive(Debug, Clone)]
pub struct ElementGraph {
  definition_id: String,
  definition_name: Option<String>,
  elements: HashMap<String, Element>,
  /// Element ids in declaration order (depth-first through sub-processes).
  order: Vec<String>,
  /// Container id -> direct children, in declaration order.
  children: HashMap<String, Vec<String>>,
  /// Element id -> flows leaving it, in declaration order.
  outgoing: HashMap<String, Vec<String>>,
  /// Element id -> flows entering it, in declaration order.
  incoming: HashMap<String, Vec<String>>,
  constants: BTreeMap<String, Value>,
}

impl ElementGraph {
  /// Build and validate a graph from a definition document.
  ///
  /// Every structural problem is reported, not just the first one.
  pub fn build(doc: DefinitionDocument) -> Result<Self, DefinitionErrors> {
    let mut builder = GraphBuilder::default();

    if doc.id.trim().is_empty() {
      builder.errors.push(DefinitionError::MissingAttribute {
        element: "definition".to_string(),
        attribute: "id".to_string(),
      });
    }
    if doc.processes.is_empty() {
      builder.errors.push(DefinitionError::NoProcess);
    }

    for process in doc.processes {
      let inserted = builder.insert(Element {
        id: process.id.clone(),
        name: process.name,
        kind: ElementKind::Process,
        parent: None,
        process: process.id.clone(),
        properties: process.properties,
      });
      if inserted {
        builder.visit(process.elements, &process.id, &process.id);
      }
    }

    for flow in doc.message_flows {
      builder.insert(Element {
        id: flow.id,
        name: flow.name,
        kind: ElementKind::MessageFlow {
          source: flow.source,
          target: flow.target,
        },
        parent: None,
        process: String::new(),
        properties: BTreeMap::new(),
      });
    }

    builder.link_flows();
    builder.validate_elements();

    if !builder.errors.is_empty() {
      return Err(DefinitionErrors::new(builder.errors));
    }

    Ok(Self {
      definition_id: doc.id,
      definition_name: doc.name,
      elements: builder.elements,
      order: builder.order,
      children: builder.children,
      outgoing: builder.outgoing,
      incoming: builder.incoming,
      constants: doc.variables,
    })
  }

  /// Parse a JSON definition document and build the graph from it.
  pub fn from_json(json: &str) -> Result<Self, DefinitionErrors> {
    let doc = DefinitionDocument::from_json(json).map_err(|e| {
      DefinitionErrors::new(vec![DefinitionError::InvalidElement {
        id: "definition".to_string(),
        reason: format!("malformed document: {e}"),
      }])
    })?;
    Self::build(doc)
  }

  pub fn definition_id(&self) -> &str {
    &self.definition_id
  }

  pub fn definition_name(&self) -> Option<&str> {
    self.definition_name.as_deref()
  }

  pub fn len(&self) -> usize {
    self.elements.len()
  }

  pub fn is_empty(&self) -> bool {
    self.elements.is_empty()
  }

  pub fn contains(&self, id: &str) -> bool {
    self.elements.contains_key(id)
  }

  pub fn element(&self, id: &str) -> Option<&Element> {
    self.elements.get(id)
  }

  /// All elements in declaration order.
  pub fn elements(&self) -> impl Iterator<Item = &Element> {
    self.order.iter().filter_map(|id| self.elements.get(id))
  }

  /// Top-level processes in declaration order.
  pub fn processes(&self) -> impl Iterator<Item = &Element> {
    self
      .elements()
      .filter(|e| matches!(e.kind, ElementKind::Process))
  }

  /// Direct children of a container, in declaration order.
  pub fn children(&self, container_id: &str) -> &[String] {
    self
      .children
      .get(container_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Start events directly inside a container.
  pub fn start_events(&self, container_id: &str) -> Vec<&Element> {
    self
      .children(container_id)
      .iter()
      .filter_map(|id| self.elements.get(id))
      .filter(|e| matches!(e.kind, ElementKind::StartEvent))
      .collect()
  }

  /// Ids of the flows leaving an element.
  pub fn outgoing(&self, id: &str) -> &[String] {
    self
      .outgoing
      .get(id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Ids of the flows entering an element.
  pub fn incoming(&self, id: &str) -> &[String] {
    self
      .incoming
      .get(id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// The enclosing container of an element.
  pub fn parent(&self, id: &str) -> Option<&Element> {
    self
      .elements
      .get(id)
      .and_then(|e| e.parent.as_deref())
      .and_then(|p| self.elements.get(p))
  }

  /// Enclosing containers, innermost first, ending with the owning process.
  pub fn ancestors(&self, id: &str) -> Vec<&Element> {
    let mut ancestors = Vec::new();
    let mut current = self.parent(id);
    while let Some(container) = current {
      ancestors.push(container);
      current = self.parent(&container.id);
    }
    ancestors
  }

  /// Innermost sub-process enclosing an element, if any.
  pub fn owning_sub_process(&self, id: &str) -> Option<&Element> {
    self
      .parent(id)
      .filter(|p| matches!(p.kind, ElementKind::SubProcess))
  }

  /// The top-level process an element belongs to.
  pub fn process_of(&self, id: &str) -> Option<&Element> {
    self
      .elements
      .get(id)
      .and_then(|e| self.elements.get(&e.process))
  }

  /// Every intermediate catch event, in declaration order.
  pub fn catch_events(&self) -> Vec<&Element> {
    self
      .elements()
      .filter(|e| matches!(e.kind, ElementKind::IntermediateCatchEvent { .. }))
      .collect()
  }

  /// Definition-level variables.
  pub fn constants(&self) -> &BTreeMap<String, Value> {
    &self.constants
  }
}

#[derive(Default)]
struct GraphBuilder {
  elements: HashMap<String, Element>,
  order: Vec<String>,
  children: HashMap<String, Vec<String>>,
  outgoing: HashMap<String, Vec<String>>,
  incoming: HashMap<String, Vec<String>>,
  errors: Vec<DefinitionError>,
}

impl GraphBuilder {
  /// Insert an element, recording a problem instead when its id is empty or taken.
  fn insert(&mut self, element: Element) -> bool {
    if element.id.trim().is_empty() {
      self.errors.push(DefinitionError::MissingAttribute {
        element: element.kind_name().to_string(),
        attribute: "id".to_string(),
      });
      return false;
    }
    if self.elements.contains_key(&element.id) {
      self
        .errors
        .push(DefinitionError::DuplicateId(element.id.clone()));
      return false;
    }

    if let Some(parent) = &element.parent {
      self
        .children
        .entry(parent.clone())
        .or_default()
        .push(element.id.clone());
    }
    self.order.push(element.id.clone());
    self.elements.insert(element.id.clone(), element);
    true
  }

  fn visit(&mut self, defs: Vec<ElementDef>, parent: &str, process: &str) {
    for def in defs {
      let (kind, nested) = match def.kind {
        ElementDefKind::StartEvent => (ElementKind::StartEvent, None),
        ElementDefKind::EndEvent => (ElementKind::EndEvent, None),
        ElementDefKind::IntermediateCatchEvent { error_types, timer } => {
          (ElementKind::IntermediateCatchEvent { error_types, timer }, None)
        }
        ElementDefKind::IntermediateThrowEvent { timer } => {
          (ElementKind::IntermediateThrowEvent { timer }, None)
        }
        ElementDefKind::Gateway { kind, default_flow } => {
          (ElementKind::Gateway { kind, default_flow }, None)
        }
        ElementDefKind::Task {
          kind,
          lane,
          catches,
        } => (
          ElementKind::Task {
            kind,
            lane,
            catches,
          },
          None,
        ),
        ElementDefKind::SubProcess { elements } => (ElementKind::SubProcess, Some(elements)),
        ElementDefKind::SequenceFlow {
          source,
          target,
          condition,
        } => (
          ElementKind::SequenceFlow {
            source,
            target,
            condition,
          },
          None,
        ),
      };

      let id = def.id.clone();
      let inserted = self.insert(Element {
        id: def.id,
        name: def.name,
        kind,
        parent: Some(parent.to_string()),
        process: process.to_string(),
        properties: def.properties,
      });

      if let (true, Some(nested)) = (inserted, nested) {
        self.visit(nested, &id, process);
      }
    }
  }

  /// Build adjacency lists and check flow endpoints.
  fn link_flows(&mut self) {
    let mut message_flow_processes = Vec::new();

    for id in &self.order {
      let Some(flow) = self.elements.get(id) else {
        continue;
      };
      let Some((source, target)) = flow.flow_endpoints() else {
        continue;
      };

      let mut endpoints_known = true;
      for endpoint in [source, target] {
        match self.elements.get(endpoint) {
          Some(e) if !e.is_flow() && !matches!(e.kind, ElementKind::Process) => {}
          _ => {
            endpoints_known = false;
            self.errors.push(DefinitionError::UnknownFlowEndpoint {
              flow: id.clone(),
              endpoint: endpoint.to_string(),
            });
          }
        }
      }
      if !endpoints_known {
        continue;
      }

      match &flow.kind {
        ElementKind::SequenceFlow { .. } => {
          let source_parent = self.elements.get(source).and_then(|e| e.parent.as_ref());
          let target_parent = self.elements.get(target).and_then(|e| e.parent.as_ref());
          if source_parent != target_parent {
            self.errors.push(DefinitionError::InvalidElement {
              id: id.clone(),
              reason: "sequence flow crosses a container boundary".to_string(),
            });
            continue;
          }
        }
        ElementKind::MessageFlow { .. } => {
          if let Some(process) = self.elements.get(source).map(|e| e.process.clone()) {
            message_flow_processes.push((id.clone(), process));
          }
        }
        _ => {}
      }

      self
        .outgoing
        .entry(source.to_string())
        .or_default()
        .push(id.clone());
      self
        .incoming
        .entry(target.to_string())
        .or_default()
        .push(id.clone());
    }

    for (id, process) in message_flow_processes {
      if let Some(flow) = self.elements.get_mut(&id) {
        flow.process = process;
      }
    }
  }

  fn validate_elements(&mut self) {
    for id in &self.order {
      let Some(element) = self.elements.get(id) else {
        continue;
      };

      match &element.kind {
        ElementKind::Process | ElementKind::SubProcess => {
          let has_start = self
            .children
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|c| self.elements.get(c))
            .any(|c| matches!(c.kind, ElementKind::StartEvent));
          if !has_start {
            self
              .errors
              .push(DefinitionError::MissingStartEvent(id.clone()));
          }
        }
        ElementKind::StartEvent => {
          if self.has_sequence_flow(self.incoming.get(id)) {
            self.errors.push(DefinitionError::InvalidElement {
              id: id.clone(),
              reason: "start event has an incoming sequence flow".to_string(),
            });
          }
        }
        ElementKind::EndEvent => {
          if self.has_sequence_flow(self.outgoing.get(id)) {
            self.errors.push(DefinitionError::InvalidElement {
              id: id.clone(),
              reason: "end event has an outgoing sequence flow".to_string(),
            });
          }
        }
        ElementKind::Gateway {
          default_flow: Some(flow),
          ..
        } => {
          let is_outgoing = self
            .outgoing
            .get(id)
            .is_some_and(|flows| flows.contains(flow));
          if !is_outgoing {
            self.errors.push(DefinitionError::InvalidDefaultFlow {
              gateway: id.clone(),
              flow: flow.clone(),
            });
          }
        }
        ElementKind::Task { catches, .. } => {
          for catch in catches {
            if !self.elements.contains_key(&catch.target) {
              self.errors.push(DefinitionError::UnknownCatchTarget {
                task: id.clone(),
                target: catch.target.clone(),
              });
            }
          }
        }
        _ => {}
      }
    }
  }

  fn has_sequence_flow(&self, flows: Option<&Vec<String>>) -> bool {
    flows
      .into_iter()
      .flatten()
      .filter_map(|f| self.elements.get(f))
      .any(|f| matches!(f.kind, ElementKind::SequenceFlow { .. }))
  }
}
