use std::fmt;

use thiserror::Error;

/// A single structural problem found while building an [`crate::ElementGraph`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
  #[error("missing required attribute '{attribute}' on {element}")]
  MissingAttribute { element: String, attribute: String },

  #[error("definition contains no process")]
  NoProcess,

  #[error("duplicate element id '{0}'")]
  DuplicateId(String),

  #[error("flow '{flow}' references unknown element '{endpoint}'")]
  UnknownFlowEndpoint { flow: String, endpoint: String },

  #[error("container '{0}' has no start event")]
  MissingStartEvent(String),

  #[error("gateway '{gateway}' declares default flow '{flow}' which is not one of its outgoing flows")]
  InvalidDefaultFlow { gateway: String, flow: String },

  #[error("task '{task}' declares catch target '{target}' which does not exist")]
  UnknownCatchTarget { task: String, target: String },

  #[error("element '{id}' is invalid: {reason}")]
  InvalidElement { id: String, reason: String },
}

/// Every structural problem found in a definition document.
///
/// Never empty when returned as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionErrors(Vec<DefinitionError>);

impl DefinitionErrors {
  pub(crate) fn new(errors: Vec<DefinitionError>) -> Self {
    Self(errors)
  }

  pub fn errors(&self) -> &[DefinitionError] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn contains(&self, error: &DefinitionError) -> bool {
    self.0.contains(error)
  }
}

impl fmt::Display for DefinitionErrors {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "invalid process definition ({} problem", self.0.len())?;
    if self.0.len() != 1 {
      write!(f, "s")?;
    }
    write!(f, ")")?;
    for error in &self.0 {
      write!(f, "\n  - {error}")?;
    }
    Ok(())
  }
}

impl std::error::Error for DefinitionErrors {}

impl IntoIterator for DefinitionErrors {
  type Item = DefinitionError;
  type IntoIter = std::vec::IntoIter<DefinitionError>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.into_iter()
  }
}
