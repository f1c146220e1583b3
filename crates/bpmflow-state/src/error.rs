use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
  #[error("failed to decode snapshot: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("snapshot format version {found} is not supported (expected {expected})")]
  UnsupportedVersion { found: u32, expected: u32 },

  #[error("snapshot references unknown element '{element_id}'")]
  UnknownElement { element_id: String },
}
