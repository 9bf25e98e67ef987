use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Value object: Flow ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowId(pub String);

/// Value object: Node ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

/// Value object: Edge ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub String);

/// Identity of one pass through the mutation pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationId(pub Uuid);

impl FlowId {
    /// Create a flow id from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl NodeId {
    /// Create a node id from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh client-side node id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl EdgeId {
    /// Create an edge id from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh client-side edge id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl MutationId {
    /// Generate a fresh mutation id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(NodeId::generate(), NodeId::generate());
        assert_ne!(EdgeId::generate(), EdgeId::generate());
        assert_ne!(MutationId::generate(), MutationId::generate());
    }

    #[test]
    fn test_display_is_raw_id() {
        assert_eq!(FlowId::new("flow-1").to_string(), "flow-1");
        assert_eq!(NodeId::new("n1").to_string(), "n1");
    }
}
