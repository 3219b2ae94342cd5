use crate::error::NodeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque reference to a stored credential. How credentials are stored and
/// encrypted is the provider's concern, not the engine's.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialRef(pub String);

impl<T: Into<String>> From<T> for CredentialRef {
    fn from(value: T) -> Self {
        CredentialRef(value.into())
    }
}

/// Resolved credential material handed to a node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub values: HashMap<String, serde_json::Value>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }
}

/// External collaborator that resolves credential references for nodes.
/// Resolution failures are non-retryable node errors.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(&self, reference: &CredentialRef) -> Result<Credentials, NodeError>;
}

/// In-memory provider for tests and demos
#[derive(Default)]
pub struct StaticCredentials {
    entries: HashMap<CredentialRef, Credentials>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reference: impl Into<CredentialRef>, credentials: Credentials) -> Self {
        self.entries.insert(reference.into(), credentials);
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn resolve(&self, reference: &CredentialRef) -> Result<Credentials, NodeError> {
        self.entries
            .get(reference)
            .cloned()
            .ok_or_else(|| NodeError::Credential(format!("unknown credential: {}", reference.0)))
    }
}
