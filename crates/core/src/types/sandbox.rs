use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Handle for one created sandbox instance.
///
/// `name` is unique per request and never derived from the language alone.
/// `id` is whatever the backend assigned on creation.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SandboxHandle {
    /// Backend-assigned identifier.
    pub id: String,

    /// Unique sandbox name chosen by the engine.
    pub name: String,

    /// When the sandbox was created.
    pub created_at: DateTime<Utc>,
}

impl SandboxHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for SandboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
