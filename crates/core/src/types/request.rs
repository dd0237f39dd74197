use serde::{Deserialize, Serialize};

use super::limits::ResourceLimitsOverride;

// =============================================================================
// Request Types
// =============================================================================

/// A single "run this program" request.
///
/// Built by the caller and read-only once handed to the engine. The engine
/// has no notion of who issued it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Language identifier, resolved against the language registry.
    pub language: String,

    /// Untrusted program text.
    pub source: String,

    /// Bytes fed to the program's standard input.
    #[serde(default)]
    pub stdin: Option<String>,

    /// Per-request tightening or loosening of the default limits.
    #[serde(default)]
    pub limits: Option<ResourceLimitsOverride>,
}

impl ExecutionRequest {
    /// Create a request with no stdin and default limits.
    pub fn new(language: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            source: source.into(),
            stdin: None,
            limits: None,
        }
    }

    /// Attach standard input.
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    /// Attach resource-limit overrides.
    pub fn with_limits(mut self, limits: ResourceLimitsOverride) -> Self {
        self.limits = Some(limits);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_request() {
        let req: ExecutionRequest =
            serde_json::from_str(r#"{"language":"python","source":"print(1)"}"#).unwrap();
        assert_eq!(req.language, "python");
        assert!(req.stdin.is_none());
        assert!(req.limits.is_none());
    }

    #[test]
    fn test_builder_helpers() {
        let req = ExecutionRequest::new("c", "int main(){}")
            .with_stdin("42\n")
            .with_limits(ResourceLimitsOverride {
                pids_limit: Some(8),
                ..Default::default()
            });
        assert_eq!(req.stdin.as_deref(), Some("42\n"));
        assert_eq!(req.limits.unwrap().pids_limit, Some(8));
    }
}
