use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::Duration;

/// Outcome of a program that ran to completion inside its sandbox.
///
/// A non-zero exit code or stderr output is still a successful execution:
/// the caller gets the program's own diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Captured standard output, at most the per-stream cap in bytes.
    #[serde(with = "output_bytes")]
    pub stdout: Vec<u8>,

    /// Captured standard error, at most the per-stream cap in bytes.
    #[serde(with = "output_bytes")]
    pub stderr: Vec<u8>,

    /// Exit code reported by the sandbox.
    pub exit_code: i64,

    /// Whether the kernel killed the program for exceeding its memory limit.
    #[serde(default)]
    pub oom_killed: bool,

    /// Wall-clock time from sandbox start to exit.
    #[serde(rename = "elapsed_ms", with = "elapsed_ms")]
    pub elapsed: Duration,

    /// Whether either stream exceeded the capture cap.
    pub truncated: bool,
}

impl ExecutionResult {
    /// Whether the program exited cleanly.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.oom_killed
    }

    /// Standard output for display; invalid UTF-8 is replaced.
    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Standard error for display; invalid UTF-8 is replaced.
    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// Valid UTF-8 is written as a plain string, anything else as
/// `{"base64": "..."}`, so captured bytes survive serialization unchanged.
mod output_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Encoded<'a> {
        Text(std::borrow::Cow<'a, str>),
        Binary { base64: String },
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(bytes) {
            Ok(text) => Encoded::Text(text.into()).serialize(s),
            Err(_) => Encoded::Binary {
                base64: base64::engine::general_purpose::STANDARD.encode(bytes),
            }
            .serialize(s),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        match Encoded::deserialize(d)? {
            Encoded::Text(text) => Ok(text.into_owned().into_bytes()),
            Encoded::Binary { base64: encoded } => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(serde::de::Error::custom),
        }
    }
}

mod elapsed_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
