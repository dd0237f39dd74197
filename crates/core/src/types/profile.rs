use serde::{Deserialize, Serialize};

/// Template placeholder for the program text passed as a single argument.
pub const PLACEHOLDER_CODE: &str = "{code}";

/// Template placeholder for the generated source-file path.
pub const PLACEHOLDER_SOURCE: &str = "{source}";

/// Template placeholder for the request's private scratch directory.
pub const PLACEHOLDER_WORKDIR: &str = "{workdir}";

// =============================================================================
// Execution Profile
// =============================================================================

/// How to build and run programs of one language.
///
/// Interpreted profiles carry a `run` template with a `{code}` element and no
/// `compile` step. Compiled profiles write the program to `source_file`
/// inside `{workdir}`, run `compile`, then `run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionProfile {
    /// Canonical language identifier.
    pub language: String,

    /// Additional identifiers resolving to this profile.
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Container image reference.
    pub image: String,

    /// File name the program is written to (compiled languages).
    #[serde(default)]
    pub source_file: Option<String>,

    /// Compiler invocation template.
    #[serde(default)]
    pub compile: Option<Vec<String>>,

    /// Run invocation template.
    pub run: Vec<String>,
}

impl ExecutionProfile {
    /// Whether a separate compile step precedes the run.
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    /// Profiles shipped with the runner.
    pub fn builtin() -> Vec<ExecutionProfile> {
        vec![
            ExecutionProfile {
                language: "python".into(),
                aliases: vec!["py".into(), "python3".into()],
                image: "python:3.12-slim".into(),
                source_file: None,
                compile: None,
                run: strings(&["python3", "-I", "-B", "-c", PLACEHOLDER_CODE]),
            },
            ExecutionProfile {
                language: "java".into(),
                aliases: Vec::new(),
                image: "eclipse-temurin:21-jdk".into(),
                source_file: Some("Main.java".into()),
                compile: Some(strings(&[
                    "javac",
                    "-J-XX:-UsePerfData",
                    "-d",
                    PLACEHOLDER_WORKDIR,
                    PLACEHOLDER_SOURCE,
                ])),
                run: strings(&[
                    "java",
                    "-XX:-UsePerfData",
                    "-Djava.io.tmpdir={workdir}",
                    "-cp",
                    PLACEHOLDER_WORKDIR,
                    "Main",
                ]),
            },
            ExecutionProfile {
                language: "c".into(),
                aliases: Vec::new(),
                image: "gcc:14".into(),
                source_file: Some("main.c".into()),
                compile: Some(strings(&[
                    "gcc",
                    "-O2",
                    "-o",
                    "{workdir}/main",
                    PLACEHOLDER_SOURCE,
                    "-lm",
                ])),
                run: strings(&["{workdir}/main"]),
            },
            ExecutionProfile {
                language: "cpp".into(),
                aliases: vec!["c++".into(), "cxx".into()],
                image: "gcc:14".into(),
                source_file: Some("main.cpp".into()),
                compile: Some(strings(&[
                    "g++",
                    "-O2",
                    "-o",
                    "{workdir}/main",
                    PLACEHOLDER_SOURCE,
                ])),
                run: strings(&["{workdir}/main"]),
            },
        ]
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_languages() {
        let builtin = ExecutionProfile::builtin();
        let names: Vec<_> = builtin.iter().map(|p| p.language.as_str()).collect();
        assert_eq!(names, vec!["python", "java", "c", "cpp"]);
    }

    #[test]
    fn test_compile_flag_follows_compile_template() {
        for profile in ExecutionProfile::builtin() {
            assert_eq!(profile.is_compiled(), profile.language != "python");
            assert_eq!(profile.is_compiled(), profile.source_file.is_some());
        }
    }
}
