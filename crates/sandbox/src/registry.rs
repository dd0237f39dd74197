//! Language registry.
//!
//! Maps language identifiers to immutable execution profiles. The table is
//! built and validated once at startup and only read afterwards, so it is
//! shared between tasks behind an `Arc` without any locking.

use std::collections::HashMap;
use std::sync::Arc;

use code_runner_core::{
    Error, ExecutionProfile, Result, PLACEHOLDER_CODE, PLACEHOLDER_SOURCE, PLACEHOLDER_WORKDIR,
};

/// Immutable lookup table from language identifier to profile.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    /// Canonical identifier -> profile.
    profiles: HashMap<String, Arc<ExecutionProfile>>,
    /// Alias or canonical identifier -> canonical identifier.
    index: HashMap<String, String>,
}

impl LanguageRegistry {
    /// Build a registry from profiles, validating each one.
    ///
    /// Fails with `ProfileIncompatible` on a malformed profile or a
    /// duplicated identifier.
    pub fn new(profiles: impl IntoIterator<Item = ExecutionProfile>) -> Result<Self> {
        let mut registry = Self {
            profiles: HashMap::new(),
            index: HashMap::new(),
        };

        for profile in profiles {
            validate_profile(&profile)?;
            let canonical = normalize(&profile.language);

            for key in std::iter::once(&profile.language).chain(profile.aliases.iter()) {
                let key = normalize(key);
                if registry.index.contains_key(&key) {
                    return Err(Error::profile_incompatible(format!(
                        "language identifier '{}' is registered twice",
                        key
                    )));
                }
                registry.index.insert(key, canonical.clone());
            }

            tracing::debug!(language = %canonical, image = %profile.image, "Registering language profile");
            registry.profiles.insert(canonical, Arc::new(profile));
        }

        Ok(registry)
    }

    /// Registry holding the built-in profiles.
    pub fn builtin() -> Result<Self> {
        Self::new(ExecutionProfile::builtin())
    }

    /// Resolve an identifier (case-insensitive, aliases allowed).
    pub fn resolve(&self, language: &str) -> Result<Arc<ExecutionProfile>> {
        self.index
            .get(&normalize(language))
            .and_then(|canonical| self.profiles.get(canonical))
            .cloned()
            .ok_or_else(|| Error::unsupported_language(language.trim()))
    }

    /// Canonical identifiers, sorted.
    pub fn languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self.profiles.keys().cloned().collect();
        languages.sort();
        languages
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn normalize(language: &str) -> String {
    language.trim().to_ascii_lowercase()
}

fn validate_profile(profile: &ExecutionProfile) -> Result<()> {
    let lang = &profile.language;
    let incompatible = |msg: &str| Err(Error::profile_incompatible(format!("{}: {}", lang, msg)));

    // The canonical id ends up inside container names.
    let valid_id = lang
        .chars()
        .next()
        .map(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .unwrap_or(false)
        && lang
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !valid_id {
        return incompatible("identifier must match [a-z0-9][a-z0-9_-]*");
    }
    if profile.image.trim().is_empty() {
        return incompatible("image is empty");
    }
    if profile.run.is_empty() {
        return incompatible("run template is empty");
    }

    let code_slots = profile
        .run
        .iter()
        .chain(profile.compile.iter().flatten())
        .filter(|arg| arg.contains(PLACEHOLDER_CODE))
        .count();

    match &profile.compile {
        None => {
            // Program text must be exactly one whole argument.
            let whole = profile
                .run
                .iter()
                .filter(|arg| arg.as_str() == PLACEHOLDER_CODE)
                .count();
            if whole != 1 || code_slots != 1 {
                return incompatible("interpreted run template needs exactly one '{code}' argument");
            }
            if profile.source_file.is_some() {
                return incompatible("source_file is only meaningful with a compile step");
            }
        }
        Some(compile) => {
            if compile.is_empty() {
                return incompatible("compile template is empty");
            }
            if code_slots != 0 {
                return incompatible("compiled profiles take the program from '{source}', not '{code}'");
            }
            if !compile.iter().any(|arg| arg.contains(PLACEHOLDER_SOURCE)) {
                return incompatible("compile template is missing '{source}'");
            }
            let file = profile.source_file.as_deref().unwrap_or("");
            let valid_file = !file.is_empty()
                && file != "."
                && file != ".."
                && file
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
            if !valid_file {
                return incompatible("source_file must be a plain file name");
            }
        }
    }

    // Anything that looks like a placeholder must be one we substitute.
    for arg in profile.run.iter().chain(profile.compile.iter().flatten()) {
        let stripped = arg
            .replace(PLACEHOLDER_CODE, "")
            .replace(PLACEHOLDER_SOURCE, "")
            .replace(PLACEHOLDER_WORKDIR, "");
        if stripped.contains('{') && stripped.contains('}') {
            return incompatible(&format!("unknown placeholder in '{}'", arg));
        }
        if arg.contains('\0') {
            return incompatible("template contains a NUL byte");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interpreted(lang: &str, run: &[&str]) -> ExecutionProfile {
        ExecutionProfile {
            language: lang.into(),
            aliases: vec![],
            image: "img".into(),
            source_file: None,
            compile: None,
            run: run.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_builtin_resolves_aliases_case_insensitively() {
        let registry = LanguageRegistry::builtin().unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.resolve("Python").unwrap().language, "python");
        assert_eq!(registry.resolve(" py ").unwrap().language, "python");
        assert_eq!(registry.resolve("C++").unwrap().language, "cpp");
        assert_eq!(registry.resolve("java").unwrap().language, "java");
        assert_eq!(registry.languages(), vec!["c", "cpp", "java", "python"]);
    }

    #[test]
    fn test_unknown_language() {
        let registry = LanguageRegistry::builtin().unwrap();
        let err = registry.resolve("brainfuck").unwrap_err();
        assert!(matches!(err, Error::UnsupportedLanguage(ref l) if l == "brainfuck"));
    }

    #[test]
    fn test_rejects_interpreted_without_code_placeholder() {
        let err = LanguageRegistry::new(vec![interpreted("ruby", &["ruby", "main.rb"])]).unwrap_err();
        assert!(matches!(err, Error::ProfileIncompatible(_)));
    }

    #[test]
    fn test_rejects_embedded_code_placeholder() {
        let err = LanguageRegistry::new(vec![interpreted("ruby", &["ruby", "-e", "puts({code})"])])
            .unwrap_err();
        assert!(matches!(err, Error::ProfileIncompatible(_)));
    }

    #[test]
    fn test_rejects_compiled_without_source_placeholder() {
        let mut profile = ExecutionProfile::builtin().remove(2);
        profile.compile = Some(vec!["gcc".into(), "main.c".into()]);
        let err = LanguageRegistry::new(vec![profile]).unwrap_err();
        assert!(matches!(err, Error::ProfileIncompatible(_)));
    }

    #[test]
    fn test_rejects_path_in_source_file() {
        let mut profile = ExecutionProfile::builtin().remove(2);
        profile.source_file = Some("../etc/main.c".into());
        assert!(LanguageRegistry::new(vec![profile]).is_err());
    }

    #[test]
    fn test_rejects_unknown_placeholder() {
        let err = LanguageRegistry::new(vec![interpreted("ruby", &["ruby", "{binary}", "-e", "{code}"])])
            .unwrap_err();
        assert!(matches!(err, Error::ProfileIncompatible(_)));
    }

    #[test]
    fn test_rejects_identifier_unusable_in_names() {
        assert!(LanguageRegistry::new(vec![interpreted("c#", &["x", "{code}"])]).is_err());
        assert!(LanguageRegistry::new(vec![interpreted("", &["x", "{code}"])]).is_err());
    }

    #[test]
    fn test_rejects_duplicate_identifiers() {
        let mut a = interpreted("ruby", &["ruby", "-e", "{code}"]);
        a.aliases = vec!["rb".into()];
        let b = interpreted("rb", &["ruby", "-e", "{code}"]);
        assert!(LanguageRegistry::new(vec![a, b]).is_err());
    }
}
