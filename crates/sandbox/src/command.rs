//! Command builder.
//!
//! Turns a profile plus untrusted program text into the argument vector a
//! sandbox runs. Program text and stdin never become part of any script
//! text: they are passed as positional parameters of a constant `sh` script
//! (`$1` is stdin, `$2` is the program) and only ever expanded inside double
//! quotes, so the shell treats them as opaque bytes. Template arguments come
//! from trusted configuration and are single-quoted anyway.

use code_runner_core::{
    Error, ExecutionProfile, Result, PLACEHOLDER_CODE, PLACEHOLDER_SOURCE, PLACEHOLDER_WORKDIR,
};

/// Shell used to sequence steps inside the sandbox.
const SHELL: &str = "/bin/sh";

/// Program text inside a rendered script.
const SOURCE_PARAM: &str = "\"$2\"";

/// Standard input inside a rendered script.
const STDIN_PARAM: &str = "\"$1\"";

/// What the sandbox is told to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSequence {
    /// Argument vector, `argv[0]` first. Passed to the runtime as-is.
    pub argv: Vec<String>,
    /// Request-private directory under the scratch mount.
    pub workdir: String,
}

/// Builds injection-safe commands for one runner configuration.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    scratch_dir: String,
    max_source_bytes: usize,
    max_stdin_bytes: usize,
}

impl CommandBuilder {
    pub fn new(scratch_dir: impl Into<String>, max_source_bytes: usize, max_stdin_bytes: usize) -> Self {
        Self {
            scratch_dir: scratch_dir.into().trim_end_matches('/').to_string(),
            max_source_bytes,
            max_stdin_bytes,
        }
    }

    /// Build the command for `source` under `profile`.
    ///
    /// `run_id` names the request's private directory and must be a plain
    /// token (letters, digits, `-`).
    pub fn build(
        &self,
        profile: &ExecutionProfile,
        source: &str,
        stdin: Option<&str>,
        run_id: &str,
    ) -> Result<CommandSequence> {
        check_payload("source", source, self.max_source_bytes)?;
        if let Some(stdin) = stdin {
            check_payload("stdin", stdin, self.max_stdin_bytes)?;
        }
        if run_id.is_empty() || !run_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(Error::internal("run id is not a plain token"));
        }

        let workdir = format!("{}/{}", self.scratch_dir, run_id);

        let argv = match &profile.compile {
            None => self.interpreted(profile, source, stdin, &workdir)?,
            Some(compile) => self.compiled(profile, compile, source, stdin.unwrap_or(""), &workdir)?,
        };

        Ok(CommandSequence { argv, workdir })
    }

    fn interpreted(
        &self,
        profile: &ExecutionProfile,
        source: &str,
        stdin: Option<&str>,
        workdir: &str,
    ) -> Result<Vec<String>> {
        let slots = profile.run.iter().filter(|a| a.as_str() == PLACEHOLDER_CODE).count();
        if slots != 1 {
            return Err(Error::profile_incompatible(format!(
                "{}: interpreted run template needs exactly one '{{code}}' argument",
                profile.language
            )));
        }

        let uses_workdir = profile.run.iter().any(|a| a.contains(PLACEHOLDER_WORKDIR));

        // Direct exec: the interpreter receives the program as one argument.
        if stdin.is_none() && !uses_workdir {
            return Ok(profile
                .run
                .iter()
                .map(|arg| {
                    if arg == PLACEHOLDER_CODE {
                        source.to_string()
                    } else {
                        arg.clone()
                    }
                })
                .collect());
        }

        let mut script = prelude(workdir);
        script.push_str(&format!(
            "printf '%s' {} | {}\n",
            STDIN_PARAM,
            render_line(&profile.run, workdir, None)
        ));

        Ok(wrap(script, stdin.unwrap_or(""), source))
    }

    fn compiled(
        &self,
        profile: &ExecutionProfile,
        compile: &[String],
        source: &str,
        stdin: &str,
        workdir: &str,
    ) -> Result<Vec<String>> {
        let file = profile.source_file.as_deref().ok_or_else(|| {
            Error::profile_incompatible(format!("{}: compiled profile has no source_file", profile.language))
        })?;
        if !compile.iter().any(|a| a.contains(PLACEHOLDER_SOURCE)) {
            return Err(Error::profile_incompatible(format!(
                "{}: compile template is missing '{{source}}'",
                profile.language
            )));
        }
        let source_path = format!("{}/{}", workdir, file);

        let mut script = prelude(workdir);
        script.push_str(&format!(
            "printf '%s' {} > {}\n",
            SOURCE_PARAM,
            shell_quote(&source_path)
        ));
        script.push_str(&render_line(compile, workdir, Some(&source_path)));
        script.push('\n');
        script.push_str(&format!(
            "printf '%s' {} | {}\n",
            STDIN_PARAM,
            render_line(&profile.run, workdir, Some(&source_path))
        ));

        Ok(wrap(script, stdin, source))
    }
}

fn check_payload(what: &str, payload: &str, max: usize) -> Result<()> {
    if payload.len() > max {
        return Err(Error::invalid_request(format!(
            "{} is {} bytes, limit is {}",
            what,
            payload.len(),
            max
        )));
    }
    if payload.contains('\0') {
        return Err(Error::invalid_request(format!("{} contains a NUL byte", what)));
    }
    Ok(())
}

fn prelude(workdir: &str) -> String {
    let dir = shell_quote(workdir);
    format!("set -e\numask 077\nmkdir -p -- {dir}\ncd -- {dir}\n")
}

/// `sh -c SCRIPT sh STDIN SOURCE`
fn wrap(script: String, stdin: &str, source: &str) -> Vec<String> {
    vec![
        SHELL.to_string(),
        "-c".to_string(),
        script,
        "sh".to_string(),
        stdin.to_string(),
        source.to_string(),
    ]
}

/// Render a template as one shell command line.
fn render_line(template: &[String], workdir: &str, source_path: Option<&str>) -> String {
    template
        .iter()
        .map(|arg| {
            if arg == PLACEHOLDER_CODE {
                SOURCE_PARAM.to_string()
            } else {
                shell_quote(&substitute(arg, workdir, source_path))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn substitute(arg: &str, workdir: &str, source_path: Option<&str>) -> String {
    let arg = arg.replace(PLACEHOLDER_WORKDIR, workdir);
    match source_path {
        Some(path) => arg.replace(PLACEHOLDER_SOURCE, path),
        None => arg,
    }
}

/// Quote `s` as a single POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
