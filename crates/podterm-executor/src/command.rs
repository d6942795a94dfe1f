//! Command building utilities.

use std::path::PathBuf;

use podterm_core::{DEFAULT_COMMAND, ExecTarget, ExecutionError};
use podterm_pty::{get_interactive_shell, resolve_executable_path};
use thiserror::Error;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    NotFound(String),
}

impl From<CommandBuildError> for ExecutionError {
    fn from(err: CommandBuildError) -> Self {
        match err {
            CommandBuildError::NotFound(program) => Self::NotFound(program),
            other => Self::SpawnFailed(other.to_string()),
        }
    }
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    #[must_use]
    pub const fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Resolve the program to an absolute path.
    ///
    /// # Errors
    /// Returns [`CommandBuildError::NotFound`] if the executable cannot be found.
    pub async fn into_resolved(self) -> Result<(PathBuf, Vec<String>), CommandBuildError> {
        let Self { program, args } = self;
        let executable = resolve_executable_path(&program)
            .await
            .ok_or(CommandBuildError::NotFound(program))?;
        Ok((executable, args))
    }
}

/// Builder for the command line run for a session.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    /// Base command line, shell-quoted.
    pub base: String,
    /// Arguments appended verbatim after the base.
    pub params: Option<Vec<String>>,
    /// Fall back to the user's shell when the base cannot be resolved.
    pub shell_fallback: bool,
}

impl CommandBuilder {
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self {
            base: base.into(),
            params: None,
            shell_fallback: false,
        }
    }

    /// Builder for the command a session asked for.
    ///
    /// The first element is the program; the rest are passed unsplit.
    /// Asking for the default shell falls back to the user's own shell when
    /// `/bin/bash` is missing.
    #[must_use]
    pub fn for_target(target: &ExecTarget) -> Self {
        let (program, args) = target
            .command
            .split_first()
            .map_or(("", &[][..]), |(p, rest)| (p.as_str(), rest));
        let base = shlex::try_quote(program).map_or_else(|_| program.to_string(), Into::into);
        let mut builder = Self::new(base).params(args.iter().cloned());
        builder.shell_fallback = target.command == [DEFAULT_COMMAND];
        builder
    }

    /// Add parameters.
    #[must_use]
    pub fn params<I>(mut self, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.params = Some(params.into_iter().map(Into::into).collect());
        self
    }

    /// Split the base and append parameters.
    ///
    /// # Errors
    /// Returns error if the base does not parse or the result is empty.
    pub fn build(&self) -> Result<CommandParts, CommandBuildError> {
        let mut parts =
            shlex::split(&self.base).ok_or_else(|| CommandBuildError::InvalidBase(self.base.clone()))?;
        if let Some(params) = &self.params {
            parts.extend(params.iter().cloned());
        }

        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }
        let program = parts.remove(0);
        Ok(CommandParts::new(program, parts))
    }

    /// Build and resolve to an executable path.
    ///
    /// # Errors
    /// Returns error if the command does not parse or cannot be found.
    pub async fn resolve(&self) -> Result<(PathBuf, Vec<String>), CommandBuildError> {
        match self.build()?.into_resolved().await {
            Err(CommandBuildError::NotFound(program)) if self.shell_fallback => {
                let shell = get_interactive_shell();
                tracing::debug!(%program, shell = %shell.display(), "falling back to user shell");
                Ok((shell, Vec::new()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_splits_base_and_appends_params() {
        let parts = CommandBuilder::new("sh -c")
            .params(["echo 'a b'", "--"])
            .build()
            .unwrap();
        assert_eq!(parts.program, "sh");
        assert_eq!(parts.args, vec!["-c", "echo 'a b'", "--"]);
    }

    #[test]
    fn test_build_rejects_empty_and_unbalanced() {
        assert!(matches!(
            CommandBuilder::new("  ").build(),
            Err(CommandBuildError::EmptyCommand)
        ));
        assert!(matches!(
            CommandBuilder::new("sh 'unterminated").build(),
            Err(CommandBuildError::InvalidBase(_))
        ));
    }

    #[test]
    fn test_for_target_keeps_args_unsplit() {
        let target = ExecTarget::new("default", "web-0", "")
            .with_command(["/bin/sh", "-c", "echo hi there"]);
        let builder = CommandBuilder::for_target(&target);
        assert!(!builder.shell_fallback);
        let parts = builder.build().unwrap();
        assert_eq!(parts.program, "/bin/sh");
        assert_eq!(parts.args, vec!["-c", "echo hi there"]);

        let default = ExecTarget::new("default", "web-0", "");
        assert!(CommandBuilder::for_target(&default).shell_fallback);
    }

    #[tokio::test]
    async fn test_missing_executable_is_not_found() {
        let err = CommandBuilder::new("definitely-not-a-real-binary-4821")
            .resolve()
            .await
            .unwrap_err();
        assert!(matches!(&err, CommandBuildError::NotFound(p) if p == "definitely-not-a-real-binary-4821"));
        assert!(matches!(ExecutionError::from(err), ExecutionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_default_shell_falls_back() {
        let mut builder = CommandBuilder::new("/no/such/bash");
        builder.shell_fallback = true;
        let (program, args) = builder.resolve().await.unwrap();
        assert_eq!(program, get_interactive_shell());
        assert!(args.is_empty());
    }
}
