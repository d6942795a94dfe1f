//! Shell detection and executable resolution.

use std::{
    collections::HashSet,
    env::{join_paths, split_paths},
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use tokio::process::Command;

const PATH_REFRESH_TIMEOUT: Duration = Duration::from_secs(5);

/// Returns the user's interactive shell from `$SHELL`, or `/bin/sh`.
#[must_use]
pub fn get_interactive_shell() -> PathBuf {
    UnixShell::current_shell().path().to_path_buf()
}

/// Resolve an executable by name.
///
/// Explicit paths are taken as-is when they point at a file. Bare names are
/// looked up on the process `PATH`, then on the `PATH` a login shell reports,
/// since a server started by a service manager often runs with a minimal one.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    let executable = executable.trim();
    if executable.is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }

    let current = std::env::var_os("PATH").unwrap_or_default();
    if let Some(found) = which_in(executable, current.clone()).await {
        return Some(found);
    }

    let login = login_shell_path().await?;
    let merged = merge_paths(&current, &login);
    if merged == current {
        return None;
    }
    tracing::debug!(executable, path = ?merged, "retrying lookup with login shell PATH");
    which_in(executable, merged).await
}

/// Merge two PATH strings into a single, de-duplicated PATH.
#[must_use]
pub fn merge_paths(primary: impl AsRef<OsStr>, secondary: impl AsRef<OsStr>) -> OsString {
    let mut seen = HashSet::<PathBuf>::new();
    let merged: Vec<PathBuf> = split_paths(primary.as_ref())
        .chain(split_paths(secondary.as_ref()))
        .filter(|p| !p.as_os_str().is_empty() && seen.insert(p.clone()))
        .collect();

    join_paths(merged).unwrap_or_default()
}

async fn which_in(executable: &str, paths: OsString) -> Option<PathBuf> {
    let executable = executable.to_string();
    let cwd = std::env::current_dir().ok()?;
    tokio::task::spawn_blocking(move || which::which_in(executable, Some(paths), cwd))
        .await
        .ok()
        .and_then(Result::ok)
}

/// `PATH` as seen by the user's login shell.
async fn login_shell_path() -> Option<OsString> {
    let shell = UnixShell::current_shell();
    let mut cmd = Command::new(shell.path());
    if shell.login() {
        cmd.arg("-l");
    }
    let script = match shell.source_command() {
        Some(source) => format!("{source}; printf '%s' \"$PATH\""),
        None => "printf '%s' \"$PATH\"".to_string(),
    };
    cmd.arg("-c")
        .arg(script)
        .env("TERM", "dumb")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let child = cmd.spawn().ok()?;
    let output = match tokio::time::timeout(PATH_REFRESH_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(_)) => return None,
        Ok(Err(err)) => {
            tracing::debug!(shell = %shell.path().display(), ?err, "login shell failed");
            return None;
        }
        Err(_) => {
            tracing::warn!(shell = %shell.path().display(), "timed out reading login shell PATH");
            return None;
        }
    };

    let path = String::from_utf8(output.stdout).ok()?;
    let path = path.trim();
    (!path.is_empty()).then(|| OsString::from(path))
}

/// Unix shell types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnixShell {
    Zsh(PathBuf),
    Bash(PathBuf),
    Sh(PathBuf),
    Other(PathBuf),
}

impl UnixShell {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Zsh(p) | Self::Bash(p) | Self::Sh(p) | Self::Other(p) => p,
        }
    }

    /// Whether this shell supports login mode.
    #[must_use]
    pub const fn login(&self) -> bool {
        matches!(self, Self::Zsh(_) | Self::Bash(_))
    }

    /// The rc file this shell reads, if present.
    #[must_use]
    pub fn config_file(&self) -> Option<PathBuf> {
        let home = dirs::home_dir()?;
        let config_file = match self {
            Self::Zsh(_) => home.join(".zshrc"),
            Self::Bash(_) => home.join(".bashrc"),
            Self::Sh(_) | Self::Other(_) => return None,
        };
        config_file.is_file().then_some(config_file)
    }

    /// `source <rc file>`, shell-quoted.
    #[must_use]
    pub fn source_command(&self) -> Option<String> {
        let file = self.config_file()?;
        let escaped = shlex::try_quote(file.to_str()?).ok()?;
        Some(format!("source {escaped}"))
    }

    /// Get the current shell from `$SHELL`.
    #[must_use]
    pub fn current_shell() -> Self {
        std::env::var_os("SHELL")
            .and_then(|shell| Self::from_path(Path::new(&shell)))
            .unwrap_or_else(|| Self::Sh(PathBuf::from("/bin/sh")))
    }

    /// Classify an absolute path to an existing file.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        if !path.is_absolute() || !path.is_file() {
            return None;
        }
        let path_buf = path.to_path_buf();
        Some(match path.file_name().and_then(OsStr::to_str) {
            Some("zsh") => Self::Zsh(path_buf),
            Some("bash") => Self::Bash(path_buf),
            Some("sh") => Self::Sh(path_buf),
            _ => Self::Other(path_buf),
        })
    }
}
