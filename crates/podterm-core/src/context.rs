//! Session establishment parameters.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

/// Command run when the client does not ask for one.
pub const DEFAULT_COMMAND: &str = "/bin/bash";

/// Terminal dimensions, as negotiated with the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
}

impl TerminalSize {
    #[must_use]
    pub const fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

impl fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// The process a terminal session attaches to.
///
/// Supplied by the surrounding service when the session is established;
/// the bridge never looks these values up itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecTarget {
    pub namespace: String,
    pub pod: String,
    /// Container within the pod. Empty means the pod's default container.
    #[serde(default)]
    pub container: String,
    /// Initial command (program followed by arguments).
    #[serde(default = "default_command")]
    pub command: Vec<String>,
    /// Whether terminal size negotiation applies.
    #[serde(default = "default_tty")]
    pub tty: bool,
}

fn default_command() -> Vec<String> {
    vec![DEFAULT_COMMAND.to_string()]
}

const fn default_tty() -> bool {
    true
}

impl ExecTarget {
    /// Create a target running the default shell with a TTY.
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
            command: default_command(),
            tty: true,
        }
    }

    /// Replace the initial command.
    #[must_use]
    pub fn with_command<I>(mut self, command: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Set the TTY flag.
    #[must_use]
    pub const fn with_tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Path of the pod `exec` sub-resource this target maps to.
    ///
    /// stdin, stdout and stderr are always requested; stderr is merged into
    /// the single output stream the client sees.
    #[must_use]
    pub fn exec_path(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.extend_pairs(self.command.iter().map(|arg| ("command", arg)));
        if !self.container.is_empty() {
            query.append_pair("container", &self.container);
        }
        query
            .append_pair("stderr", "true")
            .append_pair("stdin", "true")
            .append_pair("stdout", "true")
            .append_pair("tty", if self.tty { "true" } else { "false" });

        format!(
            "/api/v1/namespaces/{}/pods/{}/exec?{}",
            segment(&self.namespace),
            segment(&self.pod),
            query.finish(),
        )
    }
}

impl fmt::Display for ExecTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod)?;
        if !self.container.is_empty() {
            write!(f, "/{}", self.container)?;
        }
        Ok(())
    }
}

/// Namespace and pod names are DNS labels, so form encoding is exact here.
fn segment(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_path_matches_pod_exec_url() {
        let target = ExecTarget::new("default", "nginx-778d88d7c-7rmsk", "nginx");
        assert_eq!(
            target.exec_path(),
            "/api/v1/namespaces/default/pods/nginx-778d88d7c-7rmsk/exec?\
             command=%2Fbin%2Fbash&container=nginx&stderr=true&stdin=true&stdout=true&tty=true"
        );
    }

    #[test]
    fn test_exec_path_repeats_command_args() {
        let target = ExecTarget::new("ns", "pod", "")
            .with_command(["sh", "-c", "echo hi"])
            .with_tty(false);
        let path = target.exec_path();
        assert!(path.contains("command=sh&command=-c&command=echo+hi&"));
        assert!(!path.contains("container="));
        assert!(path.ends_with("tty=false"));
    }

    #[test]
    fn test_target_deserialize_defaults() {
        let target: ExecTarget =
            serde_json::from_str(r#"{"namespace":"kube-system","pod":"coredns"}"#).unwrap();
        assert_eq!(target.command, vec![DEFAULT_COMMAND.to_string()]);
        assert!(target.tty);
        assert_eq!(target.to_string(), "kube-system/coredns");
    }
}
