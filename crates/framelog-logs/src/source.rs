use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// `[user@]host:path`
static REMOTE_LOCATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((\w+@)?.+):(.+)$").expect("remote locator pattern is valid")
});

/// Errors from opening a log source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to spawn {program:?} to follow {locator}: {source}")]
    Spawn {
        program: String,
        locator: String,
        #[source]
        source: std::io::Error,
    },

    #[error("follower for {0} has no stdout pipe")]
    NoOutput(String),
}

/// Where the followed log lives
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceLocator {
    Local(PathBuf),
    Remote { address: String, path: String },
}

impl SourceLocator {
    /// Classify a locator string.
    ///
    /// Anything of the form `address:path` is remote (the address may carry a
    /// `user@` prefix); everything else is a local path.
    pub fn parse(locator: &str) -> Self {
        match REMOTE_LOCATOR.captures(locator) {
            Some(caps) => Self::Remote {
                address: caps[1].to_string(),
                path: caps[3].to_string(),
            },
            None => Self::Local(PathBuf::from(locator)),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

impl FromStr for SourceLocator {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote { address, path } => write!(f, "{}:{}", address, path),
        }
    }
}

/// Builds the follower process for a locator.
///
/// Both followers emit the file from byte zero and keep following appends
/// (`tail -F -c +0`); the remote one runs the same tail through ssh.
#[derive(Clone, Debug)]
pub struct FollowCommand {
    pub tail_program: String,
    pub ssh_program: String,
}

impl Default for FollowCommand {
    fn default() -> Self {
        Self {
            tail_program: "tail".to_string(),
            ssh_program: "ssh".to_string(),
        }
    }
}

impl FollowCommand {
    pub fn command(&self, locator: &SourceLocator) -> Command {
        let mut command = match locator {
            SourceLocator::Local(path) => {
                let mut command = Command::new(&self.tail_program);
                command.args(["-F", "-c", "+0"]).arg(path);
                command
            }
            SourceLocator::Remote { address, path } => {
                let mut command = Command::new(&self.ssh_program);
                command.arg(address).arg(format!(
                    "{} -F -c +0 {}",
                    self.tail_program,
                    shell_quote(path)
                ));
                command
            }
        };
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        command
    }

    /// Spawn the follower
    pub fn spawn(&self, locator: &SourceLocator) -> Result<FollowedSource, SourceError> {
        let mut command = self.command(locator);
        let program = command.get_program().to_string_lossy().into_owned();
        tracing::info!(%locator, %program, remote = locator.is_remote(), "following log source");

        let mut child = command.spawn().map_err(|source| SourceError::Spawn {
            program,
            locator: locator.to_string(),
            source,
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::NoOutput(locator.to_string()))?;

        Ok(FollowedSource {
            child,
            stdout: Some(stdout),
        })
    }
}

/// A running follower process and its output pipe
pub struct FollowedSource {
    child: Child,
    stdout: Option<ChildStdout>,
}

impl FollowedSource {
    /// Take the output pipe; the process handle stays here so it can be killed
    pub fn take_reader(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Kill the follower, which closes its pipe and ends any blocked read
    pub fn kill(&mut self) -> std::io::Result<()> {
        match self.child.kill() {
            Ok(()) => {}
            // already exited
            Err(e) if e.kind() == ErrorKind::InvalidInput => {}
            Err(e) => return Err(e),
        }
        self.child.wait().map(|_| ())
    }
}

impl Drop for FollowedSource {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            tracing::debug!(error = %e, "failed to stop log follower");
        }
    }
}

fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}
