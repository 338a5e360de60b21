//! Process supervisor - owns the interpreter subprocess.
//!
//! The pending process is described by a [`ProcessSpec`] that an ordered list
//! of [`ConfigStep`]s mutates before launch. Steps run in order and the first
//! failure aborts configuration, naming the step by its 1-indexed position.

use std::ffi::OsString;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::bootstrap;
use crate::error::{BridgeError, Result, StepError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StdioMode {
    #[default]
    Inherit,
    Piped,
    Null,
}

impl From<StdioMode> for Stdio {
    fn from(mode: StdioMode) -> Self {
        match mode {
            StdioMode::Inherit => Stdio::inherit(),
            StdioMode::Piped => Stdio::piped(),
            StdioMode::Null => Stdio::null(),
        }
    }
}

/// Description of the process to launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    /// Replacement environment; `None` inherits the host's.
    pub env: Option<Vec<(OsString, OsString)>>,
    pub stdin: StdioMode,
    pub stdout: StdioMode,
    pub stderr: StdioMode,
}

/// One mutation of the pending [`ProcessSpec`].
///
/// Implemented for any `FnOnce(&mut ProcessSpec) -> Result<(), StepError>`.
pub trait ConfigStep: Send {
    fn apply(self: Box<Self>, spec: &mut ProcessSpec) -> Result<(), StepError>;
}

impl<F> ConfigStep for F
where
    F: FnOnce(&mut ProcessSpec) -> Result<(), StepError> + Send,
{
    fn apply(self: Box<Self>, spec: &mut ProcessSpec) -> Result<(), StepError> {
        (*self)(spec)
    }
}

/// Append arguments. Cumulative across steps.
pub fn with_args<I, S>(args: I) -> Box<dyn ConfigStep>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    Box::new(move |spec: &mut ProcessSpec| -> Result<(), StepError> {
        spec.args.extend(args);
        Ok(())
    })
}

/// Set the interpreter executable.
pub fn with_path(path: impl Into<OsString>) -> Box<dyn ConfigStep> {
    let path = path.into();
    Box::new(move |spec: &mut ProcessSpec| -> Result<(), StepError> {
        if path.is_empty() {
            return Err(StepError::invalid("interpreter path is empty"));
        }
        spec.program = path;
        Ok(())
    })
}

/// Replace the child's environment wholesale.
pub fn with_env<I, K, V>(vars: I) -> Box<dyn ConfigStep>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<OsString>,
    V: Into<OsString>,
{
    let vars: Vec<(OsString, OsString)> = vars
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    Box::new(move |spec: &mut ProcessSpec| -> Result<(), StepError> {
        if vars.iter().any(|(k, _)| k.is_empty()) {
            return Err(StepError::invalid("empty environment variable name"));
        }
        spec.env = Some(vars);
        Ok(())
    })
}

/// Capture stdin, stdout and stderr.
pub fn piped_stdio() -> Box<dyn ConfigStep> {
    Box::new(|spec: &mut ProcessSpec| -> Result<(), StepError> {
        spec.stdin = StdioMode::Piped;
        spec.stdout = StdioMode::Piped;
        spec.stderr = StdioMode::Piped;
        Ok(())
    })
}

/// Steps every interpreter gets before the caller's: executable, bootstrap
/// injection, pipes.
pub fn default_steps(program: OsString) -> Vec<Box<dyn ConfigStep>> {
    vec![
        with_path(program),
        with_args(bootstrap::startup_args()),
        piped_stdio(),
    ]
}

/// Stream handles taken from a freshly spawned child.
pub struct ChildStreams {
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

pub struct Supervisor {
    spec: ProcessSpec,
    child: Option<Child>,
}

impl Supervisor {
    /// Apply `steps` in order to an empty [`ProcessSpec`].
    pub fn configure<I>(steps: I) -> Result<Self>
    where
        I: IntoIterator<Item = Box<dyn ConfigStep>>,
    {
        let mut spec = ProcessSpec::default();
        for (i, step) in steps.into_iter().enumerate() {
            step.apply(&mut spec).map_err(|source| {
                tracing::debug!(step = i + 1, error = %source, "Configuration step failed");
                BridgeError::Config {
                    step: i + 1,
                    source,
                }
            })?;
        }
        Ok(Self { spec, child: None })
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Spawn the child. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<ChildStreams> {
        if self.child.is_some() {
            return Err(BridgeError::InvalidStart("process already started".to_string()));
        }

        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&self.spec.args)
            .stdin(Stdio::from(self.spec.stdin))
            .stdout(Stdio::from(self.spec.stdout))
            .stderr(Stdio::from(self.spec.stderr))
            .kill_on_drop(true);
        if let Some(ref env) = self.spec.env {
            cmd.env_clear().envs(env.iter().map(|(k, v)| (k, v)));
        }

        let program = self.spec.program.to_string_lossy().into_owned();
        let mut child = cmd.spawn().map_err(|source| BridgeError::Start {
            program: program.clone(),
            source,
        })?;

        tracing::info!(pid = child.id(), %program, args = self.spec.args.len(), "Interpreter spawned");

        let streams = ChildStreams {
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
        };
        self.child = Some(child);
        Ok(streams)
    }

    /// Block until the child exits. A second call reports `NotRunning`.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let mut child = self.child.take().ok_or(BridgeError::NotRunning)?;
        let status = child.wait().await.map_err(BridgeError::Wait)?;
        tracing::info!(%status, "Interpreter exited");
        Ok(status)
    }

    /// Kill the child and reap it.
    pub async fn terminate(&mut self) -> Result<()> {
        let mut child = self
            .child
            .take()
            .ok_or_else(|| BridgeError::Kill("no process to kill".to_string()))?;
        let pid = child.id();
        child
            .kill()
            .await
            .map_err(|e| BridgeError::Kill(e.to_string()))?;
        tracing::info!(pid, "Interpreter killed");
        Ok(())
    }
}
