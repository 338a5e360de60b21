//! Interpreter bridge - the public handle to one interpreter subprocess.
//!
//! Lifecycle:
//! 1. [`InterpBuilder`] collects configuration (unconfigured)
//! 2. [`InterpBuilder::build`] applies default then caller steps (configured)
//! 3. [`Interp::start`] spawns the child and takes its pipes (running)
//! 4. `run` / `get` / `set` each perform one request/response exchange
//! 5. [`Interp::close`], [`Interp::wait`] or [`Interp::shutdown`] end it (closed)
//!
//! Operations outside the running state fail with
//! [`BridgeError::NotRunning`] before touching any stream.

use std::ffi::OsString;
use std::process::ExitStatus;

use serde::{Serialize, de::DeserializeOwned};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};

use crate::bridge::channel::Channel;
use crate::bridge::protocol::{Command, Response};
use crate::config::InterpConfig;
use crate::error::{BridgeError, Result};
use crate::supervisor::{
    ConfigStep, StdioMode, Supervisor, default_steps, with_args, with_env, with_path,
};

/// Collects configuration for an [`Interp`].
///
/// Caller steps run after the defaults (executable, bootstrap, pipes), so
/// they can override the executable and environment or append arguments but
/// never remove the bootstrap.
pub struct InterpBuilder {
    config: InterpConfig,
    steps: Vec<Box<dyn ConfigStep>>,
}

impl Default for InterpBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InterpBuilder {
    pub fn new() -> Self {
        Self {
            config: InterpConfig::default(),
            steps: Vec::new(),
        }
    }

    pub fn config(mut self, config: InterpConfig) -> Self {
        self.config = config;
        self
    }

    pub fn step(self, step: impl ConfigStep + 'static) -> Self {
        self.boxed_step(Box::new(step))
    }

    fn boxed_step(mut self, step: Box<dyn ConfigStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.boxed_step(with_args(args))
    }

    pub fn with_path(self, path: impl Into<OsString>) -> Self {
        self.boxed_step(with_path(path))
    }

    pub fn with_env<I, K, V>(self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.boxed_step(with_env(vars))
    }

    pub fn build(self) -> Result<Interp> {
        let mut steps = default_steps(self.config.program.clone());
        steps.extend(self.steps);
        let supervisor = Supervisor::configure(steps)?;

        Ok(Interp {
            config: self.config,
            supervisor,
            state: State::Configured,
        })
    }
}

enum State {
    Configured,
    Running(Running),
    Closed,
}

struct Running {
    channel: Channel<ChildStdout, ChildStdin>,
    stderr: Option<ChildStderr>,
}

/// Handle to one interpreter subprocess.
///
/// Every operation takes `&mut self`, so at most one request is in flight.
/// Wrap in a `tokio::sync::Mutex` to share between tasks. The child is
/// killed if the handle is dropped while it is running.
pub struct Interp {
    config: InterpConfig,
    supervisor: Supervisor,
    state: State,
}

impl Interp {
    /// Configure an interpreter with default settings.
    pub fn new() -> Result<Self> {
        InterpBuilder::new().build()
    }

    pub fn builder() -> InterpBuilder {
        InterpBuilder::new()
    }

    pub fn config(&self) -> &InterpConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running(_))
    }

    /// Child process id while running.
    pub fn id(&self) -> Option<u32> {
        self.supervisor.id()
    }

    /// The child's stderr, for diagnostics. Nothing in the bridge reads it, so
    /// a child that writes more than a pipe buffer's worth blocks until it is
    /// drained.
    pub fn stderr(&mut self) -> Option<&mut ChildStderr> {
        match &mut self.state {
            State::Running(running) => running.stderr.as_mut(),
            _ => None,
        }
    }

    /// Spawn the interpreter. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            State::Configured => {}
            State::Running(_) => {
                return Err(BridgeError::InvalidStart("already started".to_string()));
            }
            State::Closed => {
                return Err(BridgeError::InvalidStart("already closed".to_string()));
            }
        }

        let spec = self.supervisor.spec();
        if spec.stdin != StdioMode::Piped || spec.stdout != StdioMode::Piped {
            return Err(BridgeError::InvalidStart(
                "stdin and stdout must be piped".to_string(),
            ));
        }

        let streams = self.supervisor.start()?;
        let (Some(stdin), Some(stdout)) = (streams.stdin, streams.stdout) else {
            return Err(BridgeError::InvalidStart(
                "stdin/stdout not captured".to_string(),
            ));
        };

        let mut channel =
            Channel::with_max_frame_length(stdout, stdin, self.config.max_frame_length);
        channel.set_timeout(self.config.request_timeout);

        self.state = State::Running(Running {
            channel,
            stderr: streams.stderr,
        });
        Ok(())
    }

    /// Send one frame and read one response, without interpreting it.
    ///
    /// `error` responses come back as [`Response::Error`]. Useful for frames
    /// the typed operations do not cover. A timeout or broken stream closes
    /// the handle.
    pub async fn exchange<C: Serialize>(&mut self, frame: C) -> Result<Response> {
        let State::Running(running) = &mut self.state else {
            return Err(BridgeError::NotRunning);
        };

        let result = running.channel.exchange(frame).await;
        match result {
            // A late reply would desynchronize the stream.
            Err(BridgeError::Timeout(limit)) => {
                tracing::warn!(pid = self.supervisor.id(), ?limit, "Request timed out, killing interpreter");
                self.abandon().await;
                Err(BridgeError::Timeout(limit))
            }
            // The child exited, or a frame could not be decoded and its body
            // is still in the pipe.
            Err(BridgeError::Io(e)) => {
                tracing::warn!(pid = self.supervisor.id(), error = %e, "Interpreter stream broken, closing");
                self.abandon().await;
                Err(BridgeError::Io(e))
            }
            other => other,
        }
    }

    /// Drop the streams and kill the child. Later operations fail with
    /// [`BridgeError::NotRunning`].
    async fn abandon(&mut self) {
        self.state = State::Closed;
        if let Err(e) = self.supervisor.terminate().await {
            tracing::warn!(error = %e, "Failed to kill interpreter");
        }
    }

    /// Execute script text and return what it printed to stdout.
    pub async fn run(&mut self, script: &str) -> Result<String> {
        tracing::debug!(script_bytes = script.len(), "run");
        match self.exchange(Command::run(script)).await?.into_result()? {
            Response::Run { output } => Ok(cap_output(output, self.config.max_run_output)),
            other => Err(unexpected("run", &other)),
        }
    }

    pub async fn get(&mut self, name: &str) -> Result<serde_json::Value> {
        let cmd = Command::get(name)?;
        tracing::debug!(var = name, "get");
        match self.exchange(cmd).await?.into_result()? {
            Response::Get { var, value } if var == name => Ok(value),
            Response::Get { var, .. } => Err(BridgeError::Protocol(format!(
                "asked for `{}`, got `{}`",
                name, var
            ))),
            other => Err(unexpected("get", &other)),
        }
    }

    /// [`get`](Self::get) decoded into `T`.
    pub async fn get_as<T: DeserializeOwned>(&mut self, name: &str) -> Result<T> {
        let value = self.get(name).await?;
        serde_json::from_value(value).map_err(|source| BridgeError::Decoding {
            var: name.to_string(),
            source,
        })
    }

    /// Bind `name` to `value` in the interpreter and wait for the acknowledgement.
    pub async fn set<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<()> {
        let cmd = Command::set(name, value)?;
        tracing::debug!(var = name, "set");
        match self.exchange(cmd).await?.into_result()? {
            Response::Set => Ok(()),
            other => Err(unexpected("set", &other)),
        }
    }

    /// Close the child's stdin and wait for it to exit.
    ///
    /// The bootstrap loop ends on EOF, so this is a clean exit unless a
    /// script is still running.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Running(running) => {
                drop(running);
                self.supervisor.wait().await
            }
            previous => {
                self.state = previous;
                Err(BridgeError::NotRunning)
            }
        }
    }

    /// Ask the bootstrap loop to exit, then wait for the process.
    pub async fn shutdown(&mut self) -> Result<ExitStatus> {
        match self.exchange(Command::Shutdown).await?.into_result()? {
            Response::ShuttingDown => self.wait().await,
            other => Err(unexpected("shutdown", &other)),
        }
    }

    /// Forcibly kill the interpreter.
    pub async fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Running(running) => {
                drop(running);
                self.supervisor.terminate().await
            }
            State::Configured => {
                self.state = State::Configured;
                Err(BridgeError::Kill("interpreter was never started".to_string()))
            }
            State::Closed => Err(BridgeError::Kill("interpreter already closed".to_string())),
        }
    }
}

fn unexpected(op: &str, response: &Response) -> BridgeError {
    BridgeError::Protocol(format!(
        "unexpected `{}` response to `{}`",
        response.kind(),
        op
    ))
}

/// Cut `output` to at most `limit` bytes on a char boundary.
fn cap_output(mut output: String, limit: Option<usize>) -> String {
    if let Some(limit) = limit
        && output.len() > limit
    {
        let mut cut = limit;
        while !output.is_char_boundary(cut) {
            cut -= 1;
        }
        tracing::warn!(output_bytes = output.len(), limit, "Run output truncated");
        output.truncate(cut);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LEGACY_READ_SIZE;
    use crate::error::StepError;
    use crate::supervisor::ProcessSpec;

    fn configured() -> Interp {
        Interp::builder()
            .config(InterpConfig::new().with_program("python3"))
            .build()
            .unwrap()
    }

    #[test]
    fn cap_output_keeps_short_output() {
        assert_eq!(cap_output("hello\n".to_string(), Some(1024)), "hello\n");
        assert_eq!(cap_output("x".repeat(5000), None).len(), 5000);
    }

    #[test]
    fn cap_output_cuts_at_limit() {
        let out = cap_output("x".repeat(2000), Some(LEGACY_READ_SIZE));
        assert_eq!(out, "x".repeat(LEGACY_READ_SIZE));
    }

    #[test]
    fn cap_output_respects_char_boundaries() {
        // 'é' is two bytes; a 3-byte cap must not split the second one.
        assert_eq!(cap_output("éé".to_string(), Some(3)), "é");
    }

    #[test]
    fn caller_steps_follow_defaults() {
        let interp = Interp::builder()
            .config(InterpConfig::new().with_program("python3"))
            .with_path("/usr/local/bin/python3")
            .with_args(["one"])
            .with_args(vec![String::from("two")])
            .with_env(vec![(String::from("LANG"), String::from("C"))])
            .build()
            .unwrap();

        let spec = interp.supervisor().spec();
        assert_eq!(spec.program, OsString::from("/usr/local/bin/python3"));
        assert_eq!(spec.args.len(), 4);
        assert_eq!(spec.args[0], "-c");
        assert_eq!(spec.args[2], "one");
        assert_eq!(spec.args[3], "two");
        assert_eq!(
            spec.env,
            Some(vec![(OsString::from("LANG"), OsString::from("C"))])
        );
    }

    #[test]
    fn failing_caller_step_is_numbered_after_defaults() {
        let err = Interp::builder()
            .with_args(["fine"])
            .step(|_: &mut ProcessSpec| -> Result<(), StepError> {
                Err(StepError::other("nope"))
            })
            .build()
            .err()
            .unwrap();

        // Three default steps, then "fine", then the failing one.
        assert!(matches!(err, BridgeError::Config { step: 5, .. }));
    }

    #[tokio::test]
    async fn operations_before_start_are_not_running() {
        let mut interp = configured();
        assert!(!interp.is_running());

        assert!(interp.run("print(1)").await.unwrap_err().is_not_running());
        assert!(interp.get("x").await.unwrap_err().is_not_running());
        assert!(interp.set("x", &1).await.unwrap_err().is_not_running());
        assert!(interp.wait().await.unwrap_err().is_not_running());
        assert!(matches!(interp.close().await, Err(BridgeError::Kill(_))));

        // Still startable afterwards.
        assert!(matches!(interp.state, State::Configured));
    }

    #[tokio::test]
    async fn inherited_stdout_cannot_start() {
        let mut interp = Interp::builder()
            .step(|spec: &mut ProcessSpec| -> Result<(), StepError> {
                spec.stdout = StdioMode::Inherit;
                Ok(())
            })
            .build()
            .unwrap();

        assert!(matches!(interp.start(), Err(BridgeError::InvalidStart(_))));
        assert!(interp.id().is_none());
    }

    #[tokio::test]
    async fn missing_interpreter_fails_to_start() {
        let mut interp = Interp::builder()
            .with_path("/nonexistent/pybridge-python")
            .build()
            .unwrap();

        assert!(matches!(interp.start(), Err(BridgeError::Start { .. })));
        assert!(interp.run("1").await.unwrap_err().is_not_running());
    }
}
