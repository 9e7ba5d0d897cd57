//! Process pipelines.
//!
//! Runs an ordered chain of programs where the standard output of each stage
//! feeds the standard input of the next through a live OS pipe, the way a shell
//! runs `a | b | c`. All stages are started before any is waited on so data
//! streams through the chain. Only the last stage's standard output is captured;
//! every stage's standard error is captured.
//!
//! Waiting is bound to a [`Context`]: once it is cancelled or its deadline
//! passes, every process of the pipeline is killed and reaped.

use std::fmt;
use std::io::{self, Read, Write};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Longest a wait blocks before looking at the context again, so a cancel
/// without a deadline is still noticed.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Cancellation scope shared between a check and the processes it starts.
///
/// Cloning is cheap; all clones observe the same cancellation.
#[derive(Debug, Clone)]
pub struct Context {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl Context {
    /// A context that is only done once [`Context::cancel`] is called.
    pub fn background() -> Self {
        Context {
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A context that is done after `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Context {
            deadline: Instant::now().checked_add(timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Time left until the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_done(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }
}

/// Append-only byte sink that can be written from several threads.
///
/// The lock is held for a single `write` call only. Handing the same buffer
/// out as both the output and the error sink interleaves them.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("shared buffer lock poisoned"))?;
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Whether standard output and standard error end up in one buffer or two.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkLayout {
    #[default]
    Separate,
    Merged,
}

/// Ordered list of pipeline stages, each a program followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    stages: Vec<Vec<String>>,
}

impl CommandSpec {
    /// Validates that there are at least two stages and none of them is empty.
    pub fn new(stages: Vec<Vec<String>>) -> Result<Self, PipelineError> {
        if stages.len() < 2 {
            return Err(PipelineError::InvalidCommand {
                reason: format!("a pipeline needs at least 2 stages, got {}", stages.len()),
            });
        }
        if let Some(index) = stages.iter().position(|stage| stage.is_empty()) {
            return Err(PipelineError::InvalidCommand {
                reason: format!("stage {} has no program", index),
            });
        }
        Ok(CommandSpec { stages })
    }

    pub fn stages(&self) -> &[Vec<String>] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.stages.iter().map(|stage| stage.join(" ")).collect();
        write!(f, "{}", rendered.join(" | "))
    }
}

/// Everything captured from one pipeline run.
#[derive(Debug)]
pub struct PipelineResult {
    /// Standard output of the last stage. With [`SinkLayout::Merged`] this
    /// also holds every stage's standard error.
    pub stdout: Vec<u8>,
    /// Standard error of all stages. With [`SinkLayout::Merged`] this is the
    /// same interleaved buffer as `stdout`.
    pub stderr: Vec<u8>,
    /// Why the run failed, if it did.
    pub failure: Option<PipelineError>,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Runs `spec` and captures its output into freshly allocated sinks.
pub fn run_capture(ctx: &Context, spec: &CommandSpec, layout: SinkLayout) -> PipelineResult {
    let stdout = SharedBuffer::new();
    let stderr = match layout {
        SinkLayout::Separate => SharedBuffer::new(),
        SinkLayout::Merged => stdout.clone(),
    };
    let failure = run(ctx, spec, stdout.clone(), stderr.clone()).err();
    PipelineResult {
        stdout: stdout.contents(),
        stderr: stderr.contents(),
        failure,
    }
}

/// Runs `spec`, writing the last stage's standard output to `stdout` and the
/// standard error of every stage to `stderr`.
///
/// Stages are waited on in order and the first one that fails to start or
/// exits unsuccessfully ends the run. The remaining stages are then killed.
pub fn run(
    ctx: &Context,
    spec: &CommandSpec,
    stdout: SharedBuffer,
    stderr: SharedBuffer,
) -> Result<(), PipelineError> {
    let mut running = Running::new();
    let last = spec.len().saturating_sub(1);
    let mut upstream: Option<ChildStdout> = None;

    for (index, stage) in spec.stages().iter().enumerate() {
        if ctx.is_done() {
            running.cancel();
            return Err(PipelineError::Cancelled);
        }

        let program = &stage[0];
        let mut command = Command::new(program);
        command
            .args(&stage[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        match upstream.take() {
            Some(pipe) => command.stdin(Stdio::from(pipe)),
            None => command.stdin(Stdio::null()),
        };

        debug!("starting stage {}: {}", index, stage.join(" "));
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                running.abort(ctx);
                return Err(PipelineError::Spawn {
                    stage: index,
                    program: program.clone(),
                    source,
                });
            }
        };

        if let Some(pipe) = child.stderr.take() {
            running.copy(pipe, stderr.clone());
        }
        if index == last {
            if let Some(pipe) = child.stdout.take() {
                running.copy(pipe, stdout.clone());
            }
        } else {
            upstream = child.stdout.take();
        }
        running.stages.push(Stage {
            index,
            program: program.clone(),
            child,
        });
    }

    running.wait(ctx)
}

struct Stage {
    index: usize,
    program: String,
    child: Child,
}

/// Processes and copy threads of a pipeline that has been started.
///
/// Every copy thread reports on `closed` when its stream reaches end of file,
/// which is what wakes a blocked wait when a stage exits.
struct Running {
    stages: Vec<Stage>,
    copiers: Vec<JoinHandle<io::Result<u64>>>,
    open_streams: usize,
    closed: Receiver<()>,
    closed_sender: Sender<()>,
}

impl Running {
    fn new() -> Self {
        let (closed_sender, closed) = mpsc::channel();
        Running {
            stages: Vec::new(),
            copiers: Vec::new(),
            open_streams: 0,
            closed,
            closed_sender,
        }
    }

    fn copy<R>(&mut self, mut source: R, mut sink: SharedBuffer)
    where
        R: Read + Send + 'static,
    {
        let closed = self.closed_sender.clone();
        self.open_streams += 1;
        self.copiers.push(thread::spawn(move || {
            let copied = io::copy(&mut source, &mut sink);
            // The receiver is gone only when the run was already given up.
            let _ = closed.send(());
            copied
        }));
    }

    /// Blocks until a stream closes, the deadline passes or the cancel check
    /// interval elapses, whichever is first.
    fn pause(&mut self, ctx: &Context) {
        let limit = ctx
            .remaining()
            .map_or(CANCEL_CHECK_INTERVAL, |left| left.min(CANCEL_CHECK_INTERVAL));
        if self.closed.recv_timeout(limit).is_ok() {
            self.open_streams = self.open_streams.saturating_sub(1);
        }
    }

    fn wait(mut self, ctx: &Context) -> Result<(), PipelineError> {
        for position in 0..self.stages.len() {
            loop {
                let stage = &mut self.stages[position];
                let failure = match stage.child.try_wait() {
                    Ok(Some(status)) if status.success() => {
                        debug!("stage {} ({}) exited: {}", stage.index, stage.program, status);
                        break;
                    }
                    Ok(Some(status)) => PipelineError::Exit {
                        stage: stage.index,
                        program: stage.program.clone(),
                        status,
                    },
                    Ok(None) if ctx.is_done() => {
                        warn!("pipeline cancelled, killing {} stage(s)", self.stages.len());
                        self.cancel();
                        return Err(PipelineError::Cancelled);
                    }
                    Ok(None) => {
                        self.pause(ctx);
                        continue;
                    }
                    Err(source) => PipelineError::Wait {
                        stage: stage.index,
                        program: stage.program.clone(),
                        source,
                    },
                };
                debug!("{}", failure);
                self.abort(ctx);
                return Err(failure);
            }
        }
        if self.join_copiers(ctx) {
            Ok(())
        } else {
            warn!("pipeline output still open after every stage exited, giving up");
            Err(PipelineError::Cancelled)
        }
    }

    fn kill_all(&mut self) {
        for stage in &mut self.stages {
            // Fails only when the process is already gone.
            let _ = stage.child.kill();
            let _ = stage.child.wait();
        }
    }

    /// Stops everything after a stage failure and keeps the captured output.
    fn abort(&mut self, ctx: &Context) {
        self.kill_all();
        if !self.join_copiers(ctx) {
            debug!("stopped collecting output of the failed pipeline");
        }
    }

    /// Stops everything without waiting for the copy threads, which finish on
    /// their own once the killed processes close their pipes.
    fn cancel(&mut self) {
        self.kill_all();
        self.copiers.clear();
    }

    /// Joins the copy threads once every stream has closed. Gives up when
    /// `ctx` is done first, for instance because a process the stages left
    /// behind still holds a stream open; the copy threads are then detached.
    fn join_copiers(&mut self, ctx: &Context) -> bool {
        while self.open_streams > 0 {
            if ctx.is_done() {
                self.copiers.clear();
                return false;
            }
            self.pause(ctx);
        }
        for copier in self.copiers.drain(..) {
            match copier.join() {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => debug!("copying pipeline output failed: {}", err),
                Err(_) => debug!("pipeline output copier panicked"),
            }
        }
        true
    }
}
