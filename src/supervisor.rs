//! Deadline supervision for a check.
//!
//! The work runs on its own thread while the caller waits for whichever comes
//! first: the work's result or the deadline. The result slot holds a single
//! value and the worker never blocks on it, so a result that arrives after the
//! deadline is dropped and the worker exits.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::pipeline::Context;

/// Runs `work` on a worker thread and waits at most `timeout` for it.
///
/// `work` receives a [`Context`] that is cancelled when the deadline passes;
/// anything it started under that context is expected to stop. On timeout
/// [`Error::Timeout`] is returned and the late result, if any, is discarded.
pub fn run_with_deadline<T, F>(timeout: Duration, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Context) -> Result<T> + Send + 'static,
{
    let ctx = Context::with_timeout(timeout);
    let (sender, receiver) = mpsc::sync_channel::<Result<T>>(1);

    let worker_ctx = ctx.clone();
    thread::spawn(move || {
        let outcome = work(&worker_ctx);
        if sender.try_send(outcome).is_err() {
            debug!("check finished after its deadline, result dropped");
        }
    });

    let wait = ctx.remaining().unwrap_or(timeout);
    match receiver.recv_timeout(wait) {
        Ok(outcome) => outcome,
        Err(RecvTimeoutError::Timeout) => {
            warn!("no result within {:?}, cancelling", timeout);
            ctx.cancel();
            Err(Error::Timeout)
        }
        Err(RecvTimeoutError::Disconnected) => Err(Error::Worker),
    }
}
