//! Single-slot replay multicast channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{StreamExt, channel::mpsc};
use tokio::task::JoinHandle;

use super::{EventStream, StreamError};
use crate::{Error, Result};

/// How a channel terminated.
#[derive(Debug, Clone)]
enum Terminal {
    Completed,
    Failed(Error),
}

struct ChannelState<T> {
    latest: Option<T>,
    terminal: Option<Terminal>,
    subscribers: Vec<mpsc::UnboundedSender<Result<T>>>,
}

/// A multicast channel that buffers the most recent value.
///
/// Every subscriber first receives the buffered value (if any) and then every
/// value pushed afterwards, in push order. Each subscriber owns an unbounded queue,
/// so a slow subscriber never causes values to be skipped for itself or anyone else.
///
/// Termination is permanent: after [`error`](Self::error) or
/// [`complete`](Self::complete) further pushes are rejected, and late subscribers
/// receive the buffered value followed by the terminal signal.
///
/// Clones share the same underlying channel.
pub struct ReplayChannel<T> {
    state: Arc<Mutex<ChannelState<T>>>,
}

impl<T> Clone for ReplayChannel<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> ReplayChannel<T> {
    fn lock(&self) -> MutexGuard<'_, ChannelState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> std::fmt::Debug for ReplayChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ReplayChannel")
            .field("has_value", &state.latest.is_some())
            .field("terminal", &state.terminal)
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Default for ReplayChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> ReplayChannel<T> {
    /// Create an empty channel.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ChannelState {
                latest: None,
                terminal: None,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Create a channel whose buffer already holds `value`.
    pub fn with_value(value: T) -> Self {
        let channel = Self::new();
        channel.lock().latest = Some(value);
        channel
    }

    /// Share `source` through a new channel.
    ///
    /// Spawns a task on the current tokio runtime that pumps `source` into the
    /// channel until it ends. The returned handle aborts the pump.
    pub fn forward(source: EventStream<T>) -> (Self, JoinHandle<()>) {
        let channel = Self::new();
        let sink = channel.clone();
        let handle = tokio::spawn(async move {
            let mut source = source;
            while let Some(item) = source.next().await {
                match item {
                    Ok(value) => {
                        if sink.next(value).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        sink.error(e);
                        return;
                    }
                }
            }
            sink.complete();
        });
        (channel, handle)
    }

    /// Buffer `value` and deliver it to every subscriber.
    ///
    /// Returns [`StreamError::ChannelClosed`] if the channel already terminated.
    pub fn next(&self, value: T) -> Result<()> {
        let mut state = self.lock();
        if state.terminal.is_some() {
            return Err(StreamError::ChannelClosed.into());
        }
        state
            .subscribers
            .retain(|tx| tx.unbounded_send(Ok(value.clone())).is_ok());
        state.latest = Some(value);
        Ok(())
    }

    /// Terminate the channel with an error. Ignored once terminated.
    pub fn error(&self, error: Error) {
        let mut state = self.lock();
        if state.terminal.is_some() {
            return;
        }
        for tx in state.subscribers.drain(..) {
            let _ = tx.unbounded_send(Err(error.clone()));
        }
        state.terminal = Some(Terminal::Failed(error));
    }

    /// Complete the channel. Ignored once terminated.
    pub fn complete(&self) {
        let mut state = self.lock();
        if state.terminal.is_some() {
            return;
        }
        // Dropping the senders ends every subscriber stream.
        state.subscribers.clear();
        state.terminal = Some(Terminal::Completed);
    }

    /// The buffered value, if any.
    pub fn latest(&self) -> Option<T> {
        self.lock().latest.clone()
    }

    /// Whether the channel has completed or failed.
    pub fn is_closed(&self) -> bool {
        self.lock().terminal.is_some()
    }

    /// Subscribe to the channel, starting with the buffered value.
    pub fn subscribe(&self) -> EventStream<T> {
        let (tx, rx) = mpsc::unbounded();
        let mut state = self.lock();
        if let Some(value) = &state.latest {
            let _ = tx.unbounded_send(Ok(value.clone()));
        }
        match &state.terminal {
            None => state.subscribers.push(tx),
            Some(Terminal::Failed(e)) => {
                let _ = tx.unbounded_send(Err(e.clone()));
            }
            Some(Terminal::Completed) => {}
        }
        rx.boxed()
    }
}
