//! Readiness combinators.
//!
//! These operators coordinate a source stream with one or more "watch" streams:
//!
//! * [`any_complete`] fires once any watched stream completes.
//! * [`ready`] withholds the source until every watched stream has emitted.
//! * [`with_latest_ready`] is `ready` plus the latest watch value attached to each item.
//! * [`on`] replays the latest source value every time the watch fires.
//!
//! The delivery and collapsing rules documented on each function are load-bearing
//! for the subject's identity checks and finalization ordering.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};

use super::{EventStream, StreamError};
use crate::Result;

fn empty_source(stream: &str) -> crate::Error {
    StreamError::EmptySource {
        stream: stream.to_string(),
    }
    .into()
}

/// Emit once and complete as soon as any stream in `watch` completes.
///
/// A member that is already complete when the result is first polled fires
/// immediately. The first error seen on any member is forwarded instead. With an
/// empty `watch` set the result never completes.
pub fn any_complete(watch: Vec<EventStream<()>>) -> EventStream<()> {
    AnyComplete { watch, done: false }.boxed()
}

struct AnyComplete {
    watch: Vec<EventStream<()>>,
    done: bool,
}

impl Stream for AnyComplete {
    type Item = Result<()>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        for member in &mut this.watch {
            loop {
                match member.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(()))) => continue,
                    Poll::Ready(Some(Err(e))) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Ready(None) => {
                        this.done = true;
                        return Poll::Ready(Some(Ok(())));
                    }
                    Poll::Pending => break,
                }
            }
        }
        Poll::Pending
    }
}

/// Withhold `source` until every stream in `watch` has emitted at least once.
///
/// While waiting, only the most recent source value is kept; it is delivered as
/// soon as the last watch member emits. From then on the result is transparent and
/// watch members are no longer observed.
///
/// Before readiness, a watch member that completes without emitting fails the
/// result with [`StreamError::EmptySource`], and a watch error is forwarded. The
/// result ends as soon as `source` ends or fails, buffered value or not.
pub fn ready<T: Send + 'static>(source: EventStream<T>, watch: Vec<EventStream<()>>) -> EventStream<T> {
    Ready {
        source,
        watch: watch.into_iter().map(Some).collect(),
        buffered: None,
        done: false,
    }
    .boxed()
}

struct Ready<T> {
    source: EventStream<T>,
    /// Members that have not emitted yet; `None` once a member emitted.
    watch: Vec<Option<EventStream<()>>>,
    buffered: Option<T>,
    done: bool,
}

// Buffered values are never pinned.
impl<T> Unpin for Ready<T> {}

impl<T> Ready<T> {
    fn is_ready(&self) -> bool {
        self.watch.is_empty()
    }

    /// Poll the outstanding watch members. Returns a terminal item if one failed.
    fn poll_watch(&mut self, cx: &mut Context<'_>) -> Option<Result<T>> {
        for slot in &mut self.watch {
            let Some(member) = slot else { continue };
            match member.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(()))) => *slot = None,
                Poll::Ready(Some(Err(e))) => return Some(Err(e)),
                Poll::Ready(None) => return Some(Err(empty_source("ready"))),
                Poll::Pending => {}
            }
        }
        if self.watch.iter().all(Option::is_none) {
            self.watch.clear();
        }
        None
    }
}

impl<T: Send> Stream for Ready<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        let was_ready = this.is_ready();
        if !was_ready {
            if let Some(terminal) = this.poll_watch(cx) {
                this.done = true;
                return Poll::Ready(Some(terminal));
            }

            // Keep only the latest source value until the watch set is satisfied.
            loop {
                match this.source.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(value))) => this.buffered = Some(value),
                    Poll::Ready(Some(Err(e))) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Ready(None) => {
                        this.done = true;
                        let flushed = this.buffered.take().filter(|_| this.is_ready());
                        return Poll::Ready(flushed.map(Ok));
                    }
                    Poll::Pending => break,
                }
            }
            if !this.is_ready() {
                return Poll::Pending;
            }
        }

        if let Some(value) = this.buffered.take() {
            return Poll::Ready(Some(Ok(value)));
        }

        match this.source.poll_next_unpin(cx) {
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

/// Pair every `source` value with the latest `watch` value.
///
/// Delivery follows [`ready`]: source values are withheld (keeping only the most
/// recent) until `watch` emits for the first time. Afterwards each source value is
/// paired with the most recent watch value available when it is delivered.
///
/// Fails with [`StreamError::EmptySource`] if `watch` completes before emitting.
/// Errors from either stream are forwarded. Completes when `source` completes;
/// completion of `watch` after its first value is ignored.
pub fn with_latest_ready<T, W>(source: EventStream<T>, watch: EventStream<W>) -> EventStream<(T, W)>
where
    T: Send + 'static,
    W: Clone + Send + 'static,
{
    WithLatestReady {
        source,
        watch: Some(watch),
        latest: None,
        buffered: None,
        done: false,
    }
    .boxed()
}

struct WithLatestReady<T, W> {
    source: EventStream<T>,
    watch: Option<EventStream<W>>,
    latest: Option<W>,
    buffered: Option<T>,
    done: bool,
}

// Buffered values are never pinned.
impl<T, W> Unpin for WithLatestReady<T, W> {}

impl<T: Send, W: Clone + Send> Stream for WithLatestReady<T, W> {
    type Item = Result<(T, W)>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        let was_ready = this.latest.is_some();
        if let Some(watch) = &mut this.watch {
            loop {
                match watch.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(value))) => this.latest = Some(value),
                    Poll::Ready(Some(Err(e))) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Ready(None) => {
                        this.watch = None;
                        if this.latest.is_none() {
                            this.done = true;
                            return Poll::Ready(Some(Err(empty_source("with_latest_ready"))));
                        }
                        break;
                    }
                    Poll::Pending => break,
                }
            }
        }

        if !was_ready {
            loop {
                match this.source.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(value))) => this.buffered = Some(value),
                    Poll::Ready(Some(Err(e))) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Ready(None) => {
                        this.done = true;
                        let flushed = match (this.buffered.take(), &this.latest) {
                            (Some(value), Some(latest)) => Some(Ok((value, latest.clone()))),
                            _ => None,
                        };
                        return Poll::Ready(flushed);
                    }
                    Poll::Pending => break,
                }
            }
        }
        let Some(latest) = &this.latest else {
            return Poll::Pending;
        };

        if let Some(value) = this.buffered.take() {
            return Poll::Ready(Some(Ok((value, latest.clone()))));
        }

        match this.source.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(value))) => Poll::Ready(Some(Ok((value, latest.clone())))),
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Deliver the latest `source` value every time `watch` fires.
///
/// Every firing produces one delivery, including repeated deliveries of an
/// unchanged value. Firings that happen before `source` has emitted collapse into a
/// single delivery of the first source value. Source values by themselves are only
/// buffered, never delivered.
///
/// A firing delivers the latest source value at the time the result is polled, so
/// source values queued behind a firing may overtake it.
///
/// Completes when either stream completes and forwards errors from both.
pub fn on<T: Clone + Send + 'static>(source: EventStream<T>, watch: EventStream<()>) -> EventStream<T> {
    On {
        source,
        watch,
        latest: None,
        backlog: false,
        done: false,
    }
    .boxed()
}

struct On<T> {
    source: EventStream<T>,
    watch: EventStream<()>,
    latest: Option<T>,
    /// The watch fired before the source had a value.
    backlog: bool,
    done: bool,
}

// Buffered values are never pinned.
impl<T> Unpin for On<T> {}

impl<T: Clone + Send> Stream for On<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            match this.source.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    let first = this.latest.is_none();
                    this.latest = Some(value.clone());
                    if first && this.backlog {
                        this.backlog = false;
                        return Poll::Ready(Some(Ok(value)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => break,
            }
        }

        loop {
            match this.watch.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(()))) => match &this.latest {
                    Some(value) => return Poll::Ready(Some(Ok(value.clone()))),
                    None => this.backlog = true,
                },
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
