//! Supporting operators used to wire the state subject.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt, TryStreamExt};

use super::EventStream;
use crate::Result;

/// Discard the values of `stream`, keeping only its timing and terminal signals.
pub fn signal<T: Send + 'static>(stream: EventStream<T>) -> EventStream<()> {
    stream.map_ok(|_| ()).boxed()
}

/// Emit `(source, other)` whenever either side emits, once both have a value.
///
/// Source values are never skipped once `other` has a value; before that only the
/// most recent source value is kept. The result completes when `source` completes,
/// or when `other` completes without ever emitting. Errors from both are forwarded.
pub fn combine_latest<T, U>(source: EventStream<T>, other: EventStream<U>) -> EventStream<(T, U)>
where
    T: Clone + Send + 'static,
    U: Clone + Send + 'static,
{
    CombineLatest {
        source,
        other: Some(other),
        left: None,
        right: None,
        done: false,
    }
    .boxed()
}

struct CombineLatest<T, U> {
    source: EventStream<T>,
    other: Option<EventStream<U>>,
    left: Option<T>,
    right: Option<U>,
    done: bool,
}

// Buffered values are never pinned.
impl<T, U> Unpin for CombineLatest<T, U> {}

impl<T: Clone, U: Clone> CombineLatest<T, U> {
    fn pair(&self) -> Option<(T, U)> {
        Some((self.left.clone()?, self.right.clone()?))
    }
}

impl<T: Clone + Send, U: Clone + Send> Stream for CombineLatest<T, U> {
    type Item = Result<(T, U)>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            let mut progressed = false;

            match this.source.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    this.left = Some(value);
                    if let Some(pair) = this.pair() {
                        return Poll::Ready(Some(Ok(pair)));
                    }
                    progressed = true;
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => {}
            }

            if let Some(other) = &mut this.other {
                match other.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(value))) => {
                        this.right = Some(value);
                        if let Some(pair) = this.pair() {
                            return Poll::Ready(Some(Ok(pair)));
                        }
                        progressed = true;
                    }
                    Poll::Ready(Some(Err(e))) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Ready(None) => {
                        this.other = None;
                        if this.right.is_none() {
                            this.done = true;
                            return Poll::Ready(None);
                        }
                    }
                    Poll::Pending => {}
                }
            }

            if !progressed {
                return Poll::Pending;
            }
        }
    }
}

/// Mirror `source` until `notifier` emits or completes.
///
/// An error from `notifier` is forwarded as the final item.
pub fn take_until<T: Send + 'static>(source: EventStream<T>, notifier: EventStream<()>) -> EventStream<T> {
    TakeUntil {
        source,
        notifier,
        done: false,
    }
    .boxed()
}

struct TakeUntil<T> {
    source: EventStream<T>,
    notifier: EventStream<()>,
    done: bool,
}

impl<T: Send> Stream for TakeUntil<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match this.notifier.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(()))) | Poll::Ready(None) => {
                this.done = true;
                return Poll::Ready(None);
            }
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                return Poll::Ready(Some(Err(e)));
            }
            Poll::Pending => {}
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

/// Let `source` through only while the latest `when` value is `true`.
///
/// Repeated `when` values are ignored. While the gate is closed (or `when` has not
/// emitted yet) the most recent source value is withheld, and it is released the
/// moment the gate opens. After `when` completes the gate keeps its last state.
/// Completes with `source`; errors from both are forwarded.
pub fn gate<T: Send + 'static>(source: EventStream<T>, when: EventStream<bool>) -> EventStream<T> {
    Gate {
        source,
        when: Some(when),
        open: None,
        held: None,
        done: false,
    }
    .boxed()
}

struct Gate<T> {
    source: EventStream<T>,
    when: Option<EventStream<bool>>,
    open: Option<bool>,
    held: Option<T>,
    done: bool,
}

// Buffered values are never pinned.
impl<T> Unpin for Gate<T> {}

impl<T: Send> Stream for Gate<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if let Some(when) = &mut this.when {
            loop {
                match when.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(open))) => this.open = Some(open),
                    Poll::Ready(Some(Err(e))) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Ready(None) => {
                        this.when = None;
                        break;
                    }
                    Poll::Pending => break,
                }
            }
        }

        let open = this.open == Some(true);
        if open {
            if let Some(value) = this.held.take() {
                return Poll::Ready(Some(Ok(value)));
            }
        }

        loop {
            match this.source.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(value))) if open => return Poll::Ready(Some(Ok(value))),
                Poll::Ready(Some(Ok(value))) => this.held = Some(value),
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
