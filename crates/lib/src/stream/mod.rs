//! Stream primitives shared by the state pipelines.
//!
//! Every pipeline in this crate is built from [`EventStream`]s: boxed
//! [`futures::Stream`]s of `Result<T>`. An `Ok` item is a value, an `Err` item is a
//! terminal error (nothing is delivered after it), and the end of the stream is
//! completion.
//!
//! * [`ReplayChannel`] is the multicast building block. It buffers the latest
//!   value and replays it to every new subscriber.
//! * [`readiness`] holds the coordination operators (`ready`, `on`,
//!   `with_latest_ready`, `any_complete`).
//! * [`combine`] holds the supporting operators used to wire the subject.
//!
//! All operators are cold: nothing is polled until the returned stream is polled.

use futures::stream::BoxStream;

mod channel;
pub mod combine;
mod errors;
pub mod readiness;

pub use channel::ReplayChannel;
pub use combine::{combine_latest, gate, signal, take_until};
pub use errors::StreamError;
pub use readiness::{any_complete, on, ready, with_latest_ready};

/// An asynchronous sequence of values with explicit error and completion signals.
pub type EventStream<T> = BoxStream<'static, crate::Result<T>>;
