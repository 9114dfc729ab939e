use alloc::boxed::Box;
use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use crate::sealed::Sealed;

/// Generic boxed-future wrapper used throughout the crate instead of
/// depending on an external futures crate for this one type alias.
///
/// Bound to `Send + 'a` so it can cross thread boundaries safely; object
/// safety costs a heap allocation and a vtable call per poll, which is
/// negligible next to anything that actually waits on I/O or a lock.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Boxed wrapper for `!Send` futures, for single-threaded executors
/// (embedded event loops, wasm) that never need to move a future across
/// threads. Only bound by `'a`.
pub type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// An asynchronous sequence of values pulled on demand.
///
/// Mirrors the familiar `futures_core::Stream` shape so callers already
/// used to that ecosystem feel at home: `poll_next` returns
/// `Poll<Option<Item>>` with the same Ready/Pending/exhausted semantics.
pub trait Stream: Sealed {
    /// The type of value produced by the stream.
    type Item;

    /// Polls the stream for its next item.
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>>;
}

/// Object-safe boxed wrapper over any `Stream + Send`, for extension
/// points that need to erase the concrete stream type.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;
