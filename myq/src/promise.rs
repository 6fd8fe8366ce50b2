//! A single-shot awaitable whose fulfillment is driven externally.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures_channel::oneshot;

pub(crate) fn channel<T>() -> (Completer<T>, Promise<T>) {
    let (tx, rx) = oneshot::channel();
    (Completer { inner: tx }, Promise { inner: rx })
}

/// The fulfilling half. Completing is infallible; a dropped awaiter is
/// ignored.
pub(crate) struct Completer<T> {
    inner: oneshot::Sender<T>,
}

impl<T> Completer<T> {
    pub(crate) fn complete(self, value: T) {
        let _ = self.inner.send(value);
    }
}

/// The awaiting half. Resolves to `None` if the completer was dropped
/// unfulfilled.
pub(crate) struct Promise<T> {
    inner: oneshot::Receiver<T>,
}

impl<T> Future for Promise<T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(Result::ok)
    }
}
