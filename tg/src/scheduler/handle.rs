//! Handle - caller-facing future for one submission's final outcome

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::Shared;
use tokio::sync::oneshot;

use super::error::SchedulerError;

/// Final outcome delivered to a handle
pub type Outcome<T, E> = Result<T, SchedulerError<E>>;

/// Cloneable handle; every clone observes the same settlement
pub type SharedHandle<T, E> = Shared<Handle<T, E>>;

/// Future resolving to a submission's final outcome
///
/// Settles exactly once, after the last attempt. If the scheduler goes away
/// without settling it, the handle resolves to [`SchedulerError::Closed`].
#[derive(Debug)]
pub struct Handle<T, E> {
    seq: u64,
    rx: oneshot::Receiver<Outcome<T, E>>,
}

impl<T, E> Handle<T, E> {
    pub(crate) fn new(seq: u64, rx: oneshot::Receiver<Outcome<T, E>>) -> Self {
        Self { seq, rx }
    }

    /// Submission sequence number
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Take the outcome if it has already been delivered
    pub fn try_outcome(&mut self) -> Option<Outcome<T, E>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(SchedulerError::Closed)),
        }
    }

    /// Convert into a handle that multiple observers can await
    pub fn shared(self) -> SharedHandle<T, E>
    where
        T: Clone,
        E: Clone,
    {
        FutureExt::shared(self)
    }
}

impl<T, E> Future for Handle<T, E> {
    type Output = Outcome<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(SchedulerError::Closed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_resolves_with_sent_outcome() {
        let (tx, rx) = oneshot::channel();
        let handle: Handle<u32, String> = Handle::new(4, rx);
        assert_eq!(handle.seq(), 4);

        tx.send(Ok(11)).unwrap();
        assert_eq!(handle.await.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_dropped_sender_is_closed() {
        let (tx, rx) = oneshot::channel::<Outcome<u32, String>>();
        let handle = Handle::new(1, rx);
        drop(tx);
        assert!(handle.await.unwrap_err().is_closed());
    }

    #[test]
    fn test_try_outcome() {
        let (tx, rx) = oneshot::channel();
        let mut handle: Handle<&str, String> = Handle::new(1, rx);
        assert!(handle.try_outcome().is_none());

        tx.send(Ok("ready")).unwrap();
        assert_eq!(handle.try_outcome().unwrap().unwrap(), "ready");
    }

    #[tokio::test]
    async fn test_shared_observers_see_same_outcome() {
        let (tx, rx) = oneshot::channel();
        let shared = Handle::<u32, String>::new(2, rx).shared();
        let other = shared.clone();

        tx.send(Err(SchedulerError::Task("boom".to_string()))).unwrap();

        let first = shared.await.unwrap_err();
        let second = other.await.unwrap_err();
        assert_eq!(first.task_error(), Some(&"boom".to_string()));
        assert_eq!(second.task_error(), Some(&"boom".to_string()));
    }
}
