//! Single-shot promise/future pair for cross-thread results.
//!
//! **Why**: Readers, the Timeline and the Player hand results between threads
//! that must never block each other. A [`Future`] is polled with
//! [`Future::poll`] (non-blocking); only tests and the driver wait on it.
//!
//! **Used by**: MediaReader implementations, Timeline requests, Player cache thread
//!
//! Backed by a bounded(1) crossbeam channel. Dropping a [`Promise`] without
//! setting it resolves the future as [`Poll::Abandoned`], so a cancelled or
//! skipped job can never leave a waiter hanging.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Write end. Consumed by [`Promise::set`].
#[derive(Debug)]
pub struct Promise<T> {
    tx: Sender<T>,
}

/// Read end. The value can be taken once.
#[derive(Debug)]
pub struct Future<T> {
    rx: Receiver<T>,
    done: bool,
}

/// Result of a non-blocking poll
#[derive(Debug, PartialEq)]
pub enum Poll<T> {
    Ready(T),
    Pending,
    /// Promise dropped without a value, or value already taken
    Abandoned,
}

impl<T> Poll<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Poll::Pending)
    }
}

/// Create a connected promise/future pair.
pub fn channel<T>() -> (Promise<T>, Future<T>) {
    let (tx, rx) = bounded(1);
    (Promise { tx }, Future { rx, done: false })
}

impl<T> Promise<T> {
    /// Resolve the future. Silently ignored when the future was dropped.
    pub fn set(self, value: T) {
        let _ = self.tx.send(value);
    }
}

impl<T> Future<T> {
    /// Already-resolved future
    pub fn ready(value: T) -> Self {
        let (promise, future) = channel();
        promise.set(value);
        future
    }

    /// True when a value is waiting. Abandonment is only observed by `poll`.
    pub fn is_ready(&self) -> bool {
        !self.done && !self.rx.is_empty()
    }

    /// Take the value without blocking.
    pub fn poll(&mut self) -> Poll<T> {
        if self.done {
            return Poll::Abandoned;
        }
        match self.rx.try_recv() {
            Ok(value) => {
                self.done = true;
                Poll::Ready(value)
            }
            Err(TryRecvError::Empty) => Poll::Pending,
            Err(TryRecvError::Disconnected) => {
                self.done = true;
                Poll::Abandoned
            }
        }
    }

    /// Block until resolved. `None` when abandoned.
    pub fn wait(mut self) -> Option<T> {
        if self.done {
            return None;
        }
        self.done = true;
        self.rx.recv().ok()
    }

    /// Block up to `timeout`. `Err(self)` hands the future back on timeout.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Option<T>, Self> {
        if self.done {
            return Ok(None);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Ok(Some(value)),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
            Err(RecvTimeoutError::Timeout) => Err(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_set_then_poll() {
        let (promise, mut future) = channel();
        assert!(future.poll().is_pending());
        promise.set(42);
        assert_eq!(future.poll(), Poll::Ready(42));
        assert_eq!(future.poll(), Poll::Abandoned);
    }

    #[test]
    fn test_dropped_promise_is_abandoned() {
        let (promise, mut future) = channel::<i32>();
        drop(promise);
        assert_eq!(future.poll(), Poll::Abandoned);
    }

    #[test]
    fn test_wait_across_threads() {
        let (promise, future) = channel();
        let handle = thread::spawn(move || promise.set("done"));
        assert_eq!(future.wait(), Some("done"));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_hands_future_back() {
        let (promise, future) = channel::<u8>();
        let future = future.wait_timeout(Duration::from_millis(5)).unwrap_err();
        promise.set(7);
        assert_eq!(future.wait_timeout(Duration::from_millis(100)).unwrap(), Some(7));
    }
}
