//! One-shot completion used to wait on asynchronous activation
//!
//! The completing side may run on any thread (platform callbacks arrive on a
//! system worker). Waiting is bounded; a completer dropped without firing
//! fails the waiter instead of hanging it.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::{AudioError, Result};

pub struct Completer<T> {
    tx: Sender<T>,
}

pub struct Completion<T> {
    rx: Receiver<T>,
}

pub fn completion<T>() -> (Completer<T>, Completion<T>) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (Completer { tx }, Completion { rx })
}

impl<T> Completer<T> {
    /// Fire the completion; consumes the completer so it fires at most once
    pub fn complete(self, value: T) {
        // Waiter may already have timed out
        let _ = self.tx.send(value);
    }
}

impl<T> Completion<T> {
    pub fn wait(self, timeout: Duration) -> Result<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(AudioError::ActivationTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(AudioError::ActivationFailed(
                "completion dropped before it fired".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completes_from_other_thread() {
        let (completer, waiter) = completion();
        std::thread::spawn(move || completer.complete(7u32));
        assert_eq!(waiter.wait(Duration::from_secs(5)).unwrap(), 7);
    }

    #[test]
    fn test_timeout() {
        let (_completer, waiter) = completion::<()>();
        let timeout = Duration::from_millis(20);
        match waiter.wait(timeout) {
            Err(AudioError::ActivationTimeout(t)) => assert_eq!(t, timeout),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_dropped_completer_fails_waiter() {
        let (completer, waiter) = completion::<()>();
        drop(completer);
        assert!(matches!(
            waiter.wait(Duration::from_secs(5)),
            Err(AudioError::ActivationFailed(_))
        ));
    }

    #[test]
    fn test_complete_after_waiter_gone() {
        let (completer, waiter) = completion();
        drop(waiter);
        completer.complete(1u8);
    }
}
