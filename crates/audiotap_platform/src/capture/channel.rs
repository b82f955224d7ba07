//! Bounded PCM block queue with an explicit overflow policy
//!
//! The capture worker is the only producer. Blocks and the one terminal
//! error share the channel, so a consumer sees `Ok(block)`s followed by at
//! most one `Err(..)` and then disconnection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use super::pcm::PcmBlock;
use crate::error::{AudioError, Result};

/// Item delivered to stream consumers
pub type StreamItem = Result<PcmBlock>;

/// How often a blocked producer re-checks the stop flag
const BLOCKED_SEND_RECHECK: Duration = Duration::from_millis(50);

/// What the producer does when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Wait for the consumer (full backpressure)
    Block,
    /// Discard the block that did not fit
    DropNewest,
    /// Evict the oldest queued block, then insert (bounded staleness)
    #[default]
    DropOldest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    Delivered,
    Dropped,
    /// Consumer is gone or the stream is stopping
    Closed,
}

/// Producer half owned by the capture worker
pub(crate) struct BlockSender {
    tx: Sender<StreamItem>,
    /// Consumer-side handle used only to evict under `DropOldest`
    evict: Option<Receiver<StreamItem>>,
    policy: OverflowPolicy,
    dropped: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
}

/// Create the queue; returns the producer, the consumer and the drop counter
pub(crate) fn block_channel(
    capacity: usize,
    policy: OverflowPolicy,
    stop: Arc<AtomicBool>,
) -> (BlockSender, Receiver<StreamItem>, Arc<AtomicU64>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let evict = (policy == OverflowPolicy::DropOldest).then(|| rx.clone());

    let sender = BlockSender {
        tx,
        evict,
        policy,
        dropped: Arc::clone(&dropped),
        stop,
    };
    (sender, rx, dropped)
}

impl BlockSender {
    pub(crate) fn send(&self, block: PcmBlock) -> SendOutcome {
        match self.policy {
            OverflowPolicy::Block => self.send_blocking(Ok(block)),
            OverflowPolicy::DropNewest => match self.tx.try_send(Ok(block)) {
                Ok(()) => SendOutcome::Delivered,
                Err(TrySendError::Full(_)) => self.count_drop(),
                Err(TrySendError::Disconnected(_)) => SendOutcome::Closed,
            },
            OverflowPolicy::DropOldest => self.send_evicting(Ok(block)),
        }
    }

    /// Deliver the stream's terminal error; never silently dropped while a
    /// consumer is listening
    pub(crate) fn send_terminal(&self, error: AudioError) -> SendOutcome {
        tracing::warn!("Capture stream ending: {}", error);
        match self.policy {
            OverflowPolicy::DropOldest => self.send_evicting(Err(error)),
            _ => self.send_blocking(Err(error)),
        }
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn send_blocking(&self, mut item: StreamItem) -> SendOutcome {
        loop {
            match self.tx.send_timeout(item, BLOCKED_SEND_RECHECK) {
                Ok(()) => return SendOutcome::Delivered,
                Err(SendTimeoutError::Timeout(back)) => {
                    if self.stop.load(Ordering::SeqCst) {
                        return SendOutcome::Closed;
                    }
                    item = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return SendOutcome::Closed,
            }
        }
    }

    fn send_evicting(&self, item: StreamItem) -> SendOutcome {
        let item = match self.tx.try_send(item) {
            Ok(()) => return SendOutcome::Delivered,
            Err(TrySendError::Disconnected(_)) => return SendOutcome::Closed,
            Err(TrySendError::Full(item)) => item,
        };

        if let Some(evict) = &self.evict {
            if evict.try_recv().is_ok() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        match self.tx.try_send(item) {
            Ok(()) => SendOutcome::Delivered,
            Err(TrySendError::Full(_)) => self.count_drop(),
            Err(TrySendError::Disconnected(_)) => SendOutcome::Closed,
        }
    }

    fn count_drop(&self) -> SendOutcome {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        SendOutcome::Dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wave_format::SampleFormat;
    use chrono::Utc;

    fn block(tag: u8) -> PcmBlock {
        PcmBlock::new(vec![tag; 4], SampleFormat::F32, 48_000, 1, 1, Utc::now())
    }

    fn tags(rx: &Receiver<StreamItem>) -> Vec<u8> {
        rx.try_iter().map(|item| item.unwrap().bytes()[0]).collect()
    }

    #[test]
    fn test_drop_oldest_keeps_freshest() {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx, dropped) = block_channel(2, OverflowPolicy::DropOldest, stop);

        for tag in 1..=4 {
            assert_eq!(tx.send(block(tag)), SendOutcome::Delivered);
        }

        assert_eq!(tags(&rx), vec![3, 4]);
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_drop_newest_keeps_oldest() {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx, _) = block_channel(2, OverflowPolicy::DropNewest, stop);

        assert_eq!(tx.send(block(1)), SendOutcome::Delivered);
        assert_eq!(tx.send(block(2)), SendOutcome::Delivered);
        assert_eq!(tx.send(block(3)), SendOutcome::Dropped);

        assert_eq!(tags(&rx), vec![1, 2]);
        assert_eq!(tx.dropped(), 1);
    }

    #[test]
    fn test_block_policy_waits_for_consumer() {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx, _) = block_channel(1, OverflowPolicy::Block, stop);
        tx.send(block(1));

        let consumer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            let first = rx.recv().unwrap().unwrap();
            let second = rx.recv().unwrap().unwrap();
            (first.bytes()[0], second.bytes()[0])
        });

        assert_eq!(tx.send(block(2)), SendOutcome::Delivered);
        assert_eq!(consumer.join().unwrap(), (1, 2));
    }

    #[test]
    fn test_block_policy_observes_stop() {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, _rx, _) = block_channel(1, OverflowPolicy::Block, Arc::clone(&stop));
        tx.send(block(1));
        stop.store(true, Ordering::SeqCst);
        assert_eq!(tx.send(block(2)), SendOutcome::Closed);
    }

    #[test]
    fn test_terminal_error_evicts_under_drop_oldest() {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx, _) = block_channel(1, OverflowPolicy::DropOldest, stop);
        tx.send(block(1));
        tx.send_terminal(AudioError::StreamDisrupted("gone".into()));
        drop(tx);

        let items: Vec<StreamItem> = rx.iter().collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(AudioError::StreamDisrupted(_))));
    }

    #[test]
    fn test_disconnected_consumer() {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx, _) = block_channel(4, OverflowPolicy::DropNewest, stop);
        drop(rx);
        assert_eq!(tx.send(block(1)), SendOutcome::Closed);
    }
}
