// SPDX-License-Identifier: GPL-3.0-only

//! Bounded, ordered event stream from the migration worker to its caller

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::time::Duration;

use partcrypt_types::MigrationEvent;
use tracing::debug;

/// Default number of events buffered before the worker blocks
pub const DEFAULT_CAPACITY: usize = 64;

pub fn progress_channel(capacity: usize) -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    (
        ProgressSender {
            tx,
            last_fraction: None,
            disconnected: false,
        },
        ProgressReceiver { rx },
    )
}

/// Worker side; keeps progress fractions non-decreasing
pub struct ProgressSender {
    tx: SyncSender<MigrationEvent>,
    last_fraction: Option<f64>,
    disconnected: bool,
}

impl ProgressSender {
    /// Send `event`, blocking while the channel is full
    ///
    /// A caller that stopped listening does not stop the job.
    pub fn send(&mut self, event: MigrationEvent) {
        if self.disconnected {
            return;
        }
        if self.tx.send(event).is_err() {
            debug!("Progress receiver dropped, continuing without reporting");
            self.disconnected = true;
        }
    }

    /// Report the overall job fraction; values at or below the last one sent
    /// are dropped
    pub fn progress(&mut self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        if self.last_fraction.is_some_and(|last| fraction <= last) {
            return;
        }
        self.last_fraction = Some(fraction);
        self.send(MigrationEvent::Progress { fraction });
    }

    pub fn last_fraction(&self) -> f64 {
        self.last_fraction.unwrap_or(0.0)
    }
}

/// Caller side
pub struct ProgressReceiver {
    rx: Receiver<MigrationEvent>,
}

impl ProgressReceiver {
    /// Next event; `None` once the worker is gone and the queue is drained
    pub fn recv(&self) -> Option<MigrationEvent> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<MigrationEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<MigrationEvent, TryRecvError> {
        self.rx.try_recv()
    }

    pub fn iter(&self) -> impl Iterator<Item = MigrationEvent> + '_ {
        self.rx.iter()
    }
}

impl IntoIterator for ProgressReceiver {
    type Item = MigrationEvent;
    type IntoIter = mpsc::IntoIter<MigrationEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.rx.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractions_never_decrease() {
        let (mut tx, rx) = progress_channel(8);
        tx.progress(0.2);
        tx.progress(0.1);
        tx.progress(0.2);
        tx.progress(0.5);
        tx.progress(7.0);
        drop(tx);

        let fractions: Vec<f64> = rx
            .into_iter()
            .filter_map(|event| match event {
                MigrationEvent::Progress { fraction } => Some(fraction),
                _ => None,
            })
            .collect();
        assert_eq!(fractions, vec![0.2, 0.5, 1.0]);
    }

    #[test]
    fn dropped_receiver_does_not_block() {
        let (mut tx, rx) = progress_channel(1);
        drop(rx);
        for step in 0..10 {
            tx.progress(step as f64 / 10.0);
        }
        assert_eq!(tx.last_fraction(), 0.9);
    }

    #[test]
    fn timeout_on_empty_channel() {
        let (_tx, rx) = progress_channel(1);
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Timeout)
        );
    }
}
