//! Subscription to record change notifications.

use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::event::RecordEvent;

/// A subscription handle returned by [`crate::RecordStore::watch`].
///
/// A subscriber that falls behind the channel capacity receives
/// [`Error::Lagged`] once and then continues with the newest events; callers
/// should treat that as a cue to re-list the store.
pub struct RecordWatch {
    receiver: broadcast::Receiver<RecordEvent>,
}

impl RecordWatch {
    pub(crate) const fn new(receiver: broadcast::Receiver<RecordEvent>) -> Self {
        Self { receiver }
    }

    /// Receive the next event.
    pub async fn recv(&mut self) -> Result<RecordEvent> {
        self.receiver.recv().await.map_err(|err| match err {
            broadcast::error::RecvError::Closed => Error::ChannelClosed,
            broadcast::error::RecvError::Lagged(skipped) => Error::Lagged { skipped },
        })
    }

    /// Try to receive an event without waiting.
    pub fn try_recv(&mut self) -> Result<Option<RecordEvent>> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(Error::ChannelClosed),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                Err(Error::Lagged { skipped })
            }
        }
    }
}
