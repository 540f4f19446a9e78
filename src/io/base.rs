use crate::error::{RecvError, SendError, TryRecvError};
use crate::utils::CancelToken;
use std::time::Duration;

/// Base trait for sending typed items over a bounded transport.
///
/// Implemented by channel senders (TX half).
pub trait BaseTx: Send + 'static {
    /// Item type carried by this transport.
    type EventType: Send + 'static;

    /// Non-blocking send. Returns `Err` if the channel is full or disconnected.
    fn try_send(&mut self, a: Self::EventType) -> Result<(), SendError<Self::EventType>>;

    /// Cooperative send with optional timeout and cancellation.
    fn send(
        &mut self,
        a: Self::EventType,
        cancel: &CancelToken,
        timeout: Option<Duration>,
    ) -> Result<(), SendError<Self::EventType>>;
}

/// Base trait for receiving typed items.
///
/// Implemented by channel receivers (RX half).
pub trait BaseRx: Send + 'static {
    /// Item type carried by this transport.
    type EventType: Send + 'static;

    /// Non-blocking receive. Returns `Empty` if no data, `Disconnected` if channel closed.
    fn try_recv(&mut self) -> Result<Self::EventType, TryRecvError>;

    /// Cooperative receive with optional timeout and cancellation.
    fn recv(
        &mut self,
        cancel: &CancelToken,
        timeout: Option<Duration>,
    ) -> Result<Self::EventType, RecvError>;

    /// Drain up to `max` items from the channel (default cap 64).
    fn drain(&mut self, max: usize) -> Vec<Self::EventType> {
        let max = max.min(64);
        let mut out = Vec::with_capacity(max);

        for _ in 0..max {
            match self.try_recv() {
                Ok(a) => out.push(a),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    /// Drain all currently available items.
    fn drain_max(&mut self) -> Vec<Self::EventType> {
        self.drain(usize::MAX)
    }
}

/// No-op sender for nodes that publish nothing.
#[derive(Clone, Debug, Default)]
pub struct NullTx;

impl BaseTx for NullTx {
    type EventType = ();

    fn try_send(&mut self, _a: Self::EventType) -> Result<(), SendError<Self::EventType>> {
        Ok(())
    }

    fn send(
        &mut self,
        _a: Self::EventType,
        _cancel: &CancelToken,
        _timeout: Option<Duration>,
    ) -> Result<(), SendError<Self::EventType>> {
        Ok(())
    }
}
