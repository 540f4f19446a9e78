//! The broadcast medium seam.
//!
//! A node owns exactly one modem. `transmit` addresses a (channel,
//! reply-channel) pair; every endpoint listening on that channel
//! receives the frame. The loopback hub here is the in-process medium
//! used by tests and the demo; a hardware radio implements the same
//! trait in its own crate.

use super::{ChannelId, Packet, WireError};
use crate::error::{SendError, TryRecvError};
use crate::io::base::{BaseRx, BaseTx};
use crate::io::mpmc::{MpmcChannel, MpmcReceiver, MpmcSender};
use std::sync::{Arc, Mutex};

/// One received frame, still encoded. Decoding stays with the node so a
/// malformed body is dropped (and logged) where the session lives.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub channel: ChannelId,
    pub reply: ChannelId,
    pub bytes: Vec<u8>,
}

impl Delivery {
    pub fn packet(&self) -> Result<Packet, WireError> {
        Packet::decode(&self.bytes)
    }
}

pub trait Modem: Send + 'static {
    /// Broadcast one packet to every listener on `channel`, advertising
    /// `reply` as the channel to answer on.
    fn transmit(
        &mut self,
        channel: ChannelId,
        reply: ChannelId,
        packet: &Packet,
    ) -> Result<(), WireError>;

    /// Non-blocking poll for the next inbound frame.
    fn poll(&mut self) -> Option<Delivery>;
}

/// Factory seam the host hands to a node; the node opens its modem on
/// its configured listen channel during `initialize`.
pub trait MediumProvider: Send + 'static + Clone {
    type ModemT: Modem;

    fn open(&self, listen: ChannelId) -> anyhow::Result<Self::ModemT>;
}

struct Endpoint {
    listen: ChannelId,
    tx: MpmcSender<Delivery>,
}

/// In-process broadcast medium. Cloning shares the hub; every
/// `endpoint()` is one attached modem.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<Mutex<Vec<Endpoint>>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self, listen: ChannelId) -> LoopbackModem {
        let (tx, rx) = MpmcChannel::unbounded::<Delivery>();
        let mut eps = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        eps.push(Endpoint { listen, tx });
        LoopbackModem {
            hub: self.clone(),
            rx,
        }
    }

    fn broadcast(&self, delivery: Delivery) {
        let mut eps = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Dead receivers are detached lazily, on first failed send.
        eps.retain_mut(|ep| {
            if ep.listen != delivery.channel {
                return true;
            }
            match ep.tx.try_send(delivery.clone()) {
                Ok(()) => true,
                Err(SendError { reason, .. }) => {
                    tracing::debug!("[Loopback] dropping endpoint: {reason}");
                    false
                }
            }
        });
    }
}

pub struct LoopbackModem {
    hub: LoopbackHub,
    rx: MpmcReceiver<Delivery>,
}

impl Modem for LoopbackModem {
    fn transmit(
        &mut self,
        channel: ChannelId,
        reply: ChannelId,
        packet: &Packet,
    ) -> Result<(), WireError> {
        let bytes = packet.encode()?;
        self.hub.broadcast(Delivery {
            channel,
            reply,
            bytes,
        });
        Ok(())
    }

    fn poll(&mut self) -> Option<Delivery> {
        match self.rx.try_recv() {
            Ok(d) => Some(d),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

impl MediumProvider for LoopbackHub {
    type ModemT = LoopbackModem;

    fn open(&self, listen: ChannelId) -> anyhow::Result<Self::ModemT> {
        Ok(self.endpoint(listen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MgmtFrame, Payload};

    #[test]
    fn broadcast_reaches_all_listeners_on_channel() {
        let hub = LoopbackHub::new();
        let mut a = hub.endpoint(10);
        let mut b = hub.endpoint(10);
        let mut other = hub.endpoint(11);
        let mut sender = hub.endpoint(99);

        let pkt = Packet::new(1, 1, Payload::Mgmt(MgmtFrame::Close));
        sender.transmit(10, 99, &pkt).unwrap();

        assert_eq!(a.poll().unwrap().packet().unwrap(), pkt);
        assert_eq!(b.poll().unwrap().packet().unwrap(), pkt);
        assert!(other.poll().is_none());
    }

    #[test]
    fn reply_channel_travels_with_frame() {
        let hub = LoopbackHub::new();
        let mut rx = hub.endpoint(20);
        let mut tx = hub.endpoint(21);

        let pkt = Packet::new(2, 7, Payload::Mgmt(MgmtFrame::KeepAlive { sent_ms: 5 }));
        tx.transmit(20, 21, &pkt).unwrap();

        let d = rx.poll().unwrap();
        assert_eq!(d.reply, 21);
        assert_eq!(d.channel, 20);
    }

    #[test]
    fn sender_does_not_hear_itself_on_other_channel() {
        let hub = LoopbackHub::new();
        let mut node = hub.endpoint(30);
        let pkt = Packet::new(3, 1, Payload::Mgmt(MgmtFrame::Close));
        node.transmit(31, 30, &pkt).unwrap();
        assert!(node.poll().is_none());
    }
}
