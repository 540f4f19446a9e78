//! Supervisor-side peer sessions.
//!
//! A session exists per connected PLC, RTU, or coordinator. Inbound
//! packets are validated and queued on arrival; `iterate` drains inbound
//! before outbound, answers MGMT traffic internally, and surfaces
//! domain payloads to the owner. A closed session stops iterating and is
//! reaped by `free_all_closed` at the tick point the owner chooses.

use crate::error::TryRecvError;
use crate::io::base::{BaseRx, BaseTx};
use crate::io::ringbuffer::{RingBuffer, RingReceiver, RingSender};
use crate::protocol::medium::Modem;
use crate::protocol::{
    ChannelId, LINK_VERSION, MgmtFrame, NodeId, Packet, Payload, PeerRole, SeqNum,
};
use crate::utils::{Watchdog, epoch_ms};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const DEFAULT_WATCHDOG_MS: u64 = 5_000;
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Inbound-silence window before the session is failed.
    pub watchdog_ms: u64,
    /// Keep-alive send period; must stay at or under half the peer's
    /// watchdog window.
    pub keepalive_ms: u64,
    /// Depth of each per-session FIFO.
    pub queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            watchdog_ms: DEFAULT_WATCHDOG_MS,
            keepalive_ms: 1_250,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// What a session surfaced to its owner during one iterate pass.
#[derive(Debug)]
pub enum SessionEvent {
    Established { peer: NodeId, role: PeerRole },
    Data { peer: NodeId, role: PeerRole, payload: Payload },
    Closed { peer: NodeId, reason: &'static str },
}

pub struct Session {
    peer: NodeId,
    role: PeerRole,
    local_id: NodeId,
    /// Channel the peer listens on; our transmissions go there.
    reply_channel: ChannelId,
    /// Channel we listen on; advertised as the reply path.
    listen_channel: ChannelId,
    next_seq_out: SeqNum,
    last_seq_in: Option<SeqNum>,
    inbound_tx: RingSender<Packet>,
    inbound_rx: RingReceiver<Packet>,
    outbound_tx: RingSender<Packet>,
    outbound_rx: RingReceiver<Packet>,
    watchdog: Watchdog,
    keepalive_every: Duration,
    last_keepalive_tx: Instant,
    last_rtt_ms: Option<u64>,
    established: bool,
    closed: bool,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    fn new(
        peer: NodeId,
        role: PeerRole,
        local_id: NodeId,
        reply_channel: ChannelId,
        listen_channel: ChannelId,
        wd_id: u32,
        cfg: &SessionConfig,
        now: Instant,
    ) -> Self {
        let (inbound_tx, inbound_rx) = RingBuffer::bounded(cfg.queue_depth);
        let (outbound_tx, outbound_rx) = RingBuffer::bounded(cfg.queue_depth);
        let mut watchdog = Watchdog::new(wd_id, Duration::from_millis(cfg.watchdog_ms));
        watchdog.feed(now);

        Self {
            peer,
            role,
            local_id,
            reply_channel,
            listen_channel,
            next_seq_out: 0,
            last_seq_in: None,
            inbound_tx,
            inbound_rx,
            outbound_tx,
            outbound_rx,
            watchdog,
            keepalive_every: Duration::from_millis(cfg.keepalive_ms),
            last_keepalive_tx: now,
            last_rtt_ms: None,
            established: false,
            closed: false,
        }
    }

    pub fn peer(&self) -> NodeId {
        self.peer
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    pub fn last_rtt_ms(&self) -> Option<u64> {
        self.last_rtt_ms
    }

    pub fn watchdog_id(&self) -> u32 {
        self.watchdog.id()
    }

    /// Validate and queue one inbound packet. Stale or duplicate
    /// sequence numbers are dropped; any accepted frame feeds the
    /// connection watchdog.
    pub fn on_packet(&mut self, pkt: Packet, now: Instant) {
        if self.closed {
            return;
        }
        if let Some(last) = self.last_seq_in
            && pkt.seq <= last
        {
            crate::warn_throttled!(
                Duration::from_secs(5),
                "[Session {}] stale seq {} (last {})",
                self.peer,
                pkt.seq,
                last
            );
            return;
        }
        self.last_seq_in = Some(pkt.seq);
        self.watchdog.feed(now);

        if self.inbound_tx.try_send(pkt).is_err() {
            crate::warn_throttled!(
                Duration::from_secs(5),
                "[Session {}] inbound queue full, dropping frame",
                self.peer
            );
        }
    }

    /// Queue one outbound payload; transmitted on the next iterate.
    pub fn enqueue(&mut self, payload: Payload) {
        if self.closed {
            return;
        }
        let pkt = Packet::new(self.local_id, self.next_seq_out, payload);
        self.next_seq_out = self.next_seq_out.wrapping_add(1);
        if self.outbound_tx.try_send(pkt).is_err() {
            crate::warn_throttled!(
                Duration::from_secs(5),
                "[Session {}] outbound queue full, dropping frame",
                self.peer
            );
        }
    }

    /// One session pass: drain inbound (answering MGMT internally),
    /// send a due keep-alive, then flush outbound to the modem.
    pub fn iterate<M: Modem>(&mut self, now: Instant, modem: &mut M) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.closed {
            return events;
        }

        loop {
            let pkt = match self.inbound_rx.try_recv() {
                Ok(p) => p,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };

            match pkt.payload {
                Payload::Mgmt(frame) => match frame {
                    MgmtFrame::Establish { role, version } => {
                        if version != LINK_VERSION {
                            tracing::warn!(
                                "[Session {}] link version mismatch: peer {} local {}",
                                self.peer,
                                version,
                                LINK_VERSION
                            );
                            self.enqueue(Payload::Mgmt(MgmtFrame::EstablishDeny {
                                reason: format!("link version {version} unsupported"),
                            }));
                            self.enqueue(Payload::Mgmt(MgmtFrame::Close));
                            events.push(SessionEvent::Closed {
                                peer: self.peer,
                                reason: "version mismatch",
                            });
                            self.flush_outbound(modem);
                            self.closed = true;
                            return events;
                        }
                        self.role = role;
                        self.established = true;
                        self.enqueue(Payload::Mgmt(MgmtFrame::EstablishAck));
                        events.push(SessionEvent::Established {
                            peer: self.peer,
                            role,
                        });
                    }
                    MgmtFrame::EstablishAck | MgmtFrame::EstablishDeny { .. } => {
                        // Acceptor side; nothing to do with these here.
                    }
                    MgmtFrame::KeepAlive { sent_ms } => {
                        self.enqueue(Payload::Mgmt(MgmtFrame::KeepAliveReply { sent_ms }));
                    }
                    MgmtFrame::KeepAliveReply { sent_ms } => {
                        self.last_rtt_ms = Some(epoch_ms().saturating_sub(sent_ms));
                    }
                    MgmtFrame::Close => {
                        tracing::info!("[Session {}] peer closed link", self.peer);
                        self.closed = true;
                        events.push(SessionEvent::Closed {
                            peer: self.peer,
                            reason: "peer close",
                        });
                        return events;
                    }
                },
                payload => {
                    events.push(SessionEvent::Data {
                        peer: self.peer,
                        role: self.role,
                        payload,
                    });
                }
            }
        }

        if self.established && now.duration_since(self.last_keepalive_tx) >= self.keepalive_every {
            self.last_keepalive_tx = now;
            self.enqueue(Payload::Mgmt(MgmtFrame::KeepAlive {
                sent_ms: epoch_ms(),
            }));
        }

        self.flush_outbound(modem);
        events
    }

    fn flush_outbound<M: Modem>(&mut self, modem: &mut M) {
        loop {
            let pkt = match self.outbound_rx.try_recv() {
                Ok(p) => p,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };
            if let Err(e) = modem.transmit(self.reply_channel, self.listen_channel, &pkt) {
                crate::warn_throttled!(
                    Duration::from_secs(5),
                    "[Session {}] transmit failed: {e}",
                    self.peer
                );
            }
        }
    }

    /// Fail the session if the given timer fired for it.
    pub fn check_watchdog(&mut self, timer_id: u32, now: Instant) -> bool {
        if self.closed || self.watchdog.id() != timer_id {
            return false;
        }
        if self.watchdog.expired(now) {
            tracing::warn!("[Session {}] connection watchdog expired", self.peer);
            self.closed = true;
            return true;
        }
        false
    }

    /// Graceful close: one Close frame straight out, then the session
    /// stops iterating. Idempotent.
    pub fn close<M: Modem>(&mut self, modem: &mut M) {
        if self.closed {
            return;
        }
        self.enqueue(Payload::Mgmt(MgmtFrame::Close));
        self.flush_outbound(modem);
        self.closed = true;
    }
}

/// Owns every live session; iteration preserves insertion order.
pub struct SessionRegistry {
    local_id: NodeId,
    listen_channel: ChannelId,
    cfg: SessionConfig,
    sessions: Vec<Session>,
    next_wd_id: u32,
}

impl SessionRegistry {
    pub fn new(local_id: NodeId, listen_channel: ChannelId, cfg: SessionConfig) -> Self {
        Self {
            local_id,
            listen_channel,
            cfg,
            sessions: Vec::new(),
            next_wd_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.iter().filter(|s| !s.closed).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn session_mut(&mut self, peer: NodeId) -> Option<&mut Session> {
        self.sessions
            .iter_mut()
            .find(|s| s.peer == peer && !s.closed)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter().filter(|s| !s.closed)
    }

    /// Route one decoded inbound packet. The first frame from an unknown
    /// peer must be an MGMT establish; anything else is dropped with a
    /// warning. A repeat establish replaces the old session (which is
    /// reaped on the next free pass).
    pub fn on_packet(&mut self, pkt: Packet, reply: ChannelId, now: Instant) {
        let establish_role = match &pkt.payload {
            Payload::Mgmt(MgmtFrame::Establish { role, .. }) => Some(*role),
            _ => None,
        };

        if let Some(existing) = self.session_mut(pkt.sender) {
            if establish_role.is_some() {
                tracing::info!("[Registry] peer {} re-established; replacing session", pkt.sender);
                existing.closed = true;
            } else {
                existing.on_packet(pkt, now);
                return;
            }
        }

        let Some(role) = establish_role else {
            crate::warn_throttled!(
                Duration::from_secs(5),
                "[Registry] non-establish frame from unknown peer {}, dropped",
                pkt.sender
            );
            return;
        };

        let wd_id = self.next_wd_id;
        self.next_wd_id = self.next_wd_id.wrapping_add(1);

        tracing::info!("[Registry] new {:?} session for peer {}", role, pkt.sender);
        let mut session = Session::new(
            pkt.sender,
            role,
            self.local_id,
            reply,
            self.listen_channel,
            wd_id,
            &self.cfg,
            now,
        );
        session.on_packet(pkt, now);
        self.sessions.push(session);
    }

    /// Iterate every live session in insertion order. Within a session,
    /// inbound drains before outbound.
    pub fn iterate_all<M: Modem>(&mut self, now: Instant, modem: &mut M) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        for s in self.sessions.iter_mut() {
            events.extend(s.iterate(now, modem));
        }
        events
    }

    /// Flush queued outbound frames without touching inbound state.
    /// Used after the controller pass so commands leave on the same
    /// tick they were decided.
    pub fn flush_all<M: Modem>(&mut self, modem: &mut M) {
        for s in self.sessions.iter_mut().filter(|s| !s.closed) {
            s.flush_outbound(modem);
        }
    }

    /// Watchdog ids that have expired; dispatched independently from the
    /// periodic tick.
    pub fn expired_watchdogs(&self, now: Instant) -> Vec<u32> {
        self.sessions
            .iter()
            .filter(|s| !s.closed && s.watchdog.expired(now))
            .map(|s| s.watchdog.id())
            .collect()
    }

    /// Fail whichever session owns `timer_id`.
    pub fn check_all_watchdogs(&mut self, timer_id: u32, now: Instant) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        for s in self.sessions.iter_mut() {
            if s.check_watchdog(timer_id, now) {
                events.push(SessionEvent::Closed {
                    peer: s.peer,
                    reason: "watchdog timeout",
                });
            }
        }
        events
    }

    /// Reap sessions flagged closed. Called once per tick, after
    /// iteration.
    pub fn free_all_closed(&mut self) {
        self.sessions.retain(|s| !s.closed);
    }

    /// Graceful shutdown: close every live session.
    pub fn close_all<M: Modem>(&mut self, modem: &mut M) {
        for s in self.sessions.iter_mut() {
            s.close(modem);
        }
    }
}
