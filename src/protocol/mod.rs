//! Node-to-node packet model.
//!
//! Every frame carries the protocol id, the sender id, a per-link
//! sequence number, and one payload class. Serialization is serde; the
//! concrete modem's on-air framing lives behind [`medium::Modem`] and is
//! not this crate's concern.

use crate::device::MatrixSnapshot;
use crate::rps::RpsStatus;
use crate::supervisor::facility::FacilityMode;
use serde::{Deserialize, Serialize};
use std::{error::Error, fmt};

pub mod medium;

pub type NodeId = u16;
pub type ChannelId = u16;
pub type SeqNum = u32;

/// Stamped into every packet; receivers drop anything else.
pub const PROTOCOL_ID: u16 = 0x46C3;

/// Link version carried in MGMT establish; bumped on any wire-visible
/// change to the payload shapes.
pub const LINK_VERSION: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerRole {
    Plc,
    Rtu,
    Coordinator,
}

/// Session management frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MgmtFrame {
    Establish { role: PeerRole, version: u8 },
    EstablishAck,
    EstablishDeny { reason: String },
    KeepAlive { sent_ms: u64 },
    KeepAliveReply { sent_ms: u64 },
    Close,
}

/// Full PLC telemetry report, broadcast on the status cadence.
/// `telemetry` is `None` while the reactor peripheral is unreadable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlcStatus {
    pub telemetry: Option<crate::device::ReactorSnapshot>,
    pub ready: bool,
    pub degraded: bool,
    pub burn_target_mb: f64,
    pub ramping: bool,
    pub blade_count: u32,
    pub max_burn_mb: f64,
}

/// Commands a supervisor (or operator, via the supervisor) sends a PLC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlcCommand {
    SetBurn {
        enable: bool,
        mb_per_tick: f64,
        ramp: bool,
    },
    SetLimit {
        mb_per_tick: f64,
    },
    Scram,
    AutoScram,
    RpsReset,
    AckAlarms,
}

/// Peripheral telemetry relayed by an RTU gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RtuData {
    Matrix(MatrixSnapshot),
    Redstone { channel: u8, value: bool },
}

/// Operator commands from the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoordCommand {
    SetMode(FacilityMode),
    SetBurnTarget { mb_per_tick: f64 },
    SetChargeTarget { energy: f64 },
    SetGenTarget { energy_per_tick: f64 },
    SetGroup { unit: NodeId, group: u8 },
    SetBurnLimit { unit: NodeId, mb_per_tick: f64 },
    Scram,
    Reset,
    AckAlarms { unit: Option<NodeId> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Mgmt(MgmtFrame),
    PlcStatus(PlcStatus),
    PlcRpsStatus(RpsStatus),
    PlcCmd(PlcCommand),
    RtuData(RtuData),
    CoordCmd(CoordCommand),
}

/// Type tag, available without decoding the payload body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketKind {
    Mgmt = 0,
    PlcStatus = 1,
    PlcRpsStatus = 2,
    PlcCmd = 3,
    RtuData = 4,
    CoordCmd = 5,
}

impl Payload {
    pub fn kind(&self) -> PacketKind {
        match self {
            Payload::Mgmt(_) => PacketKind::Mgmt,
            Payload::PlcStatus(_) => PacketKind::PlcStatus,
            Payload::PlcRpsStatus(_) => PacketKind::PlcRpsStatus,
            Payload::PlcCmd(_) => PacketKind::PlcCmd,
            Payload::RtuData(_) => PacketKind::RtuData,
            Payload::CoordCmd(_) => PacketKind::CoordCmd,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub protocol: u16,
    pub sender: NodeId,
    pub seq: SeqNum,
    pub kind: PacketKind,
    pub payload: Payload,
}

impl Packet {
    pub fn new(sender: NodeId, seq: SeqNum, payload: Payload) -> Self {
        Self {
            protocol: PROTOCOL_ID,
            sender,
            seq,
            kind: payload.kind(),
            payload,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Encode)
    }

    /// Parse and validate a frame body. Foreign protocol ids and frames
    /// whose tag disagrees with the payload are rejected; the caller
    /// drops them with a logged warning.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let pkt: Packet = serde_json::from_slice(bytes).map_err(WireError::Decode)?;
        if pkt.protocol != PROTOCOL_ID {
            return Err(WireError::BadProtocol(pkt.protocol));
        }
        if pkt.kind != pkt.payload.kind() {
            return Err(WireError::TagMismatch);
        }
        Ok(pkt)
    }
}

#[derive(Debug)]
pub enum WireError {
    Encode(serde_json::Error),
    Decode(serde_json::Error),
    BadProtocol(u16),
    TagMismatch,
    Closed,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Encode(e) => write!(f, "encode failed: {e}"),
            WireError::Decode(e) => write!(f, "decode failed: {e}"),
            WireError::BadProtocol(id) => write!(f, "foreign protocol id {id:#06x}"),
            WireError::TagMismatch => write!(f, "type tag disagrees with payload"),
            WireError::Closed => write!(f, "medium is closed"),
        }
    }
}

impl Error for WireError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WireError::Encode(e) | WireError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ReactorSnapshot;
    use crate::rps::{RpsStatus, TripFlags, TripReason};

    fn roundtrip(payload: Payload) {
        let pkt = Packet::new(12, 99, payload);
        let bytes = pkt.encode().unwrap();
        let back = Packet::decode(&bytes).unwrap();
        assert_eq!(pkt, back);
    }

    #[test]
    fn mgmt_roundtrip() {
        roundtrip(Payload::Mgmt(MgmtFrame::Establish {
            role: PeerRole::Plc,
            version: LINK_VERSION,
        }));
        roundtrip(Payload::Mgmt(MgmtFrame::KeepAlive { sent_ms: 123_456 }));
        roundtrip(Payload::Mgmt(MgmtFrame::Close));
    }

    #[test]
    fn plc_status_roundtrip() {
        roundtrip(Payload::PlcStatus(PlcStatus {
            telemetry: Some(ReactorSnapshot {
                active: true,
                fuel_fill: 0.8,
                coolant_fill: 0.9,
                waste_fill: 0.1,
                heated_coolant_fill: 0.05,
                temp_k: 540.0,
                damage_pct: 0.0,
                boil_rate: 102.0,
                burn_rate: 4.5,
                env_loss: 0.01,
            }),
            ready: true,
            degraded: false,
            burn_target_mb: 4.5,
            ramping: false,
            blade_count: 28,
            max_burn_mb: 10.0,
        }));
    }

    #[test]
    fn rps_status_roundtrip() {
        roundtrip(Payload::PlcRpsStatus(RpsStatus {
            flags: TripFlags {
                high_temp: true,
                ..TripFlags::default()
            },
            tripped: true,
            first_trip: Some(TripReason::HighTemp),
            manual: false,
        }));
    }

    #[test]
    fn plc_cmd_roundtrip() {
        roundtrip(Payload::PlcCmd(PlcCommand::SetBurn {
            enable: true,
            mb_per_tick: 7.5,
            ramp: true,
        }));
        roundtrip(Payload::PlcCmd(PlcCommand::AutoScram));
        roundtrip(Payload::PlcCmd(PlcCommand::RpsReset));
    }

    #[test]
    fn rtu_and_coord_roundtrip() {
        roundtrip(Payload::RtuData(RtuData::Matrix(MatrixSnapshot {
            formed: true,
            energy: 1.0e9,
            max_energy: 4.0e9,
            last_input: 2.5e6,
            last_output: 1.0e6,
        })));
        roundtrip(Payload::CoordCmd(CoordCommand::SetMode(
            FacilityMode::Charge,
        )));
        roundtrip(Payload::CoordCmd(CoordCommand::SetGroup {
            unit: 3,
            group: 2,
        }));
    }

    #[test]
    fn decode_rejects_foreign_protocol() {
        let mut pkt = Packet::new(1, 1, Payload::Mgmt(MgmtFrame::Close));
        pkt.protocol = 0xDEAD;
        let bytes = serde_json::to_vec(&pkt).unwrap();
        assert!(matches!(
            Packet::decode(&bytes),
            Err(WireError::BadProtocol(0xDEAD))
        ));
    }

    #[test]
    fn decode_rejects_tag_mismatch() {
        let mut pkt = Packet::new(1, 1, Payload::Mgmt(MgmtFrame::Close));
        pkt.kind = PacketKind::PlcCmd;
        let bytes = serde_json::to_vec(&pkt).unwrap();
        assert!(matches!(Packet::decode(&bytes), Err(WireError::TagMismatch)));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Packet::decode(b"not a packet").is_err());
    }
}
