//! Static service/message metadata (C6). The core only consults this for
//! logging and for the handful of CTL messages the device runtime itself
//! has to speak; everything else is opaque bytes to the codec, per
//! spec §4.6. Service ids are grounded in libqmi's `qmi-enums-wds.h` and
//! the per-service split of `qmicli-*.c`/`qmicli/qmicli-*.c`.

use std::fmt;

/// An 8-bit QMI service tag. `Ctl` (0) is the control service and has
/// distinct header/transaction-width rules (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceId {
    Ctl,
    Dms,
    Nas,
    Wds,
    Uim,
    Wda,
    Voice,
    Pbm,
    Loc,
    Dsd,
    Unknown(u8),
}

impl ServiceId {
    pub fn from_u8(v: u8) -> ServiceId {
        match v {
            0x00 => ServiceId::Ctl,
            0x02 => ServiceId::Dms,
            0x03 => ServiceId::Nas,
            0x01 => ServiceId::Wds,
            0x0b => ServiceId::Uim,
            0x1a => ServiceId::Wda,
            0x09 => ServiceId::Voice,
            0x0f => ServiceId::Pbm,
            0x10 => ServiceId::Loc,
            0x18 => ServiceId::Dsd,
            other => ServiceId::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            ServiceId::Ctl => 0x00,
            ServiceId::Wds => 0x01,
            ServiceId::Dms => 0x02,
            ServiceId::Nas => 0x03,
            ServiceId::Voice => 0x09,
            ServiceId::Uim => 0x0b,
            ServiceId::Pbm => 0x0f,
            ServiceId::Loc => 0x10,
            ServiceId::Dsd => 0x18,
            ServiceId::Wda => 0x1a,
            ServiceId::Unknown(v) => v,
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceId::Ctl => "CTL",
            ServiceId::Dms => "DMS",
            ServiceId::Nas => "NAS",
            ServiceId::Wds => "WDS",
            ServiceId::Uim => "UIM",
            ServiceId::Wda => "WDA",
            ServiceId::Voice => "VOICE",
            ServiceId::Pbm => "PBM",
            ServiceId::Loc => "LOC",
            ServiceId::Dsd => "DSD",
            ServiceId::Unknown(v) => return write!(f, "UNKNOWN({v:#04x})"),
        };
        f.write_str(name)
    }
}

/// CTL service message ids the device runtime speaks itself to
/// bootstrap clients (everything else is left to externally generated
/// per-message bindings, per spec §1).
pub mod ctl {
    pub const GET_VERSION_INFO: u16 = 0x0021;
    pub const GET_CLIENT_ID: u16 = 0x0022;
    pub const RELEASE_CLIENT_ID: u16 = 0x0023;
    pub const GET_SUPPORTED_SERVICES: u16 = 0x0024;
    pub const SYNC: u16 = 0x0027;

    /// TLV type carrying the target service id on an allocate/release
    /// request, and service id + assigned client id on their responses.
    pub const TLV_ALLOCATION_INFO: u8 = 0x01;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_service_ids() {
        for id in [
            ServiceId::Ctl,
            ServiceId::Dms,
            ServiceId::Nas,
            ServiceId::Wds,
            ServiceId::Uim,
            ServiceId::Wda,
            ServiceId::Voice,
            ServiceId::Pbm,
            ServiceId::Loc,
            ServiceId::Dsd,
        ] {
            assert_eq!(ServiceId::from_u8(id.to_u8()), id);
        }
    }

    #[test]
    fn unknown_service_id_round_trips() {
        let id = ServiceId::from_u8(0x42);
        assert_eq!(id, ServiceId::Unknown(0x42));
        assert_eq!(id.to_u8(), 0x42);
    }
}
