use loramac_codec::keys::{AppSKey, NwkSKey};
use loramac_codec::parser::DevAddr;

/// State of an activated session, created by a join-accept or provided via
/// ABP. Keys are written exactly once per session; a new activation
/// replaces the whole struct.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Session {
    pub net_id: u32,
    pub devaddr: DevAddr<[u8; 4]>,
    pub nwkskey: NwkSKey,
    pub appskey: AppSKey,
    pub fcnt_up: u32,
    pub fcnt_down: u32,
}

impl Session {
    pub fn new(devaddr: DevAddr<[u8; 4]>, nwkskey: NwkSKey, appskey: AppSKey) -> Self {
        Self { net_id: 0, devaddr, nwkskey, appskey, fcnt_up: 0, fcnt_down: 0 }
    }

    pub fn devaddr(&self) -> &DevAddr<[u8; 4]> {
        &self.devaddr
    }

    pub fn keys(&self) -> SessionKeys {
        SessionKeys { nwkskey: self.nwkskey, appskey: self.appskey, devaddr: self.devaddr }
    }
}

/// Key material of a session, for hosts that persist activation state.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct SessionKeys {
    pub nwkskey: NwkSKey,
    pub appskey: AppSKey,
    pub devaddr: DevAddr<[u8; 4]>,
}

/// Extends a received 16-bit frame counter to 32 bits against the stored
/// value. Returns the counter candidate to verify the MIC with and the raw
/// 16-bit difference used for the frame-loss gap check.
///
/// A difference of 2^15 or more is interpreted as a roll-over of the
/// on-air counter; the MIC decides whether the reconstruction was right.
pub(crate) fn reconstruct_fcnt(stored: u32, received: u16) -> (u32, u16) {
    let diff = received.wrapping_sub(stored as u16);
    let candidate = if diff < 0x8000 {
        stored.wrapping_add(u32::from(diff))
    } else {
        stored.wrapping_add(0x1_0000).wrapping_add(diff as i16 as u32)
    };
    (candidate, diff)
}
