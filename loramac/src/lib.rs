#![cfg_attr(not(test), no_std)]
//! ## Feature flags
#![doc = document_features::document_features!(feature_label = r#"<span class="stab portability"><code>{feature}</code></span>"#)]
#![doc = include_str!("../README.md")]

use heapless::Vec;

mod fmt;

pub mod device;
pub mod event;
pub mod mac;
pub mod radio;
pub mod region;
pub mod timer;

mod rng;
pub use rng::Prng;

pub use device::Device;
pub use mac::{DeviceClass, OtaaCredentials, Session, SessionKeys};
pub use region::Region;

pub use loramac_codec::keys::{AppEui, AppKey, AppSKey, CryptoFactory, DevEui, NwkSKey};
pub use loramac_codec::parser::DevAddr;
pub use rand_core::RngCore;

#[cfg(feature = "default-crypto")]
pub use loramac_codec::default_crypto;

#[cfg(test)]
mod test_util;

/// How to enter the network: a join exchange or pre-provisioned keys.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum JoinMode {
    Otaa {
        deveui: DevEui,
        appeui: AppEui,
        appkey: AppKey,
        /// Join attempts before giving up, 1..=16.
        nb_trials: u8,
    },
    Abp {
        devaddr: DevAddr<[u8; 4]>,
        nwkskey: NwkSKey,
        appskey: AppSKey,
    },
}

/// What kind of downlink a received payload arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum DownlinkKind {
    Unconfirmed,
    Confirmed,
    Multicast,
    Proprietary,
}

/// Application payload of a received downlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downlink {
    pub fport: u8,
    pub kind: DownlinkKind,
    pub data: Vec<u8, 256>,
}

#[cfg(feature = "defmt-03")]
impl defmt::Format for Downlink {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Downlink {{ fport: {}, data: ", self.fport);
        for byte in self.data.iter() {
            defmt::write!(f, "{:02x}", byte);
        }
        defmt::write!(f, " }}")
    }
}

/// Events delivered to the application. At most one is in flight per
/// handler invocation; all are emitted from the MAC event context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum AppEvent {
    Connected,
    Disconnected,
    TxDone,
    TxTimeout,
    TxError,
    TxCryptoError,
    RxDone,
    RxTimeout,
    RxError,
    JoinFailed,
    /// Sticky MAC command answers are pending; send any uplink soon.
    UplinkRequired,
    /// The stack sent an empty uplink on its own to acknowledge a
    /// confirmed downlink.
    AutomaticUplink,
    /// The network owes or expects an uplink the application must
    /// schedule itself.
    ScheduleUplink,
}

/// Callbacks into the application. Implemented by the host; the stack
/// holds the implementation by value and invokes it from the event
/// context only.
pub trait AppCallbacks {
    fn event(&mut self, event: AppEvent);

    /// Battery level for DevStatusAns: 0 when externally powered, 1..=254
    /// as a charge level, 255 when unknown.
    fn battery_level(&mut self) -> u8 {
        255
    }

    /// Result of a LinkCheckReq: demodulation margin in dB and the number
    /// of gateways that heard the uplink.
    fn link_check_resp(&mut self, margin_db: u8, gateway_count: u8) {
        let _ = (margin_db, gateway_count);
    }
}
