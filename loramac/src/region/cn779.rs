#![allow(dead_code)]
use super::plan::{BandDef, DynamicChannelPlan, DynamicRegion};
use super::{Bandwidth, Datarate, SpreadingFactor, DR};

pub(crate) type CN779 = DynamicChannelPlan<CN779Region>;

const JOIN_CHANNELS: [u32; 3] = [779_500_000, 779_700_000, 779_900_000];

/// The whole 779-787 MHz allocation is one 1% band.
const BANDS: [BandDef; 1] =
    [BandDef { duty_cycle: 100, lower_hz: 779_000_000, upper_hz: 787_000_000 }];

#[derive(Default, Clone)]
#[allow(clippy::upper_case_acronyms)]
pub struct CN779Region;

impl DynamicRegion for CN779Region {
    fn datarates() -> &'static [Option<Datarate>] {
        &DATARATES
    }

    fn join_channels() -> &'static [u32] {
        &JOIN_CHANNELS
    }

    fn bands() -> &'static [BandDef] {
        &BANDS
    }

    fn default_rx2() -> (u32, DR) {
        (786_000_000, DR::_0)
    }

    fn max_eirp_dbm() -> i8 {
        12
    }

    fn max_tx_power_index() -> u8 {
        5
    }

    fn frequency_valid(freq: u32) -> bool {
        (779_000_000..=787_000_000).contains(&freq)
    }

    fn alternate_join_datarate(trial: u8) -> DR {
        match trial {
            t if t % 48 == 0 => DR::_0,
            t if t % 32 == 0 => DR::_1,
            t if t % 24 == 0 => DR::_2,
            t if t % 16 == 0 => DR::_3,
            t if t % 8 == 0 => DR::_4,
            _ => DR::_5,
        }
    }
}

pub(crate) const DATARATES: [Option<Datarate>; 7] = [
    Some(Datarate {
        spreading_factor: SpreadingFactor::_12,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 59,
        max_mac_payload_size_with_dwell_time: 59,
    }),
    Some(Datarate {
        spreading_factor: SpreadingFactor::_11,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 59,
        max_mac_payload_size_with_dwell_time: 59,
    }),
    Some(Datarate {
        spreading_factor: SpreadingFactor::_10,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 59,
        max_mac_payload_size_with_dwell_time: 59,
    }),
    Some(Datarate {
        spreading_factor: SpreadingFactor::_9,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 123,
        max_mac_payload_size_with_dwell_time: 123,
    }),
    Some(Datarate {
        spreading_factor: SpreadingFactor::_8,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 250,
        max_mac_payload_size_with_dwell_time: 250,
    }),
    Some(Datarate {
        spreading_factor: SpreadingFactor::_7,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 250,
        max_mac_payload_size_with_dwell_time: 250,
    }),
    Some(Datarate {
        spreading_factor: SpreadingFactor::_7,
        bandwidth: Bandwidth::_250KHz,
        max_mac_payload_size: 250,
        max_mac_payload_size_with_dwell_time: 250,
    }),
];
