#![allow(dead_code)]
use super::plan::{BandDef, DynamicChannelPlan, DynamicRegion};
use super::{Bandwidth, Datarate, SpreadingFactor, DR};

pub(crate) type EU868 = DynamicChannelPlan<EU868Region>;

const JOIN_CHANNELS: [u32; 3] = [868_100_000, 868_300_000, 868_500_000];

/// ETSI EN 300 220 sub-bands with their duty-cycle budgets. The default
/// channels live in g1; CF-list channels usually land in the 865-868 MHz
/// g band.
const BANDS: [BandDef; 6] = [
    BandDef { duty_cycle: 100, lower_hz: 868_000_000, upper_hz: 868_600_000 },
    BandDef { duty_cycle: 1000, lower_hz: 868_700_000, upper_hz: 869_200_000 },
    BandDef { duty_cycle: 10, lower_hz: 869_400_000, upper_hz: 869_650_000 },
    BandDef { duty_cycle: 100, lower_hz: 869_700_000, upper_hz: 870_000_000 },
    BandDef { duty_cycle: 100, lower_hz: 865_000_000, upper_hz: 867_999_999 },
    BandDef { duty_cycle: 1000, lower_hz: 863_000_000, upper_hz: 864_999_999 },
];

#[derive(Default, Clone)]
#[allow(clippy::upper_case_acronyms)]
pub struct EU868Region;

impl DynamicRegion for EU868Region {
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
        (869_525_000, DR::_0)
    }

    fn max_eirp_dbm() -> i8 {
        16
    }

    fn max_tx_power_index() -> u8 {
        7
    }

    fn frequency_valid(freq: u32) -> bool {
        (863_000_000..=870_000_000).contains(&freq)
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
    // FSK (DR7) is not supported
];
