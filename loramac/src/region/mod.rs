//! Region parameters behind a single facade: channel plans, datarate
//! tables, duty-cycle bands and power limits, selected at construction.

use lora_modulation::{BaseBandModulationParams, Bandwidth, SpreadingFactor};
use rand_core::RngCore;

use crate::radio::{RfConfig, TxConfig};
use loramac_codec::types::{ChannelMask, DataRateRange};

pub use loramac_codec::types::DR;

pub(crate) mod constants;
mod plan;
use constants::*;
pub use plan::{Channel, MAX_CHANNELS};
pub(crate) use plan::{BackoffRequest, LinkAdrResult, NextChannel, NextChannelRequest};

#[cfg(not(any(feature = "region-eu868", feature = "region-cn779")))]
compile_error!("You must enable at least one region! eg: `region-eu868`");

#[cfg(feature = "region-cn779")]
mod cn779;
#[cfg(feature = "region-eu868")]
mod eu868;

#[cfg(feature = "region-cn779")]
pub(crate) use cn779::CN779;
#[cfg(feature = "region-eu868")]
pub(crate) use eu868::EU868;

/// Regions supported by this crate. Each region is individually
/// feature-gated; EU868 is part of the default feature set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Region {
    #[cfg(feature = "region-eu868")]
    EU868,
    #[cfg(feature = "region-cn779")]
    CN779,
}

/// Modulation and payload limits of one datarate index.
#[derive(Debug, Clone)]
pub(crate) struct Datarate {
    pub(crate) bandwidth: Bandwidth,
    pub(crate) spreading_factor: SpreadingFactor,
    pub(crate) max_mac_payload_size: u8,
    pub(crate) max_mac_payload_size_with_dwell_time: u8,
}

/// Region-specific state and behavior consumed by the MAC engine.
pub struct Configuration {
    state: State,
}

enum State {
    #[cfg(feature = "region-eu868")]
    EU868(EU868),
    #[cfg(feature = "region-cn779")]
    CN779(CN779),
}

macro_rules! region_dispatch {
    ($s:expr, $t:tt $(, $arg:expr)*) => {
        match &$s.state {
            #[cfg(feature = "region-eu868")]
            State::EU868(state) => state.$t($($arg),*),
            #[cfg(feature = "region-cn779")]
            State::CN779(state) => state.$t($($arg),*),
        }
    };
}

macro_rules! mut_region_dispatch {
    ($s:expr, $t:tt $(, $arg:expr)*) => {
        match &mut $s.state {
            #[cfg(feature = "region-eu868")]
            State::EU868(state) => state.$t($($arg),*),
            #[cfg(feature = "region-cn779")]
            State::CN779(state) => state.$t($($arg),*),
        }
    };
}

/// Timing of a receive window relative to its nominal start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct RxWindowParams {
    /// Signed correction of the window start, accounting for clock error
    /// and radio wake-up latency.
    pub offset_ms: i32,
    /// How long the window must stay open to catch a preamble.
    pub duration_ms: u32,
}

impl Configuration {
    pub fn new(region: Region) -> Configuration {
        let state = match region {
            #[cfg(feature = "region-eu868")]
            Region::EU868 => State::EU868(EU868::new()),
            #[cfg(feature = "region-cn779")]
            Region::CN779 => State::CN779(CN779::new()),
        };
        Configuration { state }
    }

    pub(crate) fn default_datarate(&self) -> DR {
        region_dispatch!(self, default_datarate)
    }

    pub(crate) fn validate_datarate(&self, dr: u8) -> Option<DR> {
        region_dispatch!(self, validate_datarate, dr)
    }

    pub(crate) fn validate_rx1_dr_offset(&self, offset: u8) -> bool {
        region_dispatch!(self, validate_rx1_dr_offset, offset)
    }

    pub(crate) fn max_payload_length(
        &self,
        dr: DR,
        repeater_compatible: bool,
        dwell_time: bool,
    ) -> u8 {
        region_dispatch!(self, max_payload_length, dr, repeater_compatible, dwell_time)
    }

    pub(crate) fn tx_power_dbm(&self, index: u8) -> Option<i8> {
        region_dispatch!(self, tx_power_dbm, index)
    }

    pub(crate) fn max_eirp_dbm(&self) -> i8 {
        region_dispatch!(self, max_eirp_dbm)
    }

    pub(crate) fn default_rx2(&self) -> (u32, DR) {
        region_dispatch!(self, default_rx2)
    }

    pub(crate) fn frequency_valid(&self, freq: u32) -> bool {
        region_dispatch!(self, frequency_valid, freq)
    }

    pub(crate) fn alternate_join_datarate(&self, trial: u8) -> DR {
        region_dispatch!(self, alternate_join_datarate, trial)
    }

    pub(crate) fn next_channel<G: RngCore>(
        &mut self,
        rng: &mut G,
        req: &NextChannelRequest,
    ) -> NextChannel {
        mut_region_dispatch!(self, next_channel, rng, req)
    }

    pub(crate) fn register_tx_done(&mut self, channel: u8, now_ms: u32) {
        mut_region_dispatch!(self, register_tx_done, channel, now_ms)
    }

    pub(crate) fn apply_backoff(&mut self, req: &BackoffRequest) {
        mut_region_dispatch!(self, apply_backoff, req)
    }

    pub(crate) fn last_tx_channel(&self) -> u8 {
        region_dispatch!(self, last_tx_channel)
    }

    pub(crate) fn rx1_frequency(&self, channel: u8) -> u32 {
        region_dispatch!(self, rx1_frequency, channel)
    }

    pub(crate) fn rx1_datarate(&self, tx_dr: DR, offset: u8, dwell_time: bool) -> DR {
        region_dispatch!(self, rx1_datarate, tx_dr, offset, dwell_time)
    }

    pub(crate) fn handle_link_adr(
        &mut self,
        dr: u8,
        tx_power: u8,
        mask_ctrl: u8,
        mask: ChannelMask<2>,
        current: (DR, u8),
    ) -> (LinkAdrResult, DR, u8) {
        mut_region_dispatch!(self, handle_link_adr, dr, tx_power, mask_ctrl, mask, current)
    }

    pub(crate) fn handle_new_channel(
        &mut self,
        index: u8,
        frequency: u32,
        dr_range: DataRateRange,
    ) -> (bool, bool) {
        mut_region_dispatch!(self, handle_new_channel, index, frequency, dr_range)
    }

    pub(crate) fn handle_dl_channel(&mut self, index: u8, frequency: u32) -> (bool, bool) {
        mut_region_dispatch!(self, handle_dl_channel, index, frequency)
    }

    pub(crate) fn apply_cf_list(&mut self, frequencies: &[u32; 5]) {
        mut_region_dispatch!(self, apply_cf_list, frequencies)
    }

    pub(crate) fn add_channel(&mut self, index: u8, channel: Channel) -> bool {
        mut_region_dispatch!(self, add_channel, index, channel)
    }

    pub(crate) fn remove_channel(&mut self, index: u8) -> bool {
        mut_region_dispatch!(self, remove_channel, index)
    }

    pub(crate) fn channel(&self, index: u8) -> Option<&Channel> {
        region_dispatch!(self, channel, index)
    }

    pub(crate) fn set_channel_mask(&mut self, mask: ChannelMask<2>) -> bool {
        mut_region_dispatch!(self, set_channel_mask, mask)
    }

    pub(crate) fn reset_defaults(&mut self) {
        mut_region_dispatch!(self, reset_defaults)
    }

    fn datarate(&self, dr: DR) -> Option<&'static Datarate> {
        region_dispatch!(self, datarate, dr)
    }

    /// Builds the RF parameters for a window or transmission; `None` when
    /// the datarate is undefined for this region.
    pub(crate) fn rf_config(&self, frequency: u32, datarate: DR) -> Option<RfConfig> {
        let dr = self.datarate(datarate)?;
        Some(RfConfig {
            frequency,
            bb: BaseBandModulationParams::new(
                dr.spreading_factor,
                dr.bandwidth,
                DEFAULT_CODING_RATE,
            ),
        })
    }

    /// TX parameters plus the frame's time on air in milliseconds.
    pub(crate) fn create_tx_config(
        &self,
        frequency: u32,
        datarate: DR,
        power_index: u8,
        pkt_len: u8,
    ) -> Option<(TxConfig, u32)> {
        let rf = self.rf_config(frequency, datarate)?;
        let pw = self.tx_power_dbm(power_index).unwrap_or_else(|| self.max_eirp_dbm());
        let time_on_air_ms = rf.bb.time_on_air_us(Some(8), true, pkt_len).div_ceil(1000);
        Some((TxConfig { pw, rf }, time_on_air_ms))
    }

    /// Start offset and open duration for a receive window at `dr`,
    /// following the symbol-timeout computation of the Semtech reference.
    pub(crate) fn rx_window_params(
        &self,
        datarate: DR,
        min_symbols: u8,
        max_error_ms: u32,
    ) -> RxWindowParams {
        let Some(dr) = self.datarate(datarate) else {
            return RxWindowParams { offset_ms: 0, duration_ms: MAX_RX_WINDOW };
        };
        let t_sym_us = (1u32 << dr.spreading_factor.factor()) * 1_000_000 / dr.bandwidth.hz();
        let min_symbols = u32::from(min_symbols);
        let timeout_symbols = ((2 * min_symbols).saturating_sub(8) * t_sym_us
            + 2 * max_error_ms * 1000)
            .div_ceil(t_sym_us)
            .max(min_symbols);
        RxWindowParams {
            offset_ms: (4 * t_sym_us / 1000) as i32
                - (timeout_symbols * t_sym_us / 2000) as i32
                - RADIO_WAKEUP_TIME as i32,
            duration_ms: (timeout_symbols * t_sym_us).div_ceil(1000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(feature = "region-eu868")]
    fn eu868_frequency_range() {
        let r = Configuration::new(Region::EU868);
        assert!(r.frequency_valid(863_000_000));
        assert!(r.frequency_valid(868_000_000));
        assert!(r.frequency_valid(870_000_000));

        assert!(!r.frequency_valid(862_900_000));
        assert!(!r.frequency_valid(870_000_001));
    }

    #[test]
    #[cfg(feature = "region-eu868")]
    fn eu868_datarate_validation() {
        let r = Configuration::new(Region::EU868);
        assert_eq!(r.validate_datarate(0), Some(DR::_0));
        assert_eq!(r.validate_datarate(6), Some(DR::_6));
        assert_eq!(r.validate_datarate(7), None);
        assert_eq!(r.validate_datarate(15), None);
    }

    #[test]
    #[cfg(feature = "region-eu868")]
    fn eu868_tx_power_table() {
        let r = Configuration::new(Region::EU868);
        assert_eq!(r.tx_power_dbm(0), Some(16));
        assert_eq!(r.tx_power_dbm(7), Some(2));
        assert_eq!(r.tx_power_dbm(8), None);
    }

    #[test]
    #[cfg(feature = "region-cn779")]
    fn cn779_frequency_range() {
        let r = Configuration::new(Region::CN779);
        assert!(r.frequency_valid(779_500_000));
        assert!(r.frequency_valid(786_000_000));
        assert!(!r.frequency_valid(778_900_000));
        assert!(!r.frequency_valid(787_000_001));
    }
}
