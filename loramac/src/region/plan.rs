//! Generic channel plan for regions with a dynamic (CF-list extensible)
//! channel layout and per-band duty cycles.

use core::marker::PhantomData;

use loramac_codec::types::{ChannelMask, DataRateRange, DR};
use rand_core::RngCore;

use super::constants::*;
use super::Datarate;

pub const MAX_CHANNELS: usize = 16;
pub(crate) const MAX_BANDS: usize = 6;

/// A single uplink channel of the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub frequency: u32,
    /// Downlink frequency for RX1, when moved by DlChannelReq.
    pub rx1_frequency: Option<u32>,
    pub dr_min: DR,
    pub dr_max: DR,
    pub(crate) band: u8,
}

/// Regulatory band bookkeeping. `ready_at_ms` is the earliest time the band
/// may transmit again.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Band {
    last_tx_ms: u32,
    ready_at_ms: u32,
}

/// Static description of a regulatory band.
pub(crate) struct BandDef {
    /// Duty-cycle divisor: 100 means 1%.
    pub duty_cycle: u32,
    pub lower_hz: u32,
    pub upper_hz: u32,
}

impl BandDef {
    fn contains(&self, freq: u32) -> bool {
        freq >= self.lower_hz && freq <= self.upper_hz
    }
}

/// Everything that distinguishes one dynamic-plan region from another.
pub(crate) trait DynamicRegion {
    fn datarates() -> &'static [Option<Datarate>];
    fn join_channels() -> &'static [u32];
    fn bands() -> &'static [BandDef];
    fn default_rx2() -> (u32, DR);
    fn max_eirp_dbm() -> i8;
    fn max_tx_power_index() -> u8;
    fn frequency_valid(freq: u32) -> bool;
    fn alternate_join_datarate(trial: u8) -> DR;

    fn default_datarate() -> DR {
        DR::_0
    }
}

pub(crate) struct NextChannelRequest {
    pub joined: bool,
    pub datarate: DR,
    pub now_ms: u32,
    pub duty_cycle_on: bool,
    /// Earliest time the aggregated duty-cycle budget allows a transmission.
    pub aggregated_ready_at_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NextChannel {
    Ready { channel: u8, frequency: u32 },
    /// All admissible channels are still serving duty-cycle off-time.
    Delayed { wait_ms: u32 },
    /// No enabled channel supports the requested datarate.
    NoChannelForDatarate,
}

pub(crate) struct BackoffRequest {
    pub joined: bool,
    pub last_tx_was_join: bool,
    pub duty_cycle_on: bool,
    pub elapsed_since_init_ms: u32,
    pub time_on_air_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LinkAdrResult {
    pub channel_mask_ack: bool,
    pub datarate_ack: bool,
    pub tx_power_ack: bool,
}

impl LinkAdrResult {
    pub fn accepted(&self) -> bool {
        self.channel_mask_ack && self.datarate_ack && self.tx_power_ack
    }
}

pub(crate) struct DynamicChannelPlan<R: DynamicRegion> {
    channels: [Option<Channel>; MAX_CHANNELS],
    channel_mask: ChannelMask<2>,
    bands: [Band; MAX_BANDS],
    last_tx_channel: u8,
    _region: PhantomData<R>,
}

impl<R: DynamicRegion> DynamicChannelPlan<R> {
    pub fn new() -> Self {
        let mut plan = Self {
            channels: [None; MAX_CHANNELS],
            channel_mask: ChannelMask::default(),
            bands: [Band::default(); MAX_BANDS],
            last_tx_channel: 0,
            _region: PhantomData,
        };
        for (i, freq) in R::join_channels().iter().enumerate() {
            plan.channels[i] = Some(Channel {
                frequency: *freq,
                rx1_frequency: None,
                dr_min: DR::_0,
                dr_max: DR::_5,
                band: Self::band_for(*freq),
            });
        }
        plan
    }

    fn band_for(freq: u32) -> u8 {
        R::bands()
            .iter()
            .position(|b| b.contains(freq))
            .unwrap_or(0) as u8
    }

    fn join_channel_count() -> usize {
        R::join_channels().len()
    }

    pub fn datarate(&self, dr: DR) -> Option<&'static Datarate> {
        match R::datarates().get(dr as usize) {
            Some(Some(dr)) => Some(dr),
            _ => None,
        }
    }

    pub fn default_datarate(&self) -> DR {
        R::default_datarate()
    }

    pub fn validate_datarate(&self, dr: u8) -> Option<DR> {
        let dr = DR::try_from(dr).ok()?;
        self.datarate(dr).map(|_| dr)
    }

    pub fn validate_rx1_dr_offset(&self, offset: u8) -> bool {
        offset <= 5
    }

    pub fn max_payload_length(&self, dr: DR, repeater_compatible: bool, dwell_time: bool) -> u8 {
        let Some(dr) = self.datarate(dr) else {
            return 0;
        };
        let max = if dwell_time {
            dr.max_mac_payload_size_with_dwell_time
        } else {
            dr.max_mac_payload_size
        };
        if repeater_compatible && max > 230 {
            230
        } else {
            max
        }
    }

    pub fn tx_power_dbm(&self, index: u8) -> Option<i8> {
        if index > R::max_tx_power_index() {
            return None;
        }
        Some(R::max_eirp_dbm() - 2 * index as i8)
    }

    pub fn max_eirp_dbm(&self) -> i8 {
        R::max_eirp_dbm()
    }

    pub fn frequency_valid(&self, freq: u32) -> bool {
        R::frequency_valid(freq)
    }

    pub fn default_rx2(&self) -> (u32, DR) {
        R::default_rx2()
    }

    pub fn alternate_join_datarate(&self, trial: u8) -> DR {
        R::alternate_join_datarate(trial)
    }

    fn channel_usable(&self, idx: usize, dr: DR, joined: bool) -> Option<&Channel> {
        let ch = self.channels[idx].as_ref()?;
        if joined && !self.channel_mask.is_enabled(idx).unwrap_or(false) {
            return None;
        }
        if !dr.in_range((ch.dr_min, ch.dr_max)) {
            return None;
        }
        Some(ch)
    }

    pub fn next_channel<G: RngCore>(
        &mut self,
        rng: &mut G,
        req: &NextChannelRequest,
    ) -> NextChannel {
        let limit = if req.joined { MAX_CHANNELS } else { Self::join_channel_count() };

        let mut free: [u8; MAX_CHANNELS] = [0; MAX_CHANNELS];
        let mut free_count = 0usize;
        let mut any_usable = false;
        let mut min_wait = u32::MAX;

        for idx in 0..limit {
            let Some(ch) = self.channel_usable(idx, req.datarate, req.joined) else {
                continue;
            };
            any_usable = true;
            let band_wait = if req.duty_cycle_on || !req.joined {
                self.bands[ch.band as usize].ready_at_ms.saturating_sub(req.now_ms)
            } else {
                0
            };
            if band_wait == 0 {
                free[free_count] = idx as u8;
                free_count += 1;
            } else {
                min_wait = min_wait.min(band_wait);
            }
        }

        if !any_usable {
            return NextChannel::NoChannelForDatarate;
        }

        let aggregated_wait = req.aggregated_ready_at_ms.saturating_sub(req.now_ms);
        if free_count == 0 {
            return NextChannel::Delayed { wait_ms: min_wait.max(aggregated_wait) };
        }
        if aggregated_wait > 0 {
            return NextChannel::Delayed { wait_ms: aggregated_wait };
        }

        let channel = free[(rng.next_u32() as usize) % free_count];
        self.last_tx_channel = channel;
        // unwrap is fine, the channel came out of the candidate scan
        let frequency = self.channels[channel as usize].unwrap().frequency;
        NextChannel::Ready { channel, frequency }
    }

    /// Records the end of a transmission for duty-cycle accounting.
    pub fn register_tx_done(&mut self, channel: u8, now_ms: u32) {
        if let Some(Some(ch)) = self.channels.get(channel as usize) {
            self.bands[ch.band as usize].last_tx_ms = now_ms;
        }
    }

    /// Updates the off-time of the band that carried the last transmission.
    pub fn apply_backoff(&mut self, req: &BackoffRequest) {
        let Some(Some(ch)) = self.channels.get(self.last_tx_channel as usize) else {
            return;
        };
        let band = &mut self.bands[ch.band as usize];
        let duty_cycle = if !req.joined && req.last_tx_was_join {
            // join back-off tiers are mandatory regardless of the
            // regional duty-cycle switch
            if req.elapsed_since_init_ms < HOUR_MS {
                JOIN_BACKOFF_DC_FIRST_HOUR
            } else if req.elapsed_since_init_ms < 11 * HOUR_MS {
                JOIN_BACKOFF_DC_NEXT_10_HOURS
            } else {
                JOIN_BACKOFF_DC_AFTER
            }
        } else if req.duty_cycle_on {
            R::bands()[ch.band as usize].duty_cycle
        } else {
            band.ready_at_ms = band.last_tx_ms;
            return;
        };
        band.ready_at_ms =
            band.last_tx_ms.saturating_add(req.time_on_air_ms.saturating_mul(duty_cycle - 1));
    }

    pub fn last_tx_channel(&self) -> u8 {
        self.last_tx_channel
    }

    pub fn rx1_frequency(&self, channel: u8) -> u32 {
        match &self.channels[channel as usize] {
            Some(ch) => ch.rx1_frequency.unwrap_or(ch.frequency),
            None => R::default_rx2().0,
        }
    }

    pub fn rx1_datarate(&self, tx_dr: DR, offset: u8, _dwell_time: bool) -> DR {
        let dr = (tx_dr as u8).saturating_sub(offset);
        // offsets always land on a defined datarate for these plans
        DR::try_from(dr).unwrap_or(DR::_0)
    }

    pub fn handle_link_adr(
        &mut self,
        dr: u8,
        tx_power: u8,
        mask_ctrl: u8,
        mask: ChannelMask<2>,
        current: (DR, u8),
    ) -> (LinkAdrResult, DR, u8) {
        let mut result = LinkAdrResult {
            channel_mask_ack: true,
            datarate_ack: true,
            tx_power_ack: true,
        };

        let new_mask = match mask_ctrl {
            0 => mask,
            6 => {
                // enable every defined channel
                let mut m = ChannelMask::<2>::from([0, 0]);
                for (i, ch) in self.channels.iter().enumerate() {
                    if ch.is_some() {
                        m.set_channel(i, true);
                    }
                }
                m
            }
            _ => {
                result.channel_mask_ack = false;
                self.channel_mask.clone()
            }
        };

        // the prospective mask must leave at least one defined channel on
        if result.channel_mask_ack {
            let usable = self.channels.iter().enumerate().any(|(i, ch)| {
                ch.is_some() && new_mask.is_enabled(i).unwrap_or(false)
            });
            if !usable {
                result.channel_mask_ack = false;
            }
        }

        let new_dr = if dr == 0x0f {
            current.0
        } else {
            match self.validate_datarate(dr) {
                Some(dr) => dr,
                None => {
                    result.datarate_ack = false;
                    current.0
                }
            }
        };

        let new_power = if tx_power == 0x0f {
            current.1
        } else if self.tx_power_dbm(tx_power).is_some() {
            tx_power
        } else {
            result.tx_power_ack = false;
            current.1
        };

        if result.accepted() {
            self.channel_mask = new_mask;
            (result, new_dr, new_power)
        } else {
            (result, current.0, current.1)
        }
    }

    /// NewChannelReq handling: `(frequency_ack, datarate_range_ack)`.
    pub fn handle_new_channel(
        &mut self,
        index: u8,
        frequency: u32,
        dr_range: DataRateRange,
    ) -> (bool, bool) {
        let idx = index as usize;
        if idx < Self::join_channel_count() || idx >= MAX_CHANNELS {
            // default channels are immutable
            return (false, false);
        }
        if frequency == 0 {
            self.channels[idx] = None;
            return (true, true);
        }

        let freq_ok = R::frequency_valid(frequency);
        let dr_ok = self.validate_datarate(dr_range.min_data_rate()).is_some()
            && self.validate_datarate(dr_range.max_data_rate()).is_some()
            && dr_range.min_data_rate() <= dr_range.max_data_rate();
        if freq_ok && dr_ok {
            self.channels[idx] = Some(Channel {
                frequency,
                rx1_frequency: None,
                dr_min: DR::try_from(dr_range.min_data_rate()).unwrap(),
                dr_max: DR::try_from(dr_range.max_data_rate()).unwrap(),
                band: Self::band_for(frequency),
            });
            self.channel_mask.set_channel(idx, true);
        }
        (freq_ok, dr_ok)
    }

    /// DlChannelReq handling: `(frequency_ack, uplink_exists_ack)`.
    pub fn handle_dl_channel(&mut self, index: u8, frequency: u32) -> (bool, bool) {
        let idx = index as usize;
        let freq_ok = R::frequency_valid(frequency);
        let Some(Some(ch)) = self.channels.get_mut(idx) else {
            return (freq_ok, false);
        };
        if freq_ok {
            ch.rx1_frequency = Some(frequency);
        }
        (freq_ok, true)
    }

    pub fn apply_cf_list(&mut self, frequencies: &[u32; 5]) {
        let first = Self::join_channel_count();
        for (i, freq) in frequencies.iter().enumerate() {
            let idx = first + i;
            if idx >= MAX_CHANNELS {
                break;
            }
            if *freq == 0 {
                self.channels[idx] = None;
            } else {
                self.channels[idx] = Some(Channel {
                    frequency: *freq,
                    rx1_frequency: None,
                    dr_min: DR::_0,
                    dr_max: DR::_5,
                    band: Self::band_for(*freq),
                });
                self.channel_mask.set_channel(idx, true);
            }
        }
    }

    pub fn add_channel(&mut self, index: u8, channel: Channel) -> bool {
        let idx = index as usize;
        if idx < Self::join_channel_count() || idx >= MAX_CHANNELS {
            return false;
        }
        if !R::frequency_valid(channel.frequency) {
            return false;
        }
        self.channels[idx] = Some(Channel { band: Self::band_for(channel.frequency), ..channel });
        self.channel_mask.set_channel(idx, true);
        true
    }

    pub fn remove_channel(&mut self, index: u8) -> bool {
        let idx = index as usize;
        if idx < Self::join_channel_count() || idx >= MAX_CHANNELS {
            return false;
        }
        self.channels[idx].take().is_some()
    }

    pub fn channel(&self, index: u8) -> Option<&Channel> {
        self.channels.get(index as usize)?.as_ref()
    }

    pub fn set_channel_mask(&mut self, mask: ChannelMask<2>) -> bool {
        let usable = self
            .channels
            .iter()
            .enumerate()
            .any(|(i, ch)| ch.is_some() && mask.is_enabled(i).unwrap_or(false));
        if usable {
            self.channel_mask = mask;
        }
        usable
    }

    /// Restores the default channel mask; CF-list and NewChannelReq
    /// channels stay defined.
    pub fn reset_defaults(&mut self) {
        self.channel_mask = ChannelMask::default();
        self.last_tx_channel = 0;
    }
}
