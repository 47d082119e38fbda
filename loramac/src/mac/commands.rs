//! MAC command processor: accumulates outgoing answers and requests,
//! tracks sticky answers, and parses the commands carried by downlinks.

use heapless::Vec;

use loramac_codec::maccommandcreator::*;
use loramac_codec::maccommands::{
    parse_downlink_mac_commands, parse_uplink_mac_commands, DownlinkMacCommand,
    SerializableMacCommand, UplinkMacCommand,
};
use super::MacParams;
use crate::region;
use crate::AppCallbacks;

pub(crate) const MAX_MAC_COMMANDS_LEN: usize = 128;

/// MaxEIRP lookup of TxParamSetupReq, indexed by the four low bits.
const MAX_EIRP_TABLE: [i8; 16] = [8, 10, 12, 13, 14, 16, 18, 20, 21, 24, 26, 27, 29, 30, 33, 36];

/// Sticky answers: the server keeps re-sending the request until it hears
/// the answer, so the device re-sends the answer until any downlink
/// arrives.
fn is_sticky(cid: u8) -> bool {
    matches!(cid, 0x05 | 0x08 | 0x0A)
}

pub(crate) struct MacCommands {
    buffer: Vec<u8, MAX_MAC_COMMANDS_LEN>,
    repeat: Vec<u8, MAX_MAC_COMMANDS_LEN>,
    in_next_tx: bool,
}

impl MacCommands {
    pub fn new() -> Self {
        Self { buffer: Vec::new(), repeat: Vec::new(), in_next_tx: false }
    }

    /// Queues a command for the next uplink. Commands that no longer fit
    /// are dropped; the server will repeat its request.
    pub fn add(&mut self, cmd: &dyn SerializableMacCommand) {
        if self.buffer.len() + 1 + cmd.payload_len() > MAX_MAC_COMMANDS_LEN {
            warn!("MAC command buffer full, dropping cid {}", cmd.cid());
            return;
        }
        // infallible after the length check
        let _ = self.buffer.push(cmd.cid());
        let _ = self.buffer.extend_from_slice(cmd.payload_bytes());
        self.in_next_tx = true;
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.in_next_tx = false;
    }

    pub fn clear_repeat(&mut self) {
        self.repeat.clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn pending_in_next_tx(&self) -> bool {
        self.in_next_tx
    }

    pub fn has_sticky_pending(&self) -> bool {
        !self.repeat.is_empty()
    }

    /// Re-queues the sticky answers of earlier uplinks in front of a new
    /// frame build.
    pub fn restore_repeat_commands(&mut self) {
        if self.repeat.is_empty() {
            return;
        }
        if self.buffer.len() + self.repeat.len() <= MAX_MAC_COMMANDS_LEN {
            let _ = self.buffer.extend_from_slice(&self.repeat);
            self.in_next_tx = true;
        }
    }

    /// Rebuilds the sticky-repeat buffer from the commands of the frame
    /// being sent, keeping the latest answer per CID.
    pub fn stash_sticky_commands(&mut self) {
        let mut latest: [Option<(u8, Vec<u8, 4>)>; 3] = [None, None, None];
        for cmd in parse_uplink_mac_commands(&self.buffer) {
            let cid = match cmd {
                UplinkMacCommand::RXParamSetupAns(_) => 0x05,
                UplinkMacCommand::RXTimingSetupAns(_) => 0x08,
                UplinkMacCommand::DlChannelAns(_) => 0x0A,
                _ => continue,
            };
            debug_assert!(is_sticky(cid));
            let slot = match cid {
                0x05 => 0,
                0x08 => 1,
                _ => 2,
            };
            let mut payload = Vec::new();
            let _ = payload.extend_from_slice(cmd.bytes());
            latest[slot] = Some((cid, payload));
        }
        self.repeat.clear();
        for (cid, payload) in latest.iter().flatten() {
            let _ = self.repeat.push(*cid);
            let _ = self.repeat.extend_from_slice(payload);
        }
    }

    /// Parses and executes the MAC commands of a downlink, queueing the
    /// answers for the next uplink.
    pub fn process_downlink<H: AppCallbacks>(
        &mut self,
        data: &[u8],
        snr: i8,
        params: &mut MacParams,
        region: &mut region::Configuration,
        callbacks: &mut H,
    ) {
        for cmd in parse_downlink_mac_commands(data) {
            match cmd {
                DownlinkMacCommand::LinkCheckAns(payload) => {
                    callbacks.link_check_resp(payload.margin(), payload.gateway_count());
                }
                DownlinkMacCommand::LinkADRReq(payload) => {
                    let redundancy = payload.redundancy();
                    let (result, dr, power) = region.handle_link_adr(
                        payload.data_rate(),
                        payload.tx_power(),
                        redundancy.channel_mask_control(),
                        payload.channel_mask(),
                        (params.data_rate, params.tx_power),
                    );
                    if result.accepted() {
                        params.data_rate = dr;
                        params.tx_power = power;
                        if redundancy.number_of_transmissions() != 0 {
                            params.channels_nb_rep = redundancy.number_of_transmissions();
                        }
                    }
                    let mut ans = LinkADRAnsCreator::new();
                    ans.set_channel_mask_ack(result.channel_mask_ack)
                        .set_data_rate_ack(result.datarate_ack)
                        .set_tx_power_ack(result.tx_power_ack);
                    self.add(&ans);
                }
                DownlinkMacCommand::DutyCycleReq(payload) => {
                    params.max_duty_cycle = payload.max_duty_cycle();
                    if params.max_duty_cycle != 255 {
                        params.aggregated_duty_cycle =
                            1u16 << params.max_duty_cycle.min(15);
                    }
                    self.add(&DutyCycleAnsCreator::new());
                }
                DownlinkMacCommand::RXParamSetupReq(payload) => {
                    let dl_settings = payload.dl_settings();
                    let frequency = payload.frequency().value();
                    let offset_ok = region.validate_rx1_dr_offset(dl_settings.rx1_dr_offset());
                    let rx2_dr = region.validate_datarate(dl_settings.rx2_data_rate());
                    let freq_ok = region.frequency_valid(frequency);
                    if offset_ok && rx2_dr.is_some() && freq_ok {
                        params.rx1_dr_offset = dl_settings.rx1_dr_offset();
                        params.rx2_data_rate = rx2_dr.unwrap();
                        params.rx2_frequency = frequency;
                    }
                    let mut ans = RXParamSetupAnsCreator::new();
                    ans.set_rx1_dr_offset_ack(offset_ok)
                        .set_rx2_data_rate_ack(rx2_dr.is_some())
                        .set_channel_ack(freq_ok);
                    self.add(&ans);
                }
                DownlinkMacCommand::DevStatusReq(_) => {
                    let mut ans = DevStatusAnsCreator::new();
                    ans.set_battery(callbacks.battery_level());
                    // the 6-bit margin field covers -32..=31 dB
                    let _ = ans.set_margin(snr.clamp(-32, 31));
                    self.add(&ans);
                }
                DownlinkMacCommand::NewChannelReq(payload) => {
                    let (freq_ok, dr_ok) = region.handle_new_channel(
                        payload.channel_index(),
                        payload.frequency().value(),
                        payload.data_rate_range(),
                    );
                    let mut ans = NewChannelAnsCreator::new();
                    ans.set_channel_frequency_ack(freq_ok).set_data_rate_range_ack(dr_ok);
                    self.add(&ans);
                }
                DownlinkMacCommand::RXTimingSetupReq(payload) => {
                    params.rx1_delay_ms = del_to_delay_ms(payload.delay());
                    params.rx2_delay_ms = params.rx1_delay_ms + 1000;
                    self.add(&RXTimingSetupAnsCreator::new());
                }
                DownlinkMacCommand::TxParamSetupReq(payload) => {
                    params.uplink_dwell_time = payload.uplink_dwell_time();
                    params.downlink_dwell_time = payload.downlink_dwell_time();
                    params.max_eirp_dbm = MAX_EIRP_TABLE[payload.max_eirp_index() as usize];
                    self.add(&TxParamSetupAnsCreator::new());
                }
                DownlinkMacCommand::DlChannelReq(payload) => {
                    let (freq_ok, exists) = region
                        .handle_dl_channel(payload.channel_index(), payload.frequency().value());
                    let mut ans = DlChannelAnsCreator::new();
                    ans.set_channel_frequency_ack(freq_ok).set_uplink_frequency_exists_ack(exists);
                    self.add(&ans);
                }
            }
        }
    }
}

/// RXTimingSetupReq delay field: seconds, zero meaning one second.
pub(crate) fn del_to_delay_ms(del: u8) -> u32 {
    match del {
        1..=15 => u32::from(del) * 1000,
        _ => crate::region::constants::RECEIVE_DELAY1,
    }
}
