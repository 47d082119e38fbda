//! The MAC engine: a run-to-completion state machine driven exclusively by
//! events from the central queue. It owns the session, the radio
//! parameters, the TX/RX scratch buffers and the MAC command processor;
//! the facade in [`crate::device`] wraps it with the application API.

use heapless::Vec;
use rand_core::RngCore;

use loramac_codec::creator::{DataPayloadCreator, PIGGYBACK_MAC_COMMANDS_MAX_LEN};
use loramac_codec::keys::CryptoFactory;
use loramac_codec::maccommandcreator::LinkCheckReqCreator;
use loramac_codec::parser::{
    parse_with_factory, DataPayload, Fctrl, Mhdr, MType, PhyPayload,
};

use crate::event::Event;
use crate::radio::{PhyRxTx, RadioBuffer, RxConfig, RxMode};
use crate::region::constants::*;
use crate::region::{self, NextChannel, NextChannelRequest, RxWindowParams, DR};
use crate::timer::{TimerHandle, TimerId};
use crate::{AppCallbacks, Downlink, DownlinkKind};

pub(crate) mod commands;
pub mod multicast;
mod otaa;
mod session;

pub use otaa::OtaaCredentials;
pub use session::{Session, SessionKeys};
use multicast::MulticastRegistry;
use otaa::Otaa;
use session::reconstruct_fcnt;

/// Cadence of the housekeeping pass while any MAC work is outstanding.
const MAC_STATE_CHECK_TIMEOUT: u32 = 1000;
/// Hard ceiling on confirmed-uplink retransmissions.
const MAX_ACK_RETRIES: u8 = 8;
/// MHDR + DevAddr + FCtrl + FCnt + FPort + MIC.
const FRM_PAYLOAD_OVERHEAD: u16 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error {
    /// The MAC is not idle; only one frame may be in flight.
    Busy,
    NotJoined,
    ParameterInvalid,
    /// DutyCycleReq 255 switched the device off.
    DeviceOff,
    /// Payload does not fit the current datarate.
    LengthError,
    CryptoFail,
    /// Unknown frame type or MIB attribute.
    ServiceUnknown,
    /// No admissible channel even at the default datarate.
    NoChannelFound,
    /// The radio driver rejected a request.
    Radio,
}

/// Device class. Class A opens two short windows after each uplink; Class C
/// additionally listens continuously on RX2 parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum DeviceClass {
    A,
    C,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub(crate) enum RxSlot {
    Rx1,
    Rx2,
    /// Class C continuous window on RX2 parameters.
    RxC,
}

/// The packed MAC state word. Idle is the absence of every bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct StateFlags(u8);

impl StateFlags {
    pub const TX_RUNNING: u8 = 1 << 0;
    pub const RX: u8 = 1 << 1;
    pub const ACK_REQ: u8 = 1 << 2;
    pub const RX_ABORT: u8 = 1 << 3;
    pub const TX_DELAYED: u8 = 1 << 4;
    pub const TX_CONFIG: u8 = 1 << 5;

    pub fn set(&mut self, bit: u8) {
        self.0 |= bit;
    }

    pub fn clear(&mut self, bit: u8) {
        self.0 &= !bit;
    }

    pub fn contains(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn is_idle(&self) -> bool {
        self.0 == 0
    }
}

/// Run flags tracking which primitives are pending delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct RunFlags(u8);

impl RunFlags {
    const MAC_DONE: u8 = 1 << 0;
    const MCPS_REQ: u8 = 1 << 1;
    const MCPS_IND: u8 = 1 << 2;
    const MCPS_IND_SKIP: u8 = 1 << 3;
    const MLME_REQ: u8 = 1 << 4;
    const MLME_IND: u8 = 1 << 5;

    fn set(&mut self, bit: u8) {
        self.0 |= bit;
    }

    fn clear(&mut self, bit: u8) {
        self.0 &= !bit;
    }

    fn contains(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    fn is_clear(&self) -> bool {
        self.0 == 0
    }
}

/// Radio parameters, mutated by MAC commands and the join-accept. A second
/// copy holds the regional defaults for `Restore`-style resets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MacParams {
    pub data_rate: DR,
    /// Index into the regional TX power table.
    pub tx_power: u8,
    /// MaxDCycle exponent; 255 means the device is switched off.
    pub max_duty_cycle: u8,
    /// Divisor of the aggregated duty cycle (1 = unrestricted).
    pub aggregated_duty_cycle: u16,
    pub rx1_dr_offset: u8,
    pub rx2_frequency: u32,
    pub rx2_data_rate: DR,
    pub rx1_delay_ms: u32,
    pub rx2_delay_ms: u32,
    pub join_accept_delay1_ms: u32,
    pub join_accept_delay2_ms: u32,
    pub max_rx_window_ms: u32,
    pub uplink_dwell_time: bool,
    pub downlink_dwell_time: bool,
    pub max_eirp_dbm: i8,
    /// NbTrans: unconfirmed uplinks are repeated this many times unless a
    /// downlink is heard.
    pub channels_nb_rep: u8,
    pub repeater_support: bool,
    pub min_rx_symbols: u8,
    pub max_rx_error_ms: u32,
}

impl MacParams {
    fn new(region: &region::Configuration) -> Self {
        let (rx2_frequency, rx2_data_rate) = region.default_rx2();
        Self {
            data_rate: region.default_datarate(),
            tx_power: 0,
            max_duty_cycle: 0,
            aggregated_duty_cycle: 1,
            rx1_dr_offset: 0,
            rx2_frequency,
            rx2_data_rate,
            rx1_delay_ms: RECEIVE_DELAY1,
            rx2_delay_ms: RECEIVE_DELAY2,
            join_accept_delay1_ms: JOIN_ACCEPT_DELAY1,
            join_accept_delay2_ms: JOIN_ACCEPT_DELAY2,
            max_rx_window_ms: MAX_RX_WINDOW,
            uplink_dwell_time: false,
            downlink_dwell_time: false,
            max_eirp_dbm: region.max_eirp_dbm(),
            channels_nb_rep: 1,
            repeater_support: false,
            min_rx_symbols: MIN_RX_SYMBOLS,
            max_rx_error_ms: MAX_SYSTEM_RX_ERROR,
        }
    }
}

/// Outcome attached to a confirm or indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub(crate) enum EventStatus {
    Ok,
    #[default]
    Error,
    TxTimeout,
    Rx1Timeout,
    Rx2Timeout,
    Rx1Error,
    Rx2Error,
    JoinFail,
    DownlinkRepeated,
    TxDrPayloadSizeError,
    DownlinkTooManyFramesLost,
    AddressFail,
    MicFail,
    CryptoFail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub(crate) enum McpsRequestKind {
    Unconfirmed,
    Confirmed,
    Proprietary,
}

/// Staged MCPS confirmation, delivered by the state-check pass.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct McpsConfirm {
    pub request: Option<McpsRequestKind>,
    pub status: EventStatus,
    pub ack_received: bool,
    pub nb_retries: u8,
    pub datarate: Option<DR>,
    pub tx_power_dbm: i8,
    pub time_on_air_ms: u32,
    pub uplink_counter: u32,
}

/// Staged MCPS indication for a received downlink.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct McpsIndication {
    pub kind: Option<DownlinkKind>,
    pub status: EventStatus,
    pub port: Option<u8>,
    pub rssi: i16,
    pub snr: i8,
    pub rx_slot: Option<RxSlot>,
    pub frame_pending: bool,
    pub ack_received: bool,
    pub downlink_counter: u32,
    pub rx_data: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub(crate) enum MlmeRequestKind {
    Join,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MlmeConfirm {
    pub request: Option<MlmeRequestKind>,
    pub status: EventStatus,
    pub nb_retries: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MlmeIndicationKind {
    /// Sticky answers are pending; the server needs to hear an uplink.
    ScheduleUplink,
}

/// What the state-check pass hands up to the facade.
pub(crate) enum Primitive {
    McpsConfirm(McpsConfirm),
    McpsIndication(McpsIndication),
    MlmeConfirm(MlmeConfirm),
    MlmeIndication(MlmeIndicationKind),
}

enum Activation {
    Unjoined,
    Otaa(Otaa),
    Joined(Session),
}

enum RxVerdict {
    /// Frame rejected; statuses staged, tear down via RX_ABORT.
    Abort,
    /// Valid downlink processed.
    Accepted { stop_ack_timer: bool },
    JoinAccepted,
    JoinRejected,
    /// Not for us in the current state; keep listening.
    Ignored,
}

pub(crate) struct Mac<const N: usize = 256> {
    pub(crate) region: region::Configuration,
    pub(crate) params: MacParams,
    pub(crate) defaults: MacParams,
    pub(crate) class: DeviceClass,
    pub(crate) adr_on: bool,
    state: StateFlags,
    flags: RunFlags,
    activation: Activation,
    pub(crate) commands: commands::MacCommands,
    pub(crate) multicast: MulticastRegistry,

    tx_buffer: RadioBuffer<N>,
    rx_buffer: RadioBuffer<N>,
    pending_downlink: Option<Downlink>,

    adr_ack_counter: u32,
    node_ack_requested: bool,
    srv_ack_requested: bool,
    ack_timeout_retries: u8,
    ack_timeout_retries_counter: u8,
    ack_timeout_retry_pending: bool,
    channels_nb_rep_counter: u8,
    uplink_counter_fixed: bool,
    rx_windows_enabled: bool,

    last_tx_was_join: bool,
    tx_payload_len: u16,
    time_on_air_ms: u32,
    aggregated_last_tx_ms: u32,
    aggregated_timeoff_ms: u32,
    init_time_ms: u32,

    rx_slot: RxSlot,
    rx1_window: RxWindowParams,
    rx2_window: RxWindowParams,
    rx_window1_delay_ms: u32,
    rx_window2_delay_ms: u32,
    current_rx_dr: DR,
    last_dev_nonce: Option<u16>,

    mcps_confirm: McpsConfirm,
    mcps_indication: McpsIndication,
    mlme_confirm: MlmeConfirm,
}

impl<const N: usize> Mac<N> {
    pub fn new(region: region::Configuration, now_ms: u32) -> Self {
        let params = MacParams::new(&region);
        Self {
            defaults: params.clone(),
            params,
            region,
            class: DeviceClass::A,
            adr_on: false,
            state: StateFlags::default(),
            flags: RunFlags::default(),
            activation: Activation::Unjoined,
            commands: commands::MacCommands::new(),
            multicast: MulticastRegistry::new(),
            tx_buffer: RadioBuffer::new(),
            rx_buffer: RadioBuffer::new(),
            pending_downlink: None,
            adr_ack_counter: 0,
            node_ack_requested: false,
            srv_ack_requested: false,
            ack_timeout_retries: 1,
            ack_timeout_retries_counter: 1,
            ack_timeout_retry_pending: false,
            channels_nb_rep_counter: 0,
            uplink_counter_fixed: false,
            rx_windows_enabled: true,
            last_tx_was_join: false,
            tx_payload_len: 0,
            time_on_air_ms: 0,
            aggregated_last_tx_ms: 0,
            aggregated_timeoff_ms: 0,
            init_time_ms: now_ms,
            rx_slot: RxSlot::Rx1,
            rx1_window: RxWindowParams::default(),
            rx2_window: RxWindowParams::default(),
            rx_window1_delay_ms: RECEIVE_DELAY1,
            rx_window2_delay_ms: RECEIVE_DELAY2,
            current_rx_dr: DR::_0,
            last_dev_nonce: None,
            mcps_confirm: McpsConfirm::default(),
            mcps_indication: McpsIndication::default(),
            mlme_confirm: MlmeConfirm::default(),
        }
    }

    pub fn is_joined(&self) -> bool {
        matches!(self.activation, Activation::Joined(_))
    }

    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    pub fn tx_in_flight(&self) -> bool {
        self.state.contains(StateFlags::TX_RUNNING) && !self.state.contains(StateFlags::TX_CONFIG)
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.activation {
            Activation::Joined(session) => Some(session),
            _ => None,
        }
    }

    pub fn set_session(&mut self, session: Session) {
        self.activation = Activation::Joined(session);
    }

    pub fn last_dev_nonce(&self) -> Option<u16> {
        self.last_dev_nonce
    }

    pub fn take_downlink(&mut self) -> Option<Downlink> {
        self.pending_downlink.take()
    }

    pub fn queue_link_check(&mut self) {
        self.commands.add(&LinkCheckReqCreator::new());
    }

    pub fn set_uplink_counter_fixed(&mut self, fixed: bool) {
        self.uplink_counter_fixed = fixed;
    }

    pub fn set_rx_windows_enabled(&mut self, enabled: bool) {
        self.rx_windows_enabled = enabled;
    }

    /// Switches device class. Entering Class C while idle immediately opens
    /// the continuous RX2 window.
    pub fn set_class<R: PhyRxTx>(&mut self, radio: &mut R, class: DeviceClass) {
        self.class = class;
        if class == DeviceClass::C && self.state.is_idle() && self.is_joined() {
            self.open_continuous_rx2(radio);
        }
    }

    /// Stops everything: timers, radio, session, flags. The device returns
    /// to the unjoined idle state.
    pub fn shutdown<R: PhyRxTx, T: TimerHandle>(&mut self, radio: &mut R, timer: &mut T) {
        for id in [
            TimerId::RxWindow1,
            TimerId::RxWindow2,
            TimerId::AckTimeout,
            TimerId::TxDelayed,
            TimerId::StateCheck,
        ] {
            timer.stop(id);
        }
        let _ = radio.low_power();
        self.activation = Activation::Unjoined;
        self.state = StateFlags::default();
        self.flags = RunFlags::default();
        self.commands.clear();
        self.commands.clear_repeat();
        self.pending_downlink = None;
        self.node_ack_requested = false;
        self.srv_ack_requested = false;
        self.params = self.defaults.clone();
        self.region.reset_defaults();
    }

    /// Starts an over-the-air activation.
    pub fn join_otaa<C, R, T, G>(
        &mut self,
        radio: &mut R,
        timer: &mut T,
        rng: &mut G,
        credentials: OtaaCredentials,
        nb_trials: u8,
    ) -> Result<(), Error>
    where
        C: CryptoFactory + Default,
        R: PhyRxTx,
        T: TimerHandle,
        G: RngCore,
    {
        if !self.state.is_idle() {
            return Err(Error::Busy);
        }
        if nb_trials == 0 {
            return Err(Error::ParameterInvalid);
        }
        self.activation = Activation::Otaa(Otaa::new(credentials, nb_trials));
        self.reset_mac_parameters();
        self.params.data_rate = self.region.alternate_join_datarate(1);

        self.mlme_confirm = MlmeConfirm {
            request: Some(MlmeRequestKind::Join),
            status: EventStatus::Error,
            nb_retries: 0,
        };
        self.flags.set(RunFlags::MLME_REQ);

        let Activation::Otaa(otaa) = &mut self.activation else {
            unreachable!()
        };
        otaa.prepare_buffer::<C, G, N>(rng, &mut self.tx_buffer);
        self.tx_payload_len = 0;
        let result = self.schedule_tx(radio, timer, rng);
        if result.is_err() {
            self.flags.clear(RunFlags::MLME_REQ);
        }
        result
    }

    /// Activation by personalization: installs the session directly.
    pub fn join_abp(&mut self, session: Session) -> Result<(), Error> {
        if !self.state.is_idle() {
            return Err(Error::Busy);
        }
        self.reset_mac_parameters();
        self.activation = Activation::Joined(session);
        Ok(())
    }

    /// Queues a data uplink. On success the frame is built and handed to
    /// the scheduler; completion is reported via the MCPS confirm.
    #[allow(clippy::too_many_arguments)]
    pub fn send<C, R, T, G>(
        &mut self,
        radio: &mut R,
        timer: &mut T,
        rng: &mut G,
        kind: McpsRequestKind,
        fport: u8,
        data: &[u8],
        nb_trials: u8,
    ) -> Result<(), Error>
    where
        C: CryptoFactory + Default,
        R: PhyRxTx,
        T: TimerHandle,
        G: RngCore,
    {
        if !self.state.is_idle() {
            return Err(Error::Busy);
        }
        if !self.is_joined() {
            return Err(Error::NotJoined);
        }
        if kind != McpsRequestKind::Proprietary && (fport == 0 || fport > 224) {
            return Err(Error::ParameterInvalid);
        }

        // an early cap check; the authoritative one runs in the scheduler
        // where FOpts are known
        let max = self.max_frm_payload();
        if data.len() > usize::from(max) {
            return Err(Error::LengthError);
        }

        match kind {
            McpsRequestKind::Proprietary => self.prepare_proprietary_frame(data)?,
            _ => self.prepare_data_frame::<C>(kind, fport, data)?,
        }

        let fcnt = self.session().map(|s| s.fcnt_up).unwrap_or(0);
        self.mcps_confirm = McpsConfirm {
            request: Some(kind),
            status: EventStatus::Error,
            ack_received: false,
            nb_retries: 0,
            datarate: Some(self.params.data_rate),
            tx_power_dbm: 0,
            time_on_air_ms: 0,
            uplink_counter: fcnt,
        };
        self.flags.set(RunFlags::MCPS_REQ);
        self.channels_nb_rep_counter = 0;

        if kind == McpsRequestKind::Confirmed {
            self.node_ack_requested = true;
            self.ack_timeout_retries = nb_trials.clamp(1, MAX_ACK_RETRIES);
            self.ack_timeout_retries_counter = 1;
            self.state.set(StateFlags::ACK_REQ);
        }

        let result = self.schedule_tx(radio, timer, rng);
        if result.is_err() {
            self.flags.clear(RunFlags::MCPS_REQ);
            self.node_ack_requested = false;
            self.state.clear(StateFlags::ACK_REQ);
        }
        result
    }

    /// Largest FRMPayload the current datarate admits.
    pub fn max_frm_payload(&self) -> u8 {
        let cap = self.region.max_payload_length(
            self.params.data_rate,
            self.params.repeater_support,
            self.params.uplink_dwell_time,
        );
        cap.saturating_sub(8) // FHDR overhead beyond the MAC payload cap
    }

    fn prepare_proprietary_frame(&mut self, data: &[u8]) -> Result<(), Error> {
        self.tx_buffer.clear();
        self.tx_buffer.extend_from_slice(&[0xe0]).map_err(|_| Error::LengthError)?;
        self.tx_buffer.extend_from_slice(data).map_err(|_| Error::LengthError)?;
        self.tx_payload_len = data.len() as u16;
        Ok(())
    }

    fn prepare_data_frame<C: CryptoFactory + Default>(
        &mut self,
        kind: McpsRequestKind,
        fport: u8,
        data: &[u8],
    ) -> Result<(), Error> {
        let adr_ack_req = self.adr_next();

        let mut fctrl = Fctrl::new(0, true);
        if self.adr_on {
            fctrl.set_adr();
        }
        if adr_ack_req {
            fctrl.set_adr_ack_req();
        }
        if self.srv_ack_requested {
            self.srv_ack_requested = false;
            fctrl.set_ack();
        }

        self.commands.restore_repeat_commands();
        let cmds_len = self.commands.len();
        let piggyback = self.commands.pending_in_next_tx() && cmds_len > 0;

        // commands ride in FOpts when they fit; an oversized batch takes
        // over the frame as a port-0 payload, displacing application data
        let (eff_port, in_fopts): (Option<u8>, bool) =
            if piggyback && cmds_len > PIGGYBACK_MAC_COMMANDS_MAX_LEN {
                (Some(0), false)
            } else if data.is_empty() {
                (None, piggyback)
            } else {
                (Some(fport), piggyback)
            };

        self.commands.stash_sticky_commands();

        let Activation::Joined(session) = &self.activation else {
            return Err(Error::NotJoined);
        };

        let mut creator = DataPayloadCreator::with_options(self.tx_buffer.as_mut(), C::default())
            .map_err(|_| Error::LengthError)?;
        creator
            .set_uplink(true)
            .set_confirmed(kind == McpsRequestKind::Confirmed)
            .set_dev_addr(session.devaddr)
            .set_fctrl(&fctrl)
            .set_fcnt(session.fcnt_up);
        let (payload, cmds): (&[u8], &[u8]) = match eff_port {
            Some(0) => {
                creator.set_f_port(0);
                (&[], self.commands.buffer())
            }
            Some(port) => {
                creator.set_f_port(port);
                (data, if in_fopts { self.commands.buffer() } else { &[] })
            }
            None => (&[], if in_fopts { self.commands.buffer() } else { &[] }),
        };
        self.tx_payload_len =
            if eff_port == Some(0) { cmds.len() as u16 } else { payload.len() as u16 };
        let len = creator
            .build(payload, cmds, session.nwkskey.inner(), session.appskey.inner())
            .map_err(|_| Error::ParameterInvalid)?
            .len();
        self.tx_buffer.set_pos(len);

        if eff_port == Some(0) {
            // the whole batch went out as the payload
            self.commands.clear();
        }
        Ok(())
    }

    /// Picks a channel under duty-cycle constraints and either transmits or
    /// parks the frame behind the TX-delayed timer.
    fn schedule_tx<R, T, G>(
        &mut self,
        radio: &mut R,
        timer: &mut T,
        rng: &mut G,
    ) -> Result<(), Error>
    where
        R: PhyRxTx,
        T: TimerHandle,
        G: RngCore,
    {
        if self.params.max_duty_cycle == 255 {
            return Err(Error::DeviceOff);
        }
        let now = timer.now_ms();
        if self.params.max_duty_cycle == 0 {
            self.aggregated_timeoff_ms = 0;
        }

        self.region.apply_backoff(&region::BackoffRequest {
            joined: self.is_joined(),
            last_tx_was_join: self.last_tx_was_join,
            duty_cycle_on: true,
            elapsed_since_init_ms: now.wrapping_sub(self.init_time_ms),
            time_on_air_ms: self.time_on_air_ms,
        });
        self.aggregated_timeoff_ms = self
            .time_on_air_ms
            .saturating_mul(u32::from(self.params.aggregated_duty_cycle).saturating_sub(1));

        let mut request = NextChannelRequest {
            joined: self.is_joined(),
            datarate: self.params.data_rate,
            now_ms: now,
            duty_cycle_on: true,
            aggregated_ready_at_ms: self.aggregated_last_tx_ms.wrapping_add(self.aggregated_timeoff_ms),
        };

        let (channel, frequency) = loop {
            match self.region.next_channel(rng, &request) {
                NextChannel::Ready { channel, frequency } => break (channel, frequency),
                NextChannel::Delayed { wait_ms } => {
                    self.state.set(StateFlags::TX_DELAYED);
                    debug!("duty cycle holds next TX for {} ms", wait_ms);
                    timer.start(TimerId::TxDelayed, wait_ms.max(1));
                    return Ok(());
                }
                NextChannel::NoChannelForDatarate => {
                    if request.datarate == self.defaults.data_rate {
                        return Err(Error::NoChannelFound);
                    }
                    self.params.data_rate = self.defaults.data_rate;
                    request.datarate = self.defaults.data_rate;
                }
            }
        };

        // window timing is locked in at scheduling time
        let rx1_dr = self.region.rx1_datarate(
            self.params.data_rate,
            self.params.rx1_dr_offset,
            self.params.downlink_dwell_time,
        );
        self.rx1_window =
            self.region.rx_window_params(rx1_dr, self.params.min_rx_symbols, self.params.max_rx_error_ms);
        self.rx2_window = self.region.rx_window_params(
            self.params.rx2_data_rate,
            self.params.min_rx_symbols,
            self.params.max_rx_error_ms,
        );
        if self.is_joined() {
            let fopts_len = self.commands.len() as u16;
            let cap = self.region.max_payload_length(
                self.params.data_rate,
                self.params.repeater_support,
                self.params.uplink_dwell_time,
            );
            if self.tx_payload_len + fopts_len.min(15) > u16::from(cap) {
                return Err(Error::LengthError);
            }
            self.rx_window1_delay_ms =
                add_offset(self.params.rx1_delay_ms, self.rx1_window.offset_ms);
            self.rx_window2_delay_ms =
                add_offset(self.params.rx2_delay_ms, self.rx2_window.offset_ms);
        } else {
            self.rx_window1_delay_ms =
                add_offset(self.params.join_accept_delay1_ms, self.rx1_window.offset_ms);
            self.rx_window2_delay_ms =
                add_offset(self.params.join_accept_delay2_ms, self.rx2_window.offset_ms);
        }

        self.send_frame_on_channel(radio, timer, channel, frequency)
    }

    fn send_frame_on_channel<R, T>(
        &mut self,
        radio: &mut R,
        timer: &mut T,
        channel: u8,
        frequency: u32,
    ) -> Result<(), Error>
    where
        R: PhyRxTx,
        T: TimerHandle,
    {
        let (mut tx_config, time_on_air) = self
            .region
            .create_tx_config(
                frequency,
                self.params.data_rate,
                self.params.tx_power,
                self.tx_buffer.len() as u8,
            )
            .ok_or(Error::ParameterInvalid)?;
        tx_config.adjust_power(R::MAX_RADIO_POWER, R::ANTENNA_GAIN);

        self.time_on_air_ms = time_on_air;
        self.mcps_confirm.status = EventStatus::Error;
        self.mlme_confirm.status = EventStatus::Error;
        self.mcps_confirm.datarate = Some(self.params.data_rate);
        self.mcps_confirm.tx_power_dbm = tx_config.pw;
        self.mcps_confirm.time_on_air_ms = time_on_air;

        timer.start(TimerId::StateCheck, MAC_STATE_CHECK_TIMEOUT);

        if let Activation::Otaa(otaa) = &mut self.activation {
            otaa.trials += 1;
        }

        debug!("TX on channel {} ({} Hz)", channel, frequency);
        radio.tx(tx_config, self.tx_buffer.as_ref_for_read()).map_err(|_| Error::Radio)?;
        self.state.set(StateFlags::TX_RUNNING);
        Ok(())
    }

    /// Single entry point for queue events; stale timer events are dropped
    /// by the owning-state guards here.
    pub fn on_event<C, R, T, G, H>(
        &mut self,
        radio: &mut R,
        timer: &mut T,
        rng: &mut G,
        callbacks: &mut H,
        event: Event,
        out: &mut Vec<Primitive, 4>,
    ) where
        C: CryptoFactory + Default,
        R: PhyRxTx,
        T: TimerHandle,
        G: RngCore,
        H: AppCallbacks,
    {
        match event {
            Event::RadioTxDone => self.handle_tx_done(radio, timer, rng),
            Event::RadioRxDone { len: _, rssi, snr } => {
                self.handle_rx_done::<C, R, T, H>(radio, timer, callbacks, rssi, snr)
            }
            Event::RadioRxTimeout => self.handle_rx_window_closed(radio, timer, false),
            Event::RadioRxError => self.handle_rx_window_closed(radio, timer, true),
            Event::RadioTxTimeout => self.handle_tx_timeout(radio),
            Event::Timer(TimerId::RxWindow1) => {
                if self.state.contains(StateFlags::TX_RUNNING) {
                    self.handle_rx1_timer(radio);
                }
            }
            Event::Timer(TimerId::RxWindow2) => {
                if self.state.contains(StateFlags::TX_RUNNING) {
                    self.handle_rx2_timer(radio);
                }
            }
            Event::Timer(TimerId::AckTimeout) => self.handle_ack_timeout(),
            Event::Timer(TimerId::TxDelayed) => {
                if self.state.contains(StateFlags::TX_DELAYED) {
                    self.state.clear(StateFlags::TX_DELAYED);
                    self.tx_delayed::<C, R, T, G>(radio, timer, rng);
                }
            }
            Event::Timer(TimerId::StateCheck) => {
                self.handle_state_check::<C, R, T, G>(radio, timer, rng, out)
            }
        }
    }

    fn handle_tx_done<R, T, G>(&mut self, radio: &mut R, timer: &mut T, rng: &mut G)
    where
        R: PhyRxTx,
        T: TimerHandle,
        G: RngCore,
    {
        let now = timer.now_ms();
        if self.class == DeviceClass::C {
            self.open_continuous_rx2(radio);
        } else {
            let _ = radio.low_power();
        }

        if self.rx_windows_enabled {
            timer.start(TimerId::RxWindow1, self.rx_window1_delay_ms);
            if self.class != DeviceClass::C {
                timer.start(TimerId::RxWindow2, self.rx_window2_delay_ms);
            }
            if self.class == DeviceClass::C || self.node_ack_requested {
                let jitter = ACK_TIMEOUT - ACK_TIMEOUT_RND + rng.next_u32() % (2 * ACK_TIMEOUT_RND);
                timer.start(TimerId::AckTimeout, self.rx_window2_delay_ms + jitter);
            }
        } else {
            self.mcps_confirm.status = EventStatus::Ok;
            self.mlme_confirm.status = EventStatus::Rx2Timeout;
            if self.flags.is_clear() {
                self.flags.set(RunFlags::MCPS_REQ);
            }
            self.flags.set(RunFlags::MAC_DONE);
        }

        self.last_tx_was_join = self.flags.contains(RunFlags::MLME_REQ)
            && self.mlme_confirm.request == Some(MlmeRequestKind::Join);

        let channel = self.region.last_tx_channel();
        self.region.register_tx_done(channel, now);
        self.aggregated_last_tx_ms = now;

        if !self.node_ack_requested {
            self.mcps_confirm.status = EventStatus::Ok;
            self.channels_nb_rep_counter += 1;
        }
    }

    fn open_continuous_rx2<R: PhyRxTx>(&mut self, radio: &mut R) {
        self.rx_slot = RxSlot::RxC;
        self.current_rx_dr = self.params.rx2_data_rate;
        if let Some(rf) = self.region.rf_config(self.params.rx2_frequency, self.params.rx2_data_rate)
        {
            let _ = radio.setup_rx(RxConfig { rf, mode: RxMode::Continuous });
        }
    }

    fn handle_rx1_timer<R: PhyRxTx>(&mut self, radio: &mut R) {
        self.rx_slot = RxSlot::Rx1;
        if self.class == DeviceClass::C {
            let _ = radio.standby();
        }
        let dr = self.region.rx1_datarate(
            self.params.data_rate,
            self.params.rx1_dr_offset,
            self.params.downlink_dwell_time,
        );
        self.current_rx_dr = dr;
        let frequency = self.region.rx1_frequency(self.region.last_tx_channel());
        if let Some(rf) = self.region.rf_config(frequency, dr) {
            let window = self.rx1_window.duration_ms.min(self.params.max_rx_window_ms);
            if radio.setup_rx(RxConfig { rf, mode: RxMode::Single { ms: window } }).is_ok() {
                self.state.set(StateFlags::RX);
            }
        }
    }

    fn handle_rx2_timer<R: PhyRxTx>(&mut self, radio: &mut R) {
        if self.class == DeviceClass::C {
            self.open_continuous_rx2(radio);
            return;
        }
        self.rx_slot = RxSlot::Rx2;
        self.current_rx_dr = self.params.rx2_data_rate;
        if let Some(rf) = self.region.rf_config(self.params.rx2_frequency, self.params.rx2_data_rate)
        {
            let window = self.rx2_window.duration_ms.min(self.params.max_rx_window_ms);
            if radio.setup_rx(RxConfig { rf, mode: RxMode::Single { ms: window } }).is_ok() {
                self.state.set(StateFlags::RX);
            }
        }
    }

    fn handle_ack_timeout(&mut self) {
        if self.node_ack_requested {
            self.ack_timeout_retry_pending = true;
            self.state.clear(StateFlags::ACK_REQ);
        }
        if self.class == DeviceClass::C {
            self.flags.set(RunFlags::MAC_DONE);
        }
    }

    fn handle_tx_timeout<R: PhyRxTx>(&mut self, radio: &mut R) {
        if self.class == DeviceClass::C {
            self.open_continuous_rx2(radio);
        } else {
            let _ = radio.low_power();
        }
        self.mcps_confirm.status = EventStatus::TxTimeout;
        self.mlme_confirm.status = EventStatus::TxTimeout;
        self.flags.set(RunFlags::MAC_DONE);
    }

    fn handle_rx_window_closed<R, T>(&mut self, radio: &mut R, timer: &mut T, is_error: bool)
    where
        R: PhyRxTx,
        T: TimerHandle,
    {
        let now = timer.now_ms();
        if self.class == DeviceClass::C {
            self.open_continuous_rx2(radio);
        } else {
            let _ = radio.low_power();
        }
        self.state.clear(StateFlags::RX);

        match self.rx_slot {
            RxSlot::Rx1 => {
                if self.node_ack_requested {
                    self.mcps_confirm.status =
                        if is_error { EventStatus::Rx1Error } else { EventStatus::Rx1Timeout };
                }
                self.mlme_confirm.status =
                    if is_error { EventStatus::Rx1Error } else { EventStatus::Rx1Timeout };
                // reception may have outlasted the RX2 start
                if now.wrapping_sub(self.aggregated_last_tx_ms) >= self.rx_window2_delay_ms {
                    timer.stop(TimerId::RxWindow2);
                    self.flags.set(RunFlags::MAC_DONE);
                }
            }
            RxSlot::Rx2 | RxSlot::RxC => {
                if self.node_ack_requested {
                    self.mcps_confirm.status =
                        if is_error { EventStatus::Rx2Error } else { EventStatus::Rx2Timeout };
                }
                self.mlme_confirm.status =
                    if is_error { EventStatus::Rx2Error } else { EventStatus::Rx2Timeout };
                if is_error || self.class != DeviceClass::C {
                    self.flags.set(RunFlags::MAC_DONE);
                }
            }
        }
    }

    fn prepare_rx_done_abort<T: TimerHandle>(&mut self, timer: &mut T) {
        self.state.set(StateFlags::RX_ABORT);
        if self.node_ack_requested {
            self.handle_ack_timeout();
        }
        self.flags.set(RunFlags::MCPS_IND);
        self.flags.set(RunFlags::MAC_DONE);
        timer.start(TimerId::StateCheck, 1);
    }

    fn handle_rx_done<C, R, T, H>(
        &mut self,
        radio: &mut R,
        timer: &mut T,
        callbacks: &mut H,
        rssi: i16,
        snr: i8,
    ) where
        C: CryptoFactory + Default,
        R: PhyRxTx,
        T: TimerHandle,
        H: AppCallbacks,
    {
        if self.class != DeviceClass::C {
            let _ = radio.low_power();
        }
        timer.stop(TimerId::RxWindow2);
        self.state.clear(StateFlags::RX);

        self.rx_buffer.clear();
        let copied = self.rx_buffer.extend_from_slice(radio.received_packet());
        self.mcps_confirm.ack_received = false;
        self.mcps_indication = McpsIndication {
            rssi,
            snr,
            rx_slot: Some(self.rx_slot),
            ..Default::default()
        };
        if copied.is_err() {
            self.mcps_indication.status = EventStatus::Error;
            self.prepare_rx_done_abort(timer);
            return;
        }

        match self.process_rx_frame::<C, H>(callbacks, snr) {
            RxVerdict::Abort => {
                self.prepare_rx_done_abort(timer);
            }
            RxVerdict::Accepted { stop_ack_timer } => {
                if stop_ack_timer {
                    timer.stop(TimerId::AckTimeout);
                }
                self.flags.set(RunFlags::MAC_DONE);
                timer.start(TimerId::StateCheck, 1);
            }
            RxVerdict::JoinAccepted | RxVerdict::JoinRejected => {
                self.flags.set(RunFlags::MAC_DONE);
                timer.start(TimerId::StateCheck, 1);
            }
            RxVerdict::Ignored => {
                // stray frame; Class C keeps listening, Class A waits for
                // the window close events
                if self.class == DeviceClass::C && self.rx_slot == RxSlot::RxC {
                    self.open_continuous_rx2(radio);
                }
            }
        }
    }

    fn process_rx_frame<C, H>(&mut self, callbacks: &mut H, snr: i8) -> RxVerdict
    where
        C: CryptoFactory + Default,
        H: AppCallbacks,
    {
        let Some(&mhdr) = self.rx_buffer.as_ref_for_read().first() else {
            self.mcps_indication.status = EventStatus::Error;
            return RxVerdict::Abort;
        };
        match Mhdr::new(mhdr).mtype() {
            MType::JoinAccept => self.process_join_accept::<C>(),
            MType::UnconfirmedDataDown | MType::ConfirmedDataDown => {
                self.process_data_down::<C, H>(callbacks, snr)
            }
            MType::Proprietary => {
                let data = &self.rx_buffer.as_ref_for_read()[1..];
                let mut payload = Vec::new();
                if payload.extend_from_slice(data).is_err() {
                    self.mcps_indication.status = EventStatus::Error;
                    return RxVerdict::Abort;
                }
                self.pending_downlink =
                    Some(Downlink { fport: 0, kind: DownlinkKind::Proprietary, data: payload });
                self.mcps_indication.kind = Some(DownlinkKind::Proprietary);
                self.mcps_indication.status = EventStatus::Ok;
                self.mcps_indication.rx_data = true;
                self.flags.set(RunFlags::MCPS_IND);
                RxVerdict::Accepted { stop_ack_timer: false }
            }
            _ => {
                self.mcps_indication.status = EventStatus::Error;
                RxVerdict::Abort
            }
        }
    }

    fn process_join_accept<C>(&mut self) -> RxVerdict
    where
        C: CryptoFactory + Default,
    {
        if self.is_joined() {
            self.mcps_indication.status = EventStatus::Error;
            return RxVerdict::Abort;
        }
        let Activation::Otaa(otaa) = &self.activation else {
            return RxVerdict::Ignored;
        };

        let accept = otaa.handle_join_accept::<C, N>(&mut self.rx_buffer);
        let dev_nonce = otaa.dev_nonce();
        match accept {
            Some(accept) => {
                if self.region.validate_rx1_dr_offset(accept.rx1_dr_offset) {
                    self.params.rx1_dr_offset = accept.rx1_dr_offset;
                }
                if let Some(dr) = self.region.validate_datarate(accept.rx2_data_rate) {
                    self.params.rx2_data_rate = dr;
                }
                self.params.rx1_delay_ms = commands::del_to_delay_ms(accept.rx_delay);
                self.params.rx2_delay_ms = self.params.rx1_delay_ms + 1000;
                if let Some(cf_list) = accept.cf_list {
                    self.region.apply_cf_list(&cf_list);
                }
                self.last_dev_nonce = Some(dev_nonce);
                info!("join accepted");
                self.activation = Activation::Joined(accept.session);
                self.mlme_confirm.status = EventStatus::Ok;
                RxVerdict::JoinAccepted
            }
            None => {
                self.mlme_confirm.status = EventStatus::JoinFail;
                RxVerdict::JoinRejected
            }
        }
    }

    fn process_data_down<C, H>(&mut self, callbacks: &mut H, snr: i8) -> RxVerdict
    where
        C: CryptoFactory + Default,
        H: AppCallbacks,
    {
        let frame_len = self.rx_buffer.len() as u16;

        // cap check against the window's datarate
        let cap = self.region.max_payload_length(
            self.current_rx_dr,
            self.params.repeater_support,
            self.params.downlink_dwell_time,
        );
        if frame_len.saturating_sub(FRM_PAYLOAD_OVERHEAD) > u16::from(cap) {
            self.mcps_indication.status = EventStatus::Error;
            return RxVerdict::Abort;
        }

        let Activation::Joined(session) = &mut self.activation else {
            return RxVerdict::Ignored;
        };

        let Ok(PhyPayload::Data(DataPayload::Encrypted(encrypted))) =
            parse_with_factory(self.rx_buffer.as_mut_for_read(), C::default())
        else {
            self.mcps_indication.status = EventStatus::Error;
            return RxVerdict::Abort;
        };

        use loramac_codec::parser::DataHeader;
        let fhdr = encrypted.fhdr();
        let fctrl = fhdr.fctrl();
        let fcnt16 = fhdr.fcnt();
        let fopts_len = fhdr.fopts_len();
        let confirmed = encrypted.is_confirmed();

        let own = fhdr.dev_addr().as_ref() == session.devaddr.as_ref();
        let group = if own {
            None
        } else {
            let addr = fhdr.dev_addr();
            self.multicast.lookup_mut(addr.as_ref())
        };
        let (nwk_key, app_key, stored_fcnt, multicast) = if own {
            (*session.nwkskey.inner(), *session.appskey.inner(), session.fcnt_down, false)
        } else if let Some(group) = &group {
            (*group.nwkskey.inner(), *group.appskey.inner(), group.fcnt_down, true)
        } else {
            self.mcps_indication.status = EventStatus::AddressFail;
            return RxVerdict::Abort;
        };

        let (fcnt, diff) = reconstruct_fcnt(stored_fcnt, fcnt16);
        if u32::from(diff) >= MAX_FCNT_GAP {
            self.mcps_indication.status = EventStatus::DownlinkTooManyFramesLost;
            self.mcps_indication.downlink_counter = fcnt;
            return RxVerdict::Abort;
        }
        if !encrypted.validate_mic(&nwk_key, fcnt) {
            self.mcps_indication.status = EventStatus::MicFail;
            return RxVerdict::Abort;
        }

        // duplicate detection runs before any command-buffer mutation so a
        // repeated confirmed downlink cannot wipe pending answers
        let duplicate = fcnt == stored_fcnt && stored_fcnt != 0;
        let mut skip_indication = false;
        if multicast {
            if duplicate {
                self.mcps_indication.status = EventStatus::DownlinkRepeated;
                self.mcps_indication.downlink_counter = fcnt;
                return RxVerdict::Abort;
            }
            self.mcps_indication.kind = Some(DownlinkKind::Multicast);
        } else if confirmed {
            self.mcps_indication.kind = Some(DownlinkKind::Confirmed);
            self.srv_ack_requested = true;
            skip_indication = duplicate;
        } else {
            if duplicate {
                self.mcps_indication.status = EventStatus::DownlinkRepeated;
                self.mcps_indication.downlink_counter = fcnt;
                return RxVerdict::Abort;
            }
            self.mcps_indication.kind = Some(DownlinkKind::Unconfirmed);
            self.srv_ack_requested = false;
        }

        self.adr_ack_counter = 0;
        self.commands.clear_repeat();
        if self.mcps_confirm.request == Some(McpsRequestKind::Confirmed) {
            if fctrl.ack() {
                // the pending answers were heard
                self.commands.clear();
            }
        } else {
            self.commands.clear();
        }

        if let Some(group) = group {
            group.fcnt_down = fcnt;
        } else {
            session.fcnt_down = fcnt;
        }

        self.mcps_indication.status = EventStatus::Ok;
        self.mcps_indication.frame_pending = fctrl.f_pending();
        self.mcps_indication.downlink_counter = fcnt;
        self.mcps_confirm.status = EventStatus::Ok;

        let Ok(decrypted) = encrypted.decrypt(Some(&nwk_key), Some(&app_key), fcnt) else {
            self.mcps_indication.status = EventStatus::CryptoFail;
            return RxVerdict::Abort;
        };

        use loramac_codec::parser::FrmPayload;
        let fport = decrypted.f_port();
        match decrypted.frm_payload() {
            FrmPayload::MacCommands(cmds) => {
                // port 0: commands in the payload, only valid without FOpts
                if fopts_len == 0 && !multicast {
                    self.commands.process_downlink(
                        cmds.data(),
                        snr,
                        &mut self.params,
                        &mut self.region,
                        callbacks,
                    );
                } else {
                    skip_indication = true;
                }
            }
            FrmPayload::Data(data) => {
                if fopts_len > 0 && !multicast {
                    self.commands.process_downlink(
                        decrypted.fhdr().data(),
                        snr,
                        &mut self.params,
                        &mut self.region,
                        callbacks,
                    );
                }
                if !skip_indication {
                    let mut payload = Vec::new();
                    // a FRMPayload never exceeds the 255-byte PHY payload
                    let _ = payload.extend_from_slice(data);
                    let kind = self.mcps_indication.kind.unwrap_or(DownlinkKind::Unconfirmed);
                    self.pending_downlink =
                        fport.map(|fport| Downlink { fport, kind, data: payload });
                    self.mcps_indication.port = fport;
                    self.mcps_indication.rx_data = true;
                }
            }
            FrmPayload::None => {
                if fopts_len > 0 && !multicast {
                    self.commands.process_downlink(
                        decrypted.fhdr().data(),
                        snr,
                        &mut self.params,
                        &mut self.region,
                        callbacks,
                    );
                }
            }
        }

        let mut stop_ack_timer = false;
        if !skip_indication {
            if fctrl.ack() {
                self.mcps_confirm.ack_received = true;
                self.mcps_indication.ack_received = true;
                stop_ack_timer = true;
            } else if self.ack_timeout_retries_counter > self.ack_timeout_retries {
                stop_ack_timer = true;
            }
        }

        self.flags.set(RunFlags::MCPS_IND);
        if skip_indication {
            self.flags.set(RunFlags::MCPS_IND_SKIP);
        }
        RxVerdict::Accepted { stop_ack_timer }
    }

    /// TX-delayed expiry: join retries rebuild the frame with a fresh
    /// DevNonce, everything else re-enters the scheduler as-is.
    fn tx_delayed<C, R, T, G>(&mut self, radio: &mut R, timer: &mut T, rng: &mut G)
    where
        C: CryptoFactory + Default,
        R: PhyRxTx,
        T: TimerHandle,
        G: RngCore,
    {
        if self.flags.contains(RunFlags::MLME_REQ)
            && self.mlme_confirm.request == Some(MlmeRequestKind::Join)
            && matches!(self.activation, Activation::Otaa(_))
        {
            self.reset_mac_parameters();
            let trials = match &self.activation {
                Activation::Otaa(otaa) => otaa.trials,
                _ => 0,
            };
            self.params.data_rate = self.region.alternate_join_datarate(trials + 1);
            if let Activation::Otaa(otaa) = &mut self.activation {
                otaa.prepare_buffer::<C, G, N>(rng, &mut self.tx_buffer);
            }
        }
        if self.schedule_tx(radio, timer, rng).is_err() {
            warn!("delayed TX failed to schedule");
            self.flags.set(RunFlags::MAC_DONE);
            timer.start(TimerId::StateCheck, 1);
        }
    }

    /// The housekeeping pass: finalizes uplink cycles, drives join and ACK
    /// retries, emits deferred primitives, re-arms itself while work
    /// remains.
    fn handle_state_check<C, R, T, G>(
        &mut self,
        radio: &mut R,
        timer: &mut T,
        rng: &mut G,
        out: &mut Vec<Primitive, 4>,
    ) where
        C: CryptoFactory + Default,
        R: PhyRxTx,
        T: TimerHandle,
        G: RngCore,
    {
        timer.stop(TimerId::StateCheck);
        let mut tx_timeout = false;

        if self.flags.contains(RunFlags::MAC_DONE) {
            if self.state.contains(StateFlags::RX_ABORT) {
                self.state.clear(StateFlags::RX_ABORT);
                self.state.clear(StateFlags::TX_RUNNING);
            }

            if self.flags.contains(RunFlags::MLME_REQ) || self.flags.contains(RunFlags::MCPS_REQ) {
                if self.mcps_confirm.status == EventStatus::TxTimeout
                    || self.mlme_confirm.status == EventStatus::TxTimeout
                {
                    // radio never completed; fail the cycle closed
                    self.state.clear(StateFlags::TX_RUNNING);
                    self.commands.clear();
                    self.mcps_confirm.nb_retries = self.ack_timeout_retries_counter;
                    self.mcps_confirm.ack_received = false;
                    self.mcps_confirm.time_on_air_ms = 0;
                    tx_timeout = true;
                }
            }

            if !self.node_ack_requested && !tx_timeout {
                if self.flags.contains(RunFlags::MLME_REQ)
                    && self.mlme_confirm.request == Some(MlmeRequestKind::Join)
                {
                    let (trials, max_trials) = match &self.activation {
                        Activation::Otaa(otaa) => (otaa.trials, otaa.max_trials),
                        _ => (0, 0),
                    };
                    self.mlme_confirm.nb_retries = trials;
                    if self.mlme_confirm.status == EventStatus::Ok {
                        // joined: fresh counters, cycle complete
                        self.channels_nb_rep_counter = 0;
                        self.state.clear(StateFlags::TX_RUNNING);
                    } else if trials >= max_trials {
                        self.state.clear(StateFlags::TX_RUNNING);
                    } else {
                        self.flags.clear(RunFlags::MAC_DONE);
                        self.tx_delayed::<C, R, T, G>(radio, timer, rng);
                    }
                } else if self.flags.contains(RunFlags::MLME_REQ)
                    || self.flags.contains(RunFlags::MCPS_REQ)
                {
                    if self.channels_nb_rep_counter >= self.params.channels_nb_rep
                        || self.flags.contains(RunFlags::MCPS_IND)
                    {
                        if !self.flags.contains(RunFlags::MCPS_IND) {
                            // cycle ended without hearing the network
                            self.commands.clear();
                            self.adr_ack_counter += 1;
                        }
                        self.channels_nb_rep_counter = 0;
                        self.advance_uplink_counter();
                        self.state.clear(StateFlags::TX_RUNNING);
                    } else {
                        self.flags.clear(RunFlags::MAC_DONE);
                        self.tx_delayed::<C, R, T, G>(radio, timer, rng);
                    }
                }
            }

            if self.flags.contains(RunFlags::MCPS_IND)
                && (self.mcps_confirm.ack_received
                    || self.ack_timeout_retries_counter > self.ack_timeout_retries)
            {
                // confirmed-uplink cycle settled by a downlink
                self.ack_timeout_retry_pending = false;
                self.node_ack_requested = false;
                self.advance_uplink_counter();
                self.mcps_confirm.nb_retries = self.ack_timeout_retries_counter;
                self.state.clear(StateFlags::ACK_REQ);
                self.state.clear(StateFlags::TX_RUNNING);
            }

            if self.ack_timeout_retry_pending && !self.state.contains(StateFlags::TX_DELAYED) {
                self.ack_timeout_retry_pending = false;
                if self.ack_timeout_retries_counter < self.ack_timeout_retries
                    && self.ack_timeout_retries_counter <= MAX_ACK_RETRIES
                {
                    self.ack_timeout_retries_counter += 1;
                    if self.ack_timeout_retries_counter % 2 == 1 {
                        // every second attempt drops one datarate step
                        let dr = self.params.data_rate as u8;
                        if dr > 0 {
                            if let Some(lower) = self.region.validate_datarate(dr - 1) {
                                self.params.data_rate = lower;
                            }
                        }
                    }
                    match self.schedule_tx(radio, timer, rng) {
                        Ok(()) => self.flags.clear(RunFlags::MAC_DONE),
                        Err(_) => {
                            // payload no longer fits the lowered datarate
                            self.mcps_confirm.status = EventStatus::TxDrPayloadSizeError;
                            self.finalize_failed_retry();
                        }
                    }
                } else {
                    self.params = self.defaults.clone();
                    self.region.reset_defaults();
                    self.finalize_failed_retry();
                }
            }
        }

        if self.state.contains(StateFlags::RX) {
            self.state.clear(StateFlags::RX);
        }
        if self.state.is_idle() {
            if self.flags.contains(RunFlags::MCPS_REQ) {
                self.flags.clear(RunFlags::MCPS_REQ);
                let _ = out.push(Primitive::McpsConfirm(self.mcps_confirm));
            }
            if self.flags.contains(RunFlags::MLME_REQ) {
                self.flags.clear(RunFlags::MLME_REQ);
                let _ = out.push(Primitive::MlmeConfirm(self.mlme_confirm));
            }
            if self.commands.has_sticky_pending() {
                let _ = out.push(Primitive::MlmeIndication(MlmeIndicationKind::ScheduleUplink));
            }
            self.flags.clear(RunFlags::MAC_DONE);
        } else {
            timer.start(TimerId::StateCheck, MAC_STATE_CHECK_TIMEOUT);
        }

        if self.flags.contains(RunFlags::MCPS_IND) {
            self.flags.clear(RunFlags::MCPS_IND);
            if self.class == DeviceClass::C {
                self.open_continuous_rx2(radio);
            }
            if !self.flags.contains(RunFlags::MCPS_IND_SKIP) {
                let _ = out.push(Primitive::McpsIndication(self.mcps_indication));
            }
            self.flags.clear(RunFlags::MCPS_IND_SKIP);
        }
    }

    fn finalize_failed_retry(&mut self) {
        self.commands.clear();
        self.state.clear(StateFlags::ACK_REQ);
        self.state.clear(StateFlags::TX_RUNNING);
        self.node_ack_requested = false;
        self.mcps_confirm.ack_received = false;
        self.mcps_confirm.nb_retries = self.ack_timeout_retries_counter;
        self.mcps_confirm.datarate = Some(self.params.data_rate);
        self.advance_uplink_counter();
    }

    fn advance_uplink_counter(&mut self) {
        if self.uplink_counter_fixed {
            return;
        }
        if let Activation::Joined(session) = &mut self.activation {
            session.fcnt_up = session.fcnt_up.wrapping_add(1);
        }
    }

    /// ADR bookkeeping before a frame build. Returns whether the ADRAckReq
    /// bit must be set; may lower the datarate or restore defaults when the
    /// network has been silent too long.
    fn adr_next(&mut self) -> bool {
        if !self.adr_on {
            return false;
        }
        if self.adr_ack_counter < ADR_ACK_LIMIT {
            return false;
        }
        if self.adr_ack_counter >= ADR_ACK_LIMIT + ADR_ACK_DELAY
            && (self.adr_ack_counter - ADR_ACK_LIMIT) % ADR_ACK_DELAY == 0
        {
            let dr = self.params.data_rate as u8;
            if dr > 0 && self.region.validate_datarate(dr - 1).is_some() {
                self.params.data_rate = self.region.validate_datarate(dr - 1).unwrap();
            } else {
                // nothing lower left: restore power and channel mask
                self.params.tx_power = self.defaults.tx_power;
                self.region.reset_defaults();
            }
        }
        true
    }

    /// Full parameter reset between join attempts: counters, radio
    /// parameters and command buffers return to defaults; credentials and
    /// the attempt counter survive.
    fn reset_mac_parameters(&mut self) {
        if let Activation::Joined(_) = self.activation {
            self.activation = Activation::Unjoined;
        }
        self.adr_ack_counter = 0;
        self.channels_nb_rep_counter = 0;
        self.ack_timeout_retries = 1;
        self.ack_timeout_retries_counter = 1;
        self.ack_timeout_retry_pending = false;
        self.node_ack_requested = false;
        self.srv_ack_requested = false;
        self.commands.clear();
        self.commands.clear_repeat();
        self.params = self.defaults.clone();
        self.multicast.reset_counters();
        self.region.reset_defaults();
    }
}

fn add_offset(base: u32, offset: i32) -> u32 {
    base.saturating_add_signed(offset).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_word_is_a_bitset() {
        let mut state = StateFlags::default();
        assert!(state.is_idle());
        state.set(StateFlags::TX_RUNNING);
        state.set(StateFlags::ACK_REQ);
        assert!(state.contains(StateFlags::TX_RUNNING));
        assert!(!state.is_idle());
        state.clear(StateFlags::TX_RUNNING);
        assert!(state.contains(StateFlags::ACK_REQ));
        state.clear(StateFlags::ACK_REQ);
        assert!(state.is_idle());
    }

    #[test]
    fn run_flags_track_pending_primitives() {
        let mut flags = RunFlags::default();
        assert!(flags.is_clear());
        flags.set(RunFlags::MCPS_REQ);
        flags.set(RunFlags::MAC_DONE);
        assert!(flags.contains(RunFlags::MCPS_REQ));
        flags.clear(RunFlags::MAC_DONE);
        assert!(!flags.contains(RunFlags::MAC_DONE));
        assert!(!flags.is_clear());
    }
}
