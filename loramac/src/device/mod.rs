//! The application facade: wires the engine to a radio, a timer service,
//! an RNG and the application callbacks, and exposes the end-device API.

use core::marker::PhantomData;

use heapless::Vec;
use rand_core::RngCore;

use loramac_codec::keys::CryptoFactory;

use crate::event::{Event, EventQueue};
use crate::mac::multicast::MulticastGroup;
use crate::mac::{
    self, DeviceClass, EventStatus, Mac, McpsRequestKind, MlmeIndicationKind, MlmeRequestKind,
    Primitive, Session,
};
use crate::radio::PhyRxTx;
use crate::region::{self, Channel, Region, DR, MAX_CHANNELS};
use crate::timer::TimerHandle;
use crate::{AppCallbacks, AppEvent, Downlink, DownlinkKind, JoinMode, OtaaCredentials};

#[cfg(test)]
mod test;

/// Status codes of the public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error {
    /// The single TX slot is occupied or no matching downlink is staged.
    WouldBlock,
    /// No session: connect first.
    NoActiveSessions,
    ParameterInvalid,
    /// A connect is already established or in progress.
    AlreadyConnected,
    /// The server switched the device off (DutyCycleReq 255).
    DeviceOff,
    /// Payload too large for the current datarate.
    LengthError,
    CryptoFail,
    ServiceUnknown,
    /// Channel-plan mutation attempted while a transmission is in flight.
    Busy,
    /// No admissible channel for any datarate.
    NoChannelFound,
    /// The radio driver rejected a request.
    Radio,
}

impl From<mac::Error> for Error {
    fn from(e: mac::Error) -> Self {
        match e {
            mac::Error::Busy => Error::WouldBlock,
            mac::Error::NotJoined => Error::NoActiveSessions,
            mac::Error::ParameterInvalid => Error::ParameterInvalid,
            mac::Error::DeviceOff => Error::DeviceOff,
            mac::Error::LengthError => Error::LengthError,
            mac::Error::CryptoFail => Error::CryptoFail,
            mac::Error::ServiceUnknown => Error::ServiceUnknown,
            mac::Error::NoChannelFound => Error::NoChannelFound,
            mac::Error::Radio => Error::Radio,
        }
    }
}

/// Uplink service selector for [`Device::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum SendKind {
    Unconfirmed,
    Confirmed,
    Proprietary,
}

/// Downlink kinds accepted by [`Device::receive`], as a small flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageFlags(u8);

impl MessageFlags {
    pub const UNCONFIRMED: MessageFlags = MessageFlags(1 << 0);
    pub const CONFIRMED: MessageFlags = MessageFlags(1 << 1);
    pub const MULTICAST: MessageFlags = MessageFlags(1 << 2);
    pub const PROPRIETARY: MessageFlags = MessageFlags(1 << 3);
    pub const ANY: MessageFlags = MessageFlags(0x0f);

    pub fn accepts(&self, kind: DownlinkKind) -> bool {
        let bit = match kind {
            DownlinkKind::Unconfirmed => Self::UNCONFIRMED.0,
            DownlinkKind::Confirmed => Self::CONFIRMED.0,
            DownlinkKind::Multicast => Self::MULTICAST.0,
            DownlinkKind::Proprietary => Self::PROPRIETARY.0,
        };
        self.0 & bit != 0
    }
}

impl core::ops::BitOr for MessageFlags {
    type Output = MessageFlags;

    fn bitor(self, rhs: MessageFlags) -> MessageFlags {
        MessageFlags(self.0 | rhs.0)
    }
}

/// One entry of the channel plan exposed to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ChannelPlanEntry {
    pub id: u8,
    pub frequency: u32,
    pub dr_min: u8,
    pub dr_max: u8,
}

/// A LoRaWAN end device.
///
/// Bound to a radio driver (`R`), a timer service (`T`), a crypto
/// implementation (`C`), a random source (`G`) and the application
/// callbacks (`H`). `N` sizes the TX/RX scratch buffers; 256 fits the
/// largest LoRa frame.
pub struct Device<R, T, C, G, H, const N: usize = 256>
where
    R: PhyRxTx,
    T: TimerHandle,
    C: CryptoFactory + Default,
    G: RngCore,
    H: AppCallbacks,
{
    mac: Mac<N>,
    radio: R,
    timer: T,
    rng: G,
    callbacks: H,
    crypto: PhantomData<C>,
    confirmed_msg_retries: u8,
    link_check_requested: bool,
    automatic_uplink: bool,
    last_downlink: Option<Downlink>,
}

impl<R, T, C, G, H, const N: usize> Device<R, T, C, G, H, N>
where
    R: PhyRxTx,
    T: TimerHandle,
    C: CryptoFactory + Default,
    G: RngCore,
    H: AppCallbacks,
{
    /// Creates a device for `region`. The radio is switched to the public
    /// sync word; call [`connect`](Self::connect) to enter a network.
    pub fn new(region: Region, mut radio: R, mut timer: T, rng: G, callbacks: H) -> Self {
        let now = timer.now_ms();
        let _ = radio.set_public_network(true);
        Self {
            mac: Mac::new(region::Configuration::new(region), now),
            radio,
            timer,
            rng,
            callbacks,
            crypto: PhantomData,
            confirmed_msg_retries: 1,
            link_check_requested: false,
            automatic_uplink: true,
            last_downlink: None,
        }
    }

    /// Starts an activation. OTAA resolves asynchronously into a
    /// `Connected` or `JoinFailed` event; ABP succeeds immediately.
    pub fn connect(&mut self, mode: JoinMode) -> Result<(), Error> {
        if self.mac.is_joined() {
            return Err(Error::AlreadyConnected);
        }
        match mode {
            JoinMode::Otaa { deveui, appeui, appkey, nb_trials } => {
                if nb_trials == 0 || nb_trials > 16 {
                    return Err(Error::ParameterInvalid);
                }
                self.mac
                    .join_otaa::<C, R, T, G>(
                        &mut self.radio,
                        &mut self.timer,
                        &mut self.rng,
                        OtaaCredentials { deveui, appeui, appkey },
                        nb_trials,
                    )
                    .map_err(|e| match e {
                        mac::Error::Busy => Error::AlreadyConnected,
                        e => e.into(),
                    })
            }
            JoinMode::Abp { devaddr, nwkskey, appskey } => {
                self.mac.join_abp(Session::new(devaddr, nwkskey, appskey))?;
                self.callbacks.event(AppEvent::Connected);
                Ok(())
            }
        }
    }

    /// Tears the session down: all timers stopped, radio asleep, state
    /// cleared. Emits `Disconnected`.
    pub fn disconnect(&mut self) {
        self.mac.shutdown(&mut self.radio, &mut self.timer);
        self.last_downlink = None;
        self.callbacks.event(AppEvent::Disconnected);
    }

    /// Queues an uplink and returns the number of bytes buffered. The
    /// outcome arrives as a `TxDone`/`TxTimeout`/`TxError` event.
    pub fn send(&mut self, fport: u8, data: &[u8], kind: SendKind) -> Result<usize, Error> {
        if !self.mac.is_joined() {
            return Err(Error::NoActiveSessions);
        }
        if self.link_check_requested {
            self.mac.queue_link_check();
        }
        let kind = match kind {
            SendKind::Unconfirmed => McpsRequestKind::Unconfirmed,
            SendKind::Confirmed => McpsRequestKind::Confirmed,
            SendKind::Proprietary => McpsRequestKind::Proprietary,
        };
        self.mac.send::<C, R, T, G>(
            &mut self.radio,
            &mut self.timer,
            &mut self.rng,
            kind,
            fport,
            data,
            self.confirmed_msg_retries,
        )?;
        Ok(data.len())
    }

    /// Copies the most recent downlink matching `fport` and `flags` into
    /// `buf`, consuming it. `WouldBlock` when nothing matches.
    pub fn receive(&mut self, fport: u8, buf: &mut [u8], flags: MessageFlags) -> Result<usize, Error> {
        let matches = self
            .last_downlink
            .as_ref()
            .is_some_and(|d| d.fport == fport && flags.accepts(d.kind));
        if !matches {
            return Err(Error::WouldBlock);
        }
        // the match above guarantees presence
        let downlink = self.last_downlink.take().unwrap();
        let len = downlink.data.len().min(buf.len());
        buf[..len].copy_from_slice(&downlink.data[..len]);
        Ok(len)
    }

    /// Number of transmissions for a confirmed uplink, 1..=8.
    pub fn set_confirmed_msg_retries(&mut self, count: u8) -> Result<(), Error> {
        if !(1..=8).contains(&count) {
            return Err(Error::ParameterInvalid);
        }
        self.confirmed_msg_retries = count;
        Ok(())
    }

    pub fn enable_adaptive_datarate(&mut self) {
        self.mac.adr_on = true;
    }

    pub fn disable_adaptive_datarate(&mut self) {
        self.mac.adr_on = false;
    }

    /// Fixes the uplink datarate. Rejected while ADR owns it or when the
    /// region does not define `dr`.
    pub fn set_datarate(&mut self, dr: u8) -> Result<(), Error> {
        if self.mac.adr_on {
            return Err(Error::ParameterInvalid);
        }
        let dr = self.mac.region.validate_datarate(dr).ok_or(Error::ParameterInvalid)?;
        self.mac.params.data_rate = dr;
        Ok(())
    }

    pub fn get_datarate(&self) -> DR {
        self.mac.params.data_rate
    }

    pub fn set_device_class(&mut self, class: DeviceClass) {
        self.mac.set_class(&mut self.radio, class);
    }

    /// Arms a LinkCheckReq on every following uplink until removed.
    pub fn add_link_check_request(&mut self) {
        self.link_check_requested = true;
    }

    pub fn remove_link_check_request(&mut self) {
        self.link_check_requested = false;
    }

    /// Replaces/extends the channel plan. Only allowed while no frame is
    /// in flight.
    pub fn set_channel_plan(&mut self, plan: &[ChannelPlanEntry]) -> Result<(), Error> {
        if self.mac.tx_in_flight() {
            return Err(Error::Busy);
        }
        for entry in plan {
            let dr_min = self.mac.region.validate_datarate(entry.dr_min);
            let dr_max = self.mac.region.validate_datarate(entry.dr_max);
            let (Some(dr_min), Some(dr_max)) = (dr_min, dr_max) else {
                return Err(Error::ParameterInvalid);
            };
            if dr_min > dr_max {
                return Err(Error::ParameterInvalid);
            }
            let channel = Channel {
                frequency: entry.frequency,
                rx1_frequency: None,
                dr_min,
                dr_max,
                band: 0,
            };
            if !self.mac.region.add_channel(entry.id, channel) {
                return Err(Error::ParameterInvalid);
            }
        }
        Ok(())
    }

    pub fn get_channel_plan(&self, out: &mut Vec<ChannelPlanEntry, MAX_CHANNELS>) {
        out.clear();
        for id in 0..MAX_CHANNELS as u8 {
            if let Some(channel) = self.mac.region.channel(id) {
                let _ = out.push(ChannelPlanEntry {
                    id,
                    frequency: channel.frequency,
                    dr_min: channel.dr_min as u8,
                    dr_max: channel.dr_max as u8,
                });
            }
        }
    }

    pub fn remove_channel(&mut self, id: u8) -> Result<(), Error> {
        if self.mac.tx_in_flight() {
            return Err(Error::Busy);
        }
        if self.mac.region.remove_channel(id) {
            Ok(())
        } else {
            Err(Error::ParameterInvalid)
        }
    }

    /// Removes every application-defined channel; the regional defaults
    /// stay.
    pub fn remove_channel_plan(&mut self) -> Result<(), Error> {
        if self.mac.tx_in_flight() {
            return Err(Error::Busy);
        }
        for id in 0..MAX_CHANNELS as u8 {
            let _ = self.mac.region.remove_channel(id);
        }
        Ok(())
    }

    /// Registers a multicast group for Class C reception.
    pub fn add_multicast_group(&mut self, id: usize, group: MulticastGroup) -> Result<(), Error> {
        if self.mac.multicast.register(id, group) {
            Ok(())
        } else {
            Err(Error::ParameterInvalid)
        }
    }

    pub fn remove_multicast_group(&mut self, id: usize) -> bool {
        self.mac.multicast.deregister(id)
    }

    /// When enabled (the default), a confirmed downlink is acknowledged
    /// with an automatic empty uplink if the application stays quiet.
    pub fn set_automatic_uplink(&mut self, enabled: bool) {
        self.automatic_uplink = enabled;
    }

    pub fn is_joined(&self) -> bool {
        self.mac.is_joined()
    }

    pub fn get_session(&self) -> Option<&Session> {
        self.mac.session()
    }

    /// Restores a previously persisted session (fcnt state included).
    pub fn set_session(&mut self, session: Session) {
        self.mac.set_session(session);
    }

    /// The DevNonce of the last join exchange, for hosts persisting it
    /// against replay.
    pub fn last_dev_nonce(&self) -> Option<u16> {
        self.mac.last_dev_nonce()
    }

    pub fn get_radio(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Compliance-test hook: pins the uplink counter.
    #[doc(hidden)]
    pub fn set_uplink_counter_fixed(&mut self, fixed: bool) {
        self.mac.set_uplink_counter_fixed(fixed);
    }

    /// Compliance-test hook: suppresses the receive windows after TX.
    #[doc(hidden)]
    pub fn set_rx_windows_enabled(&mut self, enabled: bool) {
        self.mac.set_rx_windows_enabled(enabled);
    }

    /// Compliance-test hook: unmodulated carrier on `frequency`.
    #[doc(hidden)]
    pub fn setup_tx_cont_wave(
        &mut self,
        frequency: u32,
        power: i8,
        timeout_ms: u16,
    ) -> Result<(), Error> {
        if !self.mac.region.frequency_valid(frequency) {
            return Err(Error::ParameterInvalid);
        }
        self.radio.continuous_wave(frequency, power, timeout_ms).map_err(|_| Error::Radio)
    }

    /// Runs one event to completion on the MAC context.
    pub fn process_event(&mut self, event: Event) {
        let mut primitives: Vec<Primitive, 4> = Vec::new();
        self.mac.on_event::<C, R, T, G, H>(
            &mut self.radio,
            &mut self.timer,
            &mut self.rng,
            &mut self.callbacks,
            event,
            &mut primitives,
        );
        for primitive in primitives {
            self.deliver(primitive);
        }
    }

    /// Drains the queue; the single consumer context of the stack.
    pub fn dispatch<const E: usize>(&mut self, queue: &EventQueue<E>) {
        while let Some(event) = queue.pop() {
            self.process_event(event);
        }
    }

    /// Consumes events forever, invoking `idle` between bursts (typically
    /// a WFI or scheduler yield).
    pub fn run_forever<const E: usize>(
        &mut self,
        queue: &EventQueue<E>,
        mut idle: impl FnMut(),
    ) -> ! {
        loop {
            self.dispatch(queue);
            idle();
        }
    }

    fn deliver(&mut self, primitive: Primitive) {
        match primitive {
            Primitive::McpsConfirm(confirm) => {
                let event = match confirm.status {
                    EventStatus::Ok => AppEvent::TxDone,
                    EventStatus::TxTimeout => AppEvent::TxTimeout,
                    EventStatus::CryptoFail => AppEvent::TxCryptoError,
                    _ => AppEvent::TxError,
                };
                self.callbacks.event(event);
            }
            Primitive::McpsIndication(indication) => match indication.status {
                EventStatus::Ok => {
                    if let Some(downlink) = self.mac.take_downlink() {
                        self.last_downlink = Some(downlink);
                    }
                    if indication.rx_data {
                        self.callbacks.event(AppEvent::RxDone);
                    }
                    if indication.kind == Some(DownlinkKind::Confirmed) {
                        self.acknowledge_confirmed_downlink(indication.port);
                    }
                }
                EventStatus::Rx1Timeout | EventStatus::Rx2Timeout => {
                    self.callbacks.event(AppEvent::RxTimeout);
                }
                _ => self.callbacks.event(AppEvent::RxError),
            },
            Primitive::MlmeConfirm(confirm) => {
                if confirm.request == Some(MlmeRequestKind::Join) {
                    let event = if confirm.status == EventStatus::Ok {
                        AppEvent::Connected
                    } else {
                        AppEvent::JoinFailed
                    };
                    self.callbacks.event(event);
                }
            }
            Primitive::MlmeIndication(MlmeIndicationKind::ScheduleUplink) => {
                self.callbacks.event(AppEvent::UplinkRequired);
            }
        }
    }

    /// A confirmed downlink owes the server an uplink carrying the ACK
    /// bit. Send one automatically, or tell the application to.
    fn acknowledge_confirmed_downlink(&mut self, port: Option<u8>) {
        let port = port.filter(|p| (1..=224).contains(p));
        if self.automatic_uplink {
            if let Some(port) = port {
                if self
                    .mac
                    .send::<C, R, T, G>(
                        &mut self.radio,
                        &mut self.timer,
                        &mut self.rng,
                        McpsRequestKind::Unconfirmed,
                        port,
                        &[],
                        self.confirmed_msg_retries,
                    )
                    .is_ok()
                {
                    self.callbacks.event(AppEvent::AutomaticUplink);
                    return;
                }
            }
        }
        self.callbacks.event(AppEvent::ScheduleUplink);
    }
}
