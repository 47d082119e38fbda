//! The narrow radio capability set the MAC consumes, plus the shared
//! scratch buffer type.

pub use lora_modulation::BaseBandModulationParams;

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RfConfig {
    pub frequency: u32,
    pub bb: BaseBandModulationParams,
}

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RxMode {
    /// Stay in RX until told otherwise (Class C listen).
    Continuous,
    /// One-shot window. `ms` is extra buffer time added to the preamble
    /// detection timeout.
    Single { ms: u32 },
}

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RxConfig {
    pub rf: RfConfig,
    pub mode: RxMode,
}

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxConfig {
    pub pw: i8,
    pub rf: RfConfig,
}

impl TxConfig {
    /// Clamps the requested power to the board limit and compensates for
    /// antenna gain.
    pub fn adjust_power(&mut self, max_power: u8, antenna_gain: i8) {
        self.pw -= antenna_gain;
        self.pw = core::cmp::min(self.pw, max_power as i8);
    }
}

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RxQuality {
    rssi: i16,
    snr: i8,
}

impl RxQuality {
    pub fn new(rssi: i16, snr: i8) -> RxQuality {
        RxQuality { rssi, snr }
    }

    pub fn rssi(self) -> i16 {
        self.rssi
    }

    pub fn snr(self) -> i8 {
        self.snr
    }
}

/// Capability set of the transceiver driver.
///
/// All calls are issued from the single MAC event context. Completion is
/// signalled back by posting [`Event`](crate::event::Event) values from the
/// driver's interrupt handlers; none of these methods block.
pub trait PhyRxTx {
    type PhyError: core::fmt::Debug;

    /// Maximum conducted power of the board in dBm.
    const MAX_RADIO_POWER: u8;
    /// Gain of the attached antenna in dB.
    const ANTENNA_GAIN: i8 = 0;

    /// Starts transmitting `buf`; the driver posts `RadioTxDone` or
    /// `RadioTxTimeout` when finished.
    fn tx(&mut self, config: TxConfig, buf: &[u8]) -> Result<(), Self::PhyError>;

    /// Configures and opens a receive window (one-shot or continuous).
    fn setup_rx(&mut self, config: RxConfig) -> Result<(), Self::PhyError>;

    /// The payload of the most recent successful reception.
    fn received_packet(&mut self) -> &[u8];

    fn low_power(&mut self) -> Result<(), Self::PhyError>;

    fn standby(&mut self) -> Result<(), Self::PhyError>;

    /// Selects the public or private sync word.
    fn set_public_network(&mut self, enabled: bool) -> Result<(), Self::PhyError>;

    /// Emits an unmodulated carrier, used by compliance testing.
    fn continuous_wave(
        &mut self,
        frequency: u32,
        power: i8,
        timeout_ms: u16,
    ) -> Result<(), Self::PhyError>;
}

/// Fixed scratch buffer for frame assembly and reception.
pub(crate) struct RadioBuffer<const N: usize> {
    packet: [u8; N],
    pos: usize,
}

impl<const N: usize> RadioBuffer<N> {
    pub(crate) fn new() -> Self {
        Self { packet: [0; N], pos: 0 }
    }

    pub(crate) fn clear(&mut self) {
        self.pos = 0;
    }

    pub(crate) fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub(crate) fn extend_from_slice(&mut self, buf: &[u8]) -> Result<(), ()> {
        if self.pos + buf.len() <= self.packet.len() {
            self.packet[self.pos..self.pos + buf.len()].copy_from_slice(buf);
            self.pos += buf.len();
            Ok(())
        } else {
            Err(())
        }
    }

    /// Mutable view of the filled prefix.
    pub(crate) fn as_mut_for_read(&mut self) -> &mut [u8] {
        &mut self.packet[..self.pos]
    }

    /// Read-only view of the filled prefix.
    pub(crate) fn as_ref_for_read(&self) -> &[u8] {
        &self.packet[..self.pos]
    }

    pub(crate) fn len(&self) -> usize {
        self.pos
    }
}

impl<const N: usize> AsMut<[u8]> for RadioBuffer<N> {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.packet
    }
}

impl<const N: usize> AsRef<[u8]> for RadioBuffer<N> {
    fn as_ref(&self) -> &[u8] {
        &self.packet
    }
}
