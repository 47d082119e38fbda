//! MAC command payloads of the LoRaWAN 1.0.2 command set and iteration over
//! command sequences carried in FOpts or a port-0 FRMPayload.

use core::marker::PhantomData;

use crate::types::{ChannelMask, DLSettings, DataRateRange, Frequency, Redundancy};

#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error {
    UnknownMacCommand,
    BufferTooShort,
    InvalidIndex,
    InvalidDataRateRange,
}

/// A MAC command that can be appended to an uplink.
pub trait SerializableMacCommand {
    fn payload_bytes(&self) -> &[u8];
    fn cid(&self) -> u8;
    fn payload_len(&self) -> usize;
}

/// Length in bytes of a command sequence, CIDs included.
pub fn mac_commands_len(cmds: &[&dyn SerializableMacCommand]) -> usize {
    cmds.iter().map(|c| c.payload_len() + 1).sum()
}

macro_rules! mac_cmd_zero_len {
    (
        $(
            $(#[$outer:meta])*
            struct $type:ident[cid=$cid:expr]
        )*
    ) => {
        $(
            $(#[$outer])*
            #[derive(Debug, PartialEq, Eq)]
            pub struct $type();

            impl $type {
                pub fn new(_: &[u8]) -> $type {
                    $type()
                }

                pub(crate) fn new_from_raw(_: &[u8]) -> $type {
                    $type()
                }

                pub const fn cid() -> u8 {
                    $cid
                }

                pub const fn len() -> usize {
                    0
                }

                pub fn bytes(&self) -> &[u8] {
                    &[]
                }
            }
        )*
    };
}

macro_rules! mac_cmds {
    (
        $(
            $(#[$outer:meta])*
            struct $type:ident[cid=$cid:expr, size=$size:expr]
        )*
    ) => {
        $(
            $(#[$outer])*
            #[derive(Debug, PartialEq, Eq)]
            pub struct $type<'a>(pub(crate) &'a [u8]);

            impl<'a> $type<'a> {
                pub fn new(data: &'a [u8]) -> Result<$type<'a>, Error> {
                    if data.len() != $size {
                        Err(Error::BufferTooShort)
                    } else {
                        Ok($type(data))
                    }
                }

                pub(crate) fn new_from_raw(data: &'a [u8]) -> $type<'a> {
                    $type(data)
                }

                pub const fn cid() -> u8 {
                    $cid
                }

                pub const fn len() -> usize {
                    $size
                }

                pub fn bytes(&self) -> &[u8] {
                    self.0
                }
            }
        )*
    };
}

mac_cmd_zero_len! {
    /// Requests the link margin and gateway count from the network.
    struct LinkCheckReqPayload[cid=0x02]

    /// Network queries the device status.
    struct DevStatusReqPayload[cid=0x06]
}

mac_cmds! {
    /// Network answer to a LinkCheckReq.
    struct LinkCheckAnsPayload[cid=0x02, size=2]

    /// Network request to change datarate, TX power and channel mask.
    struct LinkADRReqPayload[cid=0x03, size=4]

    /// Network request to cap the aggregated duty cycle.
    struct DutyCycleReqPayload[cid=0x04, size=1]

    /// Network request to change the RX1 offset, RX2 datarate and RX2
    /// frequency.
    struct RXParamSetupReqPayload[cid=0x05, size=4]

    /// Network request to create or modify an uplink channel.
    struct NewChannelReqPayload[cid=0x07, size=5]

    /// Network request to change the RX1 delay.
    struct RXTimingSetupReqPayload[cid=0x08, size=1]

    /// Network request to set dwell limits and the max EIRP.
    struct TxParamSetupReqPayload[cid=0x09, size=1]

    /// Network request to move the downlink frequency of a channel.
    struct DlChannelReqPayload[cid=0x0A, size=4]
}

mac_cmds! {
    /// Device answer to a LinkADRReq.
    struct LinkADRAnsPayload[cid=0x03, size=1]

    /// Device answer to a RXParamSetupReq.
    struct RXParamSetupAnsPayload[cid=0x05, size=1]

    /// Device status: battery level and demodulation margin.
    struct DevStatusAnsPayload[cid=0x06, size=2]

    /// Device answer to a NewChannelReq.
    struct NewChannelAnsPayload[cid=0x07, size=1]

    /// Device answer to a DlChannelReq.
    struct DlChannelAnsPayload[cid=0x0A, size=1]
}

mac_cmd_zero_len! {
    /// Device answer to a DutyCycleReq.
    struct DutyCycleAnsPayload[cid=0x04]

    /// Device answer to a RXTimingSetupReq.
    struct RXTimingSetupAnsPayload[cid=0x08]

    /// Device answer to a TxParamSetupReq.
    struct TxParamSetupAnsPayload[cid=0x09]
}

impl LinkCheckAnsPayload<'_> {
    /// Link margin in dB above the demodulation floor.
    pub fn margin(&self) -> u8 {
        self.0[0]
    }

    /// Number of gateways that received the LinkCheckReq.
    pub fn gateway_count(&self) -> u8 {
        self.0[1]
    }
}

impl LinkADRReqPayload<'_> {
    pub fn data_rate(&self) -> u8 {
        self.0[0] >> 4
    }

    pub fn tx_power(&self) -> u8 {
        self.0[0] & 0x0f
    }

    pub fn channel_mask(&self) -> ChannelMask<2> {
        ChannelMask::new_from_raw(&self.0[1..3])
    }

    pub fn redundancy(&self) -> Redundancy {
        Redundancy::new(self.0[3])
    }
}

impl DutyCycleReqPayload<'_> {
    /// MaxDCycle exponent: the aggregated duty cycle is `1 / 2^value`.
    /// Value 255 switches the device off.
    pub fn max_duty_cycle(&self) -> u8 {
        self.0[0]
    }
}

impl RXParamSetupReqPayload<'_> {
    pub fn dl_settings(&self) -> DLSettings {
        DLSettings::new(self.0[0])
    }

    pub fn frequency(&self) -> Frequency<'_> {
        Frequency::new_from_raw(&self.0[1..4])
    }
}

impl NewChannelReqPayload<'_> {
    pub fn channel_index(&self) -> u8 {
        self.0[0]
    }

    pub fn frequency(&self) -> Frequency<'_> {
        Frequency::new_from_raw(&self.0[1..4])
    }

    pub fn data_rate_range(&self) -> DataRateRange {
        DataRateRange::new_from_raw(self.0[4])
    }
}

impl RXTimingSetupReqPayload<'_> {
    /// RX1 delay in seconds, `0` meaning the default of one second.
    pub fn delay(&self) -> u8 {
        self.0[0] & 0x0f
    }
}

impl TxParamSetupReqPayload<'_> {
    pub fn downlink_dwell_time(&self) -> bool {
        self.0[0] & (1 << 5) != 0
    }

    pub fn uplink_dwell_time(&self) -> bool {
        self.0[0] & (1 << 4) != 0
    }

    /// Index into the regional MaxEIRP table.
    pub fn max_eirp_index(&self) -> u8 {
        self.0[0] & 0x0f
    }
}

impl DlChannelReqPayload<'_> {
    pub fn channel_index(&self) -> u8 {
        self.0[0]
    }

    pub fn frequency(&self) -> Frequency<'_> {
        Frequency::new_from_raw(&self.0[1..4])
    }
}

macro_rules! mac_cmds_enum {
    (
        $(#[$outer:meta])*
        $vis:vis enum $name:ident<$lt:lifetime> {
            $(
                $var:ident($type:ident$(<$var_lt:lifetime>)?)
            )*
        }
    ) => {
        $(#[$outer])*
        #[derive(Debug, PartialEq, Eq)]
        #[allow(clippy::len_without_is_empty, missing_docs)]
        $vis enum $name<$lt> {
            $(
                $var($type$(<$var_lt>)?),
            )*
        }

        impl<$lt> $name<$lt> {
            /// Payload length of this command, CID excluded.
            pub fn len(&self) -> usize {
                match *self {
                    $(
                        Self::$var(_) => $type::len(),
                    )*
                }
            }

            pub fn bytes(&self) -> &[u8] {
                match *self {
                    $(
                        Self::$var(ref v) => v.bytes(),
                    )*
                }
            }
        }

        impl<$lt> SerializableMacCommand for $name<$lt> {
            fn payload_bytes(&self) -> &[u8] {
                self.bytes()
            }

            fn cid(&self) -> u8 {
                match *self {
                    $(
                        Self::$var(_) => $type::cid(),
                    )*
                }
            }

            fn payload_len(&self) -> usize {
                self.len()
            }
        }

        impl<$lt> Iterator for MacCommandIterator<$lt, $name<$lt>> {
            type Item = $name<$lt>;

            fn next(&mut self) -> Option<Self::Item> {
                if self.index >= self.data.len() {
                    return None;
                }
                let data = &self.data[self.index..];
                $(
                    if data[0] == $type::cid() && data.len() > $type::len() {
                        self.index += 1 + $type::len();
                        return Some($name::$var($type::new_from_raw(&data[1..1 + $type::len()])));
                    }
                )*
                // unknown or truncated command: nothing further can be
                // parsed reliably
                self.index = self.data.len();
                None
            }
        }
    };
}

mac_cmds_enum! {
    /// Commands a device may receive from the network.
    pub enum DownlinkMacCommand<'a> {
        LinkCheckAns(LinkCheckAnsPayload<'a>)
        LinkADRReq(LinkADRReqPayload<'a>)
        DutyCycleReq(DutyCycleReqPayload<'a>)
        RXParamSetupReq(RXParamSetupReqPayload<'a>)
        DevStatusReq(DevStatusReqPayload)
        NewChannelReq(NewChannelReqPayload<'a>)
        RXTimingSetupReq(RXTimingSetupReqPayload<'a>)
        TxParamSetupReq(TxParamSetupReqPayload<'a>)
        DlChannelReq(DlChannelReqPayload<'a>)
    }
}

mac_cmds_enum! {
    /// Commands a device may send to the network.
    pub enum UplinkMacCommand<'a> {
        LinkCheckReq(LinkCheckReqPayload)
        LinkADRAns(LinkADRAnsPayload<'a>)
        DutyCycleAns(DutyCycleAnsPayload)
        RXParamSetupAns(RXParamSetupAnsPayload<'a>)
        DevStatusAns(DevStatusAnsPayload<'a>)
        NewChannelAns(NewChannelAnsPayload<'a>)
        RXTimingSetupAns(RXTimingSetupAnsPayload)
        TxParamSetupAns(TxParamSetupAnsPayload)
        DlChannelAns(DlChannelAnsPayload<'a>)
    }
}

/// Iterator over the commands of a raw command sequence. Parsing stops at
/// the first unknown CID since command boundaries are unknowable past it.
#[derive(Debug, PartialEq, Eq)]
pub struct MacCommandIterator<'a, T> {
    pub(crate) data: &'a [u8],
    pub(crate) index: usize,
    pub(crate) item: PhantomData<T>,
}

impl<'a, T> MacCommandIterator<'a, T> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, index: 0, item: PhantomData }
    }
}

/// Convenience wrapper for iterating downlink commands.
pub fn parse_downlink_mac_commands(data: &[u8]) -> MacCommandIterator<'_, DownlinkMacCommand<'_>> {
    MacCommandIterator::new(data)
}

/// Convenience wrapper for iterating uplink commands.
pub fn parse_uplink_mac_commands(data: &[u8]) -> MacCommandIterator<'_, UplinkMacCommand<'_>> {
    MacCommandIterator::new(data)
}
