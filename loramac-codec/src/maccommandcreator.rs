//! Builders for the uplink MAC commands a device answers the network with.

use crate::maccommands::{
    mac_commands_len, DevStatusAnsPayload, DlChannelAnsPayload, DutyCycleAnsPayload,
    Error, LinkADRAnsPayload, LinkCheckReqPayload, NewChannelAnsPayload, RXParamSetupAnsPayload,
    RXTimingSetupAnsPayload, SerializableMacCommand, TxParamSetupAnsPayload,
};

macro_rules! impl_creator_boilerplate {
    ($type:ident, $payload:ident) => {
        impl Default for $type {
            fn default() -> Self {
                Self { data: [$payload::cid()] }
            }
        }

        impl $type {
            pub fn new() -> Self {
                Default::default()
            }

            /// The serialized command, CID first.
            pub fn build(&self) -> &[u8] {
                &self.data
            }
        }

        impl_serializable!($type);
    };
    ($type:ident, $payload:ident, $len:expr) => {
        impl Default for $type {
            fn default() -> Self {
                let mut data = [0u8; $len + 1];
                data[0] = $payload::cid();
                Self { data }
            }
        }

        impl $type {
            pub fn new() -> Self {
                Default::default()
            }

            /// The serialized command, CID first.
            pub fn build(&self) -> &[u8] {
                &self.data
            }
        }

        impl_serializable!($type);
    };
}

macro_rules! impl_serializable {
    ($type:ident) => {
        impl SerializableMacCommand for $type {
            fn payload_bytes(&self) -> &[u8] {
                &self.build()[1..]
            }

            fn cid(&self) -> u8 {
                self.build()[0]
            }

            fn payload_len(&self) -> usize {
                self.build().len() - 1
            }
        }
    };
}

/// Builds a LinkCheckReq.
pub struct LinkCheckReqCreator {
    data: [u8; 1],
}
impl_creator_boilerplate!(LinkCheckReqCreator, LinkCheckReqPayload);

/// Builds a LinkADRAns.
pub struct LinkADRAnsCreator {
    data: [u8; 2],
}
impl_creator_boilerplate!(LinkADRAnsCreator, LinkADRAnsPayload, 1);

impl LinkADRAnsCreator {
    pub fn set_channel_mask_ack(&mut self, ack: bool) -> &mut Self {
        self.data[1] &= 0xfe;
        self.data[1] |= ack as u8;
        self
    }

    pub fn set_data_rate_ack(&mut self, ack: bool) -> &mut Self {
        self.data[1] &= 0xfd;
        self.data[1] |= (ack as u8) << 1;
        self
    }

    pub fn set_tx_power_ack(&mut self, ack: bool) -> &mut Self {
        self.data[1] &= 0xfb;
        self.data[1] |= (ack as u8) << 2;
        self
    }
}

/// Builds a DutyCycleAns.
pub struct DutyCycleAnsCreator {
    data: [u8; 1],
}
impl_creator_boilerplate!(DutyCycleAnsCreator, DutyCycleAnsPayload);

/// Builds a RXParamSetupAns.
pub struct RXParamSetupAnsCreator {
    data: [u8; 2],
}
impl_creator_boilerplate!(RXParamSetupAnsCreator, RXParamSetupAnsPayload, 1);

impl RXParamSetupAnsCreator {
    pub fn set_channel_ack(&mut self, ack: bool) -> &mut Self {
        self.data[1] &= 0xfe;
        self.data[1] |= ack as u8;
        self
    }

    pub fn set_rx2_data_rate_ack(&mut self, ack: bool) -> &mut Self {
        self.data[1] &= 0xfd;
        self.data[1] |= (ack as u8) << 1;
        self
    }

    pub fn set_rx1_dr_offset_ack(&mut self, ack: bool) -> &mut Self {
        self.data[1] &= 0xfb;
        self.data[1] |= (ack as u8) << 2;
        self
    }
}

/// Builds a DevStatusAns.
pub struct DevStatusAnsCreator {
    data: [u8; 3],
}
impl_creator_boilerplate!(DevStatusAnsCreator, DevStatusAnsPayload, 2);

impl DevStatusAnsCreator {
    /// Battery level: 0 for external power, 1..=254 for the charge level,
    /// 255 when unmeasurable.
    pub fn set_battery(&mut self, battery: u8) -> &mut Self {
        self.data[1] = battery;
        self
    }

    /// Demodulation margin of the last DevStatusReq, -32..=31 dB.
    pub fn set_margin(&mut self, margin: i8) -> Result<&mut Self, Error> {
        if !(-32..=31).contains(&margin) {
            return Err(Error::InvalidIndex);
        }
        self.data[2] = (margin as u8) & 0x3f;
        Ok(self)
    }
}

/// Builds a NewChannelAns.
pub struct NewChannelAnsCreator {
    data: [u8; 2],
}
impl_creator_boilerplate!(NewChannelAnsCreator, NewChannelAnsPayload, 1);

impl NewChannelAnsCreator {
    pub fn set_channel_frequency_ack(&mut self, ack: bool) -> &mut Self {
        self.data[1] &= 0xfe;
        self.data[1] |= ack as u8;
        self
    }

    pub fn set_data_rate_range_ack(&mut self, ack: bool) -> &mut Self {
        self.data[1] &= 0xfd;
        self.data[1] |= (ack as u8) << 1;
        self
    }
}

/// Builds a RXTimingSetupAns.
pub struct RXTimingSetupAnsCreator {
    data: [u8; 1],
}
impl_creator_boilerplate!(RXTimingSetupAnsCreator, RXTimingSetupAnsPayload);

/// Builds a TxParamSetupAns.
pub struct TxParamSetupAnsCreator {
    data: [u8; 1],
}
impl_creator_boilerplate!(TxParamSetupAnsCreator, TxParamSetupAnsPayload);

/// Builds a DlChannelAns.
pub struct DlChannelAnsCreator {
    data: [u8; 2],
}
impl_creator_boilerplate!(DlChannelAnsCreator, DlChannelAnsPayload, 1);

impl DlChannelAnsCreator {
    pub fn set_channel_frequency_ack(&mut self, ack: bool) -> &mut Self {
        self.data[1] &= 0xfe;
        self.data[1] |= ack as u8;
        self
    }

    pub fn set_uplink_frequency_exists_ack(&mut self, ack: bool) -> &mut Self {
        self.data[1] &= 0xfd;
        self.data[1] |= (ack as u8) << 1;
        self
    }
}

/// Serializes a command sequence into `out`, returning the used prefix.
pub fn build_mac_commands<'a>(
    cmds: &[&dyn SerializableMacCommand],
    out: &'a mut [u8],
) -> Result<&'a [u8], Error> {
    let total = mac_commands_len(cmds);
    if out.len() < total {
        return Err(Error::BufferTooShort);
    }
    let mut pos = 0;
    for cmd in cmds {
        out[pos] = cmd.cid();
        out[pos + 1..pos + 1 + cmd.payload_len()].copy_from_slice(cmd.payload_bytes());
        pos += 1 + cmd.payload_len();
    }
    Ok(&out[..pos])
}
