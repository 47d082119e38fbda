//! Creation of LoRaWAN PHY payloads into caller-provided buffers.

use crate::keys::{Aes128Key, AppKey, CryptoFactory, Decrypter, Mic};
use crate::parser::{AppNonce, DevAddr, DevNonce, Eui64, Fctrl, NetId};
use crate::securityhelpers;
use crate::types::{DLSettings, Frequency};

/// Most MAC commands a data uplink can piggyback in its FOpts field.
pub const PIGGYBACK_MAC_COMMANDS_MAX_LEN: usize = 15;

#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error {
    BufferTooShort,
    MacCommandsTooLong,
    DataAndMacCommandsInPayload,
    MissingFPort,
    TooManyFrequencies,
}

fn set_mic<F: CryptoFactory>(data: &mut [u8], key: &Aes128Key, factory: &F) {
    let len = data.len();
    let Mic(mic) = securityhelpers::calculate_mic(&data[..len - 4], factory.new_mac(key));
    data[len - 4..].copy_from_slice(&mic);
}

/// Writes a join-request into the provided buffer.
pub struct JoinRequestCreator<D, F> {
    data: D,
    factory: F,
}

impl<D: AsMut<[u8]>, F: CryptoFactory> JoinRequestCreator<D, F> {
    pub fn with_options(mut data: D, factory: F) -> Result<Self, Error> {
        let d = data.as_mut();
        if d.len() < 23 {
            return Err(Error::BufferTooShort);
        }
        d[0] = 0x00;
        Ok(Self { data, factory })
    }

    pub fn set_app_eui<H: AsRef<[u8]>, T: Into<Eui64<H>>>(&mut self, app_eui: T) -> &mut Self {
        self.data.as_mut()[1..9].copy_from_slice(app_eui.into().as_ref());
        self
    }

    pub fn set_dev_eui<H: AsRef<[u8]>, T: Into<Eui64<H>>>(&mut self, dev_eui: T) -> &mut Self {
        self.data.as_mut()[9..17].copy_from_slice(dev_eui.into().as_ref());
        self
    }

    pub fn set_dev_nonce<H: AsRef<[u8]>, T: Into<DevNonce<H>>>(&mut self, nonce: T) -> &mut Self {
        self.data.as_mut()[17..19].copy_from_slice(nonce.into().as_ref());
        self
    }

    /// Finalizes the frame: computes the MIC with the application key and
    /// returns the wire bytes.
    pub fn build(&mut self, key: &AppKey) -> &[u8] {
        let d = &mut self.data.as_mut()[..23];
        set_mic(d, &key.0, &self.factory);
        d
    }
}

/// Writes a join-accept into the provided buffer. Only used on the network
/// side and by tests that fabricate downlinks.
pub struct JoinAcceptCreator<D, F> {
    data: D,
    with_c_f_list: bool,
    encrypted: bool,
    factory: F,
}

impl<D: AsMut<[u8]>, F: CryptoFactory> JoinAcceptCreator<D, F> {
    pub fn with_options(mut data: D, factory: F) -> Result<Self, Error> {
        let d = data.as_mut();
        if d.len() < 17 {
            return Err(Error::BufferTooShort);
        }
        d[0] = 0x20;
        Ok(Self { data, with_c_f_list: false, encrypted: false, factory })
    }

    pub fn set_app_nonce<H: AsRef<[u8]>, T: Into<AppNonce<H>>>(&mut self, nonce: T) -> &mut Self {
        self.data.as_mut()[1..4].copy_from_slice(nonce.into().as_ref());
        self
    }

    pub fn set_net_id<H: AsRef<[u8]>, T: Into<NetId<H>>>(&mut self, net_id: T) -> &mut Self {
        self.data.as_mut()[4..7].copy_from_slice(net_id.into().as_ref());
        self
    }

    pub fn set_dev_addr<H: AsRef<[u8]>, T: Into<DevAddr<H>>>(&mut self, addr: T) -> &mut Self {
        self.data.as_mut()[7..11].copy_from_slice(addr.into().as_ref());
        self
    }

    pub fn set_dl_settings<T: Into<DLSettings>>(&mut self, dl_settings: T) -> &mut Self {
        self.data.as_mut()[11] = dl_settings.into().raw_value();
        self
    }

    pub fn set_rx_delay(&mut self, rx_delay: u8) -> &mut Self {
        self.data.as_mut()[12] = rx_delay;
        self
    }

    pub fn set_c_f_list<'a, C: AsRef<[Frequency<'a>]>>(
        &mut self,
        list: C,
    ) -> Result<&mut Self, Error> {
        let frequencies = list.as_ref();
        if frequencies.len() > 5 {
            return Err(Error::TooManyFrequencies);
        }
        let d = self.data.as_mut();
        if d.len() < 33 {
            return Err(Error::BufferTooShort);
        }
        for (i, freq) in frequencies.iter().enumerate() {
            let v = freq.value() / 100;
            d[13 + i * 3] = v as u8;
            d[14 + i * 3] = (v >> 8) as u8;
            d[15 + i * 3] = (v >> 16) as u8;
        }
        d[28] = 0;
        self.with_c_f_list = true;
        Ok(self)
    }

    /// Finalizes the frame: sets the MIC over the plaintext, then applies
    /// the AES decrypt pass the LoRaWAN specification prescribes for the network
    /// side, and returns the wire bytes.
    pub fn build(&mut self, key: &AppKey) -> Result<&[u8], Error> {
        let len = if self.with_c_f_list { 33 } else { 17 };
        if self.data.as_mut().len() < len {
            return Err(Error::BufferTooShort);
        }
        if !self.encrypted {
            let d = &mut self.data.as_mut()[..len];
            set_mic(d, &key.0, &self.factory);
            let aes = self.factory.new_dec(&key.0);
            for block in 0..(len >> 4) {
                let start = (block << 4) + 1;
                aes.decrypt_block(&mut d[start..start + 16]);
            }
            self.encrypted = true;
        }
        Ok(&self.data.as_mut()[..len])
    }
}

/// Writes a data frame (uplink or downlink) into the provided buffer.
///
/// MAC commands are passed as raw, already serialized bytes: commands that
/// fit [`PIGGYBACK_MAC_COMMANDS_MAX_LEN`] ride in FOpts, larger batches must
/// be sent as the FRMPayload of a port-0 frame.
pub struct DataPayloadCreator<D, F> {
    data: D,
    data_f_port: Option<u8>,
    fcnt: u32,
    factory: F,
}

impl<D: AsMut<[u8]>, F: CryptoFactory> DataPayloadCreator<D, F> {
    pub fn with_options(mut data: D, factory: F) -> Result<Self, Error> {
        let d = data.as_mut();
        if d.len() < 255 {
            return Err(Error::BufferTooShort);
        }
        d[0] = 0x40;
        d[5] = 0;
        Ok(Self { data, data_f_port: None, fcnt: 0, factory })
    }

    pub fn set_uplink(&mut self, uplink: bool) -> &mut Self {
        if uplink {
            self.data.as_mut()[0] &= 0xdf;
        } else {
            self.data.as_mut()[0] |= 0x20;
        }
        self
    }

    pub fn set_confirmed(&mut self, confirmed: bool) -> &mut Self {
        let d = self.data.as_mut();
        if confirmed {
            d[0] = (d[0] & 0x3f) | 0x80;
        } else {
            d[0] = (d[0] & 0x3f) | 0x40;
        }
        self
    }

    pub fn set_dev_addr<H: AsRef<[u8]>, T: Into<DevAddr<H>>>(&mut self, addr: T) -> &mut Self {
        self.data.as_mut()[1..5].copy_from_slice(addr.into().as_ref());
        self
    }

    pub fn set_fctrl(&mut self, fctrl: &Fctrl) -> &mut Self {
        self.data.as_mut()[5] = fctrl.raw_value();
        self
    }

    /// Sets the 32-bit frame counter; only the low 16 bits go on air, the
    /// full value feeds the crypto.
    pub fn set_fcnt(&mut self, fcnt: u32) -> &mut Self {
        self.fcnt = fcnt;
        let d = self.data.as_mut();
        d[6] = fcnt as u8;
        d[7] = (fcnt >> 8) as u8;
        self
    }

    pub fn set_f_port(&mut self, f_port: u8) -> &mut Self {
        self.data_f_port = Some(f_port);
        self
    }

    /// Whether a serialized command sequence still fits in FOpts.
    pub fn can_piggyback(mac_cmds: &[u8]) -> bool {
        mac_cmds.len() <= PIGGYBACK_MAC_COMMANDS_MAX_LEN
    }

    /// Finalizes the frame: lays out FOpts/FPort/FRMPayload, encrypts the
    /// payload and computes the MIC. Returns the wire bytes.
    pub fn build(
        &mut self,
        payload: &[u8],
        mac_cmds: &[u8],
        nwk_skey: &Aes128Key,
        app_skey: &Aes128Key,
    ) -> Result<&[u8], Error> {
        let d = self.data.as_mut();
        let mut pos = 8; // MHDR + DevAddr + FCtrl + FCnt
        let has_f_port = self.data_f_port.is_some();
        let f_port_zero = self.data_f_port == Some(0);

        if mac_cmds.len() > PIGGYBACK_MAC_COMMANDS_MAX_LEN && !f_port_zero {
            return Err(Error::MacCommandsTooLong);
        }
        if f_port_zero && !payload.is_empty() {
            return Err(Error::DataAndMacCommandsInPayload);
        }
        if !has_f_port && !payload.is_empty() {
            return Err(Error::MissingFPort);
        }

        if !f_port_zero && !mac_cmds.is_empty() {
            d[5] = (d[5] & 0xf0) | (mac_cmds.len() as u8 & 0x0f);
            d[pos..pos + mac_cmds.len()].copy_from_slice(mac_cmds);
            pos += mac_cmds.len();
        }

        if let Some(f_port) = self.data_f_port {
            d[pos] = f_port;
            pos += 1;
        }

        let (enc_key, payload_len) = if f_port_zero {
            d[pos..pos + mac_cmds.len()].copy_from_slice(mac_cmds);
            (nwk_skey, mac_cmds.len())
        } else {
            d[pos..pos + payload.len()].copy_from_slice(payload);
            (app_skey, payload.len())
        };

        if payload_len > 0 {
            securityhelpers::encrypt_frm_payload(
                d,
                pos,
                pos + payload_len,
                self.fcnt,
                &self.factory.new_enc(enc_key),
            );
        }

        let end = pos + payload_len;
        let Mic(mic) =
            securityhelpers::calculate_data_mic(&d[..end], self.factory.new_mac(nwk_skey), self.fcnt);
        d[end..end + 4].copy_from_slice(&mic);

        Ok(&d[..end + 4])
    }
}
