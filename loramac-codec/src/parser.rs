//! Parsing of LoRaWAN PHY payloads.
//!
//! Payloads are wrapped in typestate structs: a frame arrives as an
//! `Encrypted*` payload which only exposes header fields and MIC
//! verification, and turns into the matching `Decrypted*` payload by
//! decrypting in place inside the borrowed buffer.

use core::marker::PhantomData;

use crate::keys::{Aes128Key, AppKey, AppSKey, CryptoFactory, Encrypter, Mic, NwkSKey};
use crate::securityhelpers;
use crate::types::{ChannelMask, DLSettings, Frequency};

#[cfg(feature = "default-crypto")]
use crate::default_crypto::DefaultFactory;

pub(crate) const MHDR_LEN: usize = 1;
pub(crate) const MIC_LEN: usize = 4;
pub(crate) const JOIN_REQUEST_LEN: usize = 23;
pub(crate) const JOIN_ACCEPT_LEN: usize = 17;
pub(crate) const JOIN_ACCEPT_WITH_CF_LIST_LEN: usize = 33;
/// MHDR + bare FHDR + MIC.
pub(crate) const DATA_MIN_LEN: usize = 12;

#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error {
    InvalidData,
    InvalidMic,
    InvalidKey,
    InvalidMessageType,
    InvalidPayload,
    UnsupportedMajorVersion,
}

/// Storage for one fixed-length wire field. `T` is the backing bytes
/// (borrowed while parsing, owned after `to_owned`) and `K` is a marker
/// keeping the different addresses, nonces and identifiers apart at the
/// type level.
pub struct WireField<T, K>(T, PhantomData<K>);

/// Marker types naming the wire fields a [`WireField`] can hold.
pub mod field {
    pub enum Eui64 {}
    pub enum DevNonce {}
    pub enum AppNonce {}
    pub enum DevAddr {}
    pub enum NetId {}
}

/// Wire length and display name of a field marker.
pub trait FieldSpec {
    const LEN: usize;
    const NAME: &'static str;
}

/// A 64-bit extended unique identifier, kept in wire (LSB-first) order.
pub type Eui64<T> = WireField<T, field::Eui64>;
/// The 16-bit device nonce of a join exchange, in wire order.
pub type DevNonce<T> = WireField<T, field::DevNonce>;
/// The 24-bit server nonce of a join-accept, in wire order.
pub type AppNonce<T> = WireField<T, field::AppNonce>;
/// A 32-bit device address, kept in wire (LSB-first) order.
pub type DevAddr<T> = WireField<T, field::DevAddr>;
/// A 24-bit network identifier, in wire order.
pub type NetId<T> = WireField<T, field::NetId>;

impl<T: AsRef<[u8]>, K: FieldSpec> WireField<T, K> {
    pub(crate) fn new_from_raw(bytes: T) -> Self {
        WireField(bytes, PhantomData)
    }

    pub fn new(data: T) -> Option<Self> {
        if data.as_ref().len() != K::LEN {
            return None;
        }
        Some(WireField(data, PhantomData))
    }
}

impl<T: AsRef<[u8]>, K> AsRef<[u8]> for WireField<T, K> {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<T: Clone, K> Clone for WireField<T, K> {
    fn clone(&self) -> Self {
        WireField(self.0.clone(), PhantomData)
    }
}

impl<T: Copy, K> Copy for WireField<T, K> {}

impl<T: AsRef<[u8]>, V: AsRef<[u8]>, K> PartialEq<WireField<V, K>> for WireField<T, K> {
    fn eq(&self, other: &WireField<V, K>) -> bool {
        self.0.as_ref() == other.0.as_ref()
    }
}

impl<T: AsRef<[u8]>, K> Eq for WireField<T, K> {}

impl<T: AsRef<[u8]>, K: FieldSpec> core::fmt::Debug for WireField<T, K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}({:02x?})", K::NAME, self.0.as_ref())
    }
}

#[cfg(feature = "defmt-03")]
impl<T: AsRef<[u8]>, K> defmt::Format for WireField<T, K> {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=[u8]}", self.0.as_ref())
    }
}

#[cfg(feature = "serde")]
impl<T: serde::Serialize, K> serde::Serialize for WireField<T, K> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de, T: serde::Deserialize<'de>, K> serde::Deserialize<'de> for WireField<T, K> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(WireField(T::deserialize(deserializer)?, PhantomData))
    }
}

// the owned-array plumbing cannot be expressed generically until associated
// consts work as array lengths
macro_rules! owned_field {
    ($name:ident, $len:expr) => {
        impl FieldSpec for field::$name {
            const LEN: usize = $len;
            const NAME: &'static str = stringify!($name);
        }

        impl<T: AsRef<[u8]>> WireField<T, field::$name> {
            /// Copies into an owned, fixed-size value.
            pub fn to_owned(&self) -> WireField<[u8; $len], field::$name> {
                let mut data = [0u8; $len];
                data.copy_from_slice(self.0.as_ref());
                WireField(data, PhantomData)
            }
        }

        impl From<[u8; $len]> for WireField<[u8; $len], field::$name> {
            fn from(v: [u8; $len]) -> Self {
                WireField(v, PhantomData)
            }
        }

        impl<'a> From<&'a [u8; $len]> for WireField<&'a [u8; $len], field::$name> {
            fn from(v: &'a [u8; $len]) -> Self {
                WireField(v, PhantomData)
            }
        }
    };
}

owned_field!(Eui64, 8);
owned_field!(DevNonce, 2);
owned_field!(AppNonce, 3);
owned_field!(DevAddr, 4);
owned_field!(NetId, 3);

impl From<u16> for DevNonce<[u8; 2]> {
    fn from(v: u16) -> Self {
        WireField(v.to_le_bytes(), PhantomData)
    }
}

impl From<DevNonce<[u8; 2]>> for u16 {
    fn from(v: DevNonce<[u8; 2]>) -> Self {
        u16::from_le_bytes(v.0)
    }
}

impl From<u32> for DevAddr<[u8; 4]> {
    fn from(v: u32) -> Self {
        WireField(v.to_le_bytes(), PhantomData)
    }
}

impl From<DevAddr<[u8; 4]>> for u32 {
    fn from(v: DevAddr<[u8; 4]>) -> Self {
        u32::from_le_bytes(v.0)
    }
}

impl From<NetId<[u8; 3]>> for u32 {
    fn from(v: NetId<[u8; 3]>) -> Self {
        u32::from(v.0[0]) | (u32::from(v.0[1]) << 8) | (u32::from(v.0[2]) << 16)
    }
}

/// The MAC header octet.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Mhdr(u8);

impl Mhdr {
    pub fn new(byte: u8) -> Mhdr {
        Mhdr(byte)
    }

    pub fn mtype(&self) -> MType {
        match self.0 >> 5 {
            0 => MType::JoinRequest,
            1 => MType::JoinAccept,
            2 => MType::UnconfirmedDataUp,
            3 => MType::UnconfirmedDataDown,
            4 => MType::ConfirmedDataUp,
            5 => MType::ConfirmedDataDown,
            6 => MType::Rfu,
            _ => MType::Proprietary,
        }
    }

    pub fn major(&self) -> Major {
        if self.0 & 0x03 == 0 {
            Major::LoRaWanR1
        } else {
            Major::Rfu
        }
    }

    pub fn raw_value(&self) -> u8 {
        self.0
    }
}

impl From<u8> for Mhdr {
    fn from(v: u8) -> Self {
        Mhdr(v)
    }
}

/// Message type carried in the MHDR.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum MType {
    JoinRequest,
    JoinAccept,
    UnconfirmedDataUp,
    UnconfirmedDataDown,
    ConfirmedDataUp,
    ConfirmedDataDown,
    Rfu,
    Proprietary,
}

/// Frame format major version.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Major {
    LoRaWanR1,
    Rfu,
}

/// Any physical payload this crate understands.
#[derive(Debug, PartialEq, Eq)]
pub enum PhyPayload<T, F> {
    JoinRequest(JoinRequestPayload<T, F>),
    JoinAccept(JoinAcceptPayload<T, F>),
    Data(DataPayload<T, F>),
}

/// A join-accept, encrypted as received or already decrypted.
#[derive(Debug, PartialEq, Eq)]
pub enum JoinAcceptPayload<T, F> {
    Encrypted(EncryptedJoinAcceptPayload<T, F>),
    Decrypted(DecryptedJoinAcceptPayload<T, F>),
}

/// A data frame, encrypted as received or already decrypted.
#[derive(Debug, PartialEq, Eq)]
pub enum DataPayload<T, F> {
    Encrypted(EncryptedDataPayload<T, F>),
    Decrypted(DecryptedDataPayload<T>),
}

impl<T: AsRef<[u8]>, F> DataPayload<T, F> {
    pub fn fhdr(&self) -> Fhdr<'_> {
        match self {
            DataPayload::Encrypted(p) => p.fhdr(),
            DataPayload::Decrypted(p) => p.fhdr(),
        }
    }
}

/// Parses `data` as a LoRaWAN physical payload using the provided crypto
/// factory.
pub fn parse_with_factory<T, F>(data: T, factory: F) -> Result<PhyPayload<T, F>, Error>
where
    T: AsRef<[u8]> + AsMut<[u8]>,
    F: CryptoFactory,
{
    let bytes = data.as_ref();
    if bytes.len() < DATA_MIN_LEN {
        return Err(Error::InvalidPayload);
    }
    let mhdr = Mhdr(bytes[0]);
    if mhdr.major() != Major::LoRaWanR1 {
        return Err(Error::UnsupportedMajorVersion);
    }
    match mhdr.mtype() {
        MType::JoinRequest => {
            Ok(PhyPayload::JoinRequest(JoinRequestPayload::new_with_factory(data, factory)?))
        }
        MType::JoinAccept => Ok(PhyPayload::JoinAccept(JoinAcceptPayload::Encrypted(
            EncryptedJoinAcceptPayload::new_with_factory(data, factory)?,
        ))),
        MType::UnconfirmedDataUp
        | MType::UnconfirmedDataDown
        | MType::ConfirmedDataUp
        | MType::ConfirmedDataDown => Ok(PhyPayload::Data(DataPayload::Encrypted(
            EncryptedDataPayload::new_with_factory(data, factory)?,
        ))),
        _ => Err(Error::InvalidMessageType),
    }
}

/// Parses `data` as a LoRaWAN physical payload with the software crypto
/// implementation.
#[cfg(feature = "default-crypto")]
pub fn parse<T: AsRef<[u8]> + AsMut<[u8]>>(
    data: T,
) -> Result<PhyPayload<T, DefaultFactory>, Error> {
    parse_with_factory(data, DefaultFactory)
}

/// A join-request as sent by an end device.
#[derive(Debug, PartialEq, Eq)]
pub struct JoinRequestPayload<T, F>(T, F);

impl<T: AsRef<[u8]>, F: CryptoFactory> JoinRequestPayload<T, F> {
    pub fn new_with_factory(data: T, factory: F) -> Result<Self, Error> {
        let bytes = data.as_ref();
        if bytes.len() != JOIN_REQUEST_LEN || Mhdr(bytes[0]).mtype() != MType::JoinRequest {
            return Err(Error::InvalidData);
        }
        Ok(Self(data, factory))
    }

    pub fn app_eui(&self) -> Eui64<&[u8]> {
        Eui64::new_from_raw(&self.0.as_ref()[1..9])
    }

    pub fn dev_eui(&self) -> Eui64<&[u8]> {
        Eui64::new_from_raw(&self.0.as_ref()[9..17])
    }

    pub fn dev_nonce(&self) -> DevNonce<&[u8]> {
        DevNonce::new_from_raw(&self.0.as_ref()[17..19])
    }

    pub fn mic(&self) -> Mic {
        extract_mic(self.0.as_ref())
    }

    pub fn validate_mic(&self, key: &AppKey) -> bool {
        let d = self.0.as_ref();
        self.mic() == securityhelpers::calculate_mic(&d[..d.len() - MIC_LEN], self.1.new_mac(&key.0))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

fn extract_mic(data: &[u8]) -> Mic {
    let len = data.len();
    Mic([data[len - 4], data[len - 3], data[len - 2], data[len - 1]])
}

/// A join-accept as received, before the ECB pass that recovers the
/// plaintext.
#[derive(Debug, PartialEq, Eq)]
pub struct EncryptedJoinAcceptPayload<T, F>(T, F);

impl<T: AsRef<[u8]> + AsMut<[u8]>, F: CryptoFactory> EncryptedJoinAcceptPayload<T, F> {
    pub fn new_with_factory(data: T, factory: F) -> Result<Self, Error> {
        let bytes = data.as_ref();
        if (bytes.len() != JOIN_ACCEPT_LEN && bytes.len() != JOIN_ACCEPT_WITH_CF_LIST_LEN)
            || Mhdr(bytes[0]).mtype() != MType::JoinAccept
        {
            return Err(Error::InvalidData);
        }
        Ok(Self(data, factory))
    }

    /// Recovers the plaintext join-accept.
    ///
    /// Per the LoRaWAN specification the network server encrypts with an AES
    /// *decrypt* operation, so the device-side inverse is a plain block
    /// encrypt pass over everything after the MHDR. The MIC is not checked
    /// here.
    pub fn decrypt(mut self, key: &AppKey) -> DecryptedJoinAcceptPayload<T, F> {
        let bytes = self.0.as_mut();
        let len = bytes.len();
        let aes = self.1.new_enc(&key.0);
        for block in 0..(len >> 4) {
            let start = (block << 4) + 1;
            aes.encrypt_block(&mut bytes[start..start + 16]);
        }
        DecryptedJoinAcceptPayload(self.0, self.1)
    }
}

/// A join-accept with recovered plaintext.
#[derive(Debug, PartialEq, Eq)]
pub struct DecryptedJoinAcceptPayload<T, F>(T, F);

impl<T: AsRef<[u8]> + AsMut<[u8]>, F: CryptoFactory> DecryptedJoinAcceptPayload<T, F> {
    /// Decrypts and MIC-checks a received join-accept in one step.
    pub fn new_with_factory(data: T, key: &AppKey, factory: F) -> Result<Self, Error> {
        let decrypted = EncryptedJoinAcceptPayload::new_with_factory(data, factory)?.decrypt(key);
        if !decrypted.validate_mic(key) {
            return Err(Error::InvalidMic);
        }
        Ok(decrypted)
    }
}

impl<T: AsRef<[u8]>, F: CryptoFactory> DecryptedJoinAcceptPayload<T, F> {
    pub fn mic(&self) -> Mic {
        extract_mic(self.0.as_ref())
    }

    pub fn validate_mic(&self, key: &AppKey) -> bool {
        let d = self.0.as_ref();
        self.mic() == securityhelpers::calculate_mic(&d[..d.len() - MIC_LEN], self.1.new_mac(&key.0))
    }

    /// Derives the network session key for this join exchange.
    pub fn derive_nwkskey<TT: AsRef<[u8]>>(&self, dev_nonce: &DevNonce<TT>, key: &AppKey) -> NwkSKey {
        NwkSKey(self.derive_session_key(0x01, dev_nonce, &key.0))
    }

    /// Derives the application session key for this join exchange.
    pub fn derive_appskey<TT: AsRef<[u8]>>(&self, dev_nonce: &DevNonce<TT>, key: &AppKey) -> AppSKey {
        AppSKey(self.derive_session_key(0x02, dev_nonce, &key.0))
    }

    fn derive_session_key<TT: AsRef<[u8]>>(
        &self,
        prefix: u8,
        dev_nonce: &DevNonce<TT>,
        key: &Aes128Key,
    ) -> Aes128Key {
        let mut block = [0u8; 16];
        block[0] = prefix;
        block[1..4].copy_from_slice(self.app_nonce().as_ref());
        block[4..7].copy_from_slice(self.net_id().as_ref());
        block[7..9].copy_from_slice(dev_nonce.as_ref());

        self.1.new_enc(key).encrypt_block(&mut block);
        Aes128Key(block)
    }
}

impl<T: AsRef<[u8]>, F> DecryptedJoinAcceptPayload<T, F> {
    pub fn app_nonce(&self) -> AppNonce<&[u8]> {
        AppNonce::new_from_raw(&self.0.as_ref()[1..4])
    }

    pub fn net_id(&self) -> NetId<&[u8]> {
        NetId::new_from_raw(&self.0.as_ref()[4..7])
    }

    pub fn dev_addr(&self) -> DevAddr<&[u8]> {
        DevAddr::new_from_raw(&self.0.as_ref()[7..11])
    }

    pub fn dl_settings(&self) -> DLSettings {
        DLSettings::new(self.0.as_ref()[11])
    }

    /// RxDelay field: the RX1 delay in seconds, `0` meaning the default.
    pub fn rx_delay(&self) -> u8 {
        self.0.as_ref()[12] & 0x0f
    }

    pub fn c_f_list(&self) -> Option<CfList<'_>> {
        let d = self.0.as_ref();
        if d.len() == JOIN_ACCEPT_LEN {
            return None;
        }
        match d[28] {
            0 => Some(CfList::DynamicChannel([
                Frequency::new_from_raw(&d[13..16]),
                Frequency::new_from_raw(&d[16..19]),
                Frequency::new_from_raw(&d[19..22]),
                Frequency::new_from_raw(&d[22..25]),
                Frequency::new_from_raw(&d[25..28]),
            ])),
            1 => Some(CfList::FixedChannel(ChannelMask::new_from_raw(&d[13..22]))),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

/// Channel frequency list carried by a join-accept.
#[derive(Debug, PartialEq, Eq)]
pub enum CfList<'a> {
    DynamicChannel([Frequency<'a>; 5]),
    FixedChannel(ChannelMask<9>),
}

/// Header accessors shared by encrypted and decrypted data payloads.
pub trait DataHeader {
    fn as_data_bytes(&self) -> &[u8];

    fn mhdr(&self) -> Mhdr {
        Mhdr(self.as_data_bytes()[0])
    }

    fn is_confirmed(&self) -> bool {
        matches!(self.mhdr().mtype(), MType::ConfirmedDataUp | MType::ConfirmedDataDown)
    }

    fn is_uplink(&self) -> bool {
        matches!(self.mhdr().mtype(), MType::UnconfirmedDataUp | MType::ConfirmedDataUp)
    }

    fn fhdr(&self) -> Fhdr<'_> {
        let d = self.as_data_bytes();
        Fhdr::new_from_raw(&d[1..1 + self.fhdr_length()], self.is_uplink())
    }

    fn f_port(&self) -> Option<u8> {
        let d = self.as_data_bytes();
        let fhdr_length = self.fhdr_length();
        if MHDR_LEN + fhdr_length >= d.len() - MIC_LEN {
            return None;
        }
        Some(d[MHDR_LEN + fhdr_length])
    }

    fn fhdr_length(&self) -> usize {
        fhdr_length(self.as_data_bytes()[5])
    }

    fn mic(&self) -> Mic {
        extract_mic(self.as_data_bytes())
    }
}

fn fhdr_length(fctrl: u8) -> usize {
    7 + (fctrl & 0x0f) as usize
}

/// A data frame with its FRMPayload still encrypted. Header fields are in
/// the clear and readable.
#[derive(Debug, PartialEq, Eq)]
pub struct EncryptedDataPayload<T, F>(T, F);

impl<T: AsRef<[u8]>, F> DataHeader for EncryptedDataPayload<T, F> {
    fn as_data_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<T: AsRef<[u8]>, F: CryptoFactory> EncryptedDataPayload<T, F> {
    pub fn new_with_factory(data: T, factory: F) -> Result<Self, Error> {
        let bytes = data.as_ref();
        if bytes.len() < DATA_MIN_LEN || MHDR_LEN + MIC_LEN + fhdr_length(bytes[5]) > bytes.len() {
            return Err(Error::InvalidData);
        }
        if !matches!(
            Mhdr(bytes[0]).mtype(),
            MType::ConfirmedDataUp
                | MType::ConfirmedDataDown
                | MType::UnconfirmedDataUp
                | MType::UnconfirmedDataDown
        ) {
            return Err(Error::InvalidData);
        }
        Ok(Self(data, factory))
    }

    /// Checks the frame MIC against the given key and 32-bit extended frame
    /// counter candidate.
    pub fn validate_mic(&self, key: &Aes128Key, fcnt: u32) -> bool {
        let d = self.0.as_ref();
        self.mic()
            == securityhelpers::calculate_data_mic(
                &d[..d.len() - MIC_LEN],
                self.1.new_mac(key),
                fcnt,
            )
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>, F: CryptoFactory> EncryptedDataPayload<T, F> {
    /// Decrypts the FRMPayload in place.
    ///
    /// Port 0 frames are keyed with the network session key, every other
    /// port with the application session key; passing `None` for the key a
    /// frame needs yields `Error::InvalidKey`. The MIC is not checked here.
    pub fn decrypt(
        mut self,
        nwk_skey: Option<&Aes128Key>,
        app_skey: Option<&Aes128Key>,
        fcnt: u32,
    ) -> Result<DecryptedDataPayload<T>, Error> {
        let fhdr_length = self.fhdr_length();
        let key = match self.f_port() {
            Some(fport) if fport != 0 => app_skey,
            _ => nwk_skey,
        }
        .ok_or(Error::InvalidKey)?;

        let data = self.0.as_mut();
        let len = data.len();
        let start = MHDR_LEN + fhdr_length + 1;
        let end = len - MIC_LEN;
        if start < end {
            securityhelpers::encrypt_frm_payload(data, start, end, fcnt, &self.1.new_enc(key));
        }
        Ok(DecryptedDataPayload(self.0))
    }

    /// Combined MIC check and decryption. On a MIC mismatch the encrypted
    /// payload is handed back so another key set (e.g. a multicast group)
    /// can be tried.
    pub fn decrypt_if_mic_ok(
        self,
        nwk_skey: &Aes128Key,
        app_skey: &Aes128Key,
        fcnt: u32,
    ) -> Result<DecryptedDataPayload<T>, Self> {
        if !self.validate_mic(nwk_skey, fcnt) {
            Err(self)
        } else {
            // key presence is guaranteed, decrypt cannot fail
            Ok(self.decrypt(Some(nwk_skey), Some(app_skey), fcnt).unwrap())
        }
    }
}

/// A data frame whose FRMPayload has been decrypted in place.
#[derive(Debug, PartialEq, Eq)]
pub struct DecryptedDataPayload<T>(T);

impl<T: AsRef<[u8]>> DataHeader for DecryptedDataPayload<T> {
    fn as_data_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<T: AsRef<[u8]>> DecryptedDataPayload<T> {
    /// The application payload or the port-0 MAC commands of the frame.
    pub fn frm_payload(&self) -> FrmPayload<'_> {
        let data = self.as_data_bytes();
        let len = data.len();
        let fhdr_length = self.fhdr_length();
        if len < MHDR_LEN + fhdr_length + 1 + MIC_LEN {
            // no FPort byte at all
            FrmPayload::None
        } else if self.f_port() != Some(0) {
            FrmPayload::Data(&data[MHDR_LEN + fhdr_length + 1..len - MIC_LEN])
        } else {
            FrmPayload::MacCommands(FrmMacCommands::new(
                &data[MHDR_LEN + fhdr_length + 1..len - MIC_LEN],
                self.is_uplink(),
            ))
        }
    }
}

/// The frame header of a data payload.
#[derive(Debug, PartialEq, Eq)]
pub struct Fhdr<'a>(&'a [u8], bool);

impl<'a> Fhdr<'a> {
    pub(crate) fn new_from_raw(bytes: &'a [u8], uplink: bool) -> Fhdr<'a> {
        Fhdr(bytes, uplink)
    }

    pub fn dev_addr(&self) -> DevAddr<&'a [u8]> {
        DevAddr::new_from_raw(&self.0[0..4])
    }

    pub fn fctrl(&self) -> Fctrl {
        Fctrl(self.0[4], self.1)
    }

    /// The truncated 16-bit frame counter as sent on air.
    pub fn fcnt(&self) -> u16 {
        u16::from_le_bytes([self.0[5], self.0[6]])
    }

    pub fn fopts_len(&self) -> usize {
        (self.0[4] & 0x0f) as usize
    }

    /// The raw FOpts bytes.
    pub fn data(&self) -> &'a [u8] {
        &self.0[7..7 + self.fopts_len()]
    }
}

/// The frame control octet; the `bool` records frame direction since some
/// bits differ between uplink and downlink.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Fctrl(pub u8, pub bool);

impl Fctrl {
    pub fn new(byte: u8, uplink: bool) -> Fctrl {
        Fctrl(byte, uplink)
    }

    pub fn set_adr(&mut self) {
        self.0 |= 1 << 7;
    }

    pub fn adr(&self) -> bool {
        self.0 & (1 << 7) != 0
    }

    pub fn set_adr_ack_req(&mut self) {
        self.0 |= 1 << 6;
    }

    pub fn adr_ack_req(&self) -> bool {
        self.1 && self.0 & (1 << 6) != 0
    }

    pub fn set_ack(&mut self) {
        self.0 |= 1 << 5;
    }

    pub fn ack(&self) -> bool {
        self.0 & (1 << 5) != 0
    }

    /// Downlink only: more frames are queued for the device.
    pub fn f_pending(&self) -> bool {
        !self.1 && self.0 & (1 << 4) != 0
    }

    pub fn f_opts_len(&self) -> u8 {
        self.0 & 0x0f
    }

    pub fn raw_value(&self) -> u8 {
        self.0
    }
}

/// The decrypted FRMPayload of a data frame.
#[derive(Debug, PartialEq, Eq)]
pub enum FrmPayload<'a> {
    Data(&'a [u8]),
    MacCommands(FrmMacCommands<'a>),
    None,
}

/// MAC commands carried as a port-0 FRMPayload.
#[derive(Debug, PartialEq, Eq)]
pub struct FrmMacCommands<'a>(bool, &'a [u8]);

impl<'a> FrmMacCommands<'a> {
    pub fn new(bytes: &'a [u8], uplink: bool) -> Self {
        FrmMacCommands(uplink, bytes)
    }

    pub fn data(&self) -> &'a [u8] {
        self.1
    }
}
