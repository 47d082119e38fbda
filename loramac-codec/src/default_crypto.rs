//! Software implementation of the crypto seam, built on the `aes` and
//! `cmac` crates.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::creator::{DataPayloadCreator, Error as CreatorError, JoinAcceptCreator, JoinRequestCreator};
use crate::keys::{Aes128Key, AppKey, CryptoFactory, Decrypter, Encrypter, Mac};
use crate::parser::{
    DecryptedDataPayload, DecryptedJoinAcceptPayload, EncryptedDataPayload,
    EncryptedJoinAcceptPayload, Error, JoinRequestPayload,
};

pub type Cmac = cmac::Cmac<Aes128>;

/// The default, pure-software crypto factory.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultFactory;

impl CryptoFactory for DefaultFactory {
    type E = Aes128;
    type D = Aes128;
    type M = Cmac;

    fn new_enc(&self, key: &Aes128Key) -> Self::E {
        Aes128::new(GenericArray::from_slice(&key.0))
    }

    fn new_dec(&self, key: &Aes128Key) -> Self::D {
        Aes128::new(GenericArray::from_slice(&key.0))
    }

    fn new_mac(&self, key: &Aes128Key) -> Self::M {
        <Cmac as KeyInit>::new(GenericArray::from_slice(&key.0))
    }
}

impl Encrypter for Aes128 {
    fn encrypt_block(&self, block: &mut [u8]) {
        BlockEncrypt::encrypt_block(self, GenericArray::from_mut_slice(block));
    }
}

impl Decrypter for Aes128 {
    fn decrypt_block(&self, block: &mut [u8]) {
        BlockDecrypt::decrypt_block(self, GenericArray::from_mut_slice(block));
    }
}

impl Mac for Cmac {
    fn input(&mut self, data: &[u8]) {
        cmac::Mac::update(self, data);
    }

    fn reset(&mut self) {
        cmac::Mac::reset(self);
    }

    fn result(self) -> [u8; 16] {
        cmac::Mac::finalize(self).into_bytes().into()
    }
}

impl<T: AsRef<[u8]>> JoinRequestPayload<T, DefaultFactory> {
    pub fn new(data: T) -> Result<Self, Error> {
        Self::new_with_factory(data, DefaultFactory)
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> EncryptedJoinAcceptPayload<T, DefaultFactory> {
    pub fn new(data: T) -> Result<Self, Error> {
        Self::new_with_factory(data, DefaultFactory)
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> DecryptedJoinAcceptPayload<T, DefaultFactory> {
    /// Decrypts and MIC-checks a received join-accept.
    pub fn new(data: T, key: &AppKey) -> Result<Self, Error> {
        Self::new_with_factory(data, key, DefaultFactory)
    }
}

impl<T: AsRef<[u8]>> EncryptedDataPayload<T, DefaultFactory> {
    pub fn new(data: T) -> Result<Self, Error> {
        Self::new_with_factory(data, DefaultFactory)
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> DecryptedDataPayload<T> {
    /// MIC-checks and decrypts a data payload in one step.
    pub fn new(
        data: T,
        nwk_skey: &Aes128Key,
        app_skey: Option<&Aes128Key>,
        fcnt: u32,
    ) -> Result<Self, Error> {
        let encrypted = EncryptedDataPayload::new(data)?;
        if !encrypted.validate_mic(nwk_skey, fcnt) {
            return Err(Error::InvalidMic);
        }
        encrypted.decrypt(Some(nwk_skey), app_skey, fcnt)
    }
}

impl<D: AsMut<[u8]>> JoinRequestCreator<D, DefaultFactory> {
    pub fn new(buf: D) -> Result<Self, CreatorError> {
        Self::with_options(buf, DefaultFactory)
    }
}

impl<D: AsMut<[u8]>> JoinAcceptCreator<D, DefaultFactory> {
    pub fn new(buf: D) -> Result<Self, CreatorError> {
        Self::with_options(buf, DefaultFactory)
    }
}

impl<D: AsMut<[u8]>> DataPayloadCreator<D, DefaultFactory> {
    pub fn new(buf: D) -> Result<Self, CreatorError> {
        Self::with_options(buf, DefaultFactory)
    }
}
