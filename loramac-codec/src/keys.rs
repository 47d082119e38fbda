//! Key material newtypes and the crypto seam the rest of the stack is
//! generic over.

use crate::parser::Eui64;

/// A raw 128-bit AES key.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Aes128Key(pub [u8; 16]);

impl From<[u8; 16]> for Aes128Key {
    fn from(v: [u8; 16]) -> Self {
        Aes128Key(v)
    }
}

impl AsRef<[u8]> for Aes128Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 4-byte message integrity code.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Mic(pub [u8; 4]);

impl From<[u8; 4]> for Mic {
    fn from(v: [u8; 4]) -> Self {
        Mic(v)
    }
}

macro_rules! lorawan_key {
    (
        $(#[$outer:meta])*
        pub struct $type:ident(Aes128Key);
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
        pub struct $type(pub(crate) Aes128Key);

        impl From<[u8; 16]> for $type {
            fn from(key: [u8; 16]) -> Self {
                $type(Aes128Key(key))
            }
        }

        impl From<Aes128Key> for $type {
            fn from(key: Aes128Key) -> Self {
                $type(key)
            }
        }

        impl $type {
            pub fn inner(&self) -> &Aes128Key {
                &self.0
            }
        }

        impl AsRef<[u8]> for $type {
            fn as_ref(&self) -> &[u8] {
                &self.0 .0
            }
        }
    };
}

lorawan_key!(
    /// The root application key used for join-request MICs, join-accept
    /// decryption and session key derivation. Enter in MSB order.
    pub struct AppKey(Aes128Key);
);
lorawan_key!(
    /// Network session key; keys data MICs and port-0 payloads.
    pub struct NwkSKey(Aes128Key);
);
lorawan_key!(
    /// Application session key; keys FRMPayload on ports 1..=223.
    pub struct AppSKey(Aes128Key);
);

macro_rules! lorawan_eui {
    (
        $(#[$outer:meta])*
        pub struct $type:ident(Eui64<[u8; 8]>);
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
        pub struct $type(Eui64<[u8; 8]>);

        impl From<[u8; 8]> for $type {
            fn from(v: [u8; 8]) -> Self {
                $type(Eui64::from(v))
            }
        }

        impl From<$type> for Eui64<[u8; 8]> {
            fn from(v: $type) -> Self {
                v.0
            }
        }

        impl AsRef<[u8]> for $type {
            fn as_ref(&self) -> &[u8] {
                self.0.as_ref()
            }
        }
    };
}

lorawan_eui!(
    /// Device EUI, stored in the order it is sent on air (LSB first).
    pub struct DevEui(Eui64<[u8; 8]>);
);
lorawan_eui!(
    /// Application (join) EUI, stored in the order it is sent on air.
    pub struct AppEui(Eui64<[u8; 8]>);
);

/// One AES-128 block encryption. Blocks are exactly 16 bytes.
pub trait Encrypter {
    fn encrypt_block(&self, block: &mut [u8]);
}

/// One AES-128 block decryption.
pub trait Decrypter {
    fn decrypt_block(&self, block: &mut [u8]);
}

/// Incremental CMAC computation.
pub trait Mac {
    fn input(&mut self, data: &[u8]);
    fn reset(&mut self);
    fn result(self) -> [u8; 16];
}

/// Factory for the crypto primitives the codec needs.
///
/// The stack only ever asks for fresh instances keyed with a session or root
/// key, which keeps the seam narrow enough for hardware AES peripherals.
pub trait CryptoFactory {
    type E: Encrypter;
    type D: Decrypter;
    type M: Mac;

    fn new_enc(&self, key: &Aes128Key) -> Self::E;
    fn new_dec(&self, key: &Aes128Key) -> Self::D;
    fn new_mac(&self, key: &Aes128Key) -> Self::M;
}
