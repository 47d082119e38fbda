#![cfg_attr(not(test), no_std)]
#![doc = include_str!("../README.md")]

pub mod creator;
pub mod keys;
pub mod maccommandcreator;
pub mod maccommands;
pub mod parser;
pub mod types;

mod securityhelpers;

#[cfg(feature = "default-crypto")]
pub mod default_crypto;
