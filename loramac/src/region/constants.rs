#![allow(dead_code)]
use lora_modulation::CodingRate;

pub(crate) const RECEIVE_DELAY1: u32 = 1000;
pub(crate) const RECEIVE_DELAY2: u32 = RECEIVE_DELAY1 + 1000;
pub(crate) const JOIN_ACCEPT_DELAY1: u32 = 5000;
pub(crate) const JOIN_ACCEPT_DELAY2: u32 = 6000;
pub(crate) const MAX_RX_WINDOW: u32 = 3000;
pub(crate) const MAX_FCNT_GAP: u32 = 16384;

pub(crate) const ADR_ACK_LIMIT: u32 = 64;
pub(crate) const ADR_ACK_DELAY: u32 = 32;

/// Nominal ACK wait after the RX2 window, jittered by +-1 s.
pub(crate) const ACK_TIMEOUT: u32 = 2000;
pub(crate) const ACK_TIMEOUT_RND: u32 = 1000;

/// Duty-cycle divisors for join-request back-off: 1% during the first hour
/// of operation, 0.1% for the next ten hours, 0.01% afterwards.
pub(crate) const JOIN_BACKOFF_DC_FIRST_HOUR: u32 = 100;
pub(crate) const JOIN_BACKOFF_DC_NEXT_10_HOURS: u32 = 1000;
pub(crate) const JOIN_BACKOFF_DC_AFTER: u32 = 10000;
pub(crate) const HOUR_MS: u32 = 3_600_000;

pub(crate) const DEFAULT_CODING_RATE: CodingRate = CodingRate::_4_5;

/// Worst-case radio wake-up latency budgeted into RX window offsets.
pub(crate) const RADIO_WAKEUP_TIME: u32 = 3;
pub(crate) const MIN_RX_SYMBOLS: u8 = 6;
pub(crate) const MAX_SYSTEM_RX_ERROR: u32 = 10;
