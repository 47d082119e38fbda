use std::cell::RefCell;
use std::rc::Rc;

use crate::radio::{PhyRxTx, RxConfig, TxConfig};

#[derive(Default)]
pub struct RadioState {
    pub tx: Vec<(TxConfig, Vec<u8>)>,
    pub rx_configs: Vec<RxConfig>,
    pub rx_packet: Vec<u8>,
    pub sleep_count: usize,
    pub standby_count: usize,
    pub public_network: Option<bool>,
    pub continuous_wave: Option<(u32, i8, u16)>,
}

/// Radio double. The MAC drives it through `PhyRxTx`; the test inspects
/// and injects through a shared [`RadioProbe`].
pub struct TestRadio {
    shared: Rc<RefCell<RadioState>>,
    rx_local: Vec<u8>,
}

#[derive(Clone)]
pub struct RadioProbe(Rc<RefCell<RadioState>>);

impl TestRadio {
    pub fn new() -> (RadioProbe, TestRadio) {
        let shared = Rc::new(RefCell::new(RadioState::default()));
        (RadioProbe(shared.clone()), TestRadio { shared, rx_local: Vec::new() })
    }
}

impl RadioProbe {
    pub fn tx_count(&self) -> usize {
        self.0.borrow().tx.len()
    }

    pub fn tx_at(&self, index: usize) -> (TxConfig, Vec<u8>) {
        self.0.borrow().tx[index].clone()
    }

    pub fn last_tx(&self) -> (TxConfig, Vec<u8>) {
        self.0.borrow().tx.last().expect("no transmission captured").clone()
    }

    pub fn last_rx_config(&self) -> Option<RxConfig> {
        self.0.borrow().rx_configs.last().copied()
    }

    pub fn set_rx_packet(&self, bytes: &[u8]) {
        self.0.borrow_mut().rx_packet = bytes.to_vec();
    }

    pub fn sleep_count(&self) -> usize {
        self.0.borrow().sleep_count
    }

    pub fn public_network(&self) -> Option<bool> {
        self.0.borrow().public_network
    }
}

impl PhyRxTx for TestRadio {
    type PhyError = ();

    const MAX_RADIO_POWER: u8 = 14;
    const ANTENNA_GAIN: i8 = 0;

    fn tx(&mut self, config: TxConfig, buf: &[u8]) -> Result<(), ()> {
        self.shared.borrow_mut().tx.push((config, buf.to_vec()));
        Ok(())
    }

    fn setup_rx(&mut self, config: RxConfig) -> Result<(), ()> {
        self.shared.borrow_mut().rx_configs.push(config);
        Ok(())
    }

    fn received_packet(&mut self) -> &[u8] {
        self.rx_local = self.shared.borrow().rx_packet.clone();
        &self.rx_local
    }

    fn low_power(&mut self) -> Result<(), ()> {
        self.shared.borrow_mut().sleep_count += 1;
        Ok(())
    }

    fn standby(&mut self) -> Result<(), ()> {
        self.shared.borrow_mut().standby_count += 1;
        Ok(())
    }

    fn set_public_network(&mut self, enabled: bool) -> Result<(), ()> {
        self.shared.borrow_mut().public_network = Some(enabled);
        Ok(())
    }

    fn continuous_wave(&mut self, frequency: u32, power: i8, timeout_ms: u16) -> Result<(), ()> {
        self.shared.borrow_mut().continuous_wave = Some((frequency, power, timeout_ms));
        Ok(())
    }
}
