use std::cell::RefCell;
use std::rc::Rc;

use super::radio::{RadioProbe, TestRadio};
use super::timer::{TestTimer, TimerProbe};
use crate::event::Event;
use crate::test_util::*;
use crate::timer::TimerId;
use crate::{AppCallbacks, AppEvent, DevAddr, Prng, Region};
use loramac_codec::default_crypto::DefaultFactory;

#[derive(Default)]
pub struct AppState {
    pub events: Vec<AppEvent>,
    pub link_check: Option<(u8, u8)>,
    pub battery: u8,
}

pub struct TestApp(Rc<RefCell<AppState>>);

#[derive(Clone)]
pub struct AppProbe(Rc<RefCell<AppState>>);

impl TestApp {
    pub fn new() -> (AppProbe, TestApp) {
        let shared = Rc::new(RefCell::new(AppState { battery: 128, ..Default::default() }));
        (AppProbe(shared.clone()), TestApp(shared))
    }
}

impl AppProbe {
    pub fn events(&self) -> Vec<AppEvent> {
        self.0.borrow().events.clone()
    }

    pub fn take_events(&self) -> Vec<AppEvent> {
        core::mem::take(&mut self.0.borrow_mut().events)
    }

    pub fn count(&self, event: AppEvent) -> usize {
        self.0.borrow().events.iter().filter(|e| **e == event).count()
    }

    pub fn link_check(&self) -> Option<(u8, u8)> {
        self.0.borrow().link_check
    }
}

impl AppCallbacks for TestApp {
    fn event(&mut self, event: AppEvent) {
        self.0.borrow_mut().events.push(event);
    }

    fn battery_level(&mut self) -> u8 {
        self.0.borrow().battery
    }

    fn link_check_resp(&mut self, margin_db: u8, gateway_count: u8) {
        self.0.borrow_mut().link_check = Some((margin_db, gateway_count));
    }
}

pub type Device = crate::device::Device<TestRadio, TestTimer, DefaultFactory, Prng, TestApp, 256>;

pub struct Harness {
    pub radio: RadioProbe,
    pub timer: TimerProbe,
    pub app: AppProbe,
    pub device: Device,
}

impl Harness {
    /// Fires an armed timer and runs its event to completion.
    pub fn fire(&mut self, id: TimerId) {
        assert!(self.timer.fire(id), "timer {id:?} was not armed");
        self.device.process_event(Event::Timer(id));
    }

    /// Delivers a frame to the open receive window.
    pub fn rx(&mut self, bytes: &[u8]) {
        self.radio.set_rx_packet(bytes);
        self.device.process_event(Event::RadioRxDone {
            len: bytes.len() as u16,
            rssi: -50,
            snr: 10,
        });
    }

    /// Plays out a whole Class A uplink cycle without any downlink.
    pub fn empty_rx_windows(&mut self) {
        self.device.process_event(Event::RadioTxDone);
        self.fire(TimerId::RxWindow1);
        self.device.process_event(Event::RadioRxTimeout);
        self.fire(TimerId::RxWindow2);
        self.device.process_event(Event::RadioRxTimeout);
    }
}

pub fn setup() -> Harness {
    let (radio_probe, radio) = TestRadio::new();
    let (timer_probe, timer) = TestTimer::new();
    let (app_probe, app) = TestApp::new();
    let mut device =
        Device::new(Region::EU868, radio, timer, Prng::new(0x8765_4321_0123_4567), app);
    device.set_automatic_uplink(false);
    Harness { radio: radio_probe, timer: timer_probe, app: app_probe, device }
}

/// A device with an installed ABP session using the all-zero test keys.
pub fn setup_joined() -> Harness {
    let mut harness = setup();
    harness
        .device
        .connect(crate::JoinMode::Abp {
            devaddr: DevAddr::from(get_dev_addr_bytes()),
            nwkskey: get_nwkskey(),
            appskey: get_appskey(),
        })
        .unwrap();
    assert_eq!(harness.app.take_events(), vec![AppEvent::Connected]);
    // SF7 keeps duty-cycle off-times short enough for the test clock
    harness.device.set_datarate(5).unwrap();
    harness
}
