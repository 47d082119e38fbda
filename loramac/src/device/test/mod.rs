use super::{Error, MessageFlags, SendKind};
use crate::event::{Event, EventQueue};
use crate::mac::multicast::MulticastGroup;
use crate::test_util::*;
use crate::timer::TimerId;
use crate::{AppEvent, AppKey, DevAddr, DeviceClass, JoinMode};

use lora_modulation::SpreadingFactor;
use loramac_codec::keys::Aes128Key;
use loramac_codec::parser::{parse, PhyPayload};

mod radio;
mod util;

use crate::radio::RxMode;
use util::{setup, setup_joined};

fn otaa_mode(nb_trials: u8) -> JoinMode {
    JoinMode::Otaa {
        deveui: crate::DevEui::from([0; 8]),
        appeui: crate::AppEui::from([0; 8]),
        appkey: AppKey::from(get_key()),
        nb_trials,
    }
}

fn join_request_nonce(bytes: &[u8]) -> [u8; 2] {
    let mut copy = bytes.to_vec();
    match parse(copy.as_mut_slice()).unwrap() {
        PhyPayload::JoinRequest(jr) => {
            assert!(jr.validate_mic(&AppKey::from(get_key())));
            [jr.dev_nonce().as_ref()[0], jr.dev_nonce().as_ref()[1]]
        }
        other => panic!("expected a join request, got {other:?}"),
    }
}

#[test]
fn otaa_join_via_rx1() {
    let mut h = setup();
    assert_eq!(h.radio.public_network(), Some(true));
    h.device.connect(otaa_mode(2)).unwrap();
    assert_eq!(h.radio.tx_count(), 1);
    let (_, bytes) = h.radio.last_tx();
    assert_eq!(bytes.len(), 23);
    assert_eq!(bytes[0], 0x00);

    h.device.process_event(Event::RadioTxDone);
    assert!(h.timer.is_armed(TimerId::RxWindow1));
    assert!(h.timer.is_armed(TimerId::RxWindow2));

    h.fire(TimerId::RxWindow1);
    h.rx(&make_join_accept());
    h.fire(TimerId::StateCheck);

    assert_eq!(h.app.take_events(), vec![AppEvent::Connected]);
    assert!(h.device.is_joined());
    let session = h.device.get_session().unwrap();
    assert_eq!(session.devaddr.as_ref(), &get_dev_addr_bytes());
    assert_eq!(session.fcnt_up, 0);
    assert_eq!(session.fcnt_down, 0);
    assert!(h.device.last_dev_nonce().is_some());
}

#[test]
fn otaa_join_via_rx2() {
    let mut h = setup();
    h.device.connect(otaa_mode(2)).unwrap();
    h.device.process_event(Event::RadioTxDone);

    h.fire(TimerId::RxWindow1);
    h.device.process_event(Event::RadioRxTimeout);
    h.fire(TimerId::RxWindow2);
    h.rx(&make_join_accept());
    h.fire(TimerId::StateCheck);

    assert_eq!(h.app.take_events(), vec![AppEvent::Connected]);
    assert!(h.device.is_joined());
}

#[test]
fn join_retry_rotates_dev_nonce() {
    let mut h = setup();
    h.device.connect(otaa_mode(2)).unwrap();
    let first_nonce = join_request_nonce(&h.radio.last_tx().1);

    h.empty_rx_windows();
    h.timer.advance(10_000);
    h.fire(TimerId::StateCheck);
    // the second attempt may come straight away or through the
    // duty-cycle delay timer
    if h.radio.tx_count() < 2 {
        h.fire(TimerId::TxDelayed);
    }

    assert_eq!(h.radio.tx_count(), 2);
    let second_nonce = join_request_nonce(&h.radio.last_tx().1);
    assert_ne!(first_nonce, second_nonce, "join retries must draw a fresh DevNonce");
    assert!(h.app.take_events().is_empty(), "no event before the retry cycle resolves");
}

#[test]
fn join_failure_after_max_trials() {
    let mut h = setup();
    h.device.connect(otaa_mode(1)).unwrap();
    h.empty_rx_windows();
    h.fire(TimerId::StateCheck);

    assert_eq!(h.app.take_events(), vec![AppEvent::JoinFailed]);
    assert!(!h.device.is_joined());
}

#[test]
fn send_requires_a_session() {
    let mut h = setup();
    assert_eq!(h.device.send(1, b"x", SendKind::Unconfirmed), Err(Error::NoActiveSessions));
}

#[test]
fn send_rejects_reserved_ports() {
    let mut h = setup_joined();
    assert_eq!(h.device.send(0, b"x", SendKind::Unconfirmed), Err(Error::ParameterInvalid));
    assert_eq!(h.device.send(225, b"x", SendKind::Unconfirmed), Err(Error::ParameterInvalid));
}

#[test]
fn second_send_while_in_flight_would_block() {
    let mut h = setup_joined();
    assert_eq!(h.device.send(1, b"abc", SendKind::Unconfirmed), Ok(3));
    assert_eq!(h.device.send(1, b"def", SendKind::Unconfirmed), Err(Error::WouldBlock));
}

#[test]
fn oversized_payload_is_rejected() {
    let mut h = setup_joined();
    h.device.set_datarate(0).unwrap();
    let data = [0u8; 52];
    assert_eq!(h.device.send(1, &data, SendKind::Unconfirmed), Err(Error::LengthError));
    // and the slot is free again afterwards
    assert_eq!(h.device.send(1, &data[..4], SendKind::Unconfirmed), Ok(4));
}

#[test]
fn empty_unconfirmed_uplink_lifecycle() {
    let mut h = setup_joined();
    assert_eq!(h.device.send(1, &[], SendKind::Unconfirmed), Ok(0));

    let uplink = parse_uplink(&h.radio.last_tx().1);
    assert!(!uplink.confirmed);
    assert_eq!(uplink.fcnt, 0);
    assert_eq!(uplink.fport, None);
    assert!(uplink.payload.is_empty());

    h.empty_rx_windows();
    h.fire(TimerId::StateCheck);

    assert_eq!(h.app.take_events(), vec![AppEvent::TxDone]);
    assert_eq!(h.device.get_session().unwrap().fcnt_up, 1);
}

#[test]
fn uplink_counter_advances_per_cycle() {
    let mut h = setup_joined();
    for expected_fcnt in 0..3u16 {
        h.device.send(1, b"ping", SendKind::Unconfirmed).unwrap();
        assert_eq!(parse_uplink(&h.radio.last_tx().1).fcnt, expected_fcnt);
        h.empty_rx_windows();
        h.timer.advance(60_000);
        h.fire(TimerId::StateCheck);
    }
    assert_eq!(h.device.get_session().unwrap().fcnt_up, 3);
    assert_eq!(h.app.count(AppEvent::TxDone), 3);
}

#[test]
fn confirmed_uplink_with_ack_in_rx1() {
    let mut h = setup_joined();
    h.device.set_confirmed_msg_retries(1).unwrap();
    h.device.send(5, b"A\0\0\0\0\0\0\0\0\0\0", SendKind::Confirmed).unwrap();
    assert!(parse_uplink(&h.radio.last_tx().1).confirmed);

    h.device.process_event(Event::RadioTxDone);
    assert!(h.timer.is_armed(TimerId::AckTimeout));
    h.fire(TimerId::RxWindow1);
    h.rx(&make_downlink(DownlinkSpec { ack: true, fcnt: 1, ..Default::default() }));
    assert!(!h.timer.is_armed(TimerId::AckTimeout), "ACK stops the retransmission timer");
    h.fire(TimerId::StateCheck);

    assert_eq!(h.app.take_events(), vec![AppEvent::TxDone]);
    let session = h.device.get_session().unwrap();
    assert_eq!(session.fcnt_up, 1);
    assert_eq!(session.fcnt_down, 1);
}

#[test]
fn confirmed_uplink_retransmits_and_gives_up() {
    let mut h = setup_joined();
    h.device.set_confirmed_msg_retries(2).unwrap();
    h.device.send(2, b"data", SendKind::Confirmed).unwrap();
    let first = h.radio.last_tx().1;

    h.empty_rx_windows();
    h.fire(TimerId::AckTimeout);
    h.timer.advance(10_000);
    h.fire(TimerId::StateCheck);
    if h.radio.tx_count() < 2 {
        h.fire(TimerId::TxDelayed);
    }
    assert_eq!(h.radio.tx_count(), 2);
    // a retransmission repeats the very same frame
    assert_eq!(h.radio.last_tx().1, first);

    h.empty_rx_windows();
    h.fire(TimerId::AckTimeout);
    h.timer.advance(10_000);
    h.fire(TimerId::StateCheck);

    assert_eq!(h.radio.tx_count(), 2, "retries exhausted");
    assert_eq!(h.app.take_events(), vec![AppEvent::TxError]);
    assert_eq!(h.device.get_session().unwrap().fcnt_up, 1);
}

#[test]
fn confirmed_retry_lowers_datarate_every_second_attempt() {
    let mut h = setup_joined();
    h.device.set_datarate(5).unwrap();
    h.device.set_confirmed_msg_retries(4).unwrap();
    h.device.send(2, b"x", SendKind::Confirmed).unwrap();
    assert_eq!(h.radio.last_tx().0.rf.bb.sf, SpreadingFactor::_7);

    for _ in 0..2 {
        h.empty_rx_windows();
        h.fire(TimerId::AckTimeout);
        h.timer.advance(60_000);
        h.fire(TimerId::StateCheck);
        if h.timer.is_armed(TimerId::TxDelayed) {
            h.fire(TimerId::TxDelayed);
        }
    }

    assert_eq!(h.radio.tx_count(), 3);
    // attempt 2 keeps DR5, attempt 3 drops to DR4
    assert_eq!(h.radio.tx_at(1).0.rf.bb.sf, SpreadingFactor::_7);
    assert_eq!(h.radio.tx_at(2).0.rf.bb.sf, SpreadingFactor::_8);
}

#[test]
fn downlink_payload_reaches_receive() {
    let mut h = setup_joined();
    h.device.send(1, b"up", SendKind::Unconfirmed).unwrap();
    h.device.process_event(Event::RadioTxDone);
    h.fire(TimerId::RxWindow1);
    h.rx(&make_downlink(DownlinkSpec {
        fcnt: 1,
        fport: Some(7),
        payload: b"downlink",
        ..Default::default()
    }));
    h.fire(TimerId::StateCheck);

    let events = h.app.take_events();
    assert!(events.contains(&AppEvent::TxDone));
    assert!(events.contains(&AppEvent::RxDone));

    let mut buf = [0u8; 32];
    // port filter applies
    assert_eq!(h.device.receive(3, &mut buf, MessageFlags::ANY), Err(Error::WouldBlock));
    let len = h.device.receive(7, &mut buf, MessageFlags::UNCONFIRMED).unwrap();
    assert_eq!(&buf[..len], b"downlink");
    // consumed
    assert_eq!(h.device.receive(7, &mut buf, MessageFlags::ANY), Err(Error::WouldBlock));
}

#[test]
fn duplicate_confirmed_downlink_suppresses_indication_but_answers_commands() {
    let mut h = setup_joined();

    // first cycle: confirmed downlink with a DevStatusReq in FOpts
    h.device.send(1, b"up", SendKind::Unconfirmed).unwrap();
    h.device.process_event(Event::RadioTxDone);
    h.fire(TimerId::RxWindow1);
    let downlink = make_downlink(DownlinkSpec {
        confirmed: true,
        fcnt: 5,
        fport: Some(2),
        payload: b"hi",
        fopts: &[0x06],
        ..Default::default()
    });
    h.rx(&downlink);
    h.fire(TimerId::StateCheck);
    let events = h.app.take_events();
    assert!(events.contains(&AppEvent::RxDone));
    assert!(events.contains(&AppEvent::ScheduleUplink), "a confirmed downlink owes an uplink");

    // second cycle: the uplink acks the downlink and carries DevStatusAns
    h.timer.advance(60_000);
    h.device.send(1, b"up", SendKind::Unconfirmed).unwrap();
    let uplink = parse_uplink(&h.radio.last_tx().1);
    assert_ne!(uplink.fctrl & 0x20, 0, "ACK bit for the confirmed downlink");
    assert_eq!(uplink.fopts.first(), Some(&0x06), "DevStatusAns piggybacked");
    assert_eq!(uplink.fopts.get(1), Some(&128), "battery level from the app callback");

    // the duplicate arrives again: no new indication, commands still served
    h.device.process_event(Event::RadioTxDone);
    h.fire(TimerId::RxWindow1);
    h.rx(&downlink);
    h.fire(TimerId::StateCheck);
    let events = h.app.take_events();
    assert!(!events.contains(&AppEvent::RxDone), "duplicate must not reach the application");

    h.timer.advance(60_000);
    h.device.send(1, b"up", SendKind::Unconfirmed).unwrap();
    let uplink = parse_uplink(&h.radio.last_tx().1);
    assert_eq!(uplink.fopts.first(), Some(&0x06), "answers of the duplicate still go out");

    assert_eq!(h.device.get_session().unwrap().fcnt_down, 5);
}

#[test]
fn downlink_counter_gap_is_rejected() {
    let mut h = setup_joined();
    h.device.send(1, b"up", SendKind::Unconfirmed).unwrap();
    h.device.process_event(Event::RadioTxDone);
    h.fire(TimerId::RxWindow1);
    // gap of 16385 frames exceeds max_fcnt_gap
    h.rx(&make_downlink(DownlinkSpec { fcnt: 0x4001, ..Default::default() }));
    h.fire(TimerId::StateCheck);

    let events = h.app.take_events();
    assert!(events.contains(&AppEvent::RxError));
    assert_eq!(h.device.get_session().unwrap().fcnt_down, 0);
}

#[test]
fn wrong_mic_is_rejected() {
    let mut h = setup_joined();
    h.device.send(1, b"up", SendKind::Unconfirmed).unwrap();
    h.device.process_event(Event::RadioTxDone);
    h.fire(TimerId::RxWindow1);
    let bogus = make_downlink_keyed(
        DownlinkSpec { fcnt: 1, fport: Some(1), payload: b"evil", ..Default::default() },
        &get_dev_addr_bytes(),
        &Aes128Key([9; 16]),
        &Aes128Key([9; 16]),
    );
    h.rx(&bogus);
    h.fire(TimerId::StateCheck);

    let events = h.app.take_events();
    assert!(events.contains(&AppEvent::RxError));
    assert!(!events.contains(&AppEvent::RxDone));
    assert_eq!(h.device.get_session().unwrap().fcnt_down, 0);
}

#[test]
fn foreign_device_address_is_ignored() {
    let mut h = setup_joined();
    h.device.send(1, b"up", SendKind::Unconfirmed).unwrap();
    h.device.process_event(Event::RadioTxDone);
    h.fire(TimerId::RxWindow1);
    let foreign = make_downlink_keyed(
        DownlinkSpec { fcnt: 1, fport: Some(1), payload: b"meh", ..Default::default() },
        &[0xde, 0xad, 0xbe, 0xef],
        &Aes128Key(get_key()),
        &Aes128Key(get_key()),
    );
    h.rx(&foreign);
    h.fire(TimerId::StateCheck);
    assert!(!h.app.take_events().contains(&AppEvent::RxDone));
}

#[test]
fn link_check_request_and_answer() {
    let mut h = setup_joined();
    h.device.add_link_check_request();
    h.device.send(1, b"up", SendKind::Confirmed).unwrap();
    let uplink = parse_uplink(&h.radio.last_tx().1);
    assert_eq!(uplink.fopts, vec![0x02], "LinkCheckReq piggybacked in FOpts");

    h.device.process_event(Event::RadioTxDone);
    h.fire(TimerId::RxWindow1);
    h.rx(&make_downlink(DownlinkSpec {
        ack: true,
        fcnt: 1,
        fopts: &[0x02, 20, 2],
        ..Default::default()
    }));
    h.fire(TimerId::StateCheck);

    assert_eq!(h.app.link_check(), Some((20, 2)));

    // removal stops the piggybacking
    h.device.remove_link_check_request();
    h.timer.advance(60_000);
    h.device.send(1, b"up", SendKind::Unconfirmed).unwrap();
    assert!(parse_uplink(&h.radio.last_tx().1).fopts.is_empty());
}

#[test]
fn adr_bit_follows_configuration() {
    let mut h = setup_joined();
    h.device.enable_adaptive_datarate();
    h.device.send(1, b"x", SendKind::Unconfirmed).unwrap();
    assert_ne!(parse_uplink(&h.radio.last_tx().1).fctrl & 0x80, 0);

    assert_eq!(h.device.set_datarate(3), Err(Error::ParameterInvalid), "DR is owned by ADR");
    h.device.disable_adaptive_datarate();
    assert_eq!(h.device.set_datarate(3), Ok(()));
}

#[test]
fn datarate_maps_to_spreading_factor() {
    let mut h = setup_joined();
    for (dr, sf) in [(1, SpreadingFactor::_11), (3, SpreadingFactor::_9), (5, SpreadingFactor::_7)]
    {
        h.device.set_datarate(dr).unwrap();
        h.device.send(1, b"x", SendKind::Unconfirmed).unwrap();
        assert_eq!(h.radio.last_tx().0.rf.bb.sf, sf);
        h.empty_rx_windows();
        h.timer.advance(120_000);
        h.fire(TimerId::StateCheck);
    }
    assert_eq!(h.device.set_datarate(7), Err(Error::ParameterInvalid));
}

#[test]
fn sticky_answers_repeat_until_any_downlink() {
    let mut h = setup_joined();

    // cycle 1: RXTimingSetupReq(delay=3) arrives
    h.device.send(1, b"a", SendKind::Unconfirmed).unwrap();
    h.device.process_event(Event::RadioTxDone);
    h.fire(TimerId::RxWindow1);
    h.rx(&make_downlink(DownlinkSpec { fcnt: 1, fopts: &[0x08, 0x03], ..Default::default() }));
    h.fire(TimerId::StateCheck);

    // cycle 2: answer goes out, window delay is the new three seconds
    h.timer.advance(60_000);
    h.device.send(1, b"b", SendKind::Unconfirmed).unwrap();
    assert_eq!(parse_uplink(&h.radio.last_tx().1).fopts, vec![0x08]);
    let tx_done_at = h.timer.now();
    h.device.process_event(Event::RadioTxDone);
    let rx1_deadline = h.timer.deadline(TimerId::RxWindow1).unwrap();
    assert!(
        (2900..=3000).contains(&(rx1_deadline - tx_done_at)),
        "RXTimingSetupReq moved RX1 to ~3 s"
    );
    h.fire(TimerId::RxWindow1);
    h.device.process_event(Event::RadioRxTimeout);
    h.fire(TimerId::RxWindow2);
    h.device.process_event(Event::RadioRxTimeout);
    h.fire(TimerId::StateCheck);
    assert!(
        h.app.take_events().contains(&AppEvent::UplinkRequired),
        "sticky answer still unheard"
    );

    // cycle 3: the sticky answer is repeated, then a downlink clears it
    h.timer.advance(60_000);
    h.device.send(1, b"c", SendKind::Unconfirmed).unwrap();
    assert_eq!(parse_uplink(&h.radio.last_tx().1).fopts, vec![0x08]);
    h.device.process_event(Event::RadioTxDone);
    h.fire(TimerId::RxWindow1);
    h.rx(&make_downlink(DownlinkSpec { fcnt: 2, ..Default::default() }));
    h.fire(TimerId::StateCheck);

    // cycle 4: nothing sticky left
    h.timer.advance(60_000);
    h.device.send(1, b"d", SendKind::Unconfirmed).unwrap();
    assert!(parse_uplink(&h.radio.last_tx().1).fopts.is_empty());
}

#[test]
fn class_c_listens_continuously_between_windows() {
    let mut h = setup_joined();
    h.device.set_device_class(DeviceClass::C);
    let config = h.radio.last_rx_config().expect("continuous listen opens immediately");
    assert_eq!(config.mode, RxMode::Continuous);
    assert_eq!(config.rf.frequency, 869_525_000);

    h.device.send(1, b"x", SendKind::Unconfirmed).unwrap();
    h.device.process_event(Event::RadioTxDone);
    assert!(h.timer.is_armed(TimerId::RxWindow1));
    assert!(!h.timer.is_armed(TimerId::RxWindow2), "Class C has no one-shot RX2");
    assert!(h.timer.is_armed(TimerId::AckTimeout));

    h.fire(TimerId::RxWindow1);
    assert!(matches!(h.radio.last_rx_config().unwrap().mode, RxMode::Single { .. }));
    h.device.process_event(Event::RadioRxTimeout);
    assert_eq!(h.radio.last_rx_config().unwrap().mode, RxMode::Continuous);

    h.fire(TimerId::AckTimeout);
    h.fire(TimerId::StateCheck);
    assert_eq!(h.app.take_events(), vec![AppEvent::TxDone]);

    // an asynchronous Class C downlink while idle
    h.rx(&make_downlink(DownlinkSpec {
        fcnt: 1,
        fport: Some(3),
        payload: b"cc",
        ..Default::default()
    }));
    h.fire(TimerId::StateCheck);
    assert!(h.app.take_events().contains(&AppEvent::RxDone));
    let mut buf = [0u8; 8];
    let len = h.device.receive(3, &mut buf, MessageFlags::UNCONFIRMED).unwrap();
    assert_eq!(&buf[..len], b"cc");
}

#[test]
fn multicast_downlink_is_delivered_once() {
    let group_addr = [9, 9, 9, 9];
    let group_key = [7u8; 16];
    let mut h = setup_joined();
    h.device.set_device_class(DeviceClass::C);
    h.device
        .add_multicast_group(
            0,
            MulticastGroup::new(
                DevAddr::from(group_addr),
                crate::NwkSKey::from(group_key),
                crate::AppSKey::from(group_key),
            ),
        )
        .unwrap();

    let downlink = make_downlink_keyed(
        DownlinkSpec { fcnt: 4, fport: Some(10), payload: b"mc", ..Default::default() },
        &group_addr,
        &Aes128Key(group_key),
        &Aes128Key(group_key),
    );
    h.rx(&downlink);
    h.fire(TimerId::StateCheck);
    assert!(h.app.take_events().contains(&AppEvent::RxDone));
    let mut buf = [0u8; 8];
    let len = h.device.receive(10, &mut buf, MessageFlags::MULTICAST).unwrap();
    assert_eq!(&buf[..len], b"mc");

    // replaying the same frame is rejected on the group counter
    h.rx(&downlink);
    h.fire(TimerId::StateCheck);
    let events = h.app.take_events();
    assert!(!events.contains(&AppEvent::RxDone));
    assert!(events.contains(&AppEvent::RxError));
}

#[test]
fn automatic_uplink_acknowledges_confirmed_downlink() {
    let mut h = setup_joined();
    h.device.set_automatic_uplink(true);
    h.device.send(1, b"up", SendKind::Unconfirmed).unwrap();
    h.device.process_event(Event::RadioTxDone);
    h.fire(TimerId::RxWindow1);
    h.rx(&make_downlink(DownlinkSpec {
        confirmed: true,
        fcnt: 1,
        fport: Some(2),
        payload: b"need ack",
        ..Default::default()
    }));
    h.fire(TimerId::StateCheck);

    let events = h.app.take_events();
    assert!(events.contains(&AppEvent::AutomaticUplink));
    if h.radio.tx_count() < 2 {
        h.fire(TimerId::TxDelayed);
    }
    assert_eq!(h.radio.tx_count(), 2);
    let auto = parse_uplink(&h.radio.last_tx().1);
    assert_ne!(auto.fctrl & 0x20, 0, "the automatic uplink carries the ACK bit");
}

#[test]
fn duty_cycle_defers_back_to_back_uplinks() {
    let mut h = setup_joined();
    h.device.set_datarate(0).unwrap(); // SF12: long airtime, long off-time
    h.device.send(1, b"a", SendKind::Unconfirmed).unwrap();
    assert_eq!(h.radio.tx_count(), 1);
    h.empty_rx_windows();
    h.fire(TimerId::StateCheck);
    h.app.take_events();

    h.device.send(1, b"b", SendKind::Unconfirmed).unwrap();
    assert_eq!(h.radio.tx_count(), 1, "second TX must wait out the duty cycle");
    assert!(h.timer.is_armed(TimerId::TxDelayed));
    h.fire(TimerId::TxDelayed);
    assert_eq!(h.radio.tx_count(), 2);
}

#[test]
fn proprietary_frames_pass_through() {
    let mut h = setup_joined();
    h.device.send(1, b"raw-bytes", SendKind::Proprietary).unwrap();
    let (_, bytes) = h.radio.last_tx();
    assert_eq!(bytes[0], 0xe0);
    assert_eq!(&bytes[1..], b"raw-bytes");
}

#[test]
fn disconnect_clears_session_and_timers() {
    let mut h = setup_joined();
    h.device.send(1, b"x", SendKind::Unconfirmed).unwrap();
    h.device.disconnect();
    assert_eq!(h.app.take_events(), vec![AppEvent::Disconnected]);
    assert!(!h.device.is_joined());
    assert!(!h.timer.is_armed(TimerId::StateCheck));
    assert!(!h.timer.is_armed(TimerId::RxWindow1));
    assert_eq!(h.device.send(1, b"x", SendKind::Unconfirmed), Err(Error::NoActiveSessions));
}

#[test]
fn events_flow_through_the_queue() {
    let queue: EventQueue<16> = EventQueue::new();
    let mut h = setup_joined();
    h.device.send(1, &[], SendKind::Unconfirmed).unwrap();

    queue.post(Event::RadioTxDone).unwrap();
    h.device.dispatch(&queue);
    assert!(h.timer.is_armed(TimerId::RxWindow1));

    h.timer.fire(TimerId::RxWindow1);
    queue.post(Event::Timer(TimerId::RxWindow1)).unwrap();
    queue.post(Event::RadioRxTimeout).unwrap();
    h.device.dispatch(&queue);

    h.timer.fire(TimerId::RxWindow2);
    queue.post(Event::Timer(TimerId::RxWindow2)).unwrap();
    queue.post(Event::RadioRxTimeout).unwrap();
    h.device.dispatch(&queue);

    h.timer.fire(TimerId::StateCheck);
    queue.post(Event::Timer(TimerId::StateCheck)).unwrap();
    h.device.dispatch(&queue);

    assert_eq!(h.app.take_events(), vec![AppEvent::TxDone]);
}

#[test]
fn stale_timer_events_are_ignored(){
    let mut h = setup_joined();
    // nothing armed, nothing running: these must all be no-ops
    h.device.process_event(Event::Timer(TimerId::RxWindow1));
    h.device.process_event(Event::Timer(TimerId::RxWindow2));
    h.device.process_event(Event::Timer(TimerId::TxDelayed));
    h.device.process_event(Event::Timer(TimerId::AckTimeout));
    h.device.process_event(Event::Timer(TimerId::StateCheck));
    assert!(h.app.take_events().is_empty());
    assert_eq!(h.radio.tx_count(), 0);
    // and the device still works afterwards
    assert_eq!(h.device.send(1, b"ok", SendKind::Unconfirmed), Ok(2));
}

#[test]
fn channel_plan_crud() {
    let mut h = setup_joined();
    let entry = super::ChannelPlanEntry { id: 3, frequency: 867_100_000, dr_min: 0, dr_max: 5 };
    h.device.set_channel_plan(&[entry]).unwrap();

    let mut plan = heapless::Vec::new();
    h.device.get_channel_plan(&mut plan);
    assert_eq!(plan.len(), 4, "three default channels plus the new one");
    assert!(plan.iter().any(|c| c.id == 3 && c.frequency == 867_100_000));

    // default channels are immutable
    assert_eq!(
        h.device.set_channel_plan(&[super::ChannelPlanEntry {
            id: 0,
            frequency: 867_300_000,
            dr_min: 0,
            dr_max: 5,
        }]),
        Err(Error::ParameterInvalid)
    );
    assert_eq!(h.device.remove_channel(0), Err(Error::ParameterInvalid));

    h.device.remove_channel(3).unwrap();
    h.device.get_channel_plan(&mut plan);
    assert_eq!(plan.len(), 3);

    // mutation is refused while a frame is in flight
    h.device.send(1, b"x", SendKind::Unconfirmed).unwrap();
    assert_eq!(h.device.set_channel_plan(&[entry]), Err(Error::Busy));
}
