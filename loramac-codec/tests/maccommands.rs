use loramac_codec::maccommandcreator::*;
use loramac_codec::maccommands::*;

#[test]
fn parse_downlink_command_sequence() {
    // LinkADRReq + DevStatusReq + RXTimingSetupReq back to back
    let data = [0x03, 0x51, 0x07, 0x00, 0x01, 0x06, 0x08, 0x03];
    let mut cmds = parse_downlink_mac_commands(&data);

    match cmds.next().unwrap() {
        DownlinkMacCommand::LinkADRReq(req) => {
            assert_eq!(req.data_rate(), 5);
            assert_eq!(req.tx_power(), 1);
            assert_eq!(req.channel_mask().as_ref(), &[0x07, 0x00]);
            assert_eq!(req.redundancy().channel_mask_control(), 0);
            assert_eq!(req.redundancy().number_of_transmissions(), 1);
        }
        other => panic!("unexpected command: {other:?}"),
    }
    assert!(matches!(cmds.next().unwrap(), DownlinkMacCommand::DevStatusReq(_)));
    match cmds.next().unwrap() {
        DownlinkMacCommand::RXTimingSetupReq(req) => assert_eq!(req.delay(), 3),
        other => panic!("unexpected command: {other:?}"),
    }
    assert!(cmds.next().is_none());
}

#[test]
fn parsing_stops_at_unknown_cid() {
    let data = [0x04, 0x07, 0xff, 0x06];
    let mut cmds = parse_downlink_mac_commands(&data);
    assert!(matches!(cmds.next().unwrap(), DownlinkMacCommand::DutyCycleReq(_)));
    assert!(cmds.next().is_none());
}

#[test]
fn truncated_command_is_not_parsed() {
    // RXParamSetupReq needs four payload bytes, only two present
    let data = [0x05, 0x00, 0x01];
    let mut cmds = parse_downlink_mac_commands(&data);
    assert!(cmds.next().is_none());
}

#[test]
fn rx_param_setup_req_fields() {
    let data = [0x05, 0x23, 0x18, 0x4f, 0x84];
    match parse_downlink_mac_commands(&data).next().unwrap() {
        DownlinkMacCommand::RXParamSetupReq(req) => {
            assert_eq!(req.dl_settings().rx1_dr_offset(), 2);
            assert_eq!(req.dl_settings().rx2_data_rate(), 3);
            assert_eq!(req.frequency().value(), 867_100_000);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn new_channel_req_fields() {
    let data = [0x07, 0x05, 0x18, 0x4f, 0x84, 0x50];
    match parse_downlink_mac_commands(&data).next().unwrap() {
        DownlinkMacCommand::NewChannelReq(req) => {
            assert_eq!(req.channel_index(), 5);
            assert_eq!(req.frequency().value(), 867_100_000);
            assert_eq!(req.data_rate_range().min_data_rate(), 0);
            assert_eq!(req.data_rate_range().max_data_rate(), 5);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn uplink_answers_round_trip() {
    let mut adr = LinkADRAnsCreator::new();
    adr.set_channel_mask_ack(true).set_data_rate_ack(true).set_tx_power_ack(true);
    let mut dev_status = DevStatusAnsCreator::new();
    dev_status.set_battery(254).set_margin(-17).unwrap();
    let rx_param = {
        let mut c = RXParamSetupAnsCreator::new();
        c.set_channel_ack(true).set_rx2_data_rate_ack(true).set_rx1_dr_offset_ack(true);
        c
    };

    let mut buf = [0u8; 8];
    let cmds: [&dyn SerializableMacCommand; 3] = [&adr, &dev_status, &rx_param];
    let out = build_mac_commands(&cmds, &mut buf).unwrap();
    assert_eq!(out, &[0x03, 0x07, 0x06, 254, 0x2f, 0x05, 0x07]);

    let mut parsed = parse_uplink_mac_commands(out);
    assert!(matches!(parsed.next().unwrap(), UplinkMacCommand::LinkADRAns(_)));
    assert!(matches!(parsed.next().unwrap(), UplinkMacCommand::DevStatusAns(_)));
    assert!(matches!(parsed.next().unwrap(), UplinkMacCommand::RXParamSetupAns(_)));
    assert!(parsed.next().is_none());
}

#[test]
fn dev_status_margin_bounds() {
    let mut c = DevStatusAnsCreator::new();
    assert!(c.set_margin(31).is_ok());
    assert!(c.set_margin(-32).is_ok());
    assert!(c.set_margin(32).is_err());
    assert!(c.set_margin(-33).is_err());
}
