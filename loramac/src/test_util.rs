//! Frame fabrication helpers shared by the engine tests: they play the
//! network side, building real frames with the codec.

use loramac_codec::creator::{DataPayloadCreator, JoinAcceptCreator};
use loramac_codec::keys::{Aes128Key, AppKey, AppSKey, NwkSKey};
use loramac_codec::parser::{
    parse, DataHeader, DataPayload, Fctrl, FrmPayload, PhyPayload,
};

pub(crate) fn get_key() -> [u8; 16] {
    [0; 16]
}

pub(crate) fn get_dev_addr_bytes() -> [u8; 4] {
    [4, 3, 2, 1]
}

pub(crate) fn get_nwkskey() -> NwkSKey {
    NwkSKey::from(get_key())
}

pub(crate) fn get_appskey() -> AppSKey {
    AppSKey::from(get_key())
}

/// Network-side join-accept for the all-zero AppKey.
pub(crate) fn make_join_accept() -> Vec<u8> {
    let mut buf = [0u8; 17];
    let mut phy = JoinAcceptCreator::new(&mut buf[..]).unwrap();
    phy.set_app_nonce(&[1, 1, 1])
        .set_net_id(&[1, 1, 1])
        .set_dev_addr(&get_dev_addr_bytes())
        .set_dl_settings(0)
        .set_rx_delay(0);
    phy.build(&AppKey::from(get_key())).unwrap().to_vec()
}

pub(crate) struct DownlinkSpec<'a> {
    pub confirmed: bool,
    pub ack: bool,
    pub fcnt: u32,
    pub fport: Option<u8>,
    pub payload: &'a [u8],
    pub fopts: &'a [u8],
}

impl Default for DownlinkSpec<'_> {
    fn default() -> Self {
        Self { confirmed: false, ack: false, fcnt: 1, fport: None, payload: &[], fopts: &[] }
    }
}

/// Network-side data downlink addressed to the test device.
pub(crate) fn make_downlink(spec: DownlinkSpec<'_>) -> Vec<u8> {
    make_downlink_keyed(spec, &get_dev_addr_bytes(), &Aes128Key(get_key()), &Aes128Key(get_key()))
}

pub(crate) fn make_downlink_keyed(
    spec: DownlinkSpec<'_>,
    devaddr: &[u8; 4],
    nwk: &Aes128Key,
    app: &Aes128Key,
) -> Vec<u8> {
    let mut buf = [0u8; 255];
    let mut phy = DataPayloadCreator::new(&mut buf[..]).unwrap();
    let mut fctrl = Fctrl::new(0, false);
    if spec.ack {
        fctrl.set_ack();
    }
    phy.set_uplink(false)
        .set_confirmed(spec.confirmed)
        .set_dev_addr(devaddr)
        .set_fctrl(&fctrl)
        .set_fcnt(spec.fcnt);
    if let Some(fport) = spec.fport {
        phy.set_f_port(fport);
    }
    phy.build(spec.payload, spec.fopts, nwk, app).unwrap().to_vec()
}

pub(crate) struct ParsedUplink {
    pub confirmed: bool,
    pub fcnt: u16,
    pub fport: Option<u8>,
    pub fctrl: u8,
    pub fopts: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Decodes and decrypts a captured device uplink with the test keys.
pub(crate) fn parse_uplink(bytes: &[u8]) -> ParsedUplink {
    let mut copy = bytes.to_vec();
    let PhyPayload::Data(DataPayload::Encrypted(encrypted)) = parse(copy.as_mut_slice()).unwrap()
    else {
        panic!("not a data uplink");
    };
    let fhdr = encrypted.fhdr();
    let fcnt = fhdr.fcnt();
    let fctrl = fhdr.fctrl().raw_value();
    let fopts = fhdr.data().to_vec();
    let confirmed = encrypted.is_confirmed();
    assert!(
        encrypted.validate_mic(&Aes128Key(get_key()), u32::from(fcnt)),
        "uplink MIC does not verify"
    );
    let decrypted = encrypted
        .decrypt(Some(&Aes128Key(get_key())), Some(&Aes128Key(get_key())), u32::from(fcnt))
        .unwrap();
    let fport = decrypted.f_port();
    let payload = match decrypted.frm_payload() {
        FrmPayload::Data(data) => data.to_vec(),
        FrmPayload::MacCommands(cmds) => cmds.data().to_vec(),
        FrmPayload::None => Vec::new(),
    };
    ParsedUplink { confirmed, fcnt, fport, fctrl, fopts, payload }
}
