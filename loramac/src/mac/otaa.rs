use loramac_codec::creator::JoinRequestCreator;
use loramac_codec::keys::{AppEui, AppKey, CryptoFactory, DevEui};
use loramac_codec::parser::{
    parse_with_factory, CfList, DevNonce, JoinAcceptPayload, PhyPayload,
};
use rand_core::RngCore;

use super::session::Session;
use crate::radio::RadioBuffer;

/// The credentials an over-the-air activation needs.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct OtaaCredentials {
    pub deveui: DevEui,
    pub appeui: AppEui,
    pub appkey: AppKey,
}

/// Everything a valid join-accept told us.
pub(crate) struct JoinAccept {
    pub session: Session,
    pub rx1_dr_offset: u8,
    pub rx2_data_rate: u8,
    /// RxDelay field in seconds; zero means the regional default.
    pub rx_delay: u8,
    pub cf_list: Option<[u32; 5]>,
}

/// An activation attempt in flight.
pub(crate) struct Otaa {
    credentials: OtaaCredentials,
    dev_nonce: DevNonce<[u8; 2]>,
    pub trials: u8,
    pub max_trials: u8,
}

impl Otaa {
    pub fn new(credentials: OtaaCredentials, max_trials: u8) -> Self {
        Self { credentials, dev_nonce: DevNonce::from(0u16), trials: 0, max_trials }
    }

    pub fn dev_nonce(&self) -> u16 {
        self.dev_nonce.into()
    }

    /// Builds a fresh join-request into `buf`.
    ///
    /// The DevNonce is regenerated on every call: the network tracks seen
    /// nonces, so a retransmission must not reuse one.
    pub fn prepare_buffer<C: CryptoFactory + Default, G: RngCore, const N: usize>(
        &mut self,
        rng: &mut G,
        buf: &mut RadioBuffer<N>,
    ) -> u16 {
        self.dev_nonce = DevNonce::from(rng.next_u32() as u16);
        buf.clear();
        let mut phy = JoinRequestCreator::with_options(buf.as_mut(), C::default())
            .expect("radio buffer outsizes a join-request");
        phy.set_app_eui(self.credentials.appeui)
            .set_dev_eui(self.credentials.deveui)
            .set_dev_nonce(self.dev_nonce);
        let len = phy.build(&self.credentials.appkey).len();
        buf.set_pos(len);
        self.dev_nonce.into()
    }

    /// Decrypts and verifies a received join-accept; on success derives the
    /// session and reports the downlink parameters it carried.
    pub fn handle_join_accept<C: CryptoFactory + Default, const N: usize>(
        &self,
        rx: &mut RadioBuffer<N>,
    ) -> Option<JoinAccept> {
        let appkey = &self.credentials.appkey;
        let PhyPayload::JoinAccept(JoinAcceptPayload::Encrypted(encrypted)) =
            parse_with_factory(rx.as_mut_for_read(), C::default()).ok()?
        else {
            return None;
        };
        let decrypted = encrypted.decrypt(appkey);
        if !decrypted.validate_mic(appkey) {
            return None;
        }

        let mut session = Session::new(
            decrypted.dev_addr().to_owned(),
            decrypted.derive_nwkskey(&self.dev_nonce, appkey),
            decrypted.derive_appskey(&self.dev_nonce, appkey),
        );
        session.net_id = decrypted.net_id().to_owned().into();

        let cf_list = match decrypted.c_f_list() {
            Some(CfList::DynamicChannel(frequencies)) => {
                let mut list = [0u32; 5];
                for (slot, freq) in list.iter_mut().zip(frequencies.iter()) {
                    *slot = freq.value();
                }
                Some(list)
            }
            // fixed-plan CF lists are not applicable to the dynamic regions
            // this crate implements
            _ => None,
        };

        Some(JoinAccept {
            session,
            rx1_dr_offset: decrypted.dl_settings().rx1_dr_offset(),
            rx2_data_rate: decrypted.dl_settings().rx2_data_rate(),
            rx_delay: decrypted.rx_delay(),
            cf_list,
        })
    }
}
