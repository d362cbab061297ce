// Установка сессии: Alice обрабатывает PreKeyBundle, Bob — PreKeySignalMessage

use crate::crypto::handshake::{
    initialize_alice_session, initialize_bob_session, AliceParameters, BobParameters,
};
use crate::crypto::keys::KeyPair;
use crate::crypto::CryptoProvider;
use crate::error::{RatchetError, Result};
use crate::protocol::bundle::PreKeyBundle;
use crate::protocol::messages::PreKeySignalMessage;
use crate::state::record::SessionRecord;
use crate::storage::{
    Direction, IdentityKeyStore, KyberPreKeyStore, PreKeyStore, ProtocolAddress, SessionStore,
    SignedPreKeyStore,
};
use crate::utils::time::now_millis;
use rand_core::{CryptoRng, RngCore};

/// Одноразовые ключи, которые Bob удалит после первого успешного decrypt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PreKeysUsed {
    pub pre_key_id: Option<u32>,
    pub kyber_pre_key_id: u32,
}

/// Alice: проверить bundle Bob, выполнить PQXDH и сделать новую сессию текущей.
///
/// Новая сессия остаётся pending: первые сообщения уходят как
/// PreKeySignalMessage, пока Bob не ответит.
pub async fn process_prekey_bundle<P: CryptoProvider, R: RngCore + CryptoRng>(
    remote_address: &ProtocolAddress,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
    bundle: &PreKeyBundle,
    rng: &mut R,
) -> Result<()> {
    use tracing::{debug, warn};

    debug!(
        target: "crypto::session",
        address = %remote_address,
        signed_pre_key_id = bundle.signed_pre_key_id,
        kyber_pre_key_id = bundle.kyber_pre_key_id,
        pre_key_id = ?bundle.pre_key_id,
        "Processing pre-key bundle"
    );

    let their_identity_key = bundle.identity_key()?;

    if !identity_store
        .is_trusted_identity(remote_address, &their_identity_key, Direction::Sending)
        .await?
    {
        warn!(target: "crypto::session", address = %remote_address, "Untrusted identity in bundle");
        return Err(RatchetError::UntrustedIdentity(remote_address.to_string()));
    }

    their_identity_key
        .public_key()
        .verify_signature::<P>(&bundle.signed_pre_key_public, &bundle.signed_pre_key_signature)
        .map_err(|_| RatchetError::SignatureVerificationFailed("signed pre-key".into()))?;
    their_identity_key
        .public_key()
        .verify_signature::<P>(&bundle.kyber_pre_key_public, &bundle.kyber_pre_key_signature)
        .map_err(|_| RatchetError::SignatureVerificationFailed("kyber pre-key".into()))?;

    let their_signed_pre_key = bundle.signed_pre_key()?;
    let their_kyber_pre_key = bundle.kyber_pre_key()?;
    let their_one_time_pre_key = bundle.pre_key()?;

    let our_identity_key_pair = identity_store.get_identity_key_pair().await?;
    let our_base_key_pair = KeyPair::generate::<P, _>(rng);

    let alice = initialize_alice_session::<P, _>(
        &AliceParameters {
            our_identity_key_pair: &our_identity_key_pair,
            our_base_key_pair: &our_base_key_pair,
            their_identity_key: &their_identity_key,
            their_signed_pre_key: &their_signed_pre_key,
            their_one_time_pre_key: their_one_time_pre_key.as_ref().map(|(_, key)| key),
            their_ratchet_key: &their_signed_pre_key,
            their_kyber_pre_key: &their_kyber_pre_key,
        },
        rng,
    )?;

    let mut state = alice.state;
    state.set_pending_pre_key(
        their_one_time_pre_key.map(|(id, _)| id),
        bundle.signed_pre_key_id,
        our_base_key_pair.public_key,
        now_millis(),
    );
    state.set_pending_kyber_pre_key(bundle.kyber_pre_key_id, alice.kyber_ciphertext);
    state.set_local_registration_id(identity_store.get_local_registration_id().await?);
    state.set_remote_registration_id(bundle.registration_id);

    let mut record = session_store
        .load_session(remote_address)
        .await?
        .unwrap_or_else(SessionRecord::new_fresh);
    record.promote_state(state);

    if identity_store
        .save_identity(remote_address, &their_identity_key)
        .await?
    {
        warn!(target: "crypto::session", address = %remote_address, "Remote identity key changed");
    }
    session_store.store_session(remote_address, &record).await?;

    debug!(
        target: "crypto::session",
        address = %remote_address,
        archived = record.previous_session_states().len(),
        "Initiator session stored"
    );

    Ok(())
}

/// Bob: построить сессию из PreKeySignalMessage.
///
/// Возвращает `None`, если сессия с этим base key уже есть (повтор
/// handshake или simultaneous initiate): она поднимается в current, ключи
/// не расходуются. Ключи из `Some(..)` вызывающий удаляет только после того,
/// как первое сообщение прошло проверку MAC.
pub(crate) async fn process_prekey<P: CryptoProvider>(
    message: &PreKeySignalMessage,
    remote_address: &ProtocolAddress,
    session_record: &mut SessionRecord,
    identity_store: &dyn IdentityKeyStore,
    pre_key_store: &dyn PreKeyStore,
    signed_pre_key_store: &dyn SignedPreKeyStore,
    kyber_pre_key_store: &dyn KyberPreKeyStore,
) -> Result<Option<PreKeysUsed>> {
    use tracing::{debug, warn};

    let their_identity_key = message.identity_key();

    if !identity_store
        .is_trusted_identity(remote_address, their_identity_key, Direction::Receiving)
        .await?
    {
        warn!(target: "crypto::session", address = %remote_address, "Untrusted identity in pre-key message");
        return Err(RatchetError::UntrustedIdentity(remote_address.to_string()));
    }

    if session_record.promote_matching_session(
        u32::from(message.message_version()),
        &message.base_key().serialize(),
    ) {
        debug!(
            target: "crypto::session",
            address = %remote_address,
            base_key = %message.base_key().fingerprint(),
            "Session for base key already exists"
        );
        return Ok(None);
    }

    let signed_pre_key = signed_pre_key_store
        .get_signed_pre_key(message.signed_pre_key_id())
        .await?;
    let kyber_pre_key = kyber_pre_key_store
        .get_kyber_pre_key(message.kyber_pre_key_id())
        .await?;
    let one_time_pre_key = match message.pre_key_id() {
        Some(id) => Some(pre_key_store.get_pre_key(id).await?),
        None => None,
    };

    let our_identity_key_pair = identity_store.get_identity_key_pair().await?;

    let mut state = initialize_bob_session::<P>(&BobParameters {
        our_identity_key_pair: &our_identity_key_pair,
        our_signed_pre_key_pair: &signed_pre_key.key_pair,
        our_one_time_pre_key_pair: one_time_pre_key.as_ref().map(|record| &record.key_pair),
        our_ratchet_key_pair: &signed_pre_key.key_pair,
        our_kyber_pre_key_pair: &kyber_pre_key.key_pair,
        their_identity_key,
        their_base_key: message.base_key(),
        their_kyber_ciphertext: message.kyber_ciphertext(),
    })?;

    state.set_local_registration_id(identity_store.get_local_registration_id().await?);
    state.set_remote_registration_id(message.registration_id());
    session_record.promote_state(state);

    debug!(
        target: "crypto::session",
        address = %remote_address,
        signed_pre_key_id = message.signed_pre_key_id(),
        kyber_pre_key_id = message.kyber_pre_key_id(),
        "Responder session promoted"
    );

    Ok(Some(PreKeysUsed {
        pre_key_id: message.pre_key_id(),
        kyber_pre_key_id: message.kyber_pre_key_id(),
    }))
}
