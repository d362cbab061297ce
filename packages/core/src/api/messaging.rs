// Шифрование и расшифровка сообщений Triple Ratchet
//
// Все операции работают с копией SessionRecord: store обновляется только
// после полного успеха, иначе сохранённое состояние не меняется.

use crate::api::session::{process_prekey, process_prekey_bundle, PreKeysUsed};
use crate::config::Config;
use crate::crypto::keys::{IdentityKey, KeyPair, PublicKey};
use crate::crypto::ratchet::{ChainKey, MessageKeys};
use crate::crypto::{CryptoProvider, SIGNAL_MESSAGE_VERSION};
use crate::error::{RatchetError, Result};
use crate::protocol::bundle::PreKeyBundle;
use crate::protocol::messages::{CiphertextMessage, PreKeySignalMessage, SignalMessage};
use crate::state::prekeys::{KyberPreKeyRecord, PreKeyRecord};
use crate::state::record::SessionRecord;
use crate::state::session::SessionState;
use crate::storage::{
    Direction, IdentityKeyStore, KyberPreKeyStore, PreKeyStore, ProtocolAddress, SessionStore,
    SignedPreKeyStore,
};
use crate::utils::time::now_millis;
use rand_core::{CryptoRng, RngCore};

// ============================================================================
// Encrypt
// ============================================================================

/// Зашифровать сообщение в текущей сессии и вернуть его wire-байты.
///
/// Случайность не нужна: новый ratchet key генерируется при приёме
/// (DH шаг в [`triple_ratchet_decrypt`]), отправка только двигает sender chain.
pub async fn triple_ratchet_encrypt<P: CryptoProvider>(
    plaintext: &[u8],
    remote_address: &ProtocolAddress,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
) -> Result<Vec<u8>> {
    let message =
        triple_ratchet_encrypt_message::<P>(plaintext, remote_address, session_store, identity_store)
            .await?;
    Ok(message.serialize().to_vec())
}

/// То же, что [`triple_ratchet_encrypt`], но с типизированным результатом.
///
/// Пока сессия pending, результат — `PreKeySignalMessage` (0x44), потом
/// обычный `SignalMessage` (0x34).
pub async fn triple_ratchet_encrypt_message<P: CryptoProvider>(
    plaintext: &[u8],
    remote_address: &ProtocolAddress,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
) -> Result<CiphertextMessage> {
    use tracing::{trace, warn};

    let mut record = session_store
        .load_session(remote_address)
        .await?
        .ok_or_else(|| RatchetError::InvalidSessionState(format!("no session for {}", remote_address)))?;

    let state = record
        .session_state_mut()
        .ok_or_else(|| RatchetError::InvalidSessionState(format!("no current session for {}", remote_address)))?;

    if !state.has_usable_sender_chain(now_millis()) {
        warn!(target: "crypto::ratchet", address = %remote_address, "No usable sender chain");
        return Err(RatchetError::InvalidSessionState(format!(
            "no usable sender chain for {}",
            remote_address
        )));
    }

    let chain_key = state.sender_chain_key()?;
    let sender_ratchet_key = state.sender_ratchet_key()?;
    let message_keys = derive_message_keys::<P>(state, &sender_ratchet_key, &chain_key)?;

    let local_identity_key = *state.local_identity_key();
    let remote_identity_key = *state.remote_identity_key();

    let ciphertext = P::aead_encrypt(message_keys.cipher_key(), message_keys.iv(), plaintext, None)?;
    let signal_message = SignalMessage::new::<P>(
        SIGNAL_MESSAGE_VERSION,
        message_keys.mac_key(),
        sender_ratchet_key,
        chain_key.index(),
        state.previous_counter(),
        ciphertext,
        &local_identity_key,
        &remote_identity_key,
    )?;

    let message = match (state.pending_pre_key(), state.pending_kyber_pre_key()) {
        (Some(pending), Some(pending_kyber)) => {
            CiphertextMessage::PreKeySignalMessage(PreKeySignalMessage::new(
                state.local_registration_id(),
                pending.pre_key_id,
                pending.signed_pre_key_id,
                pending_kyber.kyber_pre_key_id,
                pending_kyber.ciphertext.clone(),
                pending.base_key,
                local_identity_key,
                signal_message,
            ))
        }
        (Some(_), None) => {
            return Err(RatchetError::InvalidSessionState(
                "pending pre-key without kyber pre-key".into(),
            ))
        }
        (None, _) => CiphertextMessage::SignalMessage(signal_message),
    };

    state.set_sender_chain_key(chain_key.next_chain_key::<P>()?)?;

    trace!(
        target: "crypto::ratchet",
        address = %remote_address,
        counter = chain_key.index(),
        message_type = ?message.message_type(),
        "Message encrypted"
    );

    if !identity_store
        .is_trusted_identity(remote_address, &remote_identity_key, Direction::Sending)
        .await?
    {
        warn!(target: "crypto::ratchet", address = %remote_address, "Untrusted identity on send");
        return Err(RatchetError::UntrustedIdentity(remote_address.to_string()));
    }
    identity_store
        .save_identity(remote_address, &remote_identity_key)
        .await?;
    session_store.store_session(remote_address, &record).await?;

    Ok(message)
}

/// Зашифровать, при необходимости сначала установив сессию по `bundle`
pub async fn triple_ratchet_encrypt_or_establish<P: CryptoProvider, R: RngCore + CryptoRng>(
    plaintext: &[u8],
    bundle: &PreKeyBundle,
    remote_address: &ProtocolAddress,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
    rng: &mut R,
) -> Result<CiphertextMessage> {
    use tracing::debug;

    let usable = session_store
        .load_session(remote_address)
        .await?
        .map(|record| record.has_usable_sender_chain(now_millis()))
        .unwrap_or(false);

    if !usable {
        debug!(target: "crypto::session", address = %remote_address, "Establishing session before send");
        process_prekey_bundle::<P, _>(remote_address, session_store, identity_store, bundle, rng).await?;
    }

    triple_ratchet_encrypt_message::<P>(plaintext, remote_address, session_store, identity_store).await
}

// ============================================================================
// Decrypt
// ============================================================================

/// Расшифровать сериализованное сообщение: тип выбирается по version byte
#[allow(clippy::too_many_arguments)]
pub async fn triple_ratchet_decrypt<P: CryptoProvider, R: RngCore + CryptoRng>(
    ciphertext: &[u8],
    remote_address: &ProtocolAddress,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
    pre_key_store: &mut dyn PreKeyStore,
    signed_pre_key_store: &dyn SignedPreKeyStore,
    kyber_pre_key_store: &mut dyn KyberPreKeyStore,
    rng: &mut R,
) -> Result<Vec<u8>> {
    match CiphertextMessage::deserialize(ciphertext)? {
        CiphertextMessage::SignalMessage(message) => {
            triple_ratchet_decrypt_signal::<P, _>(
                &message,
                remote_address,
                session_store,
                identity_store,
                rng,
            )
            .await
        }
        CiphertextMessage::PreKeySignalMessage(message) => {
            triple_ratchet_decrypt_prekey::<P, _>(
                &message,
                remote_address,
                session_store,
                identity_store,
                pre_key_store,
                signed_pre_key_store,
                kyber_pre_key_store,
                rng,
            )
            .await
        }
    }
}

pub async fn triple_ratchet_decrypt_signal<P: CryptoProvider, R: RngCore + CryptoRng>(
    message: &SignalMessage,
    remote_address: &ProtocolAddress,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let mut record = session_store
        .load_session(remote_address)
        .await?
        .ok_or_else(|| RatchetError::InvalidSessionState(format!("no session for {}", remote_address)))?;

    let plaintext = decrypt_message_with_record::<P, _>(&mut record, message, remote_address, rng)?;

    check_and_save_identity(&record, remote_address, identity_store).await?;
    session_store.store_session(remote_address, &record).await?;

    Ok(plaintext)
}

/// Первое сообщение новой сессии: PQXDH на стороне Bob + decrypt.
///
/// Всё или ничего: сначала проверка identity, затем удаление Kyber и one-time
/// pre-keys, затем сохранение. Ошибка на любом шаге возвращает удалённые
/// ключи в store; если ключ уже удалён (параллельный handshake), ничего не сохраняется.
#[allow(clippy::too_many_arguments)]
pub async fn triple_ratchet_decrypt_prekey<P: CryptoProvider, R: RngCore + CryptoRng>(
    message: &PreKeySignalMessage,
    remote_address: &ProtocolAddress,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
    pre_key_store: &mut dyn PreKeyStore,
    signed_pre_key_store: &dyn SignedPreKeyStore,
    kyber_pre_key_store: &mut dyn KyberPreKeyStore,
    rng: &mut R,
) -> Result<Vec<u8>> {
    use tracing::warn;

    let mut record = session_store
        .load_session(remote_address)
        .await?
        .unwrap_or_else(SessionRecord::new_fresh);

    let pre_keys_used = process_prekey::<P>(
        message,
        remote_address,
        &mut record,
        &*identity_store,
        &*pre_key_store,
        signed_pre_key_store,
        &*kyber_pre_key_store,
    )
    .await?;

    let plaintext =
        decrypt_message_with_record::<P, _>(&mut record, message.message(), remote_address, rng)?;

    let remote_identity_key = check_identity(&record, remote_address, &*identity_store).await?;

    let consumed = match pre_keys_used {
        Some(used) => Some(
            consume_pre_keys(used, remote_address, pre_key_store, kyber_pre_key_store).await?,
        ),
        None => None,
    };

    let persisted = async {
        identity_store
            .save_identity(remote_address, &remote_identity_key)
            .await?;
        session_store.store_session(remote_address, &record).await
    }
    .await;

    if let Err(err) = persisted {
        if let Some(consumed) = consumed {
            warn!(
                target: "crypto::session",
                address = %remote_address,
                error = %err,
                "Session not stored, restoring pre-keys"
            );
            consumed.restore(pre_key_store, kyber_pre_key_store).await?;
        }
        return Err(err);
    }

    Ok(plaintext)
}

/// Удалённые из store одноразовые ключи; нужны для отката
struct ConsumedPreKeys {
    pre_key: Option<(u32, PreKeyRecord)>,
    kyber_pre_key: (u32, KyberPreKeyRecord),
}

impl ConsumedPreKeys {
    async fn restore(
        self,
        pre_key_store: &mut dyn PreKeyStore,
        kyber_pre_key_store: &mut dyn KyberPreKeyStore,
    ) -> Result<()> {
        let (kyber_pre_key_id, kyber_record) = &self.kyber_pre_key;
        kyber_pre_key_store
            .save_kyber_pre_key(*kyber_pre_key_id, kyber_record)
            .await?;
        if let Some((pre_key_id, pre_key_record)) = &self.pre_key {
            pre_key_store.save_pre_key(*pre_key_id, pre_key_record).await?;
        }
        Ok(())
    }
}

/// Kyber pre-key удаляется первым; если затем не удалось удалить one-time
/// pre-key, Kyber pre-key возвращается в store.
async fn consume_pre_keys(
    used: PreKeysUsed,
    remote_address: &ProtocolAddress,
    pre_key_store: &mut dyn PreKeyStore,
    kyber_pre_key_store: &mut dyn KyberPreKeyStore,
) -> Result<ConsumedPreKeys> {
    use tracing::{debug, warn};

    let kyber_record = kyber_pre_key_store
        .get_kyber_pre_key(used.kyber_pre_key_id)
        .await?;
    let pre_key_record = match used.pre_key_id {
        Some(pre_key_id) => Some((pre_key_id, pre_key_store.get_pre_key(pre_key_id).await?)),
        None => None,
    };

    kyber_pre_key_store
        .remove_kyber_pre_key(used.kyber_pre_key_id)
        .await?;

    let consumed = ConsumedPreKeys {
        pre_key: pre_key_record,
        kyber_pre_key: (used.kyber_pre_key_id, kyber_record),
    };

    if let Some((pre_key_id, _)) = &consumed.pre_key {
        if let Err(err) = pre_key_store.remove_pre_key(*pre_key_id).await {
            warn!(
                target: "crypto::session",
                address = %remote_address,
                pre_key_id = *pre_key_id,
                error = %err,
                "One-time pre-key removal failed, restoring kyber pre-key"
            );
            let (kyber_pre_key_id, kyber_record) = &consumed.kyber_pre_key;
            kyber_pre_key_store
                .save_kyber_pre_key(*kyber_pre_key_id, kyber_record)
                .await?;
            return Err(err);
        }
    }

    debug!(
        target: "crypto::session",
        address = %remote_address,
        pre_key_id = ?used.pre_key_id,
        kyber_pre_key_id = used.kyber_pre_key_id,
        "Consumed pre-keys"
    );
    Ok(consumed)
}

/// Проверить доверие к identity собеседника текущей сессии (ничего не сохраняет)
async fn check_identity(
    record: &SessionRecord,
    remote_address: &ProtocolAddress,
    identity_store: &dyn IdentityKeyStore,
) -> Result<IdentityKey> {
    use tracing::warn;

    let remote_identity_key = *record
        .session_state()
        .ok_or_else(|| RatchetError::InvalidSessionState("no current session after decrypt".into()))?
        .remote_identity_key();

    if !identity_store
        .is_trusted_identity(remote_address, &remote_identity_key, Direction::Receiving)
        .await?
    {
        warn!(target: "crypto::ratchet", address = %remote_address, "Untrusted identity on receive");
        return Err(RatchetError::UntrustedIdentity(remote_address.to_string()));
    }
    Ok(remote_identity_key)
}

async fn check_and_save_identity(
    record: &SessionRecord,
    remote_address: &ProtocolAddress,
    identity_store: &mut dyn IdentityKeyStore,
) -> Result<()> {
    let remote_identity_key = check_identity(record, remote_address, &*identity_store).await?;
    identity_store
        .save_identity(remote_address, &remote_identity_key)
        .await?;
    Ok(())
}

// ============================================================================
// Trial decryption
// ============================================================================

/// Текущая сессия, затем архивные (новые первыми). Каждая попытка идёт на
/// копии состояния; в record попадает только выигравшая копия.
fn decrypt_message_with_record<P: CryptoProvider, R: RngCore + CryptoRng>(
    record: &mut SessionRecord,
    message: &SignalMessage,
    remote_address: &ProtocolAddress,
    rng: &mut R,
) -> Result<Vec<u8>> {
    use tracing::{debug, warn};

    let mut first_error = None;

    if let Some(current) = record.session_state() {
        let mut candidate = current.clone();
        match decrypt_message_with_state::<P, _>(&mut candidate, message, rng) {
            Ok(plaintext) => {
                record.set_session_state(candidate);
                return Ok(plaintext);
            }
            Err(err @ RatchetError::DuplicateMessage { .. }) => return Err(err),
            Err(err) => {
                debug!(target: "crypto::ratchet", error = %err, "Current session failed to decrypt");
                first_error = Some(err);
            }
        }
    }

    let mut winner = None;
    for (index, previous) in record.previous_session_states().enumerate() {
        let mut candidate = previous.clone();
        match decrypt_message_with_state::<P, _>(&mut candidate, message, rng) {
            Ok(plaintext) => {
                winner = Some((index, candidate, plaintext));
                break;
            }
            Err(err @ RatchetError::DuplicateMessage { .. }) => return Err(err),
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
    }

    if let Some((index, candidate, plaintext)) = winner {
        warn!(
            target: "crypto::ratchet",
            address = %remote_address,
            index = index,
            "Decrypted with archived session, promoting it"
        );
        record.promote_old_session(index, candidate)?;
        return Ok(plaintext);
    }

    let err = first_error
        .unwrap_or_else(|| RatchetError::InvalidSessionState(format!("no session for {}", remote_address)));
    warn!(
        target: "crypto::ratchet",
        address = %remote_address,
        ratchet_key = %message.sender_ratchet_key().fingerprint(),
        counter = message.counter(),
        archived = record.previous_session_states().len(),
        error = %err,
        "Message decryption failed"
    );
    Err(err)
}

fn decrypt_message_with_state<P: CryptoProvider, R: RngCore + CryptoRng>(
    state: &mut SessionState,
    message: &SignalMessage,
    rng: &mut R,
) -> Result<Vec<u8>> {
    if !state.has_sender_chain() {
        return Err(RatchetError::InvalidSessionState("uninitialized session".into()));
    }

    let their_ephemeral = message.sender_ratchet_key();
    let counter = message.counter();

    let chain_key = get_or_create_chain_key::<P, _>(state, their_ephemeral, rng)?;
    let message_keys = get_or_create_message_key::<P>(state, their_ephemeral, &chain_key, counter)?;

    if !message.verify_mac::<P>(
        state.remote_identity_key(),
        state.local_identity_key(),
        message_keys.mac_key(),
    )? {
        return Err(RatchetError::InvalidMac);
    }

    let plaintext = P::aead_decrypt(message_keys.cipher_key(), message_keys.iv(), message.body(), None)?;

    state.clear_unacknowledged_pre_key_message();

    Ok(plaintext)
}

/// Receiver chain для ratchet key собеседника; новый ключ = DH ratchet шаг.
///
/// Sender chain обновляется сразу вместе с receiver chain.
fn get_or_create_chain_key<P: CryptoProvider, R: RngCore + CryptoRng>(
    state: &mut SessionState,
    their_ephemeral: &PublicKey,
    rng: &mut R,
) -> Result<ChainKey> {
    use tracing::debug;

    if let Some(chain_key) = state.receiver_chain_key(their_ephemeral) {
        return Ok(chain_key);
    }

    let root_key = state.root_key().clone();
    let our_ephemeral = state.sender_ratchet_private_key()?;
    let (receiver_root_key, receiver_chain_key) =
        root_key.create_chain::<P>(their_ephemeral, &our_ephemeral)?;

    let our_new_ephemeral = KeyPair::generate::<P, _>(rng);
    let (sender_root_key, sender_chain_key) =
        receiver_root_key.create_chain::<P>(their_ephemeral, &our_new_ephemeral.private_key)?;

    let current_index = state.sender_chain_key()?.index();

    debug!(
        target: "crypto::ratchet",
        their_ratchet_key = %their_ephemeral.fingerprint(),
        our_ratchet_key = %our_new_ephemeral.public_key.fingerprint(),
        previous_counter = current_index.saturating_sub(1),
        "DH ratchet step"
    );

    state.set_root_key(sender_root_key);
    state.add_receiver_chain(*their_ephemeral, receiver_chain_key.clone());
    state.set_previous_counter(current_index.saturating_sub(1));
    state.set_sender_chain(our_new_ephemeral, sender_chain_key);

    Ok(receiver_chain_key)
}

fn get_or_create_message_key<P: CryptoProvider>(
    state: &mut SessionState,
    their_ephemeral: &PublicKey,
    chain_key: &ChainKey,
    counter: u32,
) -> Result<MessageKeys> {
    let chain_index = chain_key.index();

    if chain_index > counter {
        return match state.take_message_keys(their_ephemeral, counter) {
            Some(generator) => {
                let pq_salt = state.pq_salt::<P>(their_ephemeral, counter)?;
                Ok(generator.generate_keys::<P>(pq_salt.as_ref().map(|salt| &salt[..]))?)
            }
            None => Err(RatchetError::DuplicateMessage {
                chain_index,
                counter,
            }),
        };
    }

    let jump = u64::from(counter - chain_index);
    let max_forward_jumps = u64::from(Config::global().max_forward_jumps);
    let cached = state.skipped_message_keys_len(their_ephemeral) as u64;
    if jump > max_forward_jumps || cached + jump > max_forward_jumps {
        return Err(RatchetError::TooFarInFuture {
            expected: chain_index,
            counter,
        });
    }

    let mut chain_key = chain_key.clone();
    while chain_key.index() < counter {
        state.set_message_keys(their_ephemeral, chain_key.message_key_generator::<P>()?)?;
        chain_key = chain_key.next_chain_key::<P>()?;
    }

    state.set_receiver_chain_key(their_ephemeral, chain_key.next_chain_key::<P>()?)?;
    derive_message_keys::<P>(state, their_ephemeral, &chain_key)
}

/// MessageKeys для текущего индекса цепочки с PQ солью сессии
fn derive_message_keys<P: CryptoProvider>(
    state: &SessionState,
    ratchet_key: &PublicKey,
    chain_key: &ChainKey,
) -> Result<MessageKeys> {
    let pq_salt = state.pq_salt::<P>(ratchet_key, chain_key.index())?;
    Ok(chain_key.message_keys::<P>(pq_salt.as_ref().map(|salt| &salt[..]))?)
}
