//! End-to-end tests for sessions
//!
//! This test suite covers:
//! - PQXDH establishment from a PreKeyBundle
//! - Alternating and out-of-order delivery
//! - Skipped-key bounds and duplicate detection
//! - One-time / Kyber pre-key consumption (all-or-nothing)
//! - Legacy skipped keys loaded from a stored record
//! - Session archival and simultaneous initiate

use async_trait::async_trait;
use construct_ratchet::config::Config;
use construct_ratchet::crypto::ratchet::{pq_message_salt, MessageKeyGenerator};
use construct_ratchet::crypto::PQXDH_SESSION_VERSION;
use construct_ratchet::protocol::messages::{CiphertextMessage, PreKeySignalMessage, SignalMessage};
use construct_ratchet::protocol::structure::RecordStructure;
use construct_ratchet::state::SessionLifecycle;
use construct_ratchet::storage::{InMemKyberPreKeyStore, InMemPreKeyStore};
use construct_ratchet::{
    process_prekey_bundle, triple_ratchet_decrypt, triple_ratchet_encrypt,
    triple_ratchet_encrypt_message, triple_ratchet_encrypt_or_establish, CiphertextMessageType, IdentityKeyPair, IdentityKeyStore,
    InMemProtocolStore, KyberPreKeyRecord, KyberPreKeyStore, PqxdhSuiteProvider, PreKeyBundle,
    PreKeyRecord, PreKeyStore, ProtocolAddress, PublicKey, RatchetError, Result, SessionRecord,
    SessionStore, SignedPreKeyRecord, SignedPreKeyStore,
};
use rand::rngs::OsRng;

type P = PqxdhSuiteProvider;

const PRE_KEY_ID: u32 = 100;
const SIGNED_PRE_KEY_ID: u32 = 1;
const KYBER_PRE_KEY_ID: u32 = 200;

fn alice_address() -> ProtocolAddress {
    ProtocolAddress::new("alice", 1)
}

fn bob_address() -> ProtocolAddress {
    ProtocolAddress::new("bob", 1)
}

fn new_store(registration_id: u32) -> InMemProtocolStore {
    InMemProtocolStore::new(IdentityKeyPair::generate::<P, _>(&mut OsRng), registration_id)
}

/// Generate and store pre-keys, return the bundle for the key server
async fn publish_bundle(store: &mut InMemProtocolStore) -> PreKeyBundle {
    let identity = store.identity_store.get_identity_key_pair().await.unwrap();
    let registration_id = store.identity_store.get_local_registration_id().await.unwrap();

    let pre_key = PreKeyRecord::generate::<P, _>(PRE_KEY_ID, &mut OsRng);
    let signed = SignedPreKeyRecord::generate::<P, _>(SIGNED_PRE_KEY_ID, &identity, &mut OsRng).unwrap();
    let kyber = KyberPreKeyRecord::generate::<P, _>(KYBER_PRE_KEY_ID, &identity, &mut OsRng).unwrap();

    store.pre_key_store.save_pre_key(PRE_KEY_ID, &pre_key).await.unwrap();
    store
        .signed_pre_key_store
        .save_signed_pre_key(SIGNED_PRE_KEY_ID, &signed)
        .await
        .unwrap();
    store
        .kyber_pre_key_store
        .save_kyber_pre_key(KYBER_PRE_KEY_ID, &kyber)
        .await
        .unwrap();

    PreKeyBundle::new(registration_id, 1, Some(&pre_key), &signed, &kyber, identity.identity_key())
}

async fn establish(store: &mut InMemProtocolStore, remote: &ProtocolAddress, bundle: &PreKeyBundle) -> Result<()> {
    process_prekey_bundle::<P, _>(
        remote,
        &mut store.session_store,
        &mut store.identity_store,
        bundle,
        &mut OsRng,
    )
    .await
}

async fn encrypt(store: &mut InMemProtocolStore, remote: &ProtocolAddress, plaintext: &str) -> CiphertextMessage {
    triple_ratchet_encrypt_message::<P>(
        plaintext.as_bytes(),
        remote,
        &mut store.session_store,
        &mut store.identity_store,
    )
    .await
    .unwrap()
}

async fn decrypt(store: &mut InMemProtocolStore, remote: &ProtocolAddress, bytes: &[u8]) -> Result<Vec<u8>> {
    triple_ratchet_decrypt::<P, _>(
        bytes,
        remote,
        &mut store.session_store,
        &mut store.identity_store,
        &mut store.pre_key_store,
        &store.signed_pre_key_store,
        &mut store.kyber_pre_key_store,
        &mut OsRng,
    )
    .await
}

async fn load_record(store: &InMemProtocolStore, remote: &ProtocolAddress) -> SessionRecord {
    store.session_store.load_session(remote).await.unwrap().unwrap()
}

fn raw_record(store: &InMemProtocolStore, remote: &ProtocolAddress) -> Option<Vec<u8>> {
    store.session_store.raw_session(remote).map(<[u8]>::to_vec)
}

/// Advance the sender chain as if `count` messages were sent and lost
async fn skip_sent_messages(store: &mut InMemProtocolStore, remote: &ProtocolAddress, count: u32) {
    let mut record = load_record(store, remote).await;
    let state = record.session_state_mut().unwrap();
    let mut chain_key = state.sender_chain_key().unwrap();
    for _ in 0..count {
        chain_key = chain_key.next_chain_key::<P>().unwrap();
    }
    state.set_sender_chain_key(chain_key).unwrap();
    store.session_store.store_session(remote, &record).await.unwrap();
}

/// Store wrapper whose remove always fails, as after a concurrent consumption
struct RemoveFails<'a, S>(&'a mut S);

#[async_trait(?Send)]
impl<'a> KyberPreKeyStore for RemoveFails<'a, InMemKyberPreKeyStore> {
    async fn get_kyber_pre_key(&self, kyber_pre_key_id: u32) -> Result<KyberPreKeyRecord> {
        self.0.get_kyber_pre_key(kyber_pre_key_id).await
    }

    async fn save_kyber_pre_key(&mut self, kyber_pre_key_id: u32, record: &KyberPreKeyRecord) -> Result<()> {
        self.0.save_kyber_pre_key(kyber_pre_key_id, record).await
    }

    async fn remove_kyber_pre_key(&mut self, kyber_pre_key_id: u32) -> Result<()> {
        Err(RatchetError::KyberPreKeyNotFound(kyber_pre_key_id))
    }
}

#[async_trait(?Send)]
impl<'a> PreKeyStore for RemoveFails<'a, InMemPreKeyStore> {
    async fn get_pre_key(&self, pre_key_id: u32) -> Result<PreKeyRecord> {
        self.0.get_pre_key(pre_key_id).await
    }

    async fn save_pre_key(&mut self, pre_key_id: u32, record: &PreKeyRecord) -> Result<()> {
        self.0.save_pre_key(pre_key_id, record).await
    }

    async fn remove_pre_key(&mut self, pre_key_id: u32) -> Result<()> {
        Err(RatchetError::PreKeyNotFound(pre_key_id))
    }
}

/// Alice establishes, sends one message, Bob replies and Alice reads the reply
async fn established_pair() -> (InMemProtocolStore, InMemProtocolStore) {
    let mut alice = new_store(2);
    let mut bob = new_store(1);
    let bundle = publish_bundle(&mut bob).await;

    establish(&mut alice, &bob_address(), &bundle).await.unwrap();
    let first = encrypt(&mut alice, &bob_address(), "ping").await;
    decrypt(&mut bob, &alice_address(), first.serialize()).await.unwrap();
    let reply = encrypt(&mut bob, &alice_address(), "pong").await;
    decrypt(&mut alice, &bob_address(), reply.serialize()).await.unwrap();

    (alice, bob)
}

/// The documented scenario: bundle {1, 100, 1, 200}, "Hello Bob!" / "Hello Alice!"
#[tokio::test]
async fn test_end_to_end_scenario() {
    let mut alice = new_store(2);
    let mut bob = new_store(1);
    let bundle = publish_bundle(&mut bob).await;
    assert_eq!(bundle.registration_id, 1);

    establish(&mut alice, &bob_address(), &bundle).await.unwrap();
    assert_eq!(
        load_record(&alice, &bob_address()).await.lifecycle(),
        SessionLifecycle::Pending
    );

    let to_bob = encrypt(&mut alice, &bob_address(), "Hello Bob!").await;
    assert_eq!(to_bob.message_type(), CiphertextMessageType::PreKey);
    assert_eq!(to_bob.serialize()[0], 0x44);

    let plaintext = decrypt(&mut bob, &alice_address(), to_bob.serialize()).await.unwrap();
    assert_eq!(plaintext, b"Hello Bob!");

    let bob_record = load_record(&bob, &alice_address()).await;
    assert_eq!(bob_record.session_version().unwrap(), PQXDH_SESSION_VERSION);
    assert_eq!(bob_record.remote_registration_id().unwrap(), 2);
    assert_eq!(bob_record.local_registration_id().unwrap(), 1);

    let to_alice = encrypt(&mut bob, &alice_address(), "Hello Alice!").await;
    assert_ne!(to_alice.serialize()[0], 0x44);
    assert_eq!(to_alice.message_type(), CiphertextMessageType::Whisper);

    let plaintext = decrypt(&mut alice, &bob_address(), to_alice.serialize()).await.unwrap();
    assert_eq!(plaintext, b"Hello Alice!");

    // ответ Bob подтвердил сессию: дальше обычные SignalMessage
    let alice_record = load_record(&alice, &bob_address()).await;
    assert_eq!(alice_record.lifecycle(), SessionLifecycle::Established);
    assert_eq!(alice_record.remote_registration_id().unwrap(), 1);
    let next = encrypt(&mut alice, &bob_address(), "How are you?").await;
    assert_eq!(next.serialize()[0], 0x34);
    assert_eq!(
        decrypt(&mut bob, &alice_address(), next.serialize()).await.unwrap(),
        b"How are you?"
    );
}

#[tokio::test]
async fn test_alternating_round_trip() {
    let (mut alice, mut bob) = established_pair().await;

    for i in 0..120 {
        let text = format!("message {}", i);
        if i % 2 == 0 {
            let message = encrypt(&mut alice, &bob_address(), &text).await;
            let plaintext = decrypt(&mut bob, &alice_address(), message.serialize()).await.unwrap();
            assert_eq!(plaintext, text.as_bytes());
        } else {
            let message = encrypt(&mut bob, &alice_address(), &text).await;
            let plaintext = decrypt(&mut alice, &bob_address(), message.serialize()).await.unwrap();
            assert_eq!(plaintext, text.as_bytes());
        }
    }

    // серии в одну сторону между сменами направления
    for round in 0..5 {
        for i in 0..(round + 1) {
            let text = format!("burst {} / {}", round, i);
            let message = encrypt(&mut bob, &alice_address(), &text).await;
            assert_eq!(
                decrypt(&mut alice, &bob_address(), message.serialize()).await.unwrap(),
                text.as_bytes()
            );
        }
        let message = encrypt(&mut alice, &bob_address(), "ack").await;
        assert_eq!(decrypt(&mut bob, &alice_address(), message.serialize()).await.unwrap(), b"ack");
    }

    let record = load_record(&bob, &alice_address()).await;
    assert!(
        record.session_state().unwrap().receiver_chain_count() <= Config::global().max_receiver_chains
    );
}

#[tokio::test]
async fn test_out_of_order_then_duplicate() {
    let (mut alice, mut bob) = established_pair().await;

    let mut messages = Vec::new();
    for i in 0..4 {
        messages.push(encrypt(&mut alice, &bob_address(), &format!("m{}", i)).await);
    }

    for i in [0usize, 3, 1, 2] {
        let plaintext = decrypt(&mut bob, &alice_address(), messages[i].serialize()).await.unwrap();
        assert_eq!(plaintext, format!("m{}", i).as_bytes());
    }

    let before = raw_record(&bob, &alice_address());
    let replay = decrypt(&mut bob, &alice_address(), messages[1].serialize()).await;
    assert!(matches!(replay, Err(RatchetError::DuplicateMessage { .. })));
    assert!(replay.unwrap_err().is_decryption_failure());
    assert_eq!(raw_record(&bob, &alice_address()), before);
}

#[tokio::test]
async fn test_late_message_from_previous_chain() {
    let (mut alice, mut bob) = established_pair().await;

    let early = encrypt(&mut alice, &bob_address(), "early").await;
    let late = encrypt(&mut alice, &bob_address(), "late").await;
    decrypt(&mut bob, &alice_address(), early.serialize()).await.unwrap();

    // смена направления: у Alice новая sender chain
    let reply = encrypt(&mut bob, &alice_address(), "reply").await;
    decrypt(&mut alice, &bob_address(), reply.serialize()).await.unwrap();
    let newer = encrypt(&mut alice, &bob_address(), "newer").await;

    assert_eq!(decrypt(&mut bob, &alice_address(), newer.serialize()).await.unwrap(), b"newer");
    assert_eq!(decrypt(&mut bob, &alice_address(), late.serialize()).await.unwrap(), b"late");
}

#[tokio::test]
async fn test_too_far_in_future_leaves_state_unchanged() {
    let (mut alice, mut bob) = established_pair().await;

    // Bob должен знать текущий ratchet key Alice
    let message = encrypt(&mut alice, &bob_address(), "known chain").await;
    decrypt(&mut bob, &alice_address(), message.serialize()).await.unwrap();

    let alice_state = load_record(&alice, &bob_address()).await;
    let alice_state = alice_state.session_state().unwrap();
    let ratchet_key = alice_state.sender_ratchet_key().unwrap();

    let bob_record = load_record(&bob, &alice_address()).await;
    let expected = bob_record
        .session_state()
        .unwrap()
        .receiver_chain_key(&ratchet_key)
        .unwrap()
        .index();

    // счётчик проверяется до MAC, так что ключ MAC здесь не важен
    let counter = expected + Config::global().max_forward_jumps + 1;
    let forged = SignalMessage::new::<P>(
        3,
        &[0u8; 32],
        ratchet_key,
        counter,
        0,
        vec![0u8; 32],
        alice_state.local_identity_key(),
        alice_state.remote_identity_key(),
    )
    .unwrap();

    let before = raw_record(&bob, &alice_address());
    let result = decrypt(&mut bob, &alice_address(), forged.serialized()).await;
    assert!(
        matches!(result, Err(RatchetError::TooFarInFuture { counter: c, .. }) if c == counter),
        "got {:?}",
        result
    );
    assert_eq!(raw_record(&bob, &alice_address()), before);
}

#[tokio::test]
async fn test_pre_keys_consumed_exactly_once() {
    let mut alice = new_store(2);
    let mut bob = new_store(1);
    let bundle = publish_bundle(&mut bob).await;

    establish(&mut alice, &bob_address(), &bundle).await.unwrap();
    let first = encrypt(&mut alice, &bob_address(), "first").await;
    decrypt(&mut bob, &alice_address(), first.serialize()).await.unwrap();

    assert!(matches!(
        bob.kyber_pre_key_store.get_kyber_pre_key(KYBER_PRE_KEY_ID).await,
        Err(RatchetError::KyberPreKeyNotFound(KYBER_PRE_KEY_ID))
    ));
    assert!(matches!(
        bob.pre_key_store.get_pre_key(PRE_KEY_ID).await,
        Err(RatchetError::PreKeyNotFound(PRE_KEY_ID))
    ));
    // signed pre-key не одноразовый
    assert!(bob
        .signed_pre_key_store
        .get_signed_pre_key(SIGNED_PRE_KEY_ID)
        .await
        .is_ok());

    // повтор того же сообщения: сессия найдена по base key, ключи не нужны
    let replay = decrypt(&mut bob, &alice_address(), first.serialize()).await;
    assert!(matches!(replay, Err(RatchetError::DuplicateMessage { .. })));

    // второе устройство с тем же bundle: ключи уже израсходованы
    let mut carol = new_store(3);
    let carol_address = ProtocolAddress::new("carol", 1);
    establish(&mut carol, &bob_address(), &bundle).await.unwrap();
    let from_carol = encrypt(&mut carol, &bob_address(), "hi").await;
    let result = decrypt(&mut bob, &carol_address, from_carol.serialize()).await;
    assert!(matches!(result, Err(RatchetError::KyberPreKeyNotFound(KYBER_PRE_KEY_ID))));
    assert!(raw_record(&bob, &carol_address).is_none());
}

#[tokio::test]
async fn test_failed_first_message_keeps_pre_keys() {
    let mut alice = new_store(2);
    let mut bob = new_store(1);
    let bundle = publish_bundle(&mut bob).await;

    establish(&mut alice, &bob_address(), &bundle).await.unwrap();
    let first = encrypt(&mut alice, &bob_address(), "first").await;

    // портим MAC вложенного SignalMessage, остальные поля те же
    let CiphertextMessage::PreKeySignalMessage(original) = &first else {
        panic!("expected a pre-key message");
    };
    let mut inner = original.message().serialized().to_vec();
    let last = inner.len() - 1;
    inner[last] ^= 0x01;
    let tampered = PreKeySignalMessage::new(
        original.registration_id(),
        original.pre_key_id(),
        original.signed_pre_key_id(),
        original.kyber_pre_key_id(),
        original.kyber_ciphertext().to_vec(),
        *original.base_key(),
        *original.identity_key(),
        SignalMessage::try_from(inner.as_slice()).unwrap(),
    );

    let result = decrypt(&mut bob, &alice_address(), tampered.serialized()).await;
    assert!(matches!(result, Err(RatchetError::InvalidMac)));
    assert!(raw_record(&bob, &alice_address()).is_none());
    assert!(bob.kyber_pre_key_store.get_kyber_pre_key(KYBER_PRE_KEY_ID).await.is_ok());
    assert!(bob.pre_key_store.get_pre_key(PRE_KEY_ID).await.is_ok());

    assert_eq!(decrypt(&mut bob, &alice_address(), first.serialize()).await.unwrap(), b"first");
}

#[tokio::test]
async fn test_invalid_mac_rejected_without_state_change() {
    let (mut alice, mut bob) = established_pair().await;

    let message = encrypt(&mut alice, &bob_address(), "authentic").await;
    let before = raw_record(&bob, &alice_address());

    let mut tampered_mac = message.serialize().to_vec();
    let last = tampered_mac.len() - 1;
    tampered_mac[last] ^= 0xFF;
    let result = decrypt(&mut bob, &alice_address(), &tampered_mac).await;
    assert!(matches!(result, Err(RatchetError::InvalidMac)));

    // изменённое тело тоже ломает MAC
    let mut tampered_body = message.serialize().to_vec();
    let body_byte = tampered_body.len() - 10;
    tampered_body[body_byte] ^= 0x01;
    assert!(decrypt(&mut bob, &alice_address(), &tampered_body).await.is_err());

    assert_eq!(raw_record(&bob, &alice_address()), before);
    assert_eq!(
        decrypt(&mut bob, &alice_address(), message.serialize()).await.unwrap(),
        b"authentic"
    );
}

#[tokio::test]
async fn test_malformed_input_is_invalid_message() {
    let (_, mut bob) = established_pair().await;

    for bytes in [&[][..], &[0x54, 0x01][..], &[0x31, 0x0a, 0x00][..]] {
        let result = decrypt(&mut bob, &alice_address(), bytes).await;
        assert!(matches!(result, Err(RatchetError::InvalidMessage(_))), "{:?}", bytes);
    }
}

#[tokio::test]
async fn test_bad_bundle_signature_rejected() {
    let mut alice = new_store(2);
    let mut bob = new_store(1);
    let bundle = publish_bundle(&mut bob).await;

    let mut bad_signed = bundle.clone();
    bad_signed.signed_pre_key_signature[0] ^= 0x01;
    assert!(matches!(
        establish(&mut alice, &bob_address(), &bad_signed).await,
        Err(RatchetError::SignatureVerificationFailed(_))
    ));

    let mut bad_kyber = bundle.clone();
    bad_kyber.kyber_pre_key_signature[10] ^= 0x01;
    assert!(matches!(
        establish(&mut alice, &bob_address(), &bad_kyber).await,
        Err(RatchetError::SignatureVerificationFailed(_))
    ));

    assert!(raw_record(&alice, &bob_address()).is_none());
    assert!(alice.identity_store.get_identity(&bob_address()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_changed_identity_is_untrusted() {
    let (mut alice, _) = established_pair().await;

    let mut impostor = new_store(9);
    let impostor_bundle = publish_bundle(&mut impostor).await;

    assert!(matches!(
        establish(&mut alice, &bob_address(), &impostor_bundle).await,
        Err(RatchetError::UntrustedIdentity(_))
    ));
}

#[tokio::test]
async fn test_encrypt_without_session() {
    let mut alice = new_store(2);
    let result = triple_ratchet_encrypt::<P>(
        b"nobody home",
        &bob_address(),
        &mut alice.session_store,
        &mut alice.identity_store,
    )
    .await;
    assert!(matches!(result, Err(RatchetError::InvalidSessionState(_))));
}

#[tokio::test]
async fn test_encrypt_returns_wire_bytes() {
    let (mut alice, mut bob) = established_pair().await;

    let bytes = triple_ratchet_encrypt::<P>(
        b"as bytes",
        &bob_address(),
        &mut alice.session_store,
        &mut alice.identity_store,
    )
    .await
    .unwrap();
    assert_eq!(bytes[0], 0x34);
    assert!(matches!(
        CiphertextMessage::deserialize(&bytes),
        Ok(CiphertextMessage::SignalMessage(_))
    ));
    assert_eq!(decrypt(&mut bob, &alice_address(), &bytes).await.unwrap(), b"as bytes");
}

#[tokio::test]
async fn test_encrypt_or_establish() {
    let mut alice = new_store(2);
    let mut bob = new_store(1);
    let bundle = publish_bundle(&mut bob).await;

    let mut sent = Vec::new();
    for text in ["one", "two"] {
        let message = triple_ratchet_encrypt_or_establish::<P, _>(
            text.as_bytes(),
            &bundle,
            &bob_address(),
            &mut alice.session_store,
            &mut alice.identity_store,
            &mut OsRng,
        )
        .await
        .unwrap();
        assert_eq!(message.message_type(), CiphertextMessageType::PreKey);
        sent.push(message);
    }

    // второй вызов не делал новый handshake
    let record = load_record(&alice, &bob_address()).await;
    assert_eq!(record.previous_session_states().len(), 0);

    assert_eq!(decrypt(&mut bob, &alice_address(), sent[0].serialize()).await.unwrap(), b"one");
    assert_eq!(decrypt(&mut bob, &alice_address(), sent[1].serialize()).await.unwrap(), b"two");
}

#[tokio::test]
async fn test_archived_sessions_are_capped() {
    let mut alice = new_store(2);
    let mut bob = new_store(1);
    let bundle = publish_bundle(&mut bob).await;
    let max = Config::global().archived_states_max_length;

    let mut base_keys = Vec::new();
    for _ in 0..max + 1 {
        establish(&mut alice, &bob_address(), &bundle).await.unwrap();
        let record = load_record(&alice, &bob_address()).await;
        base_keys.push(record.session_state().unwrap().alice_base_key().to_vec());
    }

    let record = load_record(&alice, &bob_address()).await;
    assert_eq!(record.previous_session_states().len(), max);
    assert!(record.has_session_state(PQXDH_SESSION_VERSION, &base_keys[0]));

    establish(&mut alice, &bob_address(), &bundle).await.unwrap();
    let record = load_record(&alice, &bob_address()).await;
    assert_eq!(record.previous_session_states().len(), max);
    assert!(!record.has_session_state(PQXDH_SESSION_VERSION, &base_keys[0]));
    assert!(record.has_session_state(PQXDH_SESSION_VERSION, &base_keys[1]));
    // архивные сессии больше не pending
    assert!(record
        .previous_session_states()
        .all(|state| state.pending_pre_key().is_none()));
}

#[tokio::test]
async fn test_simultaneous_initiate_converges() {
    let mut alice = new_store(2);
    let mut bob = new_store(1);
    let alice_bundle = publish_bundle(&mut alice).await;
    let bob_bundle = publish_bundle(&mut bob).await;

    establish(&mut alice, &bob_address(), &bob_bundle).await.unwrap();
    establish(&mut bob, &alice_address(), &alice_bundle).await.unwrap();

    let to_bob = encrypt(&mut alice, &bob_address(), "hi bob").await;
    let to_alice = encrypt(&mut bob, &alice_address(), "hi alice").await;
    assert_eq!(to_bob.message_type(), CiphertextMessageType::PreKey);
    assert_eq!(to_alice.message_type(), CiphertextMessageType::PreKey);

    assert_eq!(decrypt(&mut alice, &bob_address(), to_alice.serialize()).await.unwrap(), b"hi alice");
    assert_eq!(decrypt(&mut bob, &alice_address(), to_bob.serialize()).await.unwrap(), b"hi bob");

    // стороны сейчас на разных сессиях; archived fallback сводит их
    let message = encrypt(&mut alice, &bob_address(), "converge").await;
    assert_eq!(message.message_type(), CiphertextMessageType::Whisper);
    assert_eq!(decrypt(&mut bob, &alice_address(), message.serialize()).await.unwrap(), b"converge");

    let reply = encrypt(&mut bob, &alice_address(), "converged").await;
    assert_eq!(reply.message_type(), CiphertextMessageType::Whisper);
    assert_eq!(decrypt(&mut alice, &bob_address(), reply.serialize()).await.unwrap(), b"converged");

    let alice_record = load_record(&alice, &bob_address()).await;
    let bob_record = load_record(&bob, &alice_address()).await;
    assert_eq!(
        alice_record.session_state().unwrap().alice_base_key(),
        bob_record.session_state().unwrap().alice_base_key()
    );

    for i in 0..10 {
        let text = format!("after {}", i);
        let message = encrypt(&mut alice, &bob_address(), &text).await;
        assert_eq!(decrypt(&mut bob, &alice_address(), message.serialize()).await.unwrap(), text.as_bytes());
        let message = encrypt(&mut bob, &alice_address(), &text).await;
        assert_eq!(decrypt(&mut alice, &bob_address(), message.serialize()).await.unwrap(), text.as_bytes());
    }
}

#[tokio::test]
async fn test_kyber_removal_failure_keeps_one_time_pre_key() {
    let mut alice = new_store(2);
    let mut bob = new_store(1);
    let bundle = publish_bundle(&mut bob).await;

    establish(&mut alice, &bob_address(), &bundle).await.unwrap();
    let first = encrypt(&mut alice, &bob_address(), "first").await;

    let result = triple_ratchet_decrypt::<P, _>(
        first.serialize(),
        &alice_address(),
        &mut bob.session_store,
        &mut bob.identity_store,
        &mut bob.pre_key_store,
        &bob.signed_pre_key_store,
        &mut RemoveFails(&mut bob.kyber_pre_key_store),
        &mut OsRng,
    )
    .await;
    assert!(matches!(result, Err(RatchetError::KyberPreKeyNotFound(KYBER_PRE_KEY_ID))));

    // ничего не израсходовано и не сохранено
    assert!(bob.pre_key_store.get_pre_key(PRE_KEY_ID).await.is_ok());
    assert!(bob.kyber_pre_key_store.get_kyber_pre_key(KYBER_PRE_KEY_ID).await.is_ok());
    assert!(raw_record(&bob, &alice_address()).is_none());
    assert!(bob.identity_store.get_identity(&alice_address()).await.unwrap().is_none());

    // с исправным store то же сообщение проходит
    assert_eq!(decrypt(&mut bob, &alice_address(), first.serialize()).await.unwrap(), b"first");
    assert!(bob.pre_key_store.get_pre_key(PRE_KEY_ID).await.is_err());
}

#[tokio::test]
async fn test_one_time_removal_failure_restores_kyber_pre_key() {
    let mut alice = new_store(2);
    let mut bob = new_store(1);
    let bundle = publish_bundle(&mut bob).await;

    establish(&mut alice, &bob_address(), &bundle).await.unwrap();
    let first = encrypt(&mut alice, &bob_address(), "first").await;

    let result = triple_ratchet_decrypt::<P, _>(
        first.serialize(),
        &alice_address(),
        &mut bob.session_store,
        &mut bob.identity_store,
        &mut RemoveFails(&mut bob.pre_key_store),
        &bob.signed_pre_key_store,
        &mut bob.kyber_pre_key_store,
        &mut OsRng,
    )
    .await;
    assert!(matches!(result, Err(RatchetError::PreKeyNotFound(PRE_KEY_ID))));

    assert!(bob.kyber_pre_key_store.get_kyber_pre_key(KYBER_PRE_KEY_ID).await.is_ok());
    assert!(bob.pre_key_store.get_pre_key(PRE_KEY_ID).await.is_ok());
    assert!(raw_record(&bob, &alice_address()).is_none());

    assert_eq!(decrypt(&mut bob, &alice_address(), first.serialize()).await.unwrap(), b"first");
}

#[tokio::test]
async fn test_cumulative_skipped_keys_too_far_in_future() {
    let (mut alice, mut bob) = established_pair().await;
    let message = encrypt(&mut alice, &bob_address(), "known chain").await;
    decrypt(&mut bob, &alice_address(), message.serialize()).await.unwrap();

    let ratchet_key = load_record(&alice, &bob_address())
        .await
        .session_state()
        .unwrap()
        .sender_ratchet_key()
        .unwrap();

    // два разрыва, каждый в пределах лимита
    let max = Config::global().max_forward_jumps;
    let gap = max / 3;
    for text in ["after gap 1", "after gap 2"] {
        skip_sent_messages(&mut alice, &bob_address(), gap).await;
        let message = encrypt(&mut alice, &bob_address(), text).await;
        assert_eq!(decrypt(&mut bob, &alice_address(), message.serialize()).await.unwrap(), text.as_bytes());
    }

    let cached = load_record(&bob, &alice_address())
        .await
        .session_state()
        .unwrap()
        .skipped_message_keys_len(&ratchet_key) as u32;
    assert_eq!(cached, 2 * gap);

    // сам прыжок меньше лимита, но кэш вместе с ним его превышает
    let jump = max - cached + 1;
    assert!(jump <= max);
    skip_sent_messages(&mut alice, &bob_address(), jump).await;
    let message = encrypt(&mut alice, &bob_address(), "over the cache bound").await;

    let before = raw_record(&bob, &alice_address());
    let result = decrypt(&mut bob, &alice_address(), message.serialize()).await;
    assert!(matches!(result, Err(RatchetError::TooFarInFuture { .. })), "got {:?}", result);
    assert_eq!(raw_record(&bob, &alice_address()), before);
}

#[tokio::test]
async fn test_legacy_skipped_key_from_stored_record() {
    let (mut alice, mut bob) = established_pair().await;

    let delayed = encrypt(&mut alice, &bob_address(), "delayed").await;
    let on_time = encrypt(&mut alice, &bob_address(), "on time").await;
    assert_eq!(decrypt(&mut bob, &alice_address(), on_time.serialize()).await.unwrap(), b"on time");

    // переписать seed skipped key в старый формат cipher/mac/iv
    let mut structure = RecordStructure::decode(&raw_record(&bob, &alice_address()).unwrap()).unwrap();
    let session = structure.current_session.as_mut().unwrap();
    let pq_root_key = session.pq_ratchet_state.clone();
    let mut rewritten = 0;
    for chain in &mut session.receiver_chains {
        let ratchet_key = PublicKey::deserialize(&chain.sender_ratchet_key).unwrap();
        for key in chain.message_keys.iter_mut().filter(|key| !key.seed.is_empty()) {
            let seed: [u8; 32] = key.seed.as_slice().try_into().unwrap();
            let salt = pq_message_salt::<P>(&pq_root_key, &ratchet_key, key.index).unwrap();
            let keys = MessageKeyGenerator::Seed { seed, counter: key.index }
                .generate_keys::<P>(salt.as_ref().map(|salt| &salt[..]))
                .unwrap();
            key.cipher_key = keys.cipher_key().to_vec();
            key.mac_key = keys.mac_key().to_vec();
            key.iv = keys.iv().to_vec();
            key.seed = Vec::new();
            rewritten += 1;
        }
    }
    assert_eq!(rewritten, 1);

    let record = SessionRecord::deserialize(&structure.encode()).unwrap();
    bob.session_store.store_session(&alice_address(), &record).await.unwrap();

    let stored = RecordStructure::decode(&raw_record(&bob, &alice_address()).unwrap()).unwrap();
    let stored_keys: Vec<_> = stored
        .current_session
        .unwrap()
        .receiver_chains
        .into_iter()
        .flat_map(|chain| chain.message_keys)
        .collect();
    assert_eq!(stored_keys.len(), 1);
    assert!(stored_keys[0].seed.is_empty());
    assert_eq!(stored_keys[0].cipher_key.len(), 32);

    assert_eq!(decrypt(&mut bob, &alice_address(), delayed.serialize()).await.unwrap(), b"delayed");
    assert!(matches!(
        decrypt(&mut bob, &alice_address(), delayed.serialize()).await,
        Err(RatchetError::DuplicateMessage { .. })
    ));
}
