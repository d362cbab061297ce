//! PQXDH (Post-Quantum Extended Diffie-Hellman)
//!
//! ## Ключи
//!
//! ### Alice (инициатор)
//! - **IK_A**: Identity Key
//! - **EK_A**: Base (ephemeral) Key, генерируется на каждую сессию
//!
//! ### Bob (получатель)
//! - **IK_B**: Identity Key
//! - **SPK_B**: Signed Pre-Key (он же первый ratchet key Bob)
//! - **OPK_B**: One-time Pre-Key (может отсутствовать)
//! - **KYBER_B**: Kyber-1024 Pre-Key
//!
//! ## Протокол
//!
//! ```text
//! secret = 0xFF * 32
//!        ‖ DH(IK_A, SPK_B)
//!        ‖ DH(EK_A, IK_B)
//!        ‖ DH(EK_A, SPK_B)
//!        ‖ DH(EK_A, OPK_B)          (если есть OPK_B)
//!        ‖ KEM_SS                    (Kyber shared secret)
//!
//! HKDF-SHA256(salt = none, ikm = secret,
//!             info = "WhisperText_X25519_SHA-256_CRYSTALS-KYBER-1024", L = 96)
//!   → rootKey(32) ‖ chainKey(32) ‖ pqRootKey(32)
//! ```
//!
//! Bob считает те же DH в обратном порядке ролей: `DH(a, B) = DH(b, A)`.

use crate::crypto::keys::{IdentityKey, IdentityKeyPair, KemKeyPair, KemPublicKey, KeyPair, PublicKey};
use crate::crypto::ratchet::{ChainKey, RootKey};
use crate::crypto::{CryptoProvider, PQXDH_INFO, PQXDH_SESSION_VERSION};
use crate::error::Result;
use crate::state::session::SessionState;
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroizing;

/// Discontinuity bytes перед DH результатами
const DISCONTINUITY: [u8; 32] = [0xFF; 32];

/// Что Alice знает о Bob в момент handshake
pub struct AliceParameters<'a> {
    pub our_identity_key_pair: &'a IdentityKeyPair,
    pub our_base_key_pair: &'a KeyPair,
    pub their_identity_key: &'a IdentityKey,
    pub their_signed_pre_key: &'a PublicKey,
    pub their_one_time_pre_key: Option<&'a PublicKey>,
    pub their_ratchet_key: &'a PublicKey,
    pub their_kyber_pre_key: &'a KemPublicKey,
}

/// Что Bob восстановил из PreKeySignalMessage и своих stores
pub struct BobParameters<'a> {
    pub our_identity_key_pair: &'a IdentityKeyPair,
    pub our_signed_pre_key_pair: &'a KeyPair,
    pub our_one_time_pre_key_pair: Option<&'a KeyPair>,
    pub our_ratchet_key_pair: &'a KeyPair,
    pub our_kyber_pre_key_pair: &'a KemKeyPair,
    pub their_identity_key: &'a IdentityKey,
    pub their_base_key: &'a PublicKey,
    pub their_kyber_ciphertext: &'a [u8],
}

/// Сессия Alice и Kyber ciphertext, который уходит Bob в PreKeySignalMessage
#[derive(Debug)]
pub struct AliceSession {
    pub state: SessionState,
    pub kyber_ciphertext: Vec<u8>,
}

fn derive_keys<P: CryptoProvider>(secret_input: &[u8]) -> Result<(RootKey, ChainKey, Vec<u8>)> {
    let okm = Zeroizing::new(P::hkdf_derive_key(None, secret_input, PQXDH_INFO, 96)?);

    let mut root_key = [0u8; 32];
    let mut chain_key = [0u8; 32];
    root_key.copy_from_slice(&okm[..32]);
    chain_key.copy_from_slice(&okm[32..64]);

    Ok((
        RootKey::new(root_key),
        ChainKey::new(chain_key, 0),
        okm[64..].to_vec(),
    ))
}

/// Сессия инициатора.
///
/// Receiver chain для SPK_B сразу получает `chainKey`; sender chain
/// создаётся одним DH ratchet шагом со свежим ключом, так что Alice может
/// писать до ответа Bob.
pub fn initialize_alice_session<P: CryptoProvider, R: RngCore + CryptoRng>(
    parameters: &AliceParameters<'_>,
    rng: &mut R,
) -> Result<AliceSession> {
    use tracing::debug;

    debug!(
        target: "crypto::pqxdh",
        their_signed_pre_key = %parameters.their_signed_pre_key.fingerprint(),
        one_time_pre_key = parameters.their_one_time_pre_key.is_some(),
        "Initializing session as initiator"
    );

    let our_base_private = &parameters.our_base_key_pair.private_key;

    let mut secrets = Zeroizing::new(Vec::with_capacity(32 * 6));
    secrets.extend_from_slice(&DISCONTINUITY);
    secrets.extend_from_slice(
        &parameters
            .our_identity_key_pair
            .private_key()
            .calculate_agreement::<P>(parameters.their_signed_pre_key)?,
    );
    secrets.extend_from_slice(
        &our_base_private.calculate_agreement::<P>(parameters.their_identity_key.public_key())?,
    );
    secrets.extend_from_slice(&our_base_private.calculate_agreement::<P>(parameters.their_signed_pre_key)?);
    if let Some(one_time_pre_key) = parameters.their_one_time_pre_key {
        secrets.extend_from_slice(&our_base_private.calculate_agreement::<P>(one_time_pre_key)?);
    }

    let (kyber_ciphertext, kyber_secret) = parameters.their_kyber_pre_key.encapsulate::<P>()?;
    let kyber_secret = Zeroizing::new(kyber_secret);
    secrets.extend_from_slice(&kyber_secret);

    let (root_key, chain_key, pq_root_key) = derive_keys::<P>(&secrets)?;

    let sending_ratchet_key = KeyPair::generate::<P, _>(rng);
    let (sending_root_key, sending_chain_key) =
        root_key.create_chain::<P>(parameters.their_ratchet_key, &sending_ratchet_key.private_key)?;

    let mut state = SessionState::new(
        PQXDH_SESSION_VERSION,
        *parameters.our_identity_key_pair.identity_key(),
        *parameters.their_identity_key,
        sending_root_key,
        &parameters.our_base_key_pair.public_key,
    );
    state.add_receiver_chain(*parameters.their_ratchet_key, chain_key);
    state.set_sender_chain(sending_ratchet_key, sending_chain_key);
    state.set_pq_ratchet_state(pq_root_key);

    debug!(target: "crypto::pqxdh", "Initiator session ready");

    Ok(AliceSession {
        state,
        kyber_ciphertext,
    })
}

/// Сессия получателя: SPK_B становится первой sender chain Bob
pub fn initialize_bob_session<P: CryptoProvider>(parameters: &BobParameters<'_>) -> Result<SessionState> {
    use tracing::debug;

    debug!(
        target: "crypto::pqxdh",
        their_base_key = %parameters.their_base_key.fingerprint(),
        one_time_pre_key = parameters.our_one_time_pre_key_pair.is_some(),
        "Initializing session as responder"
    );

    let mut secrets = Zeroizing::new(Vec::with_capacity(32 * 6));
    secrets.extend_from_slice(&DISCONTINUITY);
    secrets.extend_from_slice(
        &parameters
            .our_signed_pre_key_pair
            .calculate_agreement::<P>(parameters.their_identity_key.public_key())?,
    );
    secrets.extend_from_slice(
        &parameters
            .our_identity_key_pair
            .private_key()
            .calculate_agreement::<P>(parameters.their_base_key)?,
    );
    secrets.extend_from_slice(
        &parameters
            .our_signed_pre_key_pair
            .calculate_agreement::<P>(parameters.their_base_key)?,
    );
    if let Some(one_time_pre_key) = parameters.our_one_time_pre_key_pair {
        secrets.extend_from_slice(&one_time_pre_key.calculate_agreement::<P>(parameters.their_base_key)?);
    }

    let kyber_secret = Zeroizing::new(
        parameters
            .our_kyber_pre_key_pair
            .secret_key
            .decapsulate::<P>(parameters.their_kyber_ciphertext)?,
    );
    secrets.extend_from_slice(&kyber_secret);

    let (root_key, chain_key, pq_root_key) = derive_keys::<P>(&secrets)?;

    let mut state = SessionState::new(
        PQXDH_SESSION_VERSION,
        *parameters.our_identity_key_pair.identity_key(),
        *parameters.their_identity_key,
        root_key,
        parameters.their_base_key,
    );
    state.set_sender_chain(parameters.our_ratchet_key_pair.clone(), chain_key);
    state.set_pq_ratchet_state(pq_root_key);

    debug!(target: "crypto::pqxdh", "Responder session ready");

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::suites::pqxdh::PqxdhSuiteProvider;
    use rand::rngs::OsRng;

    type P = PqxdhSuiteProvider;

    struct Bob {
        identity: IdentityKeyPair,
        signed_pre_key: KeyPair,
        one_time_pre_key: KeyPair,
        kyber_pre_key: KemKeyPair,
    }

    fn bob() -> Bob {
        Bob {
            identity: IdentityKeyPair::generate::<P, _>(&mut OsRng),
            signed_pre_key: KeyPair::generate::<P, _>(&mut OsRng),
            one_time_pre_key: KeyPair::generate::<P, _>(&mut OsRng),
            kyber_pre_key: KemKeyPair::generate::<P>().unwrap(),
        }
    }

    fn handshake(with_one_time_pre_key: bool) -> (SessionState, SessionState) {
        let alice_identity = IdentityKeyPair::generate::<P, _>(&mut OsRng);
        let alice_base = KeyPair::generate::<P, _>(&mut OsRng);
        let bob = bob();

        let alice = initialize_alice_session::<P, _>(
            &AliceParameters {
                our_identity_key_pair: &alice_identity,
                our_base_key_pair: &alice_base,
                their_identity_key: bob.identity.identity_key(),
                their_signed_pre_key: &bob.signed_pre_key.public_key,
                their_one_time_pre_key: with_one_time_pre_key
                    .then_some(&bob.one_time_pre_key.public_key),
                their_ratchet_key: &bob.signed_pre_key.public_key,
                their_kyber_pre_key: &bob.kyber_pre_key.public_key,
            },
            &mut OsRng,
        )
        .unwrap();

        let bob_state = initialize_bob_session::<P>(&BobParameters {
            our_identity_key_pair: &bob.identity,
            our_signed_pre_key_pair: &bob.signed_pre_key,
            our_one_time_pre_key_pair: with_one_time_pre_key.then_some(&bob.one_time_pre_key),
            our_ratchet_key_pair: &bob.signed_pre_key,
            our_kyber_pre_key_pair: &bob.kyber_pre_key,
            their_identity_key: alice_identity.identity_key(),
            their_base_key: &alice_base.public_key,
            their_kyber_ciphertext: &alice.kyber_ciphertext,
        })
        .unwrap();

        (alice.state, bob_state)
    }

    fn assert_sessions_agree(alice: &SessionState, bob: &SessionState) {
        let bob_ratchet = bob.sender_ratchet_key().unwrap();

        // chainKey: receiver у Alice == sender у Bob
        assert_eq!(
            alice.receiver_chain_key(&bob_ratchet).unwrap(),
            bob.sender_chain_key().unwrap()
        );
        assert_eq!(alice.pq_ratchet_state(), bob.pq_ratchet_state());
        assert_eq!(alice.pq_ratchet_state().len(), 32);

        // Bob повторяет DH шаг Alice и получает её root key и sender chain
        let (root, chain) = bob
            .root_key()
            .create_chain::<P>(
                &alice.sender_ratchet_key().unwrap(),
                &bob.sender_ratchet_private_key().unwrap(),
            )
            .unwrap();
        assert_eq!(&root, alice.root_key());
        assert_eq!(chain, alice.sender_chain_key().unwrap());
    }

    #[test]
    fn test_pqxdh_with_one_time_pre_key() {
        let (alice, bob) = handshake(true);
        assert_sessions_agree(&alice, &bob);
        assert_eq!(alice.session_version(), PQXDH_SESSION_VERSION);
        assert_eq!(alice.alice_base_key(), bob.alice_base_key());
    }

    #[test]
    fn test_pqxdh_without_one_time_pre_key() {
        let (alice, bob) = handshake(false);
        assert_sessions_agree(&alice, &bob);
    }

    #[test]
    fn test_foreign_kyber_ciphertext_diverges() {
        let alice_identity = IdentityKeyPair::generate::<P, _>(&mut OsRng);
        let alice_base = KeyPair::generate::<P, _>(&mut OsRng);
        let bob = bob();

        let alice = initialize_alice_session::<P, _>(
            &AliceParameters {
                our_identity_key_pair: &alice_identity,
                our_base_key_pair: &alice_base,
                their_identity_key: bob.identity.identity_key(),
                their_signed_pre_key: &bob.signed_pre_key.public_key,
                their_one_time_pre_key: None,
                their_ratchet_key: &bob.signed_pre_key.public_key,
                their_kyber_pre_key: &bob.kyber_pre_key.public_key,
            },
            &mut OsRng,
        )
        .unwrap();

        // ciphertext под другой Kyber ключ: implicit rejection, ключи расходятся
        let (foreign_ciphertext, _) = KemKeyPair::generate::<P>()
            .unwrap()
            .public_key
            .encapsulate::<P>()
            .unwrap();

        let bob_state = initialize_bob_session::<P>(&BobParameters {
            our_identity_key_pair: &bob.identity,
            our_signed_pre_key_pair: &bob.signed_pre_key,
            our_one_time_pre_key_pair: None,
            our_ratchet_key_pair: &bob.signed_pre_key,
            our_kyber_pre_key_pair: &bob.kyber_pre_key,
            their_identity_key: alice_identity.identity_key(),
            their_base_key: &alice_base.public_key,
            their_kyber_ciphertext: &foreign_ciphertext,
        })
        .unwrap();

        let bob_ratchet = bob_state.sender_ratchet_key().unwrap();
        assert_ne!(
            alice.state.receiver_chain_key(&bob_ratchet).unwrap(),
            bob_state.sender_chain_key().unwrap()
        );
    }
}
