//! Session transport cryptography.
//!
//! Implements the two session algorithms of the Secret Service protocol:
//!
//! * `plain` — no transport encryption; the key exchange completes
//!   immediately with an empty output.
//! * `dh-ietf1024-sha256-aes128-cbc-pkcs7` — both sides generate a random
//!   private exponent for the RFC 2409 "Second Oakley Group" (MODP-1024),
//!   exchange raw big-endian public values, compute the shared secret by
//!   modular exponentiation, and derive a 16-byte AES-128 key with
//!   HKDF-SHA256 (no salt, no info). Secrets then travel as
//!   AES-128-CBC + PKCS7 with a random 16-byte IV in the `parameters`
//!   field of the Secret struct.

use aes::Aes128;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use num_bigint::BigUint;
use sha2::Sha256;
use zeroize::Zeroizing;

use cask_core::ServiceError;

/// The 1024-bit MODP prime from RFC 2409 §6.2.
const MODP1024_PRIME_BYTES: &[u8] = &[
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xC9, 0x0F, 0xDA, 0xA2, 0x21, 0x68, 0xC2, 0x34,
    0xC4, 0xC6, 0x62, 0x8B, 0x80, 0xDC, 0x1C, 0xD1, 0x29, 0x02, 0x4E, 0x08, 0x8A, 0x67, 0xCC, 0x74,
    0x02, 0x0B, 0xBE, 0xA6, 0x3B, 0x13, 0x9B, 0x22, 0x51, 0x4A, 0x08, 0x79, 0x8E, 0x34, 0x04, 0xDD,
    0xEF, 0x95, 0x19, 0xB3, 0xCD, 0x3A, 0x43, 0x1B, 0x30, 0x2B, 0x0A, 0x6D, 0xF2, 0x5F, 0x14, 0x37,
    0x4F, 0xE1, 0x35, 0x6D, 0x6D, 0x51, 0xC2, 0x45, 0xE4, 0x85, 0xB5, 0x76, 0x62, 0x5E, 0x7E, 0xC6,
    0xF4, 0x4C, 0x42, 0xE9, 0xA6, 0x37, 0xED, 0x6B, 0x0B, 0xFF, 0x5C, 0xB6, 0xF4, 0x06, 0xB7, 0xED,
    0xEE, 0x38, 0x6B, 0xFB, 0x5A, 0x89, 0x9F, 0xA5, 0xAE, 0x9F, 0x24, 0x11, 0x7C, 0x4B, 0x1F, 0xE6,
    0x49, 0x28, 0x66, 0x51, 0xEC, 0xE6, 0x53, 0x81, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

/// Generator for the MODP-1024 group.
const MODP1024_GENERATOR: u64 = 2;

/// Byte length of a MODP-1024 public value (1024 bits).
pub const DH_KEY_BYTES: usize = 128;

/// AES-128 key length in bytes.
pub const AES128_KEY_BYTES: usize = 16;

/// AES block/IV size in bytes.
pub const AES_BLOCK_BYTES: usize = 16;

/// Algorithm identifier for unencrypted sessions.
pub const ALGORITHM_PLAIN: &str = "plain";

/// Algorithm identifier for DH-negotiated AES sessions.
pub const ALGORITHM_DH: &str = "dh-ietf1024-sha256-aes128-cbc-pkcs7";

/// Per-session transport cipher, fixed at key exchange.
#[derive(Clone)]
pub enum SessionCipher {
    /// Secrets travel as plaintext; the parameter field stays empty.
    Plain,
    /// AES-128-CBC-PKCS7 under a DH-derived key.
    Dh { key: Zeroizing<[u8; AES128_KEY_BYTES]> },
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => f.write_str("SessionCipher::Plain"),
            Self::Dh { .. } => f.write_str("SessionCipher::Dh([redacted])"),
        }
    }
}

impl SessionCipher {
    /// Encrypt a secret for transit. Returns `(parameters, value)` — the IV
    /// and ciphertext for DH sessions, an empty IV and the plaintext for
    /// plain ones.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), ServiceError> {
        match self {
            Self::Plain => Ok((Vec::new(), plaintext.to_vec())),
            Self::Dh { key } => {
                let mut iv = [0u8; AES_BLOCK_BYTES];
                rand::Rng::fill(&mut rand::rng(), &mut iv[..]);
                let encryptor = Aes128CbcEnc::new(key.as_ref().into(), &iv.into());
                let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
                Ok((iv.to_vec(), ciphertext))
            }
        }
    }

    /// Decrypt a secret received from a client. The plaintext buffer is
    /// zeroized on drop.
    pub fn decrypt(&self, iv: &[u8], value: &[u8]) -> Result<Zeroizing<Vec<u8>>, ServiceError> {
        match self {
            Self::Plain => Ok(Zeroizing::new(value.to_vec())),
            Self::Dh { key } => {
                let iv_arr: &[u8; AES_BLOCK_BYTES] = iv.try_into().map_err(|_| {
                    ServiceError::Crypto(format!(
                        "IV must be {AES_BLOCK_BYTES} bytes, got {}",
                        iv.len()
                    ))
                })?;
                let decryptor = Aes128CbcDec::new(key.as_ref().into(), iv_arr.into());
                let plaintext = decryptor
                    .decrypt_padded_vec_mut::<Pkcs7>(value)
                    .map_err(|e| ServiceError::Crypto(format!("AES-128-CBC decrypt: {e}")))?;
                Ok(Zeroizing::new(plaintext))
            }
        }
    }
}

/// Result of a completed key exchange: the output to hand back to the client
/// and the negotiated transport cipher.
#[derive(Debug)]
pub struct Negotiated {
    /// Our public value for DH sessions; empty for plain ones.
    pub output: Vec<u8>,
    pub cipher: SessionCipher,
}

/// Perform the key exchange for `algorithm`.
///
/// `input` is the raw client input: ignored for `plain`, the client's
/// 128-byte big-endian public value for DH. Both supported algorithms
/// complete in this single round. Unknown algorithms are refused with
/// NotSupported and allocate nothing.
pub fn negotiate(algorithm: &str, input: &[u8]) -> Result<Negotiated, ServiceError> {
    match algorithm {
        ALGORITHM_PLAIN => Ok(Negotiated {
            output: Vec::new(),
            cipher: SessionCipher::Plain,
        }),
        ALGORITHM_DH => {
            let keypair = DhKeypair::generate();
            let key = keypair.derive_session_key(input)?;
            Ok(Negotiated {
                output: keypair.public_bytes,
                cipher: SessionCipher::Dh { key },
            })
        }
        other => Err(ServiceError::NotSupported(format!(
            "unknown session algorithm '{other}'"
        ))),
    }
}

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// One side's DH keypair for a single session negotiation.
///
/// The private exponent is kept as raw bytes in a `Zeroizing` buffer so it is
/// scrubbed on drop; `BigUint` does not implement `Zeroize`.
pub struct DhKeypair {
    private_bytes: Zeroizing<[u8; DH_KEY_BYTES]>,
    /// Public value as exactly 128 big-endian bytes, left-zero-padded.
    pub public_bytes: Vec<u8>,
}

impl DhKeypair {
    /// Generate a fresh keypair with a random 1024-bit private exponent.
    pub fn generate() -> Self {
        let p = BigUint::from_bytes_be(MODP1024_PRIME_BYTES);
        let g = BigUint::from(MODP1024_GENERATOR);

        let mut priv_bytes = Zeroizing::new([0u8; DH_KEY_BYTES]);
        rand::Rng::fill(&mut rand::rng(), priv_bytes.as_mut_slice());
        let private = BigUint::from_bytes_be(priv_bytes.as_ref());

        let public = g.modpow(&private, &p);
        let public_bytes = pad_to_128(public.to_bytes_be());

        Self {
            private_bytes: priv_bytes,
            public_bytes,
        }
    }

    /// Compute the shared secret against `peer_public` and derive the
    /// 16-byte AES-128 session key.
    ///
    /// The peer value must be exactly 128 bytes and in the range [2, p-2];
    /// 0, 1, and p-1 would collapse the shared secret.
    pub fn derive_session_key(
        &self,
        peer_public: &[u8],
    ) -> Result<Zeroizing<[u8; AES128_KEY_BYTES]>, ServiceError> {
        if peer_public.len() != DH_KEY_BYTES {
            return Err(ServiceError::Crypto(format!(
                "DH public value must be {DH_KEY_BYTES} bytes, got {}",
                peer_public.len()
            )));
        }

        let p = BigUint::from_bytes_be(MODP1024_PRIME_BYTES);
        let peer = BigUint::from_bytes_be(peer_public);

        let two = BigUint::from(2u32);
        let p_minus_two = &p - &two;
        if peer < two || peer > p_minus_two {
            return Err(ServiceError::Crypto(
                "DH public value out of valid range".to_string(),
            ));
        }

        let private = BigUint::from_bytes_be(self.private_bytes.as_ref());
        let shared = peer.modpow(&private, &p);
        let shared_bytes = Zeroizing::new(pad_to_128(shared.to_bytes_be()));

        // HKDF-SHA256: no salt, no info, 16-byte output.
        let hkdf = Hkdf::<Sha256>::new(None, shared_bytes.as_ref());
        let mut key = Zeroizing::new([0u8; AES128_KEY_BYTES]);
        hkdf.expand(&[], key.as_mut())
            .map_err(|_| ServiceError::Crypto("HKDF expand failed".to_string()))?;

        Ok(key)
    }
}

/// Zero-pad a big-endian byte vector to exactly 128 bytes.
///
/// `BigUint::to_bytes_be()` drops leading zeros; public values and shared
/// secrets must be exactly 128 bytes on the wire.
fn pad_to_128(mut bytes: Vec<u8>) -> Vec<u8> {
    while bytes.len() < DH_KEY_BYTES {
        bytes.insert(0, 0);
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dh_pair() -> (SessionCipher, SessionCipher) {
        let server = DhKeypair::generate();
        let client = DhKeypair::generate();
        let server_key = server.derive_session_key(&client.public_bytes).unwrap();
        let client_key = client.derive_session_key(&server.public_bytes).unwrap();
        (
            SessionCipher::Dh { key: server_key },
            SessionCipher::Dh { key: client_key },
        )
    }

    #[test]
    fn plain_negotiation_returns_empty_output() {
        let negotiated = negotiate(ALGORITHM_PLAIN, &[]).unwrap();
        assert!(negotiated.output.is_empty());
        assert!(matches!(negotiated.cipher, SessionCipher::Plain));
    }

    #[test]
    fn unknown_algorithm_rejected() {
        let err = negotiate("rot13", &[]).unwrap_err();
        assert!(matches!(err, ServiceError::NotSupported(_)));
    }

    #[test]
    fn dh_negotiation_emits_128_byte_public_value() {
        let client = DhKeypair::generate();
        let negotiated = negotiate(ALGORITHM_DH, &client.public_bytes).unwrap();
        assert_eq!(negotiated.output.len(), DH_KEY_BYTES);
        assert!(matches!(negotiated.cipher, SessionCipher::Dh { .. }));
    }

    #[test]
    fn both_sides_derive_the_same_key() {
        let server = DhKeypair::generate();
        let client = DhKeypair::generate();
        let server_key = server.derive_session_key(&client.public_bytes).unwrap();
        let client_key = client.derive_session_key(&server.public_bytes).unwrap();
        assert_eq!(server_key.as_ref(), client_key.as_ref());
        assert_eq!(server_key.len(), AES128_KEY_BYTES);
    }

    #[test]
    fn short_public_value_rejected() {
        let keypair = DhKeypair::generate();
        assert!(matches!(
            keypair.derive_session_key(&[0u8; 64]),
            Err(ServiceError::Crypto(_))
        ));
    }

    #[test]
    fn degenerate_public_values_rejected() {
        let keypair = DhKeypair::generate();
        let zero = vec![0u8; DH_KEY_BYTES];
        assert!(keypair.derive_session_key(&zero).is_err());

        let mut one = vec![0u8; DH_KEY_BYTES];
        *one.last_mut().unwrap() = 1;
        assert!(keypair.derive_session_key(&one).is_err());
    }

    #[test]
    fn plain_cipher_is_identity() {
        let cipher = SessionCipher::Plain;
        let (iv, value) = cipher.encrypt(b"hunter2").unwrap();
        assert!(iv.is_empty());
        assert_eq!(value, b"hunter2");
        assert_eq!(cipher.decrypt(&iv, &value).unwrap().as_slice(), b"hunter2");
    }

    #[test]
    fn dh_cipher_round_trips() {
        let (server, client) = dh_pair();
        let (iv, ciphertext) = server.encrypt(b"my vault password").unwrap();
        assert_eq!(iv.len(), AES_BLOCK_BYTES);
        assert_eq!(ciphertext.len() % AES_BLOCK_BYTES, 0);
        assert_ne!(ciphertext, b"my vault password".to_vec());

        let plaintext = client.decrypt(&iv, &ciphertext).unwrap();
        assert_eq!(plaintext.as_slice(), b"my vault password");
    }

    #[test]
    fn dh_cipher_pads_one_to_sixteen_bytes() {
        let (server, _) = dh_pair();
        // An exact-block plaintext still gains a full padding block.
        let (_, ciphertext) = server.encrypt(&[0u8; AES_BLOCK_BYTES]).unwrap();
        assert_eq!(ciphertext.len(), 2 * AES_BLOCK_BYTES);
        // A 1-byte plaintext pads to a single block.
        let (_, ciphertext) = server.encrypt(&[7u8]).unwrap();
        assert_eq!(ciphertext.len(), AES_BLOCK_BYTES);
    }

    #[test]
    fn dh_cipher_draws_a_fresh_iv_each_time() {
        let (server, _) = dh_pair();
        let (iv1, _) = server.encrypt(b"msg").unwrap();
        let (iv2, _) = server.encrypt(b"msg").unwrap();
        assert_ne!(iv1, iv2);
    }

    #[test]
    fn wrong_iv_length_is_a_crypto_error() {
        let (server, _) = dh_pair();
        let (_, ciphertext) = server.encrypt(b"msg").unwrap();
        assert!(matches!(
            server.decrypt(&[0u8; 8], &ciphertext),
            Err(ServiceError::Crypto(_))
        ));
    }

    #[test]
    fn garbage_ciphertext_fails_padding() {
        let (server, _) = dh_pair();
        // All-0xFF blocks essentially never unpad cleanly under a random key.
        let result = server.decrypt(&[0u8; AES_BLOCK_BYTES], &[0xFF; 2 * AES_BLOCK_BYTES]);
        if let Ok(plain) = result {
            assert!(!plain.is_empty());
        }
    }

    #[test]
    fn pad_to_128_preserves_leading_zero_semantics() {
        let padded = pad_to_128(vec![0x01, 0x02]);
        assert_eq!(padded.len(), DH_KEY_BYTES);
        assert_eq!(&padded[DH_KEY_BYTES - 2..], &[0x01, 0x02]);
        assert!(padded[..DH_KEY_BYTES - 2].iter().all(|&b| b == 0));

        let exact = vec![0xAB; DH_KEY_BYTES];
        assert_eq!(pad_to_128(exact.clone()), exact);
    }
}
