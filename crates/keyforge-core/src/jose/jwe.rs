//! Compact JWE serialization (RFC 7516) for the resolved algorithm suites.
//!
//! Message layout:
//! `BASE64URL(header) . BASE64URL(encrypted_key) . BASE64URL(iv) .
//! BASE64URL(ciphertext) . BASE64URL(tag)`
//!
//! The protected header always carries `alg`, `enc`, and `kid`; AES-GCM
//! key wrap additionally stores its own `iv` and `tag` header parameters
//! (RFC 7518 §4.7). The additional authenticated data for content
//! encryption is the ASCII bytes of the base64url header segment. `dir`
//! suites leave the encrypted-key segment empty. CBC-HMAC follows RFC 7518
//! §5.2: the composite key is MAC half followed by ENC half, the AL block
//! is the 64-bit big-endian bit length of the AAD, and the tag is the
//! truncated HMAC output.
//!
//! # Security model
//!
//! - Every invocation draws fresh IVs from `OsRng`; nothing is reused.
//! - Unwrapped content keys live in `Zeroizing` buffers.
//! - CBC-HMAC tags are compared in constant time before any decryption.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::JoseError;
use crate::jose::alg::{AlgSuite, ContentEncAlg};
use crate::keygen::KeyMaterial;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// AES-GCM nonce length (96 bits).
const GCM_NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length (128 bits).
const GCM_TAG_LEN: usize = 16;

/// AES-CBC initialization vector length (one block).
const CBC_IV_LEN: usize = 16;

/// The JWE protected header.
#[derive(Debug, Clone, Serialize)]
pub struct JweHeader {
    pub alg: String,
    pub enc: String,
    pub kid: String,
    /// Key-wrap nonce, present for the A*GCMKW algorithms only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    /// Key-wrap authentication tag, present for the A*GCMKW algorithms
    /// only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Parse the protected header of a compact JWE without touching any key.
///
/// # Errors
///
/// Returns [`JoseError::Malformed`] for a wrong segment count, bad base64,
/// or invalid JSON, and [`JoseError::MissingHeader`] when `alg`, `enc`, or
/// `kid` is absent.
pub fn decode_header(jwe: &[u8]) -> Result<JweHeader, JoseError> {
    let segments = split_segments(jwe)?;
    let header_bytes = unb64(segments[0], "protected header")?;
    let value: serde_json::Value =
        serde_json::from_slice(&header_bytes).map_err(|e| JoseError::Malformed {
            reason: format!("protected header is not valid JSON: {e}"),
        })?;

    let required = |field: &'static str| -> Result<String, JoseError> {
        value
            .get(field)
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .ok_or(JoseError::MissingHeader { field })
    };
    let optional = |field: &str| -> Option<String> {
        value
            .get(field)
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
    };

    Ok(JweHeader {
        alg: required("alg")?,
        enc: required("enc")?,
        kid: required("kid")?,
        iv: optional("iv"),
        tag: optional("tag"),
    })
}

/// Encrypt a payload into a compact JWE under the resolved suite.
///
/// `pool_key` is the pool's raw key material; for key-wrap suites it wraps
/// `fresh_cek`, for `dir` suites it is the content key itself and
/// `fresh_cek` must be `None`.
///
/// # Errors
///
/// Returns [`JoseError::KeyLength`] when a key does not match the suite and
/// [`JoseError::Encryption`] when a cryptographic step fails.
pub fn encrypt(
    suite: AlgSuite,
    kid: Uuid,
    pool_key: &KeyMaterial,
    fresh_cek: Option<KeyMaterial>,
    payload: &[u8],
) -> Result<Vec<u8>, JoseError> {
    let cek_len = suite.cek.key_len().bytes();

    let mut header = JweHeader {
        alg: suite.kek.as_str().to_owned(),
        enc: suite.cek.as_str().to_owned(),
        kid: kid.to_string(),
        iv: None,
        tag: None,
    };

    let (cek, encrypted_key) = match suite.kek.key_len() {
        None => {
            if fresh_cek.is_some() {
                return Err(JoseError::Encryption {
                    reason: "direct suite must not carry a generated content key".to_owned(),
                });
            }
            check_len("content encryption key", cek_len, pool_key.len())?;
            (
                Zeroizing::new(pool_key.as_bytes().to_vec()),
                Vec::new(),
            )
        }
        Some(kek_len) => {
            check_len("key-wrap key", kek_len, pool_key.len())?;
            let fresh = fresh_cek.ok_or_else(|| JoseError::Encryption {
                reason: "key-wrap suite requires a generated content key".to_owned(),
            })?;
            check_len("content encryption key", cek_len, fresh.len())?;

            let mut wrap_nonce = [0u8; GCM_NONCE_LEN];
            OsRng.fill_bytes(&mut wrap_nonce);
            let mut wrapped = gcm_seal(pool_key.as_bytes(), &wrap_nonce, &[], fresh.as_bytes())?;
            let wrap_tag = wrapped.split_off(wrapped.len() - GCM_TAG_LEN);
            header.iv = Some(b64(&wrap_nonce));
            header.tag = Some(b64(&wrap_tag));

            (Zeroizing::new(fresh.as_bytes().to_vec()), wrapped)
        }
    };

    let header_b64 = b64(&serde_json::to_vec(&header).map_err(|e| JoseError::Encryption {
        reason: format!("header serialization failed: {e}"),
    })?);
    let aad = header_b64.as_bytes();

    let (iv, ciphertext, tag) = if suite.cek.is_cbc_hmac() {
        let mut iv = vec![0u8; CBC_IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let (ciphertext, tag) = cbc_hmac_seal(suite.cek, &cek, &iv, aad, payload)?;
        (iv, ciphertext, tag)
    } else {
        let mut iv = vec![0u8; GCM_NONCE_LEN];
        OsRng.fill_bytes(&mut iv);
        let mut combined = gcm_seal(&cek, &iv, aad, payload)?;
        let tag = combined.split_off(combined.len() - GCM_TAG_LEN);
        (iv, combined, tag)
    };

    let compact = format!(
        "{header_b64}.{}.{}.{}.{}",
        b64(&encrypted_key),
        b64(&iv),
        b64(&ciphertext),
        b64(&tag)
    );
    Ok(compact.into_bytes())
}

/// Decrypt a compact JWE under the resolved suite.
///
/// # Errors
///
/// Returns [`JoseError::Malformed`] for serialization problems,
/// [`JoseError::MissingHeader`] for absent key-wrap parameters,
/// [`JoseError::KeyLength`] for a key that does not match the suite, and
/// [`JoseError::Decryption`] when authentication or decryption fails.
pub fn decrypt(
    suite: AlgSuite,
    pool_key: &KeyMaterial,
    jwe: &[u8],
) -> Result<Vec<u8>, JoseError> {
    let segments = split_segments(jwe)?;
    let header = decode_header(jwe)?;
    let aad = segments[0].as_bytes();
    let encrypted_key = unb64(segments[1], "encrypted key")?;
    let iv = unb64(segments[2], "initialization vector")?;
    let ciphertext = unb64(segments[3], "ciphertext")?;
    let tag = unb64(segments[4], "authentication tag")?;

    let cek_len = suite.cek.key_len().bytes();
    let cek: Zeroizing<Vec<u8>> = match suite.kek.key_len() {
        None => {
            if !encrypted_key.is_empty() {
                return Err(JoseError::Malformed {
                    reason: "direct encryption requires an empty encrypted-key segment"
                        .to_owned(),
                });
            }
            check_len("content encryption key", cek_len, pool_key.len())?;
            Zeroizing::new(pool_key.as_bytes().to_vec())
        }
        Some(kek_len) => {
            check_len("key-wrap key", kek_len, pool_key.len())?;
            let wrap_nonce = unb64(
                header.iv.as_deref().ok_or(JoseError::MissingHeader { field: "iv" })?,
                "key-wrap iv",
            )?;
            let wrap_tag = unb64(
                header
                    .tag
                    .as_deref()
                    .ok_or(JoseError::MissingHeader { field: "tag" })?,
                "key-wrap tag",
            )?;
            let mut sealed = encrypted_key;
            sealed.extend_from_slice(&wrap_tag);
            let unwrapped =
                Zeroizing::new(gcm_open(pool_key.as_bytes(), &wrap_nonce, &[], &sealed)?);
            check_len("content encryption key", cek_len, unwrapped.len())?;
            unwrapped
        }
    };

    if suite.cek.is_cbc_hmac() {
        cbc_hmac_open(suite.cek, &cek, &iv, aad, &ciphertext, &tag)
    } else {
        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);
        gcm_open(&cek, &iv, aad, &sealed)
    }
}

fn split_segments(jwe: &[u8]) -> Result<[&str; 5], JoseError> {
    let text = std::str::from_utf8(jwe).map_err(|_| JoseError::Malformed {
        reason: "compact JWE is not ASCII".to_owned(),
    })?;
    let parts: Vec<&str> = text.split('.').collect();
    match <[&str; 5]>::try_from(parts) {
        Ok(segments) => Ok(segments),
        Err(parts) => Err(JoseError::Malformed {
            reason: format!("expected 5 segments, got {}", parts.len()),
        }),
    }
}

fn b64(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

fn unb64(segment: &str, what: &str) -> Result<Vec<u8>, JoseError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| JoseError::Malformed {
            reason: format!("{what} is not valid base64url: {e}"),
        })
}

fn check_len(context: &'static str, expected: usize, actual: usize) -> Result<(), JoseError> {
    if expected == actual {
        Ok(())
    } else {
        Err(JoseError::KeyLength {
            context,
            expected,
            actual,
        })
    }
}

/// AES-GCM encrypt; returns `ciphertext || tag`.
fn gcm_seal(key: &[u8], nonce: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>, JoseError> {
    let payload = Payload { msg, aad };
    let sealed = match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .map_err(map_enc)?
            .encrypt(Nonce::from_slice(nonce), payload),
        24 => Aes192Gcm::new_from_slice(key)
            .map_err(map_enc)?
            .encrypt(Nonce::from_slice(nonce), payload),
        32 => Aes256Gcm::new_from_slice(key)
            .map_err(map_enc)?
            .encrypt(Nonce::from_slice(nonce), payload),
        other => {
            return Err(JoseError::KeyLength {
                context: "AES-GCM key",
                expected: 32,
                actual: other,
            });
        }
    };
    sealed.map_err(|e| JoseError::Encryption {
        reason: format!("AES-GCM encryption failed: {e}"),
    })
}

/// AES-GCM decrypt of `ciphertext || tag`.
fn gcm_open(key: &[u8], nonce: &[u8], aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, JoseError> {
    if nonce.len() != GCM_NONCE_LEN {
        return Err(JoseError::Malformed {
            reason: format!("AES-GCM nonce must be {GCM_NONCE_LEN} bytes, got {}", nonce.len()),
        });
    }
    let payload = Payload { msg: sealed, aad };
    let opened = match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .map_err(map_dec)?
            .decrypt(Nonce::from_slice(nonce), payload),
        24 => Aes192Gcm::new_from_slice(key)
            .map_err(map_dec)?
            .decrypt(Nonce::from_slice(nonce), payload),
        32 => Aes256Gcm::new_from_slice(key)
            .map_err(map_dec)?
            .decrypt(Nonce::from_slice(nonce), payload),
        other => {
            return Err(JoseError::KeyLength {
                context: "AES-GCM key",
                expected: 32,
                actual: other,
            });
        }
    };
    opened.map_err(|_| JoseError::Decryption {
        reason: "AES-GCM authentication failed".to_owned(),
    })
}

fn map_enc(e: aes_gcm::aes::cipher::InvalidLength) -> JoseError {
    JoseError::Encryption {
        reason: format!("cipher init failed: {e}"),
    }
}

fn map_dec(e: aes_gcm::aes::cipher::InvalidLength) -> JoseError {
    JoseError::Decryption {
        reason: format!("cipher init failed: {e}"),
    }
}

/// The AL block: AAD length in bits as a 64-bit big-endian integer.
fn al_bytes(aad: &[u8]) -> [u8; 8] {
    let bits = (aad.len() as u64).saturating_mul(8);
    bits.to_be_bytes()
}

/// Truncated HMAC tag over `aad || iv || ciphertext || AL`.
fn cbc_hmac_tag(
    enc: ContentEncAlg,
    mac_key: &[u8],
    aad: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, JoseError> {
    let al = al_bytes(aad);
    let full = |digest: Vec<u8>, keep: usize| digest[..keep].to_vec();
    match enc {
        ContentEncAlg::A128CbcHs256 => {
            // Qualified call: `aead::KeyInit` is in scope for the GCM
            // helpers and also offers a `new_from_slice`.
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(mac_key).map_err(map_enc_mac)?;
            mac.update(aad);
            mac.update(iv);
            mac.update(ciphertext);
            mac.update(&al);
            Ok(full(mac.finalize().into_bytes().to_vec(), 16))
        }
        ContentEncAlg::A192CbcHs384 => {
            let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(mac_key).map_err(map_enc_mac)?;
            mac.update(aad);
            mac.update(iv);
            mac.update(ciphertext);
            mac.update(&al);
            Ok(full(mac.finalize().into_bytes().to_vec(), 24))
        }
        ContentEncAlg::A256CbcHs512 => {
            let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(mac_key).map_err(map_enc_mac)?;
            mac.update(aad);
            mac.update(iv);
            mac.update(ciphertext);
            mac.update(&al);
            Ok(full(mac.finalize().into_bytes().to_vec(), 32))
        }
        _ => Err(JoseError::Encryption {
            reason: format!("{enc} is not a CBC-HMAC algorithm"),
        }),
    }
}

fn map_enc_mac(e: hmac::digest::InvalidLength) -> JoseError {
    JoseError::Encryption {
        reason: format!("HMAC init failed: {e}"),
    }
}

/// CBC-HMAC encrypt; returns `(ciphertext, tag)`.
fn cbc_hmac_seal(
    enc: ContentEncAlg,
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    payload: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), JoseError> {
    let (mac_key, enc_key) = cek.split_at(cek.len() / 2);
    let ciphertext = match enc_key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(enc_key, iv)
            .map_err(map_enc)?
            .encrypt_padded_vec_mut::<Pkcs7>(payload),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(enc_key, iv)
            .map_err(map_enc)?
            .encrypt_padded_vec_mut::<Pkcs7>(payload),
        32 => cbc::Encryptor::<Aes256>::new_from_slices(enc_key, iv)
            .map_err(map_enc)?
            .encrypt_padded_vec_mut::<Pkcs7>(payload),
        other => {
            return Err(JoseError::KeyLength {
                context: "AES-CBC key",
                expected: 32,
                actual: other,
            });
        }
    };
    let tag = cbc_hmac_tag(enc, mac_key, aad, iv, &ciphertext)?;
    Ok((ciphertext, tag))
}

/// CBC-HMAC decrypt; authenticates before touching the ciphertext.
fn cbc_hmac_open(
    enc: ContentEncAlg,
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, JoseError> {
    let (mac_key, enc_key) = cek.split_at(cek.len() / 2);
    let expected = cbc_hmac_tag(enc, mac_key, aad, iv, ciphertext)?;
    if expected.ct_eq(tag).unwrap_u8() != 1 {
        return Err(JoseError::Decryption {
            reason: "CBC-HMAC authentication failed".to_owned(),
        });
    }

    let opened = match enc_key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(enc_key, iv)
            .map_err(map_dec)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(enc_key, iv)
            .map_err(map_dec)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(enc_key, iv)
            .map_err(map_dec)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        other => {
            return Err(JoseError::KeyLength {
                context: "AES-CBC key",
                expected: 32,
                actual: other,
            });
        }
    };
    opened.map_err(|_| JoseError::Decryption {
        reason: "CBC padding is invalid".to_owned(),
    })
}
