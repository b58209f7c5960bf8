// sedget/ta/src/auth.rs
// Firmware decryption and signature verification.
//
// Image format: AES-128-ECB over (plaintext || SHA-256(plaintext)), no
// padding. The ciphertext is therefore a whole number of 16-byte blocks and
// the plaintext itself must be block aligned.

use core::fmt;

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use hex_literal::hex;
use sedget_spec::{CIPHER_BLOCK_LEN, FIRMWARE_KEY_LEN, SIGNATURE_LEN};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Key burned into reference devices.
const PROVISIONED_KEY: [u8; FIRMWARE_KEY_LEN] = hex!("30313233343536373839414243444546");

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("length {0} is not a multiple of the {CIPHER_BLOCK_LEN}-byte block")]
    UnalignedLength(usize),
    #[error("decrypted length {0} is shorter than the {SIGNATURE_LEN}-byte signature")]
    TooShort(usize),
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("output holds {got} bytes, need {needed}")]
    OutputTooSmall { needed: usize, got: usize },
}

/// Malformed key material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("firmware key must be {FIRMWARE_KEY_LEN} bytes encoded as hex")]
pub struct InvalidKey;

/// Symmetric key shared by the firmware sealer and the service.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FirmwareKey([u8; FIRMWARE_KEY_LEN]);

impl FirmwareKey {
    pub fn new(bytes: [u8; FIRMWARE_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// The key reference devices ship with.
    pub fn provisioned() -> Self {
        Self(PROVISIONED_KEY)
    }

    pub fn from_hex(text: &str) -> Result<Self, InvalidKey> {
        let bytes = Zeroizing::new(hex::decode(text.trim()).map_err(|_| InvalidKey)?);
        let key: [u8; FIRMWARE_KEY_LEN] = bytes.as_slice().try_into().map_err(|_| InvalidKey)?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; FIRMWARE_KEY_LEN] {
        &self.0
    }

    fn cipher(&self) -> Aes128 {
        Aes128::new(GenericArray::from_slice(&self.0))
    }
}

impl fmt::Debug for FirmwareKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FirmwareKey(..)")
    }
}

/// Decrypt `buf` in place and check its trailing signature.
///
/// Returns the plaintext length (signature excluded). On any failure the
/// whole of `buf` is zeroed.
pub fn decrypt_in_place(key: &FirmwareKey, buf: &mut [u8]) -> Result<usize, AuthError> {
    if buf.len() % CIPHER_BLOCK_LEN != 0 {
        return Err(AuthError::UnalignedLength(buf.len()));
    }

    let cipher = key.cipher();
    for block in buf.chunks_exact_mut(CIPHER_BLOCK_LEN) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }

    let Some(plaintext_len) = buf.len().checked_sub(SIGNATURE_LEN) else {
        let len = buf.len();
        buf.zeroize();
        return Err(AuthError::TooShort(len));
    };

    let (plaintext, signature) = buf.split_at(plaintext_len);
    let digest = Sha256::digest(plaintext);
    let matches: bool = digest.as_slice().ct_eq(signature).into();
    if !matches {
        warn!(plaintext_len, "firmware signature mismatch");
        buf.zeroize();
        return Err(AuthError::SignatureMismatch);
    }
    Ok(plaintext_len)
}

/// Copy `ciphertext` to the front of `out`, then decrypt and verify it
/// there. The plaintext is `out[..n]` for the returned `n`.
pub fn decrypt_and_verify(
    key: &FirmwareKey,
    ciphertext: &[u8],
    out: &mut [u8],
) -> Result<usize, AuthError> {
    if ciphertext.len() % CIPHER_BLOCK_LEN != 0 {
        return Err(AuthError::UnalignedLength(ciphertext.len()));
    }
    let got = out.len();
    let dst = out
        .get_mut(..ciphertext.len())
        .ok_or(AuthError::OutputTooSmall {
            needed: ciphertext.len(),
            got,
        })?;
    dst.copy_from_slice(ciphertext);
    decrypt_in_place(key, dst)
}

/// Append the signature to `plaintext` and encrypt the result.
pub fn seal(key: &FirmwareKey, plaintext: &[u8]) -> Result<Vec<u8>, AuthError> {
    if plaintext.len() % CIPHER_BLOCK_LEN != 0 {
        return Err(AuthError::UnalignedLength(plaintext.len()));
    }

    let mut sealed = Vec::with_capacity(plaintext.len() + SIGNATURE_LEN);
    sealed.extend_from_slice(plaintext);
    sealed.extend_from_slice(&Sha256::digest(plaintext));

    let cipher = key.cipher();
    for block in sealed.chunks_exact_mut(CIPHER_BLOCK_LEN) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(sealed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn provisioned_key_is_ascii() {
        assert_eq!(FirmwareKey::provisioned().as_bytes(), b"0123456789ABCDEF");
    }

    #[test]
    fn cipher_matches_fips197() {
        let key = FirmwareKey::new(hex!("000102030405060708090a0b0c0d0e0f"));
        let mut block = hex!("00112233445566778899aabbccddeeff");
        key.cipher()
            .encrypt_block(GenericArray::from_mut_slice(&mut block));
        assert_eq!(block, hex!("69c4e0d86a7b0430d8cdb78070b4c55a"));
    }

    #[test]
    fn sealed_image_opens() {
        let key = FirmwareKey::provisioned();
        let plain = image(4096);
        let sealed = seal(&key, &plain).unwrap();
        assert_eq!(sealed.len(), plain.len() + SIGNATURE_LEN);

        let mut out = vec![0u8; 8192];
        let n = decrypt_and_verify(&key, &sealed, &mut out).unwrap();
        assert_eq!(n, plain.len());
        assert_eq!(&out[..n], &plain[..]);
    }

    #[test]
    fn tampering_is_detected_and_output_wiped() {
        let key = FirmwareKey::provisioned();
        let mut sealed = seal(&key, &image(256)).unwrap();
        sealed[17] ^= 0x80;

        let mut out = vec![0xAAu8; 512];
        assert_eq!(
            decrypt_and_verify(&key, &sealed, &mut out),
            Err(AuthError::SignatureMismatch)
        );
        assert!(out[..sealed.len()].iter().all(|&b| b == 0));
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal(&FirmwareKey::provisioned(), &image(64)).unwrap();
        let other = FirmwareKey::new([0x11; FIRMWARE_KEY_LEN]);
        let mut buf = sealed.clone();
        assert_eq!(
            decrypt_in_place(&other, &mut buf),
            Err(AuthError::SignatureMismatch)
        );
    }

    #[test]
    fn unaligned_ciphertext_is_rejected_untouched() {
        let mut out = vec![0xAAu8; 64];
        assert_eq!(
            decrypt_and_verify(&FirmwareKey::provisioned(), &[0u8; 33], &mut out),
            Err(AuthError::UnalignedLength(33))
        );
        assert!(out.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn one_block_is_too_short() {
        let mut buf = [0x55u8; 16];
        assert_eq!(
            decrypt_in_place(&FirmwareKey::provisioned(), &mut buf),
            Err(AuthError::TooShort(16))
        );
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn empty_plaintext_is_just_a_signature() {
        let key = FirmwareKey::provisioned();
        let mut sealed = seal(&key, &[]).unwrap();
        assert_eq!(decrypt_in_place(&key, &mut sealed), Ok(0));
    }

    #[test]
    fn output_must_hold_ciphertext() {
        let sealed = seal(&FirmwareKey::provisioned(), &image(64)).unwrap();
        let mut out = vec![0u8; 64];
        assert_eq!(
            decrypt_and_verify(&FirmwareKey::provisioned(), &sealed, &mut out),
            Err(AuthError::OutputTooSmall { needed: 96, got: 64 })
        );
    }

    #[test]
    fn key_parses_from_hex() {
        let key = FirmwareKey::from_hex("30313233343536373839414243444546\n").unwrap();
        assert_eq!(key.as_bytes(), FirmwareKey::provisioned().as_bytes());
        assert!(matches!(FirmwareKey::from_hex("abcd"), Err(InvalidKey)));
        assert_eq!(format!("{key:?}"), "FirmwareKey(..)");
    }
}
