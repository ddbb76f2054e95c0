//! AES-256-GCM sealing for audit payloads

use ring::aead;
use ring::rand::{SecureRandom, SystemRandom};

use super::{AuditError, Result};

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Ciphertext with its trailing authentication tag, plus the IV used
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
}

/// Holds the active audit key. Key bytes never leave this type.
pub struct AuditCipher {
    key: aead::LessSafeKey,
    rng: SystemRandom,
}

impl std::fmt::Debug for AuditCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditCipher")
            .field("algorithm", &"AES-256-GCM")
            .finish_non_exhaustive()
    }
}

impl AuditCipher {
    pub fn new(key_bytes: &[u8]) -> Result<Self> {
        if key_bytes.len() != KEY_LEN {
            return Err(AuditError::KeyInit(format!(
                "expected {KEY_LEN}-byte key, got {} bytes",
                key_bytes.len()
            )));
        }
        let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, key_bytes)
            .map_err(|_| AuditError::KeyInit("invalid encryption key".to_string()))?;
        Ok(Self {
            key: aead::LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Generate fresh key material from the OS RNG
    pub fn generate_key() -> Result<[u8; KEY_LEN]> {
        let mut key = [0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| AuditError::KeyInit("failed to generate key".to_string()))?;
        Ok(key)
    }

    /// Encrypt with a fresh random IV; the tag is appended to the ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Sealed> {
        let mut iv = [0u8; IV_LEN];
        self.rng
            .fill(&mut iv)
            .map_err(|_| AuditError::Encryption("failed to generate IV".to_string()))?;
        let nonce = aead::Nonce::assume_unique_for_key(iv);

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut in_out)
            .map_err(|_| AuditError::Encryption("encryption failed".to_string()))?;

        Ok(Sealed {
            ciphertext: in_out,
            iv,
        })
    }

    /// Decrypt `ciphertext || tag`, verifying the trailing 16-byte tag.
    pub fn decrypt(&self, ciphertext_with_tag: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        if ciphertext_with_tag.len() < TAG_LEN {
            return Err(AuditError::Decryption("ciphertext too short".to_string()));
        }
        let nonce = aead::Nonce::try_assume_unique_for_key(iv).map_err(|_| {
            AuditError::Decryption(format!("expected {IV_LEN}-byte IV, got {} bytes", iv.len()))
        })?;

        let mut in_out = ciphertext_with_tag.to_vec();
        let plain = self
            .key
            .open_in_place(nonce, aead::Aad::empty(), &mut in_out)
            .map_err(|_| AuditError::Decryption("authentication tag mismatch".to_string()))?;
        Ok(plain.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn cipher() -> AuditCipher {
        AuditCipher::new(&[7u8; KEY_LEN]).unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let cipher = cipher();
        let payload = br#"{"message":"Admin logged in","data":{"ip":"10.0.0.5"}}"#;
        let sealed = cipher.encrypt(payload).unwrap();

        assert_eq!(sealed.ciphertext.len(), payload.len() + TAG_LEN);
        assert_ne!(&sealed.ciphertext[..payload.len()], &payload[..]);
        assert_eq!(cipher.decrypt(&sealed.ciphertext, &sealed.iv).unwrap(), payload);
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let cipher = cipher();
        let sealed = cipher.encrypt(b"").unwrap();
        assert_eq!(sealed.ciphertext.len(), TAG_LEN);
        assert!(cipher.decrypt(&sealed.ciphertext, &sealed.iv).unwrap().is_empty());
    }

    #[test]
    fn test_iv_uniqueness() {
        let cipher = cipher();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let sealed = cipher.encrypt(b"same plaintext").unwrap();
            assert!(seen.insert(sealed.iv), "IV repeated");
        }
    }

    #[test]
    fn test_any_flipped_ciphertext_bit_is_detected() {
        let cipher = cipher();
        let sealed = cipher.encrypt(b"ticket 42 deleted").unwrap();

        for byte in 0..sealed.ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = sealed.ciphertext.clone();
                tampered[byte] ^= 1 << bit;
                assert!(matches!(
                    cipher.decrypt(&tampered, &sealed.iv),
                    Err(AuditError::Decryption(_))
                ));
            }
        }
    }

    #[test]
    fn test_any_flipped_iv_bit_is_detected() {
        let cipher = cipher();
        let sealed = cipher.encrypt(b"ticket 42 deleted").unwrap();

        for byte in 0..IV_LEN {
            for bit in 0..8 {
                let mut iv = sealed.iv;
                iv[byte] ^= 1 << bit;
                assert!(matches!(
                    cipher.decrypt(&sealed.ciphertext, &iv),
                    Err(AuditError::Decryption(_))
                ));
            }
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = cipher().encrypt(b"secret").unwrap();
        let other = AuditCipher::new(&[8u8; KEY_LEN]).unwrap();
        assert!(other.decrypt(&sealed.ciphertext, &sealed.iv).is_err());
    }

    #[test]
    fn test_malformed_inputs() {
        let cipher = cipher();
        assert!(matches!(
            cipher.decrypt(&[0u8; 4], &[0u8; IV_LEN]),
            Err(AuditError::Decryption(_))
        ));
        let sealed = cipher.encrypt(b"x").unwrap();
        assert!(matches!(
            cipher.decrypt(&sealed.ciphertext, &sealed.iv[..8]),
            Err(AuditError::Decryption(_))
        ));
    }

    #[test]
    fn test_rejects_bad_key_length() {
        assert!(matches!(
            AuditCipher::new(&[1u8; 16]),
            Err(AuditError::KeyInit(_))
        ));
    }

    #[test]
    fn test_generated_keys_differ() {
        let a = AuditCipher::generate_key().unwrap();
        let b = AuditCipher::generate_key().unwrap();
        assert_ne!(a, b);
        assert!(AuditCipher::new(&a).is_ok());
    }

    #[test]
    fn test_debug_hides_key() {
        let rendered = format!("{:?}", cipher());
        assert!(rendered.contains("AES-256-GCM"));
        assert!(!rendered.contains('7'));
    }
}
