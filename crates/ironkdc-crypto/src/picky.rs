use picky_krb::crypto::{Cipher, CipherSuite};
use rand::RngCore as _;
use zeroize::Zeroizing;

use ironkdc_pdu::{Checksum, EncryptionKey, Enctype};

use crate::prf;
use crate::{CryptoError, CryptoErrorExt as _, CryptoResult};

/// [`Crypto`](crate::Crypto) backed by the `picky-krb` RFC 3961 profiles.
#[derive(Debug, Clone, Copy, Default)]
pub struct PickyCrypto;

impl PickyCrypto {
    pub fn new() -> Self {
        Self
    }
}

fn suite(etype: Enctype) -> CryptoResult<CipherSuite> {
    let id = usize::try_from(etype.0).map_err(|_| CryptoError::unsupported("cipher suite", etype))?;
    CipherSuite::try_from(id).map_err(|_| CryptoError::unsupported("cipher suite", etype))
}

fn cipher(etype: Enctype) -> CryptoResult<Box<dyn Cipher>> {
    Ok(suite(etype)?.cipher())
}

impl crate::Crypto for PickyCrypto {
    fn is_supported(&self, etype: Enctype) -> bool {
        suite(etype).is_ok()
    }

    fn encrypt(&self, key: &EncryptionKey, usage: i32, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        cipher(key.etype)?
            .encrypt(&key.value, usage, plaintext)
            .map_err(|e| CryptoError::cipher("encrypt", e))
    }

    fn decrypt(&self, key: &EncryptionKey, usage: i32, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        cipher(key.etype)?
            .decrypt(&key.value, usage, ciphertext)
            .map_err(|e| {
                trace!(etype = %key.etype, usage, len = ciphertext.len(), "Decryption failed");
                CryptoError::cipher("decrypt", e)
            })
    }

    fn checksum(&self, key: &EncryptionKey, usage: i32, data: &[u8]) -> CryptoResult<Checksum> {
        let checksum_suite = cipher(key.etype)?.checksum_type();

        let value = checksum_suite
            .hasher()
            .checksum(&key.value, usage, data)
            .map_err(|e| CryptoError::cipher("checksum", e))?;

        let cksumtype = i32::try_from(u32::from(&checksum_suite))
            .map_err(|_| CryptoError::unsupported("checksum type", key.etype))?;

        Ok(Checksum { cksumtype, value })
    }

    fn random_key(&self, etype: Enctype) -> CryptoResult<EncryptionKey> {
        let cipher = cipher(etype)?;

        let mut seed = Zeroizing::new(vec![0u8; cipher.seed_bit_len() / 8]);
        rand::rng().fill_bytes(&mut seed);

        Ok(EncryptionKey::new(etype, cipher.random_to_key(seed.to_vec())))
    }

    fn string_to_key(&self, etype: Enctype, password: &[u8], salt: &[u8]) -> CryptoResult<EncryptionKey> {
        let value = cipher(etype)?
            .generate_key_from_password(password, salt)
            .map_err(|e| CryptoError::cipher("string-to-key", e))?;

        Ok(EncryptionKey::new(etype, value))
    }

    fn cf2(
        &self,
        key1: &EncryptionKey,
        key2: &EncryptionKey,
        pepper1: &[u8],
        pepper2: &[u8],
    ) -> CryptoResult<EncryptionKey> {
        let key_size = cipher(key1.etype)?.key_size();

        let mut out = prf::prf_plus(key1, pepper1, key_size)?;
        let other = prf::prf_plus(key2, pepper2, key_size)?;

        for (a, b) in out.iter_mut().zip(other.iter()) {
            *a ^= b;
        }

        Ok(EncryptionKey {
            etype: key1.etype,
            value: out,
        })
    }
}
