//! RFC 3962 pseudo-random function and the PRF+ expansion of RFC 6113.

use picky_krb::crypto::aes::{derive_key, AesSize, AES_BLOCK_SIZE};
use sha1::{Digest as _, Sha1};
use zeroize::Zeroizing;

use ironkdc_pdu::{EncryptionKey, Enctype};

use crate::{CryptoError, CryptoErrorExt as _, CryptoResult};

const PRF_CONSTANT: &[u8] = b"prf";

fn aes_size(etype: Enctype) -> CryptoResult<AesSize> {
    match etype {
        Enctype::AES256_CTS_HMAC_SHA1_96 => Ok(AesSize::Aes256),
        Enctype::AES128_CTS_HMAC_SHA1_96 => Ok(AesSize::Aes128),
        _ => Err(CryptoError::unsupported("PRF", etype)),
    }
}

/// `PRF(key, s) = E(DK(key, "prf"), SHA1(s) truncated to one block)`.
///
/// `derive_key` n-folds its constant to one block (the identity for a 16-byte input)
/// and encrypts it, so its first output block is exactly the single-block encryption.
pub(crate) fn prf(key: &EncryptionKey, input: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let size = aes_size(key.etype)?;

    let prf_key = derive_key(&key.value, PRF_CONSTANT, &size).map_err(|e| CryptoError::cipher("PRF key", e))?;
    let prf_key = Zeroizing::new(prf_key);

    let digest = Sha1::digest(input);
    let block = &digest[..AES_BLOCK_SIZE];

    let out = derive_key(&prf_key, block, &size).map_err(|e| CryptoError::cipher("PRF", e))?;
    let out = Zeroizing::new(out);

    Ok(Zeroizing::new(out[..AES_BLOCK_SIZE].to_vec()))
}

/// `PRF+(key, pepper) = PRF(key, 1 || pepper) || PRF(key, 2 || pepper) || ...`, truncated to `len`.
pub(crate) fn prf_plus(key: &EncryptionKey, pepper: &[u8], len: usize) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let mut out = Zeroizing::new(Vec::with_capacity(len + AES_BLOCK_SIZE));
    let mut counter: u8 = 1;

    while out.len() < len {
        let mut input = Vec::with_capacity(pepper.len() + 1);
        input.push(counter);
        input.extend_from_slice(pepper);

        out.extend_from_slice(&prf(key, &input)?);

        counter = counter
            .checked_add(1)
            .ok_or_else(|| CryptoError::unsupported("PRF+ length", key.etype))?;
    }

    out.truncate(len);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(etype: Enctype, byte: u8, len: usize) -> EncryptionKey {
        EncryptionKey::new(etype, vec![byte; len])
    }

    #[test]
    fn prf_output_is_one_block() {
        let k = key(Enctype::AES256_CTS_HMAC_SHA1_96, 7, 32);
        assert_eq!(prf(&k, b"test").unwrap().len(), 16);
    }

    #[test]
    fn prf_plus_extends_with_counter_blocks() {
        let k = key(Enctype::AES256_CTS_HMAC_SHA1_96, 7, 32);
        let long = prf_plus(&k, b"pepper", 32).unwrap();
        let short = prf_plus(&k, b"pepper", 16).unwrap();

        assert_eq!(long.len(), 32);
        assert_eq!(&long[..16], short.as_slice());
        assert_ne!(&long[..16], &long[16..]);
    }

    #[test]
    fn des3_has_no_prf() {
        let k = key(Enctype::DES3_CBC_SHA1, 7, 24);
        assert!(prf(&k, b"test").is_err());
    }
}
