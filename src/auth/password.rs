//! Password hashing and verification.
//!
//! New credentials are always PBKDF2-HMAC-SHA256 with a random salt and at
//! least 100 000 iterations. The two legacy schemes (plain MD5 and salted
//! SHA-512) are verified on login for databases migrated from older servers,
//! but nothing in this module can mint a new legacy record.

use md5::{Digest, Md5};
use ring::digest;
use ring::pbkdf2;
use std::num::NonZeroU32;

/// Smallest PBKDF2 iteration count the server will create or accept as safe.
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

const PBKDF2_KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;

/// A freshly derived PBKDF2 record, ready for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pbkdf2Record {
    pub salt: Vec<u8>,
    pub key: Vec<u8>,
    pub iterations: u32,
}

/// Derive a new credential record from a cleartext password.
pub fn generate(password: &str, iterations: u32) -> Pbkdf2Record {
    use rand::RngCore;

    let iterations = iterations.max(MIN_PBKDF2_ITERATIONS);
    let mut salt = vec![0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);

    let mut key = vec![0u8; PBKDF2_KEY_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        NonZeroU32::new(iterations).unwrap_or(NonZeroU32::new(MIN_PBKDF2_ITERATIONS).unwrap()),
        &salt,
        password.as_bytes(),
        &mut key,
    );
    Pbkdf2Record { salt, key, iterations }
}

pub fn verify_pbkdf2(password: &str, salt: &[u8], key: &[u8], iterations: u32) -> bool {
    let Some(iterations) = NonZeroU32::new(iterations) else {
        return false;
    };
    pbkdf2::verify(pbkdf2::PBKDF2_HMAC_SHA256, iterations, salt, password.as_bytes(), key).is_ok()
}

/// Legacy scheme: unsalted MD5 of the password.
pub fn verify_legacy_md5(password: &str, expected: &[u8]) -> bool {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    constant_time_eq(&hasher.finalize(), expected)
}

/// Legacy scheme: SHA-512 over password bytes followed by the salt.
pub fn verify_legacy_salted_sha512(password: &str, salt: &[u8], expected: &[u8]) -> bool {
    let mut input = Vec::with_capacity(password.len() + salt.len());
    input.extend_from_slice(password.as_bytes());
    input.extend_from_slice(salt);
    let got = digest::digest(&digest::SHA512, &input);
    constant_time_eq(got.as_ref(), expected)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_record_verifies_and_rejects() {
        let record = generate("s3cret", MIN_PBKDF2_ITERATIONS);
        assert_eq!(record.iterations, MIN_PBKDF2_ITERATIONS);
        assert!(verify_pbkdf2("s3cret", &record.salt, &record.key, record.iterations));
        assert!(!verify_pbkdf2("S3cret", &record.salt, &record.key, record.iterations));
    }

    #[test]
    fn iteration_floor_is_enforced() {
        let record = generate("pw", 10);
        assert_eq!(record.iterations, MIN_PBKDF2_ITERATIONS);
    }

    #[test]
    fn legacy_md5_round() {
        // md5("password")
        let expected = [0x5f, 0x4d, 0xcc, 0x3b, 0x5a, 0xa7, 0x65, 0xd6, 0x1d, 0x83, 0x27, 0xde, 0xb8, 0x82, 0xcf, 0x99];
        assert!(verify_legacy_md5("password", &expected));
        assert!(!verify_legacy_md5("Password", &expected));
    }

    #[test]
    fn legacy_salted_sha512_round() {
        let salt = b"pepper";
        let mut input = b"hunter2".to_vec();
        input.extend_from_slice(salt);
        let expected = digest::digest(&digest::SHA512, &input);
        assert!(verify_legacy_salted_sha512("hunter2", salt, expected.as_ref()));
        assert!(!verify_legacy_salted_sha512("hunter3", salt, expected.as_ref()));
    }
}
