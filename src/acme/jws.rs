//! The account key and the flattened JWS envelope every ACME POST wears.

use super::{AcmeError, AcmeErrorKind};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::digest;
use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair, KeyPair};
use serde::{Deserialize, Serialize};
use serde_json::json;

fn b64url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

fn crypto_err<E: std::fmt::Debug>(e: E) -> AcmeError {
    AcmeErrorKind::Crypto(format!("{e:?}")).into()
}

/// The ES256 account key pair, persistable as PKCS#8.
pub struct AccountKey {
    keypair: EcdsaKeyPair,
    pkcs8: Vec<u8>,
    rng: SystemRandom,
}

/// The serde shape the account key is persisted in, alongside the account id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAccountKey {
    pub pkcs8_b64: String,
}

impl AccountKey {
    pub fn generate() -> Result<AccountKey, AcmeError> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).map_err(crypto_err)?;
        Self::from_pkcs8(pkcs8.as_ref().to_vec())
    }

    pub fn from_pkcs8(pkcs8: Vec<u8>) -> Result<AccountKey, AcmeError> {
        let rng = SystemRandom::new();
        let keypair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &pkcs8, &rng).map_err(crypto_err)?;
        Ok(AccountKey { keypair, pkcs8, rng })
    }

    pub fn to_stored(&self) -> StoredAccountKey {
        StoredAccountKey {
            pkcs8_b64: base64::engine::general_purpose::STANDARD.encode(&self.pkcs8),
        }
    }

    pub fn from_stored(stored: &StoredAccountKey) -> Result<AccountKey, AcmeError> {
        let pkcs8 = base64::engine::general_purpose::STANDARD
            .decode(&stored.pkcs8_b64)
            .map_err(crypto_err)?;
        Self::from_pkcs8(pkcs8)
    }

    /// The public key as a JWK object.
    pub fn jwk(&self) -> serde_json::Value {
        // Uncompressed point: 0x04 || X || Y.
        let point = self.keypair.public_key().as_ref();
        let x = &point[1..33];
        let y = &point[33..65];
        json!({
            "crv": "P-256",
            "kty": "EC",
            "x": b64url(x),
            "y": b64url(y),
        })
    }

    /// RFC 7638 thumbprint: SHA-256 over the canonical JWK with its members
    /// in lexicographic order.
    pub fn jwk_thumbprint(&self) -> String {
        let jwk = self.jwk();
        let canonical = format!(
            r#"{{"crv":"{}","kty":"{}","x":"{}","y":"{}"}}"#,
            jwk["crv"].as_str().unwrap_or_default(),
            jwk["kty"].as_str().unwrap_or_default(),
            jwk["x"].as_str().unwrap_or_default(),
            jwk["y"].as_str().unwrap_or_default(),
        );
        b64url(digest::digest(&digest::SHA256, canonical.as_bytes()).as_ref())
    }

    /// `token || '.' || base64url(sha256-thumbprint)` as served at
    /// `/.well-known/acme-challenge/<token>`.
    pub fn key_authorization(&self, token: &str) -> String {
        format!("{}.{}", token, self.jwk_thumbprint())
    }

    /// Build a flattened JWS over `payload` for `url`. Before the account
    /// exists the header carries the full `jwk`; afterwards the account URL
    /// as `kid`.
    pub fn sign_flattened(&self, url: &str, nonce: &str, kid: Option<&str>, payload: &[u8]) -> Result<serde_json::Value, AcmeError> {
        let protected = match kid {
            Some(kid) => json!({
                "alg": "ES256",
                "kid": kid,
                "nonce": nonce,
                "url": url,
            }),
            None => json!({
                "alg": "ES256",
                "jwk": self.jwk(),
                "nonce": nonce,
                "url": url,
            }),
        };

        let protected_b64 = b64url(protected.to_string().as_bytes());
        let payload_b64 = b64url(payload);
        let signing_input = format!("{protected_b64}.{payload_b64}");
        let signature = self.keypair.sign(&self.rng, signing_input.as_bytes()).map_err(crypto_err)?;

        Ok(json!({
            "protected": protected_b64,
            "payload": payload_b64,
            "signature": b64url(signature.as_ref()),
        }))
    }
}

impl std::fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountKey").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn key_round_trips_through_storage() {
        let key = AccountKey::generate().unwrap();
        let stored = key.to_stored();
        let back = AccountKey::from_stored(&stored).unwrap();
        assert_eq!(key.jwk(), back.jwk());
        assert_eq!(key.jwk_thumbprint(), back.jwk_thumbprint());
    }

    #[test]
    fn key_authorization_is_token_dot_thumbprint() {
        let key = AccountKey::generate().unwrap();
        let token = "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJ-PCt92wr-oA";
        let auth = key.key_authorization(token);
        let (t, print) = auth.split_once('.').unwrap();
        assert_eq!(t, token);
        assert_eq!(print, key.jwk_thumbprint());
        // base64url alphabet only
        assert!(print.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn flattened_jws_has_all_three_members() {
        let key = AccountKey::generate().unwrap();
        let jws = key
            .sign_flattened("https://acme.example/new-account", "abc123", None, br#"{"termsOfServiceAgreed":true}"#)
            .unwrap();
        assert!(jws["protected"].is_string());
        assert!(jws["payload"].is_string());
        assert!(jws["signature"].is_string());

        // The pre-account form must carry the jwk, not a kid.
        let protected: serde_json::Value =
            serde_json::from_slice(&base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(jws["protected"].as_str().unwrap()).unwrap()).unwrap();
        assert_eq!(protected["alg"], "ES256");
        assert!(protected["jwk"].is_object());
        assert!(protected["kid"].is_null());
    }
}
