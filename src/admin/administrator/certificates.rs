//! Certificate handling: uploads, self-signed generation, extra info.
//!
//! Chains are persisted under `<config-dir>/certificates/<sha256>.crt` with
//! the key next to them as `<sha256>.key`.

use super::Administrator;
use crate::admin::proto::{CertIssued, Msg, Response};
use crate::server::tls;
use ring::digest;
use std::path::PathBuf;
use std::sync::Arc;

pub(super) fn fingerprint_hex(pem: &str) -> String {
    let digest = digest::digest(&digest::SHA256, pem.as_bytes());
    digest.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}

impl Administrator {
    pub(super) fn persist_certificate(&self, cert_pem: &str, key_pem: &str) -> std::io::Result<String> {
        let fingerprint = fingerprint_hex(cert_pem);
        std::fs::create_dir_all(&self.cert_dir)?;
        std::fs::write(self.cert_dir.join(format!("{fingerprint}.crt")), cert_pem)?;
        std::fs::write(self.cert_dir.join(format!("{fingerprint}.key")), key_pem)?;
        Ok(fingerprint)
    }

    pub(super) fn acme_account_dir(&self) -> PathBuf {
        self.cert_dir.join("acme")
    }

    pub(super) async fn handle_upload_certificate(self: &Arc<Self>, reqid: u64, cert_pem: String, key_pem: String, _password: String) -> Msg {
        // When the key is empty it is assumed to be bundled in cert_pem.
        let key_pem_effective = if key_pem.is_empty() { cert_pem.clone() } else { key_pem };

        // The PEM must actually parse before it is persisted.
        let mut cert_reader = std::io::BufReader::new(cert_pem.as_bytes());
        let certs: Vec<_> = match rustls_pemfile::certs(&mut cert_reader).collect::<Result<_, _>>() {
            Ok(certs) => certs,
            Err(err) => return Msg::UploadCertificateResponse(Response::failure(22, format!("invalid certificate: {err}"))),
        };
        if certs.is_empty() {
            return Msg::UploadCertificateResponse(Response::failure(22, "no certificates in upload"));
        }
        let mut key_reader = std::io::BufReader::new(key_pem_effective.as_bytes());
        match rustls_pemfile::private_key(&mut key_reader) {
            Ok(Some(_)) => {}
            Ok(None) => return Msg::UploadCertificateResponse(Response::failure(22, "no private key in upload")),
            Err(err) => return Msg::UploadCertificateResponse(Response::failure(22, format!("invalid key: {err}"))),
        }

        match self.persist_certificate(&cert_pem, &key_pem_effective) {
            Ok(fingerprint) => Msg::UploadCertificateResponse(Response::Success(CertIssued {
                reqid,
                cert_pem,
                fingerprint_sha256: fingerprint,
            })),
            Err(err) => Msg::UploadCertificateResponse(Response::failure(5, err.to_string())),
        }
    }

    pub(super) async fn handle_generate_self_signed(self: &Arc<Self>, reqid: u64, distinguished_name: String, hostnames: Vec<String>) -> Msg {
        if hostnames.is_empty() {
            return Msg::GenerateSelfSignedCertificateResponse(Response::failure(22, "no hostnames given"));
        }
        match tls::generate_self_signed(&distinguished_name, &hostnames) {
            Ok((cert_pem, key_pem)) => match self.persist_certificate(&cert_pem, &key_pem) {
                Ok(fingerprint) => Msg::GenerateSelfSignedCertificateResponse(Response::Success(CertIssued {
                    reqid,
                    cert_pem,
                    fingerprint_sha256: fingerprint,
                })),
                Err(err) => Msg::GenerateSelfSignedCertificateResponse(Response::failure(5, err.to_string())),
            },
            Err(err) => Msg::GenerateSelfSignedCertificateResponse(Response::failure(5, err.to_string())),
        }
    }

    pub(super) async fn handle_get_extra_certs_info(&self, reqid: u64, cert_pem: String) -> Msg {
        let mut reader = std::io::BufReader::new(cert_pem.as_bytes());
        let blocks = rustls_pemfile::certs(&mut reader).filter_map(|c| c.ok()).count();
        if blocks == 0 {
            return Msg::GetExtraCertsInfoResponse(Response::failure(22, "no certificates in input"));
        }
        let info = serde_json::json!({
            "reqid": reqid,
            "fingerprint_sha256": fingerprint_hex(&cert_pem),
            "chain_length": blocks,
        });
        Msg::GetExtraCertsInfoResponse(Response::Success(info.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::fingerprint_hex;
    use pretty_assertions::assert_eq;

    #[test]
    fn fingerprints_are_hex_sha256() {
        let print = fingerprint_hex("hello");
        assert_eq!(print.len(), 64);
        assert_eq!(print, "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");
    }
}
