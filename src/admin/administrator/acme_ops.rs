//! The ACME admin commands: terms of service, account management and
//! certificate issuance.
//!
//! The account key lives under `<config-dir>/certificates/acme/<account_id>.key`
//! with the account object next to it as `<account_id>.json`.

use super::Administrator;
use crate::acme::jws::StoredAccountKey;
use crate::acme::{AccountKey, AcmeClient, Challenger, ExternalChallenger, InternalChallenger};
use crate::admin::proto::{CertIssued, ChallengeHow, Msg, Response};
use std::sync::Arc;
use std::time::Duration;

impl Administrator {
    fn acme_client(&self, allowed_clock_skew: Duration) -> AcmeClient {
        AcmeClient::new(self.acme_http.clone(), allowed_clock_skew, self.logger.new(slog::o!("module" => "acme")))
    }

    async fn allowed_clock_skew(&self) -> Duration {
        Duration::from_secs(self.settings.lock().await.acme.allowed_clock_skew_secs)
    }

    pub(super) async fn handle_acme_terms_of_service(&self, directory: String) -> Msg {
        let client = self.acme_client(self.allowed_clock_skew().await);
        match client.get_terms_of_service(&directory).await {
            Ok(terms_uri) => Msg::GetAcmeTermsOfServiceResponse(Response::Success(terms_uri)),
            Err(err) => Msg::GetAcmeTermsOfServiceResponse(Response::failure(5, err.to_string())),
        }
    }

    pub(super) async fn handle_generate_acme_account(self: &Arc<Self>, directory: String, contacts: Vec<String>, terms_of_service_agreed: bool) -> Msg {
        if !terms_of_service_agreed {
            return Msg::GenerateAcmeAccountResponse(Response::failure(22, "terms of service must be agreed to"));
        }

        let key = match AccountKey::generate() {
            Ok(key) => key,
            Err(err) => return Msg::GenerateAcmeAccountResponse(Response::failure(5, err.to_string())),
        };

        let client = self.acme_client(self.allowed_clock_skew().await);
        let (kid, account) = match client.get_account(&directory, &key, &contacts, false).await {
            Ok(result) => result,
            Err(err) => return Msg::GenerateAcmeAccountResponse(Response::failure(5, err.to_string())),
        };

        // The thumbprint doubles as a filesystem-safe account id.
        let account_id = key.jwk_thumbprint();
        if let Err(err) = self.persist_acme_account(&account_id, &key, &directory, &kid, &account) {
            return Msg::GenerateAcmeAccountResponse(Response::failure(5, err.to_string()));
        }

        {
            let mut settings = self.settings.lock().await;
            settings.acme.directory = Some(directory);
            settings.acme.contacts = contacts;
            settings.acme.account_id = Some(account_id.clone());
        }
        self.schedule_save();

        Msg::GenerateAcmeAccountResponse(Response::Success(account_id))
    }

    pub(super) async fn handle_restore_acme_account(self: &Arc<Self>, account_id: String, account_json: String) -> Msg {
        let parsed: serde_json::Value = match serde_json::from_str(&account_json) {
            Ok(parsed) => parsed,
            Err(err) => return Msg::RestoreAcmeAccountResponse(Response::failure(22, err.to_string())),
        };
        let Some(key_json) = parsed.get("key") else {
            return Msg::RestoreAcmeAccountResponse(Response::failure(22, "account document without key"));
        };
        let stored: StoredAccountKey = match serde_json::from_value(key_json.clone()) {
            Ok(stored) => stored,
            Err(err) => return Msg::RestoreAcmeAccountResponse(Response::failure(22, err.to_string())),
        };
        if AccountKey::from_stored(&stored).is_err() {
            return Msg::RestoreAcmeAccountResponse(Response::failure(22, "account key does not parse"));
        }

        let dir = self.acme_account_dir();
        if let Err(err) = std::fs::create_dir_all(&dir).and_then(|()| std::fs::write(dir.join(format!("{account_id}.json")), &account_json)) {
            return Msg::RestoreAcmeAccountResponse(Response::failure(5, err.to_string()));
        }

        {
            let mut settings = self.settings.lock().await;
            settings.acme.account_id = Some(account_id);
        }
        self.schedule_save();
        Msg::RestoreAcmeAccountResponse(Response::Success(()))
    }

    pub(super) async fn handle_generate_acme_certificate(self: &Arc<Self>, reqid: u64, how: ChallengeHow, hostnames: Vec<String>) -> Msg {
        if hostnames.is_empty() {
            return Msg::GenerateAcmeCertificateResponse(Response::failure(22, "no hostnames given"));
        }

        let (directory, account_id) = {
            let settings = self.settings.lock().await;
            (settings.acme.directory.clone(), settings.acme.account_id.clone())
        };
        let (Some(directory), Some(account_id)) = (directory, account_id) else {
            return Msg::GenerateAcmeCertificateResponse(Response::failure(22, "no ACME account configured"));
        };

        let key = match self.load_acme_account_key(&account_id) {
            Ok(key) => key,
            Err(err) => return Msg::GenerateAcmeCertificateResponse(Response::failure(5, err)),
        };

        let challenger: Box<dyn Challenger> = match how {
            ChallengeHow::Internal { addresses } => {
                let mut parsed = Vec::new();
                for addr in addresses {
                    match addr.parse() {
                        Ok(addr) => parsed.push(addr),
                        Err(_) => return Msg::GenerateAcmeCertificateResponse(Response::failure(22, format!("invalid address: {addr}"))),
                    }
                }
                Box::new(InternalChallenger::new(parsed, self.logger.new(slog::o!("module" => "acme-challenge"))))
            }
            ChallengeHow::External {
                well_known_path,
                create_parents,
            } => Box::new(ExternalChallenger::new(well_known_path.into(), create_parents, self.logger.new(slog::o!("module" => "acme-challenge")))),
        };

        let client = self.acme_client(self.allowed_clock_skew().await);
        match client.get_certificate(&directory, &key, &hostnames, challenger.as_ref()).await {
            Ok(issued) => match self.persist_certificate(&issued.certificate_chain_pem, &issued.private_key_pem) {
                Ok(fingerprint) => Msg::GenerateAcmeCertificateResponse(Response::Success(CertIssued {
                    reqid,
                    cert_pem: issued.certificate_chain_pem,
                    fingerprint_sha256: fingerprint,
                })),
                Err(err) => Msg::GenerateAcmeCertificateResponse(Response::failure(5, err.to_string())),
            },
            Err(err) => Msg::GenerateAcmeCertificateResponse(Response::failure(5, err.to_string())),
        }
    }

    fn persist_acme_account(&self, account_id: &str, key: &AccountKey, directory: &str, kid: &str, account: &serde_json::Value) -> std::io::Result<()> {
        let dir = self.acme_account_dir();
        std::fs::create_dir_all(&dir)?;
        let document = serde_json::json!({
            "directory": directory,
            "kid": kid,
            "account": account,
            "key": key.to_stored(),
        });
        std::fs::write(dir.join(format!("{account_id}.json")), serde_json::to_string_pretty(&document).unwrap_or_default())?;
        std::fs::write(dir.join(format!("{account_id}.key")), key.to_stored().pkcs8_b64)?;
        Ok(())
    }

    fn load_acme_account_key(&self, account_id: &str) -> Result<AccountKey, String> {
        let path = self.acme_account_dir().join(format!("{account_id}.json"));
        let text = std::fs::read_to_string(&path).map_err(|e| format!("reading {}: {e}", path.display()))?;
        let document: serde_json::Value = serde_json::from_str(&text).map_err(|e| e.to_string())?;
        let stored: StoredAccountKey = serde_json::from_value(document["key"].clone()).map_err(|e| e.to_string())?;
        AccountKey::from_stored(&stored).map_err(|e| e.to_string())
    }
}
