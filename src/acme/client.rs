//! The ACME order state machine: directory → nonce → account → order →
//! authorizations → challenges → finalize → certificate.
//!
//! Each operation is an explicit sequence of steps; an HTTP exchange is a
//! suspension point and nothing else. Only one operation runs per client at
//! a time.

use super::challenger::Challenger;
use super::http::{AcmeHttp, HttpResponse};
use super::jws::AccountKey;
use super::{AcmeError, AcmeErrorKind};
use chrono::Utc;
use slog::Logger;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const JOSE_CONTENT_TYPE: &str = "application/jose+json";
const BAD_NONCE: &str = "urn:ietf:params:acme:error:badNonce";

/// How often and how long we poll authorizations and the order.
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_POLLS: usize = 150;

/// The outcome of a successful issuance.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub private_key_pem: String,
    pub certificate_chain_pem: String,
}

pub struct AcmeClient {
    http: Arc<dyn AcmeHttp>,
    logger: Logger,
    /// Monotonic operation id; zero means idle.
    opid: AtomicU64,
    next_opid: AtomicU64,
    allowed_clock_skew: Duration,
}

/// The state one `get_certificate` run carries between steps.
struct Op {
    directory_uri: String,
    directory: Option<serde_json::Value>,
    nonce: Option<String>,
    kid: Option<String>,
    hosts: Vec<String>,
    order: Option<serde_json::Value>,
    order_location: Option<String>,
    retry_after: Option<Duration>,
    /// Keyed by identifier value, not by index: the server may return
    /// authorizations in any order.
    authorizations: HashMap<String, Authorization>,
}

struct Authorization {
    url: String,
    status: String,
    challenge_url: String,
    challenge_token: String,
    challenge_status: String,
}

impl AcmeClient {
    pub fn new(http: Arc<dyn AcmeHttp>, allowed_clock_skew: Duration, logger: Logger) -> AcmeClient {
        AcmeClient {
            http,
            logger,
            opid: AtomicU64::new(0),
            next_opid: AtomicU64::new(1),
            allowed_clock_skew,
        }
    }

    fn begin_op(&self) -> Result<u64, AcmeError> {
        let id = self.next_opid.fetch_add(1, Ordering::SeqCst);
        match self.opid.compare_exchange(0, id, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => Ok(id),
            Err(_) => Err(AcmeErrorKind::OperationInProgress.into()),
        }
    }

    fn end_op(&self) {
        self.opid.store(0, Ordering::SeqCst);
    }

    /// Fetch the directory's terms-of-service URI.
    pub async fn get_terms_of_service(&self, directory_uri: &str) -> Result<String, AcmeError> {
        self.begin_op()?;
        let result = self.do_get_terms_of_service(directory_uri).await;
        self.end_op();
        result
    }

    async fn do_get_terms_of_service(&self, directory_uri: &str) -> Result<String, AcmeError> {
        slog::debug!(self.logger, "Getting terms of service");
        let response = self.http.request("GET", directory_uri, None, Vec::new()).await?;
        self.check_clock(&response)?;
        let directory = response.json()?;
        directory["meta"]["termsOfService"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AcmeErrorKind::BadDirectory.into())
    }

    /// Create (or look up) the account for `key`. Returns the account URL
    /// (the `kid`) and the account object.
    pub async fn get_account(&self, directory_uri: &str, key: &AccountKey, contacts: &[String], only_return_existing: bool) -> Result<(String, serde_json::Value), AcmeError> {
        self.begin_op()?;
        let result = self.do_get_account_op(directory_uri, key, contacts, only_return_existing).await;
        self.end_op();
        result
    }

    async fn do_get_account_op(&self, directory_uri: &str, key: &AccountKey, contacts: &[String], only_return_existing: bool) -> Result<(String, serde_json::Value), AcmeError> {
        let mut op = Op {
            directory_uri: directory_uri.to_string(),
            directory: None,
            nonce: None,
            kid: None,
            hosts: Vec::new(),
            order: None,
            order_location: None,
            retry_after: None,
            authorizations: HashMap::new(),
        };
        self.do_get_directory(&mut op).await?;
        self.do_get_nonce(&mut op).await?;
        self.do_get_account(&mut op, key, contacts, only_return_existing).await
    }

    /// Run the whole issuance pipeline for `hosts`.
    pub async fn get_certificate(
        &self,
        directory_uri: &str,
        key: &AccountKey,
        hosts: &[String],
        challenger: &dyn Challenger,
    ) -> Result<IssuedCertificate, AcmeError> {
        self.begin_op()?;
        let result = self.do_get_certificate(directory_uri, key, hosts, challenger).await;
        self.end_op();
        result
    }

    async fn do_get_certificate(&self, directory_uri: &str, key: &AccountKey, hosts: &[String], challenger: &dyn Challenger) -> Result<IssuedCertificate, AcmeError> {
        let mut op = Op {
            directory_uri: directory_uri.to_string(),
            directory: None,
            nonce: None,
            kid: None,
            hosts: hosts.to_vec(),
            order: None,
            order_location: None,
            retry_after: None,
            authorizations: HashMap::new(),
        };

        self.do_get_directory(&mut op).await?;
        self.do_get_nonce(&mut op).await?;
        self.do_get_account(&mut op, key, &[], true).await?;
        self.do_get_certificate_order(&mut op, key).await?;
        self.do_get_account_authorizations(&mut op, key).await?;
        self.do_start_challenges(&mut op, key, challenger).await?;
        self.do_wait_for_challenges_done(&mut op, key).await?;
        let private_key_pem = self.do_finalize(&mut op, key).await?;
        let certificate_chain_pem = self.do_fetch_certificate(&mut op, key).await?;

        Ok(IssuedCertificate {
            private_key_pem,
            certificate_chain_pem,
        })
    }

    async fn do_get_directory(&self, op: &mut Op) -> Result<(), AcmeError> {
        if op.directory.is_some() {
            return Ok(());
        }
        slog::debug!(self.logger, "Getting directory"; "uri" => &op.directory_uri);
        let response = self.http.request("GET", &op.directory_uri, None, Vec::new()).await?;
        self.check_clock(&response)?;
        let directory = response.json()?;
        if !directory.is_object() {
            return Err(AcmeErrorKind::BadDirectory.into());
        }
        op.directory = Some(directory);
        Ok(())
    }

    async fn do_get_nonce(&self, op: &mut Op) -> Result<(), AcmeError> {
        if op.nonce.is_some() {
            return Ok(());
        }
        let new_nonce_uri = self.directory_url(op, "newNonce")?;
        slog::debug!(self.logger, "Getting nonce");
        let response = self.http.request("HEAD", &new_nonce_uri, None, Vec::new()).await?;
        self.check_clock(&response)?;
        op.nonce = response.header("replay-nonce").map(str::to_string);
        if op.nonce.is_none() {
            return Err(AcmeErrorKind::MissingNonce.into());
        }
        Ok(())
    }

    async fn do_get_account(&self, op: &mut Op, key: &AccountKey, contacts: &[String], only_return_existing: bool) -> Result<(String, serde_json::Value), AcmeError> {
        if let Some(kid) = &op.kid {
            return Ok((kid.clone(), serde_json::Value::Null));
        }
        let new_account_uri = self.directory_url(op, "newAccount")?;

        let mut payload = serde_json::json!({
            "termsOfServiceAgreed": true,
            "onlyReturnExisting": only_return_existing,
        });
        if !contacts.is_empty() {
            payload["contact"] = serde_json::Value::from(contacts.to_vec());
        }

        slog::debug!(self.logger, "Getting account");
        // The account does not exist yet as far as the header is concerned,
        // so the JWS carries the full JWK.
        let response = self.post_jws(op, key, &new_account_uri, payload.to_string().into_bytes(), false).await?;
        let account = response.json()?;
        let kid = response
            .header("location")
            .map(str::to_string)
            .ok_or_else(|| AcmeError::new(AcmeErrorKind::Json("account response without Location".into())))?;
        if response.status == 201 {
            slog::info!(self.logger, "ACME account newly created"; "kid" => &kid);
        }
        op.kid = Some(kid.clone());
        Ok((kid, account))
    }

    async fn do_get_certificate_order(&self, op: &mut Op, key: &AccountKey) -> Result<(), AcmeError> {
        if op.order.is_some() {
            return Ok(());
        }
        let new_order_uri = self.directory_url(op, "newOrder")?;
        let identifiers: Vec<serde_json::Value> = op.hosts.iter().map(|h| serde_json::json!({"type": "dns", "value": h})).collect();
        let payload = serde_json::json!({ "identifiers": identifiers });

        slog::debug!(self.logger, "Creating certificate order");
        let response = self.post_jws(op, key, &new_order_uri, payload.to_string().into_bytes(), true).await?;
        let order = response.json()?;
        op.order_location = response.header("location").map(str::to_string);
        op.retry_after = parse_retry_after(&response);
        if op.order_location.is_none() {
            return Err(AcmeErrorKind::Json("order response without Location".into()).into());
        }
        op.order = Some(order);
        Ok(())
    }

    /// Fetch every authorization and pick its http-01 challenge, binding each
    /// one to the identifier the server names inside it.
    async fn do_get_account_authorizations(&self, op: &mut Op, key: &AccountKey) -> Result<(), AcmeError> {
        if self.order_status(op) != "pending" {
            slog::debug!(self.logger, "Order not pending, skipping authorization fetch");
            return Ok(());
        }

        let auth_urls: Vec<String> = op.order.as_ref().and_then(|o| o["authorizations"].as_array().cloned()).unwrap_or_default().iter().filter_map(|u| u.as_str().map(str::to_string)).collect();

        for url in auth_urls {
            let response = self.post_as_get(op, key, &url).await?;
            let auth = response.json()?;
            let identifier = auth["identifier"]["value"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| AcmeError::new(AcmeErrorKind::Json("authorization without identifier".into())))?;

            let challenge = auth["challenges"]
                .as_array()
                .and_then(|cs| cs.iter().find(|c| c["type"] == "http-01"))
                .cloned()
                .ok_or_else(|| AcmeError::new(AcmeErrorKind::ChallengeFailed(format!("no http-01 challenge for {identifier}"))))?;

            op.authorizations.insert(
                identifier.clone(),
                Authorization {
                    url,
                    status: auth["status"].as_str().unwrap_or_default().to_string(),
                    challenge_url: challenge["url"].as_str().unwrap_or_default().to_string(),
                    challenge_token: challenge["token"].as_str().unwrap_or_default().to_string(),
                    challenge_status: challenge["status"].as_str().unwrap_or_default().to_string(),
                },
            );
        }

        for host in &op.hosts {
            if !op.authorizations.contains_key(host) {
                return Err(AcmeErrorKind::MissingAuthorization(host.clone()).into());
            }
        }
        Ok(())
    }

    async fn do_start_challenges(&self, op: &mut Op, key: &AccountKey, challenger: &dyn Challenger) -> Result<(), AcmeError> {
        if self.order_status(op) != "pending" {
            return Ok(());
        }

        let pending: Vec<(String, String, String)> = op
            .authorizations
            .iter()
            .filter(|(_, a)| a.challenge_status == "pending")
            .map(|(host, a)| (host.clone(), a.challenge_url.clone(), a.challenge_token.clone()))
            .collect();

        for (host, challenge_url, token) in pending {
            let key_authorization = key.key_authorization(&token);
            challenger
                .serve(&token, &key_authorization)
                .await
                .map_err(|e| AcmeError::new(AcmeErrorKind::Challenger(format!("{host}: {e}"))))?;

            slog::info!(self.logger, "Starting challenge"; "host" => &host);
            // Posting the empty object tells the server to go validate.
            let response = self.post_jws(op, key, &challenge_url, b"{}".to_vec(), true).await?;
            let _ = response.json();
        }
        Ok(())
    }

    async fn do_wait_for_challenges_done(&self, op: &mut Op, key: &AccountKey) -> Result<(), AcmeError> {
        if self.order_status(op) != "pending" {
            return Ok(());
        }

        let hosts: Vec<String> = op.authorizations.keys().cloned().collect();
        let mut next = 0usize;

        for _ in 0..MAX_POLLS {
            if op.authorizations.values().all(|a| a.status == "valid") {
                slog::debug!(self.logger, "All authorizations valid");
                return Ok(());
            }
            if let Some((host, _)) = op.authorizations.iter().find(|(_, a)| a.status == "invalid") {
                return Err(AcmeErrorKind::ChallengeFailed(format!("authorization for {host} is invalid")).into());
            }

            // Round-robin over the authorizations still in flight.
            let host = hosts[next % hosts.len()].clone();
            next += 1;
            let url = op.authorizations[&host].url.clone();

            tokio::time::sleep(POLL_INTERVAL).await;
            let response = self.post_as_get(op, key, &url).await?;
            let auth = response.json()?;
            if let Some(entry) = op.authorizations.get_mut(&host) {
                entry.status = auth["status"].as_str().unwrap_or_default().to_string();
                if entry.status == "invalid" {
                    let error = auth["challenges"]
                        .as_array()
                        .and_then(|cs| cs.iter().find(|c| c["status"] == "invalid"))
                        .map(|c| c["error"].to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    return Err(AcmeErrorKind::ChallengeFailed(error).into());
                }
            }
        }

        Err(AcmeErrorKind::Timeout("authorizations to become valid".into()).into())
    }

    /// Drive the order through `ready` → `valid`, generating the key and CSR
    /// along the way. Returns the certificate private key PEM.
    async fn do_finalize(&self, op: &mut Op, key: &AccountKey) -> Result<String, AcmeError> {
        let mut private_key_pem: Option<String> = None;

        for _ in 0..MAX_POLLS {
            match self.order_status(op).as_str() {
                "ready" => {
                    slog::info!(self.logger, "Order ready, finalizing");
                    let (csr_der, key_pem) = generate_csr(&op.hosts)?;
                    private_key_pem = Some(key_pem);

                    let finalize_uri = op
                        .order
                        .as_ref()
                        .and_then(|o| o["finalize"].as_str())
                        .map(str::to_string)
                        .ok_or_else(|| AcmeError::new(AcmeErrorKind::Json("order without finalize URI".into())))?;

                    let csr_b64 = base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, &csr_der);
                    let payload = serde_json::json!({ "csr": csr_b64 });
                    let response = self.post_jws(op, key, &finalize_uri, payload.to_string().into_bytes(), true).await?;
                    op.order = Some(response.json()?);
                    if let Some(location) = response.header("location") {
                        op.order_location = Some(location.to_string());
                    }
                    op.retry_after = parse_retry_after(&response);
                }
                "valid" => {
                    return private_key_pem.ok_or_else(|| AcmeError::new(AcmeErrorKind::BadOrderStatus("valid before finalize".into())));
                }
                "pending" | "processing" => {
                    let wait = op.retry_after.unwrap_or(POLL_INTERVAL);
                    tokio::time::sleep(wait).await;
                    let location = op
                        .order_location
                        .clone()
                        .ok_or_else(|| AcmeError::new(AcmeErrorKind::Json("no order location to poll".into())))?;
                    let response = self.post_as_get(op, key, &location).await?;
                    op.order = Some(response.json()?);
                    op.retry_after = parse_retry_after(&response);
                }
                // Anything else is a hard failure; limping on would only
                // produce stranger errors downstream.
                other => return Err(AcmeErrorKind::BadOrderStatus(other.to_string()).into()),
            }
        }

        Err(AcmeErrorKind::Timeout("order to become valid".into()).into())
    }

    async fn do_fetch_certificate(&self, op: &mut Op, key: &AccountKey) -> Result<String, AcmeError> {
        let certificate_uri = op
            .order
            .as_ref()
            .and_then(|o| o["certificate"].as_str())
            .map(str::to_string)
            .ok_or_else(|| AcmeError::new(AcmeErrorKind::Json("order without certificate URI".into())))?;

        slog::info!(self.logger, "Downloading certificate");
        let response = self.post_as_get(op, key, &certificate_uri).await?;
        String::from_utf8(response.body).map_err(|_| AcmeErrorKind::Json("certificate is not text".into()).into())
    }

    fn order_status(&self, op: &Op) -> String {
        op.order.as_ref().and_then(|o| o["status"].as_str()).unwrap_or_default().to_string()
    }

    fn directory_url(&self, op: &Op, name: &str) -> Result<String, AcmeError> {
        op.directory
            .as_ref()
            .and_then(|d| d[name].as_str())
            .map(str::to_string)
            .ok_or_else(|| AcmeErrorKind::BadDirectory.into())
    }

    /// POST-as-GET: a JWS with an empty payload.
    async fn post_as_get(&self, op: &mut Op, key: &AccountKey, url: &str) -> Result<HttpResponse, AcmeError> {
        self.post_jws(op, key, url, Vec::new(), true).await
    }

    /// Sign and POST, absorbing the nonce bookkeeping. A badNonce rejection
    /// refetches the nonce and retries the POST exactly once.
    async fn post_jws(&self, op: &mut Op, key: &AccountKey, url: &str, payload: Vec<u8>, use_kid: bool) -> Result<HttpResponse, AcmeError> {
        let mut retried = false;
        loop {
            let nonce = op.nonce.take().ok_or_else(|| AcmeError::new(AcmeErrorKind::MissingNonce))?;
            let kid = if use_kid { op.kid.as_deref() } else { None };
            let jws = key.sign_flattened(url, &nonce, kid, &payload)?;

            let response = self.http.request("POST", url, Some(JOSE_CONTENT_TYPE), jws.to_string().into_bytes()).await?;
            self.check_clock(&response)?;
            if let Some(nonce) = response.header("replay-nonce") {
                op.nonce = Some(nonce.to_string());
            }

            if response.status >= 400 {
                let problem = response.json().unwrap_or(serde_json::Value::Null);
                if problem["type"] == BAD_NONCE && !retried {
                    slog::debug!(self.logger, "badNonce, refetching and retrying");
                    retried = true;
                    op.nonce = None;
                    self.do_get_nonce(op).await?;
                    continue;
                }
                return Err(AcmeErrorKind::Http(format!("{} returned {}: {}", url, response.status, problem)).into());
            }

            return Ok(response);
        }
    }

    /// Abort when the server's Date header is further from our clock than
    /// allowed. Disabled when the allowance is zero.
    fn check_clock(&self, response: &HttpResponse) -> Result<(), AcmeError> {
        if self.allowed_clock_skew.is_zero() {
            return Ok(());
        }
        let Some(date) = response.header("date") else {
            return Ok(());
        };
        let Ok(server_time) = chrono::DateTime::parse_from_rfc2822(date) else {
            return Ok(());
        };
        let skew = (Utc::now() - server_time.with_timezone(&Utc)).num_seconds().abs();
        if skew > self.allowed_clock_skew.as_secs() as i64 {
            return Err(AcmeErrorKind::ClockSkew { skew_secs: skew }.into());
        }
        Ok(())
    }
}

fn parse_retry_after(response: &HttpResponse) -> Option<Duration> {
    response.header("retry-after").and_then(|v| v.parse::<u64>().ok()).map(Duration::from_secs)
}

/// A fresh key and CSR covering all hostnames, CN set to the first.
fn generate_csr(hosts: &[String]) -> Result<(Vec<u8>, String), AcmeError> {
    let crypto_err = |e: rcgen::Error| AcmeError::new(AcmeErrorKind::Crypto(e.to_string()));

    let mut params = rcgen::CertificateParams::new(hosts.to_vec()).map_err(crypto_err)?;
    let mut dn = rcgen::DistinguishedName::new();
    if let Some(first) = hosts.first() {
        dn.push(rcgen::DnType::CommonName, first);
    }
    params.distinguished_name = dn;

    let key_pair = rcgen::KeyPair::generate().map_err(crypto_err)?;
    let csr = params.serialize_request(&key_pair).map_err(crypto_err)?;
    Ok((csr.der().to_vec(), key_pair.serialize_pem()))
}
