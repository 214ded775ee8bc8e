//! The administrator: implements the RPC handlers and mediates between admin
//! sessions and the running server.

mod acme_ops;
mod certificates;
mod groups_and_users;
mod ip_filters;
pub mod notifier;
mod options_ops;

use super::proto::{AdminLogin, AdminLoginOk, EBADMSG, Msg, PROTOCOL_VERSION, Response};
use super::session::{AdminRequestHandler, AdminSessionHandle};
use crate::acme::AcmeHttp;
use crate::auth::{FileBasedAuthenticator, StoredCredentials};
use crate::config::{Archiver, IpFilterLists, Settings, files};
use crate::server::autobanner::Autobanner;
use crate::server::registry::SessionRegistry;
use async_trait::async_trait;
use dashmap::DashMap;
use slog::Logger;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Settings writes are batched: the save runs this long after the first
/// mutation that made the state dirty.
const SAVE_DEBOUNCE: Duration = Duration::from_secs(2);

pub struct Administrator {
    /// The admin password record; a missing record refuses every login.
    password: Option<StoredCredentials>,
    server_host: String,
    pub(crate) authenticator: Arc<FileBasedAuthenticator>,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) autobanner: Arc<Autobanner>,
    pub(crate) settings: Mutex<Settings>,
    pub(crate) ip_filters: Mutex<IpFilterLists>,
    pub(crate) archiver: Archiver,
    pub(crate) acme_http: Arc<dyn AcmeHttp>,
    pub(crate) cert_dir: PathBuf,
    can_impersonate: bool,
    online: AtomicBool,
    save_pending: AtomicBool,
    sessions: DashMap<u64, AdminSessionHandle>,
    pub(crate) logger: Logger,
}

impl Administrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        password: Option<StoredCredentials>,
        server_host: String,
        authenticator: Arc<FileBasedAuthenticator>,
        registry: Arc<SessionRegistry>,
        autobanner: Arc<Autobanner>,
        settings: Settings,
        ip_filters: IpFilterLists,
        archiver: Archiver,
        acme_http: Arc<dyn AcmeHttp>,
        can_impersonate: bool,
        logger: Logger,
    ) -> Arc<Administrator> {
        let cert_dir = archiver.dir().join("certificates");
        Arc::new(Administrator {
            password,
            server_host,
            authenticator,
            registry,
            autobanner,
            settings: Mutex::new(settings),
            ip_filters: Mutex::new(ip_filters),
            archiver,
            acme_http,
            cert_dir,
            can_impersonate,
            online: AtomicBool::new(true),
            save_pending: AtomicBool::new(false),
            sessions: DashMap::new(),
            logger,
        })
    }

    /// Send to every connected admin session; the per-session masks and
    /// overflow state decide who actually gets it.
    pub fn broadcast(&self, msg: Msg) {
        for session in self.sessions.iter() {
            session.send(msg.clone());
        }
    }

    /// Batch a settings write. Mutations within the debounce window collapse
    /// into a single save.
    pub(crate) fn schedule_save(self: &Arc<Self>) {
        if self.save_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let admin = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SAVE_DEBOUNCE).await;
            admin.save_pending.store(false, Ordering::SeqCst);
            let settings = admin.settings.lock().await.clone();
            if let Err(err) = admin.archiver.save(files::SETTINGS, &settings) {
                slog::error!(admin.logger, "Saving settings failed: {}", err);
            }
            let filters = admin.ip_filters.lock().await.clone();
            if let Err(err) = admin.archiver.save(files::DISALLOWED_IPS, &filters.disallowed) {
                slog::error!(admin.logger, "Saving IP filters failed: {}", err);
            }
            if let Err(err) = admin.archiver.save(files::ALLOWED_IPS, &filters.allowed) {
                slog::error!(admin.logger, "Saving IP filters failed: {}", err);
            }
        });
    }

    fn verify_login(&self, login: &AdminLogin) -> Result<(), Response<AdminLoginOk>> {
        if login.protocol_version != PROTOCOL_VERSION {
            return Err(Response::failure(
                EBADMSG,
                format!("protocol version mismatch: client {} server {}", login.protocol_version, PROTOCOL_VERSION),
            ));
        }
        let verified = self.password.as_ref().map(|record| record.verify(&login.password)).unwrap_or(false);
        if !verified {
            return Err(Response::failure(1, "invalid password"));
        }
        Ok(())
    }

    async fn handle_login(self: &Arc<Self>, login: AdminLogin, session: &AdminSessionHandle) -> Option<Msg> {
        match self.verify_login(&login) {
            Ok(()) => {
                slog::info!(self.logger, "Administrator logged in"; "peer" => %session.peer);
                // The response must go out under the pre-login mask; only
                // then does the full catalog open up (which closes the login
                // pair itself).
                session.send(Msg::AdminLoginResponse(Response::Success(AdminLoginOk {
                    server_version: env!("CARGO_PKG_VERSION").to_string(),
                    server_host: self.server_host.clone(),
                    can_impersonate: self.can_impersonate,
                })));
                session.unlock_after_login();
                self.send_snapshots(session).await;
                None
            }
            Err(failure) => {
                slog::warn!(self.logger, "Administrator login refused"; "peer" => %session.peer);
                session.send(Msg::AdminLoginResponse(failure));
                session.close();
                None
            }
        }
    }

    /// Current server status plus one start/user pair per live session;
    /// pushed after login and replayed after an overflow clears.
    async fn send_snapshots(&self, session: &AdminSessionHandle) {
        session.send(Msg::ServerStatus {
            online: self.online.load(Ordering::SeqCst),
        });
        for info in self.registry.list() {
            session.send(Msg::SessionStart(super::proto::SessionStart {
                session_id: info.id,
                start_unix_ms: info
                    .start_time
                    .duration_since(std::time::SystemTime::UNIX_EPOCH)
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0),
                peer_ip: info.peer_ip.to_string(),
                family: if info.peer_ip.is_ipv4() { 0 } else { 1 },
            }));
            if let Some(username) = info.username {
                session.send(Msg::SessionUserName {
                    at: super::proto::SessionRef {
                        session_id: info.id,
                        since_start_ms: 0,
                    },
                    username,
                });
            }
        }
    }

    async fn handle_ban_ip(&self, ip: String, session: &AdminSessionHandle) -> Msg {
        let Ok(addr) = ip.parse::<std::net::IpAddr>() else {
            return Msg::BanIpResponse(Response::failure(22, "invalid address"));
        };
        slog::info!(self.logger, "Banning address on admin request"; "ip" => %addr, "by" => %session.peer);
        self.autobanner.ban(addr);
        self.registry.end_sessions_from(addr).await;
        Msg::BanIpResponse(Response::Success(()))
    }

    async fn handle_solicit_session_info(&self, session_ids: Vec<u64>, session: &AdminSessionHandle) {
        let wanted: std::collections::HashSet<u64> = session_ids.into_iter().collect();
        for info in self.registry.list() {
            if !wanted.is_empty() && !wanted.contains(&info.id) {
                continue;
            }
            session.send(Msg::SessionStart(super::proto::SessionStart {
                session_id: info.id,
                start_unix_ms: info
                    .start_time
                    .duration_since(std::time::SystemTime::UNIX_EPOCH)
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0),
                peer_ip: info.peer_ip.to_string(),
                family: if info.peer_ip.is_ipv4() { 0 } else { 1 },
            }));
        }
    }
}

#[async_trait]
impl AdminRequestHandler for Arc<Administrator> {
    async fn on_accepted(&self, session: &AdminSessionHandle) {
        self.sessions.insert(session.id, session.clone());
    }

    async fn handle(&self, msg: Msg, session: &AdminSessionHandle) -> Option<Msg> {
        match msg {
            Msg::AdminLogin(login) => self.handle_login(login, session).await,

            Msg::BanIp { ip, .. } => Some(self.handle_ban_ip(ip, session).await),
            Msg::EndSessions { session_ids } => {
                let ended = self.registry.end_sessions(&session_ids).await;
                Some(Msg::EndSessionsResponse(Response::Success(ended as u64)))
            }
            Msg::SetServerStatus { online } => {
                self.online.store(online, Ordering::SeqCst);
                self.broadcast(Msg::ServerStatus { online });
                Some(Msg::SetServerStatusResponse(Response::Success(())))
            }
            Msg::SolicitSessionInfo { session_ids } => {
                self.handle_solicit_session_info(session_ids, session).await;
                None
            }

            Msg::GetUsersAndGroups => Some(self.handle_get_users_and_groups().await),
            Msg::SetUsersAndGroups { db_json, save } => Some(self.handle_set_users_and_groups(db_json, save).await),

            Msg::GetIpFilters => Some(self.handle_get_ip_filters().await),
            Msg::SetIpFilters(filters) => Some(self.handle_set_ip_filters(filters).await),

            Msg::GetFtpOptions => Some(self.get_options_json(OptionsSection::Ftp).await),
            Msg::SetFtpOptions { options_json } => Some(self.set_options_json(OptionsSection::Ftp, options_json).await),
            Msg::GetAdminOptions => Some(self.get_options_json(OptionsSection::Admin).await),
            Msg::SetAdminOptions { options_json } => Some(self.set_options_json(OptionsSection::Admin, options_json).await),
            Msg::GetLoggerOptions => Some(self.get_options_json(OptionsSection::Logger).await),
            Msg::SetLoggerOptions { options_json } => Some(self.set_options_json(OptionsSection::Logger, options_json).await),
            Msg::GetProtocolOptions => Some(self.get_options_json(OptionsSection::Protocols).await),
            Msg::SetProtocolOptions { options_json } => Some(self.set_options_json(OptionsSection::Protocols, options_json).await),
            Msg::GetAcmeOptions => Some(self.get_options_json(OptionsSection::Acme).await),
            Msg::SetAcmeOptions { options_json } => Some(self.set_options_json(OptionsSection::Acme, options_json).await),
            Msg::GetUpdateOptions => Some(self.get_options_json(OptionsSection::Updates).await),
            Msg::SetUpdateOptions { options_json } => Some(self.set_options_json(OptionsSection::Updates, options_json).await),

            Msg::UploadCertificate {
                reqid,
                cert_pem,
                key_pem,
                password,
            } => Some(self.handle_upload_certificate(reqid, cert_pem, key_pem, password).await),
            Msg::GenerateSelfSignedCertificate {
                reqid,
                distinguished_name,
                hostnames,
            } => Some(self.handle_generate_self_signed(reqid, distinguished_name, hostnames).await),
            Msg::GetExtraCertsInfo { reqid, cert_pem } => Some(self.handle_get_extra_certs_info(reqid, cert_pem).await),

            Msg::GetAcmeTermsOfService { directory } => Some(self.handle_acme_terms_of_service(directory).await),
            Msg::GenerateAcmeAccount {
                directory,
                contacts,
                terms_of_service_agreed,
            } => Some(self.handle_generate_acme_account(directory, contacts, terms_of_service_agreed).await),
            Msg::RestoreAcmeAccount { account_id, account_json } => Some(self.handle_restore_acme_account(account_id, account_json).await),
            Msg::GenerateAcmeCertificate { reqid, how, hostnames } => Some(self.handle_generate_acme_certificate(reqid, how, hostnames).await),

            Msg::SolicitUpdateInfo => {
                let info = serde_json::json!({ "checked": false, "reason": "update checks are not configured" });
                session.send(Msg::UpdateInfo { info_json: info.to_string() });
                None
            }

            // Responses, broadcasts and exceptions arriving here need no
            // reply; AcknowledgeQueueFullResponse is consumed by the session
            // engine before dispatch.
            other => {
                slog::debug!(self.logger, "Ignoring non-command message"; "index" => other.index());
                None
            }
        }
    }

    async fn on_overflow_cleared(&self, session: &AdminSessionHandle) {
        slog::debug!(self.logger, "Admin session drained its queue; replaying snapshots"; "peer" => %session.peer);
        self.send_snapshots(session).await;
    }

    async fn on_closed(&self, session: &AdminSessionHandle) {
        self.sessions.remove(&session.id);
    }
}

/// Which settings section an options command addresses.
#[derive(Debug, Clone, Copy)]
pub(crate) enum OptionsSection {
    Ftp,
    Admin,
    Logger,
    Protocols,
    Acme,
    Updates,
}
