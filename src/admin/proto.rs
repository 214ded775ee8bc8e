//! The administration message catalog.
//!
//! Every message the admin plane can speak is enumerated here; the variant's
//! position in the catalog is its index on the wire. The exception variant
//! sits at slot zero. Adding, removing or reshaping any message must bump
//! [`PROTOCOL_VERSION`]; the login command embeds that version and the server
//! refuses mismatches.

use super::wire::{WireErrorKind, WireReader, WireResult, WireWriter};

/// Bumped on every change to the catalog below.
pub const PROTOCOL_VERSION: u32 = 1;

/// errno value carried by the failure response on a protocol-version mismatch.
pub const EBADMSG: i32 = 74;

/// Frame caps: before login only the login exchange fits; after login room
/// for whole user databases; the impersonator channel stays small.
pub const PRE_LOGIN_FRAME_CAP: u32 = 32 * 1024;
pub const POST_LOGIN_FRAME_CAP: u32 = 10 * 1024 * 1024;

/// What kind of exception the peer is being told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    Generic = 0,
    SerializationError = 1,
    MessageNotImplemented = 2,
}

impl ExceptionKind {
    fn from_u8(v: u8) -> WireResult<ExceptionKind> {
        match v {
            0 => Ok(ExceptionKind::Generic),
            1 => Ok(ExceptionKind::SerializationError),
            2 => Ok(ExceptionKind::MessageNotImplemented),
            _ => Err(WireErrorKind::BadTag { tag: v as u64 }.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnyException {
    pub kind: ExceptionKind,
    pub description: String,
}

/// The success/failure pair every command response is tagged with.
#[derive(Debug, Clone, PartialEq)]
pub enum Response<T> {
    Success(T),
    Failure(Failure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub code: i32,
    pub message: String,
}

impl<T> Response<T> {
    pub fn failure(code: i32, message: impl Into<String>) -> Response<T> {
        Response::Failure(Failure {
            code,
            message: message.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminLogin {
    pub protocol_version: u32,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminLoginOk {
    pub server_version: String,
    pub server_host: String,
    pub can_impersonate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    pub session_id: u64,
    pub start_unix_ms: i64,
    pub peer_ip: String,
    pub family: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRef {
    pub session_id: u64,
    pub since_start_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolInfoMsg {
    pub status: u8,
    pub protocol: String,
    pub client_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub unix_ms: i64,
    pub session_id: u64,
    pub level: u8,
    pub module: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpFilters {
    pub disallowed: Vec<String>,
    pub allowed: Vec<String>,
}

/// How ACME http-01 challenges should be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeHow {
    /// Spin up a minimal HTTP listener on these addresses.
    Internal { addresses: Vec<String> },
    /// Write key authorizations under this .well-known path.
    External { well_known_path: String, create_parents: bool },
}

impl ChallengeHow {
    fn encode(&self, w: &mut WireWriter) {
        match self {
            ChallengeHow::Internal { addresses } => {
                w.u8(0);
                w.string_list(addresses);
            }
            ChallengeHow::External {
                well_known_path,
                create_parents,
            } => {
                w.u8(1);
                w.string(well_known_path);
                w.bool(*create_parents);
            }
        }
    }

    fn decode(r: &mut WireReader) -> WireResult<ChallengeHow> {
        match r.u8()? {
            0 => Ok(ChallengeHow::Internal { addresses: r.string_list()? }),
            1 => Ok(ChallengeHow::External {
                well_known_path: r.string()?,
                create_parents: r.bool()?,
            }),
            tag => Err(WireErrorKind::BadTag { tag: tag as u64 }.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertIssued {
    pub reqid: u64,
    pub cert_pem: String,
    pub fingerprint_sha256: String,
}

/// The whole catalog. Slot zero is the exception; everything else follows in
/// a fixed order that defines the on-wire message index.
#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    Exception(AnyException),

    AdminLogin(AdminLogin),
    AdminLoginResponse(Response<AdminLoginOk>),

    SessionStart(SessionStart),
    SessionStop(SessionRef),
    SessionUserName { at: SessionRef, username: String },
    SessionEntryOpen { at: SessionRef, entry_id: u64, path: String, size: i64 },
    SessionEntryClose { at: SessionRef, entry_id: u64, error: i32 },
    SessionEntryRead { at: SessionRef, entry_id: u64, amount: u64 },
    SessionEntryWritten { at: SessionRef, entry_id: u64, amount: u64, actual_entry_size: u64 },
    SessionProtocolInfo { at: SessionRef, info: ProtocolInfoMsg },
    SolicitSessionInfo { session_ids: Vec<u64> },

    Log(LogLine),
    ServerStatus { online: bool },
    ListenerStatus { address: String, status: u8 },

    AcknowledgeQueueFull,
    AcknowledgeQueueFullResponse(Response<()>),

    BanIp { ip: String, family: u8 },
    BanIpResponse(Response<()>),
    EndSessions { session_ids: Vec<u64> },
    EndSessionsResponse(Response<u64>),
    SetServerStatus { online: bool },
    SetServerStatusResponse(Response<()>),

    GetUsersAndGroups,
    GetUsersAndGroupsResponse(Response<String>),
    SetUsersAndGroups { db_json: String, save: bool },
    SetUsersAndGroupsResponse(Response<()>),
    GetIpFilters,
    GetIpFiltersResponse(Response<IpFilters>),
    SetIpFilters(IpFilters),
    SetIpFiltersResponse(Response<()>),

    GetFtpOptions,
    GetFtpOptionsResponse(Response<String>),
    SetFtpOptions { options_json: String },
    SetFtpOptionsResponse(Response<()>),
    GetAdminOptions,
    GetAdminOptionsResponse(Response<String>),
    SetAdminOptions { options_json: String },
    SetAdminOptionsResponse(Response<()>),
    GetLoggerOptions,
    GetLoggerOptionsResponse(Response<String>),
    SetLoggerOptions { options_json: String },
    SetLoggerOptionsResponse(Response<()>),
    GetProtocolOptions,
    GetProtocolOptionsResponse(Response<String>),
    SetProtocolOptions { options_json: String },
    SetProtocolOptionsResponse(Response<()>),
    GetAcmeOptions,
    GetAcmeOptionsResponse(Response<String>),
    SetAcmeOptions { options_json: String },
    SetAcmeOptionsResponse(Response<()>),
    GetUpdateOptions,
    GetUpdateOptionsResponse(Response<String>),
    SetUpdateOptions { options_json: String },
    SetUpdateOptionsResponse(Response<()>),

    UploadCertificate { reqid: u64, cert_pem: String, key_pem: String, password: String },
    UploadCertificateResponse(Response<CertIssued>),
    GenerateSelfSignedCertificate { reqid: u64, distinguished_name: String, hostnames: Vec<String> },
    GenerateSelfSignedCertificateResponse(Response<CertIssued>),
    GetExtraCertsInfo { reqid: u64, cert_pem: String },
    GetExtraCertsInfoResponse(Response<String>),

    GetAcmeTermsOfService { directory: String },
    GetAcmeTermsOfServiceResponse(Response<String>),
    GenerateAcmeAccount { directory: String, contacts: Vec<String>, terms_of_service_agreed: bool },
    GenerateAcmeAccountResponse(Response<String>),
    RestoreAcmeAccount { account_id: String, account_json: String },
    RestoreAcmeAccountResponse(Response<()>),
    GenerateAcmeCertificate { reqid: u64, how: ChallengeHow, hostnames: Vec<String> },
    GenerateAcmeCertificateResponse(Response<CertIssued>),

    SolicitUpdateInfo,
    UpdateInfo { info_json: String },
}

impl Msg {
    /// Number of slots in the catalog.
    pub const COUNT: u16 = 71;

    pub fn index(&self) -> u16 {
        use Msg::*;
        match self {
            Exception(_) => 0,
            AdminLogin(_) => 1,
            AdminLoginResponse(_) => 2,
            SessionStart(_) => 3,
            SessionStop(_) => 4,
            SessionUserName { .. } => 5,
            SessionEntryOpen { .. } => 6,
            SessionEntryClose { .. } => 7,
            SessionEntryRead { .. } => 8,
            SessionEntryWritten { .. } => 9,
            SessionProtocolInfo { .. } => 10,
            SolicitSessionInfo { .. } => 11,
            Log(_) => 12,
            ServerStatus { .. } => 13,
            ListenerStatus { .. } => 14,
            AcknowledgeQueueFull => 15,
            AcknowledgeQueueFullResponse(_) => 16,
            BanIp { .. } => 17,
            BanIpResponse(_) => 18,
            EndSessions { .. } => 19,
            EndSessionsResponse(_) => 20,
            SetServerStatus { .. } => 21,
            SetServerStatusResponse(_) => 22,
            GetUsersAndGroups => 23,
            GetUsersAndGroupsResponse(_) => 24,
            SetUsersAndGroups { .. } => 25,
            SetUsersAndGroupsResponse(_) => 26,
            GetIpFilters => 27,
            GetIpFiltersResponse(_) => 28,
            SetIpFilters(_) => 29,
            SetIpFiltersResponse(_) => 30,
            GetFtpOptions => 31,
            GetFtpOptionsResponse(_) => 32,
            SetFtpOptions { .. } => 33,
            SetFtpOptionsResponse(_) => 34,
            GetAdminOptions => 35,
            GetAdminOptionsResponse(_) => 36,
            SetAdminOptions { .. } => 37,
            SetAdminOptionsResponse(_) => 38,
            GetLoggerOptions => 39,
            GetLoggerOptionsResponse(_) => 40,
            SetLoggerOptions { .. } => 41,
            SetLoggerOptionsResponse(_) => 42,
            GetProtocolOptions => 43,
            GetProtocolOptionsResponse(_) => 44,
            SetProtocolOptions { .. } => 45,
            SetProtocolOptionsResponse(_) => 46,
            GetAcmeOptions => 47,
            GetAcmeOptionsResponse(_) => 48,
            SetAcmeOptions { .. } => 49,
            SetAcmeOptionsResponse(_) => 50,
            GetUpdateOptions => 51,
            GetUpdateOptionsResponse(_) => 52,
            SetUpdateOptions { .. } => 53,
            SetUpdateOptionsResponse(_) => 54,
            UploadCertificate { .. } => 55,
            UploadCertificateResponse(_) => 56,
            GenerateSelfSignedCertificate { .. } => 57,
            GenerateSelfSignedCertificateResponse(_) => 58,
            GetExtraCertsInfo { .. } => 59,
            GetExtraCertsInfoResponse(_) => 60,
            GetAcmeTermsOfService { .. } => 61,
            GetAcmeTermsOfServiceResponse(_) => 62,
            GenerateAcmeAccount { .. } => 63,
            GenerateAcmeAccountResponse(_) => 64,
            RestoreAcmeAccount { .. } => 65,
            RestoreAcmeAccountResponse(_) => 66,
            GenerateAcmeCertificate { .. } => 67,
            GenerateAcmeCertificateResponse(_) => 68,
            SolicitUpdateInfo => 69,
            UpdateInfo { .. } => 70,
        }
    }

    /// Low-priority broadcasts are suppressed while a session's outgoing
    /// buffer is in overflow.
    pub fn is_low_priority(index: u16) -> bool {
        matches!(index, 3..=12 | 14 | 70)
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.encode_into(&mut w);
        w.into_bytes()
    }

    fn encode_into(&self, w: &mut WireWriter) {
        use Msg::*;
        match self {
            Exception(e) => {
                w.u8(e.kind as u8);
                w.string(&e.description);
            }
            AdminLogin(m) => {
                w.u32(m.protocol_version);
                w.string(&m.password);
            }
            AdminLoginResponse(r) => encode_response(w, r, |w, ok| {
                w.string(&ok.server_version);
                w.string(&ok.server_host);
                w.bool(ok.can_impersonate);
            }),
            SessionStart(m) => {
                w.u64(m.session_id);
                w.i64(m.start_unix_ms);
                w.string(&m.peer_ip);
                w.u8(m.family);
            }
            SessionStop(at) => encode_ref(w, at),
            SessionUserName { at, username } => {
                encode_ref(w, at);
                w.string(username);
            }
            SessionEntryOpen { at, entry_id, path, size } => {
                encode_ref(w, at);
                w.u64(*entry_id);
                w.string(path);
                w.i64(*size);
            }
            SessionEntryClose { at, entry_id, error } => {
                encode_ref(w, at);
                w.u64(*entry_id);
                w.i32(*error);
            }
            SessionEntryRead { at, entry_id, amount } => {
                encode_ref(w, at);
                w.u64(*entry_id);
                w.u64(*amount);
            }
            SessionEntryWritten {
                at,
                entry_id,
                amount,
                actual_entry_size,
            } => {
                encode_ref(w, at);
                w.u64(*entry_id);
                w.u64(*amount);
                w.u64(*actual_entry_size);
            }
            SessionProtocolInfo { at, info } => {
                encode_ref(w, at);
                w.u8(info.status);
                w.string(&info.protocol);
                w.opt_string(&info.client_name);
            }
            SolicitSessionInfo { session_ids } => w.u64_list(session_ids),
            Log(m) => {
                w.i64(m.unix_ms);
                w.u64(m.session_id);
                w.u8(m.level);
                w.string(&m.module);
                w.string(&m.message);
            }
            ServerStatus { online } => w.bool(*online),
            ListenerStatus { address, status } => {
                w.string(address);
                w.u8(*status);
            }
            AcknowledgeQueueFull => {}
            AcknowledgeQueueFullResponse(r) => encode_response(w, r, |_, ()| {}),
            BanIp { ip, family } => {
                w.string(ip);
                w.u8(*family);
            }
            BanIpResponse(r) => encode_response(w, r, |_, ()| {}),
            EndSessions { session_ids } => w.u64_list(session_ids),
            EndSessionsResponse(r) => encode_response(w, r, |w, n| w.u64(*n)),
            SetServerStatus { online } => w.bool(*online),
            SetServerStatusResponse(r) => encode_response(w, r, |_, ()| {}),
            GetUsersAndGroups | GetIpFilters | GetFtpOptions | GetAdminOptions | GetLoggerOptions | GetProtocolOptions | GetAcmeOptions | GetUpdateOptions | SolicitUpdateInfo => {}
            GetUsersAndGroupsResponse(r) => encode_response(w, r, |w, s| w.string(s)),
            SetUsersAndGroups { db_json, save } => {
                w.string(db_json);
                w.bool(*save);
            }
            SetUsersAndGroupsResponse(r) => encode_response(w, r, |_, ()| {}),
            GetIpFiltersResponse(r) => encode_response(w, r, |w, f| {
                w.string_list(&f.disallowed);
                w.string_list(&f.allowed);
            }),
            SetIpFilters(f) => {
                w.string_list(&f.disallowed);
                w.string_list(&f.allowed);
            }
            SetIpFiltersResponse(r) => encode_response(w, r, |_, ()| {}),
            GetFtpOptionsResponse(r) | GetAdminOptionsResponse(r) | GetLoggerOptionsResponse(r) | GetProtocolOptionsResponse(r) | GetAcmeOptionsResponse(r) | GetUpdateOptionsResponse(r) => {
                encode_response(w, r, |w, s| w.string(s))
            }
            SetFtpOptions { options_json } | SetAdminOptions { options_json } | SetLoggerOptions { options_json } | SetProtocolOptions { options_json } | SetAcmeOptions { options_json } | SetUpdateOptions { options_json } => {
                w.string(options_json)
            }
            SetFtpOptionsResponse(r) | SetAdminOptionsResponse(r) | SetLoggerOptionsResponse(r) | SetProtocolOptionsResponse(r) | SetAcmeOptionsResponse(r) | SetUpdateOptionsResponse(r) => {
                encode_response(w, r, |_, ()| {})
            }
            UploadCertificate { reqid, cert_pem, key_pem, password } => {
                w.u64(*reqid);
                w.string(cert_pem);
                w.string(key_pem);
                w.string(password);
            }
            UploadCertificateResponse(r) | GenerateSelfSignedCertificateResponse(r) | GenerateAcmeCertificateResponse(r) => encode_response(w, r, |w, c| {
                w.u64(c.reqid);
                w.string(&c.cert_pem);
                w.string(&c.fingerprint_sha256);
            }),
            GenerateSelfSignedCertificate {
                reqid,
                distinguished_name,
                hostnames,
            } => {
                w.u64(*reqid);
                w.string(distinguished_name);
                w.string_list(hostnames);
            }
            GetExtraCertsInfo { reqid, cert_pem } => {
                w.u64(*reqid);
                w.string(cert_pem);
            }
            GetExtraCertsInfoResponse(r) => encode_response(w, r, |w, s| w.string(s)),
            GetAcmeTermsOfService { directory } => w.string(directory),
            GetAcmeTermsOfServiceResponse(r) | GenerateAcmeAccountResponse(r) => encode_response(w, r, |w, s| w.string(s)),
            GenerateAcmeAccount {
                directory,
                contacts,
                terms_of_service_agreed,
            } => {
                w.string(directory);
                w.string_list(contacts);
                w.bool(*terms_of_service_agreed);
            }
            RestoreAcmeAccount { account_id, account_json } => {
                w.string(account_id);
                w.string(account_json);
            }
            RestoreAcmeAccountResponse(r) => encode_response(w, r, |_, ()| {}),
            GenerateAcmeCertificate { reqid, how, hostnames } => {
                w.u64(*reqid);
                how.encode(w);
                w.string_list(hostnames);
            }
            UpdateInfo { info_json } => w.string(info_json),
        }
    }

    /// Decode a payload of the given catalog index.
    pub fn decode(index: u16, r: &mut WireReader) -> WireResult<Msg> {
        use Msg::*;
        let msg = match index {
            0 => Exception(AnyException {
                kind: ExceptionKind::from_u8(r.u8()?)?,
                description: r.string()?,
            }),
            1 => AdminLogin(self::AdminLogin {
                protocol_version: r.u32()?,
                password: r.string()?,
            }),
            2 => AdminLoginResponse(decode_response(r, |r| {
                Ok(AdminLoginOk {
                    server_version: r.string()?,
                    server_host: r.string()?,
                    can_impersonate: r.bool()?,
                })
            })?),
            3 => SessionStart(self::SessionStart {
                session_id: r.u64()?,
                start_unix_ms: r.i64()?,
                peer_ip: r.string()?,
                family: r.u8()?,
            }),
            4 => SessionStop(decode_ref(r)?),
            5 => SessionUserName {
                at: decode_ref(r)?,
                username: r.string()?,
            },
            6 => SessionEntryOpen {
                at: decode_ref(r)?,
                entry_id: r.u64()?,
                path: r.string()?,
                size: r.i64()?,
            },
            7 => SessionEntryClose {
                at: decode_ref(r)?,
                entry_id: r.u64()?,
                error: r.i32()?,
            },
            8 => SessionEntryRead {
                at: decode_ref(r)?,
                entry_id: r.u64()?,
                amount: r.u64()?,
            },
            9 => SessionEntryWritten {
                at: decode_ref(r)?,
                entry_id: r.u64()?,
                amount: r.u64()?,
                actual_entry_size: r.u64()?,
            },
            10 => SessionProtocolInfo {
                at: decode_ref(r)?,
                info: ProtocolInfoMsg {
                    status: r.u8()?,
                    protocol: r.string()?,
                    client_name: r.opt_string()?,
                },
            },
            11 => SolicitSessionInfo { session_ids: r.u64_list()? },
            12 => Log(LogLine {
                unix_ms: r.i64()?,
                session_id: r.u64()?,
                level: r.u8()?,
                module: r.string()?,
                message: r.string()?,
            }),
            13 => ServerStatus { online: r.bool()? },
            14 => ListenerStatus {
                address: r.string()?,
                status: r.u8()?,
            },
            15 => AcknowledgeQueueFull,
            16 => AcknowledgeQueueFullResponse(decode_response(r, |_| Ok(()))?),
            17 => BanIp {
                ip: r.string()?,
                family: r.u8()?,
            },
            18 => BanIpResponse(decode_response(r, |_| Ok(()))?),
            19 => EndSessions { session_ids: r.u64_list()? },
            20 => EndSessionsResponse(decode_response(r, |r| r.u64())?),
            21 => SetServerStatus { online: r.bool()? },
            22 => SetServerStatusResponse(decode_response(r, |_| Ok(()))?),
            23 => GetUsersAndGroups,
            24 => GetUsersAndGroupsResponse(decode_response(r, |r| r.string())?),
            25 => SetUsersAndGroups {
                db_json: r.string()?,
                save: r.bool()?,
            },
            26 => SetUsersAndGroupsResponse(decode_response(r, |_| Ok(()))?),
            27 => GetIpFilters,
            28 => GetIpFiltersResponse(decode_response(r, |r| {
                Ok(IpFilters {
                    disallowed: r.string_list()?,
                    allowed: r.string_list()?,
                })
            })?),
            29 => SetIpFilters(IpFilters {
                disallowed: r.string_list()?,
                allowed: r.string_list()?,
            }),
            30 => SetIpFiltersResponse(decode_response(r, |_| Ok(()))?),
            31 => GetFtpOptions,
            32 => GetFtpOptionsResponse(decode_response(r, |r| r.string())?),
            33 => SetFtpOptions { options_json: r.string()? },
            34 => SetFtpOptionsResponse(decode_response(r, |_| Ok(()))?),
            35 => GetAdminOptions,
            36 => GetAdminOptionsResponse(decode_response(r, |r| r.string())?),
            37 => SetAdminOptions { options_json: r.string()? },
            38 => SetAdminOptionsResponse(decode_response(r, |_| Ok(()))?),
            39 => GetLoggerOptions,
            40 => GetLoggerOptionsResponse(decode_response(r, |r| r.string())?),
            41 => SetLoggerOptions { options_json: r.string()? },
            42 => SetLoggerOptionsResponse(decode_response(r, |_| Ok(()))?),
            43 => GetProtocolOptions,
            44 => GetProtocolOptionsResponse(decode_response(r, |r| r.string())?),
            45 => SetProtocolOptions { options_json: r.string()? },
            46 => SetProtocolOptionsResponse(decode_response(r, |_| Ok(()))?),
            47 => GetAcmeOptions,
            48 => GetAcmeOptionsResponse(decode_response(r, |r| r.string())?),
            49 => SetAcmeOptions { options_json: r.string()? },
            50 => SetAcmeOptionsResponse(decode_response(r, |_| Ok(()))?),
            51 => GetUpdateOptions,
            52 => GetUpdateOptionsResponse(decode_response(r, |r| r.string())?),
            53 => SetUpdateOptions { options_json: r.string()? },
            54 => SetUpdateOptionsResponse(decode_response(r, |_| Ok(()))?),
            55 => UploadCertificate {
                reqid: r.u64()?,
                cert_pem: r.string()?,
                key_pem: r.string()?,
                password: r.string()?,
            },
            56 => UploadCertificateResponse(decode_cert_response(r)?),
            57 => GenerateSelfSignedCertificate {
                reqid: r.u64()?,
                distinguished_name: r.string()?,
                hostnames: r.string_list()?,
            },
            58 => GenerateSelfSignedCertificateResponse(decode_cert_response(r)?),
            59 => GetExtraCertsInfo {
                reqid: r.u64()?,
                cert_pem: r.string()?,
            },
            60 => GetExtraCertsInfoResponse(decode_response(r, |r| r.string())?),
            61 => GetAcmeTermsOfService { directory: r.string()? },
            62 => GetAcmeTermsOfServiceResponse(decode_response(r, |r| r.string())?),
            63 => GenerateAcmeAccount {
                directory: r.string()?,
                contacts: r.string_list()?,
                terms_of_service_agreed: r.bool()?,
            },
            64 => GenerateAcmeAccountResponse(decode_response(r, |r| r.string())?),
            65 => RestoreAcmeAccount {
                account_id: r.string()?,
                account_json: r.string()?,
            },
            66 => RestoreAcmeAccountResponse(decode_response(r, |_| Ok(()))?),
            67 => GenerateAcmeCertificate {
                reqid: r.u64()?,
                how: ChallengeHow::decode(r)?,
                hostnames: r.string_list()?,
            },
            68 => GenerateAcmeCertificateResponse(decode_cert_response(r)?),
            69 => SolicitUpdateInfo,
            70 => UpdateInfo { info_json: r.string()? },
            _ => return Err(WireErrorKind::BadTag { tag: index as u64 }.into()),
        };
        r.finish()?;
        Ok(msg)
    }
}

fn encode_ref(w: &mut WireWriter, at: &SessionRef) {
    w.u64(at.session_id);
    w.u64(at.since_start_ms);
}

fn decode_ref(r: &mut WireReader) -> WireResult<SessionRef> {
    Ok(SessionRef {
        session_id: r.u64()?,
        since_start_ms: r.u64()?,
    })
}

fn encode_response<T>(w: &mut WireWriter, response: &Response<T>, encode_ok: impl FnOnce(&mut WireWriter, &T)) {
    match response {
        Response::Success(ok) => {
            w.u8(1);
            encode_ok(w, ok);
        }
        Response::Failure(f) => {
            w.u8(0);
            w.i32(f.code);
            w.string(&f.message);
        }
    }
}

fn decode_response<T>(r: &mut WireReader, decode_ok: impl FnOnce(&mut WireReader) -> WireResult<T>) -> WireResult<Response<T>> {
    match r.u8()? {
        1 => Ok(Response::Success(decode_ok(r)?)),
        0 => Ok(Response::Failure(Failure {
            code: r.i32()?,
            message: r.string()?,
        })),
        tag => Err(WireErrorKind::BadTag { tag: tag as u64 }.into()),
    }
}

fn decode_cert_response(r: &mut WireReader) -> WireResult<Response<CertIssued>> {
    decode_response(r, |r| {
        Ok(CertIssued {
            reqid: r.u64()?,
            cert_pem: r.string()?,
            fingerprint_sha256: r.string()?,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn round_trip(msg: Msg) {
        let index = msg.index();
        let payload = msg.encode_payload();
        let mut r = WireReader::new(&payload, false);
        let back = Msg::decode(index, &mut r).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn representative_messages_round_trip() {
        round_trip(Msg::Exception(AnyException {
            kind: ExceptionKind::SerializationError,
            description: "boom".into(),
        }));
        round_trip(Msg::AdminLogin(AdminLogin {
            protocol_version: PROTOCOL_VERSION,
            password: "hunter2".into(),
        }));
        round_trip(Msg::AdminLoginResponse(Response::Success(AdminLoginOk {
            server_version: "0.1.0".into(),
            server_host: "ftp1".into(),
            can_impersonate: true,
        })));
        round_trip(Msg::AdminLoginResponse(Response::failure(EBADMSG, "protocol version mismatch")));
        round_trip(Msg::SessionStart(SessionStart {
            session_id: 42,
            start_unix_ms: 1_700_000_000_000,
            peer_ip: "192.0.2.7".into(),
            family: 0,
        }));
        round_trip(Msg::SessionEntryWritten {
            at: SessionRef {
                session_id: 42,
                since_start_ms: 1234,
            },
            entry_id: 7,
            amount: 8192,
            actual_entry_size: 100_000,
        });
        round_trip(Msg::Log(LogLine {
            unix_ms: 0,
            session_id: 0,
            level: 3,
            module: "ftp".into(),
            message: "hello".into(),
        }));
        round_trip(Msg::EndSessions { session_ids: vec![1, 2, 3] });
        round_trip(Msg::EndSessionsResponse(Response::Success(2)));
        round_trip(Msg::SetIpFilters(IpFilters {
            disallowed: vec!["10.0.0.0/8".into()],
            allowed: vec![],
        }));
        round_trip(Msg::GenerateAcmeCertificate {
            reqid: 9,
            how: ChallengeHow::External {
                well_known_path: "/var/www/.well-known/acme-challenge".into(),
                create_parents: true,
            },
            hostnames: vec!["ftp.example.com".into()],
        });
        round_trip(Msg::AcknowledgeQueueFull);
        round_trip(Msg::AcknowledgeQueueFullResponse(Response::Success(())));
    }

    #[test]
    fn unknown_index_is_a_bad_tag() {
        let mut r = WireReader::new(&[], false);
        let err = Msg::decode(Msg::COUNT, &mut r).unwrap_err();
        assert_eq!(err.kind(), &WireErrorKind::BadTag { tag: Msg::COUNT as u64 });
    }

    #[test]
    fn trailing_bytes_are_refused() {
        let mut payload = Msg::AcknowledgeQueueFull.encode_payload();
        payload.push(0xFF);
        let mut r = WireReader::new(&payload, false);
        assert!(Msg::decode(15, &mut r).is_err());
    }

    #[test]
    fn low_priority_covers_telemetry_not_commands() {
        assert!(Msg::is_low_priority(3)); // session start
        assert!(Msg::is_low_priority(12)); // log
        assert!(Msg::is_low_priority(14)); // listener status
        assert!(!Msg::is_low_priority(0)); // exception
        assert!(!Msg::is_low_priority(15)); // acknowledge_queue_full
        assert!(!Msg::is_low_priority(24)); // command response
    }
}
