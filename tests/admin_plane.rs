//! Exercises the administration RPC engine end to end over an in-memory
//! stream: login version checks, mask gating, exceptions and commands.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use ironftpd::acme::{AcmeHttp, HttpResponse};
use ironftpd::admin::administrator::Administrator;
use ironftpd::admin::codec::AdminCodec;
use ironftpd::admin::proto::{AdminLogin, IpFilters, Msg, PROTOCOL_VERSION, Response};
use ironftpd::admin::session::run_session;
use ironftpd::admin::wire;
use ironftpd::auth::{FileBasedAuthenticator, StoredCredentials, UserDb};
use ironftpd::autobanner::{Autobanner, AutobannerOptions};
use ironftpd::config::{Archiver, IpFilterLists, Settings, VersionCheck};
use ironftpd::registry::SessionRegistry;
use slog::{Logger, o};
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use tokio_util::codec::Framed;

fn logger() -> Logger {
    Logger::root(slog::Discard, o!())
}

struct NoHttp;

#[async_trait]
impl AcmeHttp for NoHttp {
    async fn request(&self, _: &str, _: &str, _: Option<&str>, _: Vec<u8>) -> Result<HttpResponse, ironftpd::acme::AcmeError> {
        panic!("no HTTP expected in this test");
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    administrator: Arc<Administrator>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let archiver = Archiver::new(dir.path(), VersionCheck::Error, logger());
    let authenticator = FileBasedAuthenticator::new(UserDb::default(), logger());
    let registry = SessionRegistry::new();
    let autobanner = Autobanner::new(AutobannerOptions::default(), logger());

    let administrator = Administrator::new(
        Some(StoredCredentials::from_password("admin-pw")),
        "testhost".into(),
        authenticator,
        registry,
        autobanner,
        Settings::default(),
        IpFilterLists::default(),
        archiver,
        Arc::new(NoHttp),
        false,
        logger(),
    );
    Fixture {
        _dir: dir,
        administrator,
    }
}

type ClientFramed = Framed<tokio::io::DuplexStream, AdminCodec>;

async fn connect(fixture: &Fixture) -> ClientFramed {
    let (client_side, server_side) = tokio::io::duplex(1024 * 1024);
    run_session(server_side, 1, "127.0.0.1:9999".parse().unwrap(), Arc::new(fixture.administrator.clone()), logger()).await;
    Framed::new(client_side, AdminCodec::new(Arc::new(AtomicU32::new(u32::MAX))))
}

async fn next_msg(framed: &mut ClientFramed) -> Option<Msg> {
    match framed.next().await {
        Some(Ok(frame)) => Some(frame.result.expect("decodable frame")),
        Some(Err(_)) | None => None,
    }
}

#[tokio::test]
async fn login_with_wrong_protocol_version_fails_with_ebadmsg() {
    let fixture = fixture();
    let mut client = connect(&fixture).await;

    client
        .send(Msg::AdminLogin(AdminLogin {
            protocol_version: PROTOCOL_VERSION - 1,
            password: "admin-pw".into(),
        }))
        .await
        .unwrap();

    match next_msg(&mut client).await {
        Some(Msg::AdminLoginResponse(Response::Failure(failure))) => {
            assert_eq!(failure.code, ironftpd::admin::proto::EBADMSG);
        }
        other => panic!("unexpected: {other:?}"),
    }
    // The server hangs up after the failure.
    assert!(next_msg(&mut client).await.is_none());
}

#[tokio::test]
async fn login_with_wrong_password_fails_and_closes() {
    let fixture = fixture();
    let mut client = connect(&fixture).await;

    client
        .send(Msg::AdminLogin(AdminLogin {
            protocol_version: PROTOCOL_VERSION,
            password: "nope".into(),
        }))
        .await
        .unwrap();

    match next_msg(&mut client).await {
        Some(Msg::AdminLoginResponse(Response::Failure(_))) => {}
        other => panic!("unexpected: {other:?}"),
    }
    assert!(next_msg(&mut client).await.is_none());
}

#[tokio::test]
async fn commands_before_login_are_dropped_silently() {
    let fixture = fixture();
    let mut client = connect(&fixture).await;

    // Disallowed by the dispatching mask pre-login; the server must not
    // answer it, so the first frame we see is the login response.
    client.send(Msg::GetIpFilters).await.unwrap();
    client
        .send(Msg::AdminLogin(AdminLogin {
            protocol_version: PROTOCOL_VERSION,
            password: "admin-pw".into(),
        }))
        .await
        .unwrap();

    match next_msg(&mut client).await {
        Some(Msg::AdminLoginResponse(Response::Success(ok))) => {
            assert_eq!(ok.server_host, "testhost");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

/// Send a request and return the first non-broadcast message that comes
/// back, skipping the snapshot burst that follows login.
async fn request_response(client: &mut ClientFramed, request: Msg) -> Msg {
    client.send(request).await.unwrap();
    loop {
        match next_msg(client).await {
            Some(Msg::ServerStatus { .. }) | Some(Msg::SessionStart(_)) | Some(Msg::SessionUserName { .. }) | Some(Msg::Log(_)) | Some(Msg::ListenerStatus { .. }) => continue,
            Some(msg) => return msg,
            None => panic!("connection closed awaiting response"),
        }
    }
}

async fn login_and_drain(client: &mut ClientFramed) {
    client
        .send(Msg::AdminLogin(AdminLogin {
            protocol_version: PROTOCOL_VERSION,
            password: "admin-pw".into(),
        }))
        .await
        .unwrap();
    match next_msg(client).await {
        Some(Msg::AdminLoginResponse(Response::Success(_))) => {}
        other => panic!("login failed: {other:?}"),
    }
}

#[tokio::test]
async fn ip_filters_round_trip_through_the_rpc() {
    let fixture = fixture();
    let mut client = connect(&fixture).await;
    login_and_drain(&mut client).await;

    let set = Msg::SetIpFilters(IpFilters {
        disallowed: vec!["203.0.113.0/24".into()],
        allowed: vec!["192.0.2.7".into()],
    });
    match request_response(&mut client, set).await {
        Msg::SetIpFiltersResponse(Response::Success(())) => {}
        other => panic!("unexpected: {other:?}"),
    }

    match request_response(&mut client, Msg::GetIpFilters).await {
        Msg::GetIpFiltersResponse(Response::Success(filters)) => {
            assert_eq!(filters.disallowed, vec!["203.0.113.0/24".to_string()]);
            assert_eq!(filters.allowed, vec!["192.0.2.7".to_string()]);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn users_and_groups_replace_and_fetch() {
    let fixture = fixture();
    let mut client = connect(&fixture).await;
    login_and_drain(&mut client).await;

    let db = UserDb {
        users: vec![ironftpd::auth::User {
            name: "carol".into(),
            enabled: true,
            groups: vec![],
            credentials: StoredCredentials::from_password("pw"),
            vfs_root: Some("/srv/carol".into()),
            impersonation: None,
            speed_limits: Default::default(),
        }],
        groups: vec![],
    };
    let set = Msg::SetUsersAndGroups {
        db_json: serde_json::to_string(&db).unwrap(),
        save: false,
    };
    match request_response(&mut client, set).await {
        Msg::SetUsersAndGroupsResponse(Response::Success(())) => {}
        other => panic!("unexpected: {other:?}"),
    }

    match request_response(&mut client, Msg::GetUsersAndGroups).await {
        Msg::GetUsersAndGroupsResponse(Response::Success(json)) => {
            let fetched: UserDb = serde_json::from_str(&json).unwrap();
            assert_eq!(fetched, db);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn garbage_payload_is_answered_with_an_exception_frame() {
    let fixture = fixture();
    let mut client = connect(&fixture).await;
    login_and_drain(&mut client).await;

    // A frame claiming a known post-login index with a truncated payload.
    let mut raw = bytes::BytesMut::new();
    wire::encode_frame(&mut raw, 19, &[0xFF]); // end_sessions wants a list
    use tokio::io::AsyncWriteExt;
    client.get_mut().write_all(&raw).await.unwrap();

    match request_response(&mut client, Msg::GetIpFilters).await {
        Msg::Exception(e) => {
            assert!(!e.description.is_empty());
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn broken_exception_frame_tears_the_connection_down() {
    let fixture = fixture();
    let mut client = connect(&fixture).await;
    login_and_drain(&mut client).await;

    // A broken frame at slot 0 (an exception about an exception); instead of
    // ping-ponging exception frames, the server hangs up.
    let mut raw = bytes::BytesMut::new();
    wire::encode_frame(&mut raw, 0, &[0x01]);
    use tokio::io::AsyncWriteExt;
    client.get_mut().write_all(&raw).await.unwrap();

    assert!(next_msg(&mut client).await.is_none());
}

#[tokio::test]
async fn end_sessions_reports_the_count() {
    let fixture = fixture();
    let mut client = connect(&fixture).await;
    login_and_drain(&mut client).await;

    match request_response(&mut client, Msg::EndSessions { session_ids: vec![1, 2, 3] }).await {
        // Nothing is registered, so nothing ends.
        Msg::EndSessionsResponse(Response::Success(0)) => {}
        other => panic!("unexpected: {other:?}"),
    }
}
