//! The ironftpd server process: loads the configuration directory, starts
//! the FTP plane and the administration plane, and reacts to signals.

use ironftpd::admin::administrator::notifier::{AdminLogChannel, AdminLogDrain, AdminNotifier};
use ironftpd::admin::{AdminServer, Administrator};
use ironftpd::auth::{FileBasedAuthenticator, ThrottledAuthenticator, ThrottledOptions, UserDb};
use ironftpd::config::{Archiver, IpFilterLists, Settings, VersionCheck, files};
use ironftpd::{BindAddress, Server, options};
use slog::{Drain, Logger, o};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

struct Args {
    config_dir: PathBuf,
    version_check: VersionCheck,
    write_config: bool,
    impersonator_helper: Option<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config_dir: PathBuf::from("."),
        version_check: VersionCheck::Error,
        write_config: false,
        impersonator_helper: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config-dir" => {
                args.config_dir = iter.next().ok_or("--config-dir needs a path")?.into();
            }
            "--config-version-check" => {
                args.version_check = iter.next().ok_or("--config-version-check needs a mode")?.parse()?;
            }
            "--write-config" => args.write_config = true,
            "--impersonator-helper" => {
                args.impersonator_helper = Some(iter.next().ok_or("--impersonator-helper needs an identity")?);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(args)
}

fn root_logger(admin_channel: AdminLogChannel) -> Logger {
    // Console logging goes through the `log` facade; every record is also
    // mirrored to connected admin sessions.
    let drain = AdminLogDrain::new(slog_stdlog::StdLog.fuse(), admin_channel).fuse();
    let drain = std::sync::Mutex::new(drain).fuse();
    Logger::root(drain, o!("app" => "ironftpd"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("ironftpd: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(identity) = args.impersonator_helper {
        return match ironftpd::impersonator::process::run_helper(&identity).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("ironftpd helper: {err}");
                ExitCode::FAILURE
            }
        };
    }

    let (admin_log, admin_log_rx) = AdminLogChannel::new();
    let logger = root_logger(admin_log);

    let archiver = Archiver::new(&args.config_dir, args.version_check, logger.new(o!("module" => "config")));
    let settings: Settings = match archiver.load(files::SETTINGS) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("ironftpd: {err}");
            return ExitCode::FAILURE;
        }
    };

    if args.write_config {
        return match archiver.save(files::SETTINGS, &settings) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("ironftpd: {err}");
                ExitCode::FAILURE
            }
        };
    }

    let users: UserDb = match archiver.load(files::USERS) {
        Ok(users) => users,
        Err(err) => {
            eprintln!("ironftpd: {err}");
            return ExitCode::FAILURE;
        }
    };
    let disallowed: Vec<String> = archiver.load(files::DISALLOWED_IPS).unwrap_or_default();
    let allowed: Vec<String> = archiver.load(files::ALLOWED_IPS).unwrap_or_default();

    let file_auth = FileBasedAuthenticator::new(users, logger.new(o!("module" => "auth")));
    let authenticator = ThrottledAuthenticator::new(file_auth.clone(), ThrottledOptions::default(), logger.new(o!("module" => "auth-throttle")));

    let mut server = Server::new(authenticator, logger.new(o!("module" => "ftp")))
        .passive_ports(settings.ftp.passive_port_min..=settings.ftp.passive_port_max)
        .login_timeout(Duration::from_secs(settings.ftp.login_timeout_secs))
        .activity_timeout(Duration::from_secs(settings.ftp.activity_timeout_secs))
        .ftps_required(settings.ftp.require_tls)
        .autoban(ironftpd::autobanner::AutobannerOptions {
            max_failures: settings.ftp.autoban.max_failures,
            failures_window: Duration::from_secs(settings.ftp.autoban.failures_window_secs),
            ban_duration: Duration::from_secs(settings.ftp.autoban.ban_duration_secs),
        });

    if let Some(host) = &settings.ftp.passive_host_override {
        server = server.passive_host(host.as_str());
    }
    if let (Some(certs), Some(key)) = (&settings.ftp.tls_certs_file, &settings.ftp.tls_key_file) {
        server = server.ftps(certs.clone(), key.clone());
    }
    if !settings.ftp.welcome_message.is_empty() {
        let welcome = options::WelcomeMessage {
            text: settings.ftp.welcome_message.clone(),
            has_version: settings.ftp.welcome_has_version,
        };
        server = match server.greeting(welcome) {
            Ok(server) => server,
            Err(err) => {
                eprintln!("ironftpd: invalid welcome message: {err}");
                return ExitCode::FAILURE;
            }
        };
    }

    let acme_http: Arc<dyn ironftpd::acme::AcmeHttp> = match ironftpd::acme::HyperAcmeHttp::new() {
        Ok(http) => Arc::new(http),
        Err(err) => {
            eprintln!("ironftpd: {err}");
            return ExitCode::FAILURE;
        }
    };

    let administrator = Administrator::new(
        settings.admin.password.clone(),
        hostname(),
        file_auth,
        server.registry(),
        server.autobanner(),
        settings.clone(),
        IpFilterLists { disallowed, allowed },
        archiver,
        acme_http,
        false,
        logger.new(o!("module" => "admin")),
    );
    administrator.forward_listener_status(server.subscribe_listener_status());
    administrator.forward_log_lines(admin_log_rx);

    let notifier = AdminNotifier::new(&administrator);
    server = server.notify_sessions(notifier);

    // The admin plane needs its own certificate; without one it stays off.
    if let (Some(certs), Some(key)) = (&settings.admin.tls_certs_file, &settings.admin.tls_key_file) {
        match ironftpd::tls::new_admin_config(certs, key) {
            Ok(tls_config) => {
                let admin_server = AdminServer {
                    tls_config,
                    handler: Arc::new(administrator.clone()),
                    logger: logger.new(o!("module" => "admin-server")),
                };
                let address = settings.admin.listen_address;
                tokio::spawn(async move {
                    if let Err(err) = admin_server.listen(address).await {
                        eprintln!("ironftpd: admin server failed: {err}");
                    }
                });
            }
            Err(err) => {
                eprintln!("ironftpd: admin TLS configuration failed: {err}");
                return ExitCode::FAILURE;
            }
        }
    }

    let binds: Vec<BindAddress> = settings
        .ftp
        .listeners
        .iter()
        .map(|l| BindAddress {
            address: l.address,
            implicit_tls: l.implicit_tls,
        })
        .collect();
    if binds.is_empty() {
        eprintln!("ironftpd: no FTP listeners configured");
        return ExitCode::FAILURE;
    }

    let mut serve = tokio::spawn(server.listen(binds));

    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).expect("signal handler");
    let mut sighup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()).expect("signal handler");

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                slog::info!(logger, "SIGINT received, shutting down");
                return ExitCode::SUCCESS;
            }
            _ = sighup.recv() => {
                // Runtime reconfiguration flows through the admin plane;
                // SIGHUP just confirms liveness in this build.
                slog::info!(logger, "SIGHUP received");
            }
            result = &mut serve => {
                return match result {
                    Ok(Ok(())) => ExitCode::SUCCESS,
                    Ok(Err(err)) => {
                        eprintln!("ironftpd: {err}");
                        ExitCode::FAILURE
                    }
                    Err(err) => {
                        eprintln!("ironftpd: {err}");
                        ExitCode::FAILURE
                    }
                };
            }
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
