//! The RFC 959 Password (`PASS`) command
//
// The argument field is a Telnet string specifying the user's
// password.  This command must be immediately preceded by the
// user name command, and, for some sites, completes the user's
// identification for access control.

use crate::auth::{AuthMethods, Credentials};
use crate::server::chancomms::ControlChanMsg;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use crate::server::session::SessionState;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Pass;

#[async_trait]
impl CommandHandler for Pass {
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let password = match &args.parsed_command {
            Command::Pass { password } => String::from_utf8_lossy(password.as_bytes()).to_string(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };

        let (username, source_ip) = {
            let session = args.session.lock().await;
            match (&session.state, &session.username) {
                (SessionState::WaitPass, Some(username)) => (username.clone(), session.source.ip()),
                (SessionState::New, _) | (SessionState::WaitPass, None) => {
                    return Ok(Reply::new(ReplyCode::BadCommandSequence, "Please supply a username first"));
                }
                (SessionState::WaitCmd, _) => {
                    return Ok(Reply::new(ReplyCode::NotLoggedIn, "Already logged in"));
                }
            }
        };

        let creds = Credentials {
            password: Some(password),
            source_ip,
        };

        match args.authenticator.authenticate(&username, &creds).await {
            Ok(user) => {
                let mut session = args.session.lock().await;
                if let Some(methods) = session.methods.as_mut() {
                    methods.satisfy(AuthMethods::PASSWORD);
                    if !methods.is_complete() {
                        // More rounds wanted by the account's method list.
                        return Ok(Reply::new(ReplyCode::NeedPassword, "Further authentication required"));
                    }
                }
                slog::info!(args.logger, "User logged in"; "user" => &username);
                session.storage = Some((args.storage_factory)(&user));
                session.user = Some(user);
                session.state = SessionState::WaitCmd;
                let _ = args.tx_control_chan.send(ControlChanMsg::AuthSuccess).await;
                Ok(Reply::new(ReplyCode::UserLoggedIn, "Logged on"))
            }
            Err(err) => {
                slog::info!(args.logger, "Login failed: {}", err; "user" => &username);
                let banned = args.autobanner.set_failed_login(source_ip);
                if banned {
                    let _ = args.tx_control_chan.send(ControlChanMsg::Banned).await;
                }
                let _ = args.tx_control_chan.send(ControlChanMsg::AuthFailed).await;
                Ok(Reply::new(ReplyCode::NotLoggedIn, "Login incorrect"))
            }
        }
    }
}
