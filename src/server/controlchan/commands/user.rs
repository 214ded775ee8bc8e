//! The RFC 959 User Name (`USER`) command

use crate::notification::SessionEvent;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use crate::server::session::SessionState;
use async_trait::async_trait;

#[derive(Debug)]
pub struct User;

#[async_trait]
impl CommandHandler for User {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let username = match &args.parsed_command {
            Command::User { username } => std::str::from_utf8(username)?.to_string(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };

        let methods = args.authenticator.required_methods(&username).await;

        let mut session = args.session.lock().await;
        match session.state {
            SessionState::New | SessionState::WaitPass => {
                session.username = Some(username.clone());
                session.methods = Some(methods.clone());
                session.state = SessionState::WaitPass;
                session
                    .notify(SessionEvent::UserName { username: username.clone() })
                    .await;
                if methods.is_complete() {
                    // An account without outstanding methods (e.g. anonymous
                    // style) would complete here; the regular path asks for a
                    // password.
                    session.state = SessionState::WaitCmd;
                    Ok(Reply::new(ReplyCode::UserLoggedIn, "User logged in"))
                } else {
                    Ok(Reply::new(ReplyCode::NeedPassword, "Password required"))
                }
            }
            SessionState::WaitCmd => Ok(Reply::new(ReplyCode::BadCommandSequence, "Please create a new connection to switch user")),
        }
    }
}
