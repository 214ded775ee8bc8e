//! The RFC 2228 Authentication/Security Mechanism (`AUTH`) command.

use crate::server::chancomms::ControlChanMsg;
use crate::server::controlchan::command::AuthParam;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Auth;

#[async_trait]
impl CommandHandler for Auth {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let protocol = match &args.parsed_command {
            Command::Auth { protocol } => protocol.clone(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };

        if !args.ftps_config.is_enabled() {
            return Ok(Reply::new(ReplyCode::CommandNotImplemented, "TLS not configured"));
        }

        match protocol {
            AuthParam::Tls => {
                let already_secure = { args.session.lock().await.cmd_tls };
                if already_secure {
                    return Ok(Reply::new(ReplyCode::BadCommandSequence, "Control channel already secure"));
                }
                // The control loop performs the actual handshake right after
                // this 234 left the plaintext socket.
                let _ = args.tx_control_chan.send(ControlChanMsg::SecureControlChannel).await;
                Ok(Reply::new(ReplyCode::AuthOkayNoDataNeeded, "AUTH TLS successful"))
            }
            AuthParam::Ssl => Ok(Reply::new(ReplyCode::CommandNotImplementedForParameter, "Use AUTH TLS")),
        }
    }
}
