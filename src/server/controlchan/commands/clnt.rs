//! The `CLNT` command: the client introduces itself by name and version.
//! Recorded into the session's protocol-info snapshot for the admin plane.

use crate::notification::SessionEvent;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Clnt;

#[async_trait]
impl CommandHandler for Clnt {
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let name = match &args.parsed_command {
            Command::Clnt { client_name } => client_name.clone(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };

        let mut session = args.session.lock().await;
        session.client_name = Some(name);
        let info = session.protocol_info();
        session.notify(SessionEvent::ProtocolInfo { info }).await;
        Ok(Reply::new(ReplyCode::CommandOkay, "Noted"))
    }
}
