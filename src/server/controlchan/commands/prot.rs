//! The RFC 2228 Data Channel Protection Level (`PROT`) command.

use crate::server::controlchan::command::ProtParam;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Prot;

#[async_trait]
impl CommandHandler for Prot {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let param = match &args.parsed_command {
            Command::Prot { param } => param.clone(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };

        match param {
            ProtParam::Private => {
                let mut session = args.session.lock().await;
                session.data_tls = true;
                Ok(Reply::new(ReplyCode::CommandOkay, "PROT P OK"))
            }
            ProtParam::Clear => {
                let mut session = args.session.lock().await;
                session.data_tls = false;
                Ok(Reply::new(ReplyCode::CommandOkay, "PROT C OK"))
            }
            ProtParam::Safe | ProtParam::Confidential => {
                Ok(Reply::new(ReplyCode::CommandNotImplementedForParameter, "Only C and P protection levels are supported"))
            }
        }
    }
}
