//! The RFC 959 Representation Type (`TYPE`) command
//
// Only ASCII Non-print and Image are honored; EBCDIC and Local byte size
// belong to a different century.

use crate::server::controlchan::command::TypeParam;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Type;

#[async_trait]
impl CommandHandler for Type {
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let param = match &args.parsed_command {
            Command::Type { param } => *param,
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };

        match param {
            TypeParam::Ascii => {
                args.session.lock().await.transfer_type = TypeParam::Ascii;
                Ok(Reply::new(ReplyCode::CommandOkay, "Type set to ASCII"))
            }
            TypeParam::Image => {
                args.session.lock().await.transfer_type = TypeParam::Image;
                Ok(Reply::new(ReplyCode::CommandOkay, "Type set to binary"))
            }
            TypeParam::Ebcdic | TypeParam::Local => Ok(Reply::new(ReplyCode::CommandNotImplementedForParameter, "Only types A and I are supported")),
        }
    }
}
