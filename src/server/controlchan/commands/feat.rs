//! The RFC 2389 Feature (`FEAT`) command

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Feat;

#[async_trait]
impl CommandHandler for Feat {
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let mut feat_text = vec!["CLNT", "EPRT", "EPSV", "MDTM", "MFMT", "MLST type*;size*;modify*;", "REST STREAM", "SIZE", "UTF8"];

        // RFC 2389 wants each feature line indented by exactly one space;
        // the multi-line encoder supplies it.
        if args.ftps_config.is_enabled() {
            feat_text.push("AUTH TLS");
            feat_text.push("PBSZ");
            feat_text.push("PROT");
        }

        feat_text.sort_unstable();
        feat_text.insert(0, "Extensions supported:");
        feat_text.push("END");

        Ok(Reply::new_multiline(ReplyCode::SystemStatus, feat_text))
    }
}
