//! The options get/set handlers: every settings section moves over the wire
//! as a JSON blob of its serde shape.

use super::{Administrator, OptionsSection};
use crate::admin::proto::{Msg, Response};
use crate::config::settings;
use std::sync::Arc;
use std::time::Duration;

impl Administrator {
    pub(super) async fn get_options_json(&self, section: OptionsSection) -> Msg {
        let settings = self.settings.lock().await;
        let serialized = match section {
            OptionsSection::Ftp => serde_json::to_string(&settings.ftp),
            OptionsSection::Admin => serde_json::to_string(&settings.admin),
            OptionsSection::Logger => serde_json::to_string(&settings.logger),
            OptionsSection::Protocols => serde_json::to_string(&settings.protocols),
            OptionsSection::Acme => serde_json::to_string(&settings.acme),
            OptionsSection::Updates => serde_json::to_string(&settings.updates),
        };
        let response = match serialized {
            Ok(json) => Response::Success(json),
            Err(err) => Response::failure(5, err.to_string()),
        };
        match section {
            OptionsSection::Ftp => Msg::GetFtpOptionsResponse(response),
            OptionsSection::Admin => Msg::GetAdminOptionsResponse(response),
            OptionsSection::Logger => Msg::GetLoggerOptionsResponse(response),
            OptionsSection::Protocols => Msg::GetProtocolOptionsResponse(response),
            OptionsSection::Acme => Msg::GetAcmeOptionsResponse(response),
            OptionsSection::Updates => Msg::GetUpdateOptionsResponse(response),
        }
    }

    pub(super) async fn set_options_json(self: &Arc<Self>, section: OptionsSection, options_json: String) -> Msg {
        let result = self.apply_options(section, &options_json).await;
        let response = match result {
            Ok(()) => {
                self.schedule_save();
                Response::Success(())
            }
            Err(err) => Response::failure(22, err),
        };
        match section {
            OptionsSection::Ftp => Msg::SetFtpOptionsResponse(response),
            OptionsSection::Admin => Msg::SetAdminOptionsResponse(response),
            OptionsSection::Logger => Msg::SetLoggerOptionsResponse(response),
            OptionsSection::Protocols => Msg::SetProtocolOptionsResponse(response),
            OptionsSection::Acme => Msg::SetAcmeOptionsResponse(response),
            OptionsSection::Updates => Msg::SetUpdateOptionsResponse(response),
        }
    }

    async fn apply_options(&self, section: OptionsSection, options_json: &str) -> Result<(), String> {
        let mut current = self.settings.lock().await;
        match section {
            OptionsSection::Ftp => {
                let ftp: settings::FtpOptions = serde_json::from_str(options_json).map_err(|e| e.to_string())?;
                // Autoban policy takes effect immediately; listener changes
                // apply on the next start.
                self.autobanner.set_options(crate::server::autobanner::AutobannerOptions {
                    max_failures: ftp.autoban.max_failures,
                    failures_window: Duration::from_secs(ftp.autoban.failures_window_secs),
                    ban_duration: Duration::from_secs(ftp.autoban.ban_duration_secs),
                });
                current.ftp = ftp;
            }
            OptionsSection::Admin => {
                current.admin = serde_json::from_str(options_json).map_err(|e| e.to_string())?;
            }
            OptionsSection::Logger => {
                current.logger = serde_json::from_str(options_json).map_err(|e| e.to_string())?;
            }
            OptionsSection::Protocols => {
                current.protocols = serde_json::from_str(options_json).map_err(|e| e.to_string())?;
            }
            OptionsSection::Acme => {
                current.acme = serde_json::from_str(options_json).map_err(|e| e.to_string())?;
            }
            OptionsSection::Updates => {
                current.updates = serde_json::from_str(options_json).map_err(|e| e.to_string())?;
            }
        }
        Ok(())
    }
}
