//! The set/get users-and-groups handlers. The only path that edits the user
//! database at runtime.

use super::Administrator;
use crate::admin::proto::{Msg, Response};
use crate::auth::UserDb;
use crate::config::files;
use std::sync::Arc;

impl Administrator {
    pub(super) async fn handle_get_users_and_groups(&self) -> Msg {
        let db = self.authenticator.db().await;
        match serde_json::to_string(&db) {
            Ok(json) => Msg::GetUsersAndGroupsResponse(Response::Success(json)),
            Err(err) => Msg::GetUsersAndGroupsResponse(Response::failure(5, err.to_string())),
        }
    }

    pub(super) async fn handle_set_users_and_groups(self: &Arc<Self>, db_json: String, save: bool) -> Msg {
        let incoming: UserDb = match serde_json::from_str(&db_json) {
            Ok(db) => db,
            Err(err) => return Msg::SetUsersAndGroupsResponse(Response::failure(22, format!("invalid database: {err}"))),
        };

        if let Err(err) = self.authenticator.replace_db(incoming.clone()).await {
            return Msg::SetUsersAndGroupsResponse(Response::failure(22, err.to_string()));
        }

        if save {
            if let Err(err) = self.archiver.save(files::USERS, &incoming) {
                slog::error!(self.logger, "Saving user database failed: {}", err);
                return Msg::SetUsersAndGroupsResponse(Response::failure(5, err.to_string()));
            }
        }
        Msg::SetUsersAndGroupsResponse(Response::Success(()))
    }
}
