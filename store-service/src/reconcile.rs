// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Get-or-create-then-link reconciliation of a user's games.
//!
//! Every step is an independent directory call. A batch stops at the first
//! failing game name and leaves earlier creations and links in place.

use std::sync::Arc;

use gameclient_common::{Game, User, game_names_match};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::directory::{DirectoryClient, DirectoryError, RequestContext};

/// Game name that triggers the demo fault when fault injection is enabled.
pub const DEMO_FAILURE_GAME_NAME: &str = "fail";
pub const DEMO_FAILURE_MESSAGE: &str = "Looks like you have exception during demo. Try to find me!";

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{0}")]
    NotFound(String),
    /// A create or link step failed. `linked_games` lists what the batch had
    /// already linked before `failed_game`.
    #[error("{message}")]
    Operation {
        message: String,
        failed_game: Option<String>,
        linked_games: Vec<String>,
    },
    #[error("directory unavailable: {0}")]
    DownstreamUnavailable(String),
}

impl ReconcileError {
    fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
            failed_game: None,
            linked_games: Vec::new(),
        }
    }

    /// Transport failures keep their own kind; every other directory failure
    /// becomes an operation error carrying `message`.
    fn from_directory(error: DirectoryError, message: String) -> Self {
        error!(error = %error, "{message}");
        match error {
            DirectoryError::Transport { .. } => Self::DownstreamUnavailable(error.to_string()),
            DirectoryError::NotFound { .. }
            | DirectoryError::Status { .. }
            | DirectoryError::Decode { .. } => Self::operation(message),
        }
    }

    fn at_game(self, game_name: &str, linked: &[Game]) -> Self {
        match self {
            Self::Operation { message, .. } => Self::Operation {
                message,
                failed_game: Some(game_name.to_string()),
                linked_games: linked.iter().map(|game| game.name.clone()).collect(),
            },
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub user: User,
    pub user_created: bool,
    pub linked: Vec<Game>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearOutcome {
    pub attempted: usize,
    pub failed: usize,
}

pub struct Reconciler {
    directory: Arc<dyn DirectoryClient>,
    fault_injection: bool,
}

impl Reconciler {
    pub fn new(directory: Arc<dyn DirectoryClient>, fault_injection: bool) -> Self {
        Self {
            directory,
            fault_injection,
        }
    }

    pub async fn add_or_update_user_games(
        &self,
        ctx: &RequestContext,
        username: &str,
        game_names: &[String],
    ) -> Result<BatchOutcome, ReconcileError> {
        info!(username = %username, count = game_names.len(), "add or update user games");

        let (user, user_created) = self.resolve_user(ctx, username).await?;

        let mut linked = Vec::with_capacity(game_names.len());
        for game_name in game_names {
            match self.reconcile_game(ctx, &user, game_name).await {
                Ok(game) => linked.push(game),
                Err(error) => {
                    let error = error.at_game(game_name, &linked);
                    if let ReconcileError::Operation { linked_games, .. } = &error {
                        warn!(
                            username = %username,
                            failed_game = %game_name,
                            already_linked = ?linked_games,
                            "batch aborted; earlier links are kept"
                        );
                    }
                    return Err(error);
                }
            }
        }

        info!(username = %username, count = linked.len(), "processed games for user");
        Ok(BatchOutcome {
            user,
            user_created,
            linked,
        })
    }

    pub async fn clear_user_games(
        &self,
        ctx: &RequestContext,
        username: &str,
    ) -> Result<ClearOutcome, ReconcileError> {
        info!(username = %username, "clear user games");
        let not_found =
            || ReconcileError::NotFound(format!("User {username} not found or no games to clear"));

        let Some(user) = self.find_user(ctx, username).await? else {
            debug!(username = %username, "user not found when clearing games");
            return Err(not_found());
        };

        let games = match self.directory.list_user_games(ctx, user.id).await {
            Ok(games) => games,
            Err(DirectoryError::NotFound { .. }) => return Err(not_found()),
            Err(error) => {
                return Err(ReconcileError::from_directory(
                    error,
                    format!("Failed to fetch games for user {username}"),
                ));
            }
        };
        if games.is_empty() {
            debug!(username = %username, "user has no games to clear");
            return Err(not_found());
        }

        let mut failed = 0;
        for game in &games {
            if let Err(error) = self.directory.unlink_user_game(ctx, user.id, game.id).await {
                failed += 1;
                warn!(
                    username = %username,
                    game_id = game.id,
                    error = %error,
                    "failed to unlink game; continuing"
                );
            }
        }

        info!(
            username = %username,
            attempted = games.len(),
            failed,
            "cleared games for user"
        );
        Ok(ClearOutcome {
            attempted: games.len(),
            failed,
        })
    }

    /// `None` for an unknown user; an empty list for a user without games.
    pub async fn get_user_games_by_name(
        &self,
        ctx: &RequestContext,
        username: &str,
    ) -> Result<Option<Vec<String>>, ReconcileError> {
        let Some(user) = self.find_user(ctx, username).await? else {
            return Ok(None);
        };

        match self.directory.list_user_games(ctx, user.id).await {
            Ok(games) => {
                debug!(username = %username, count = games.len(), "returning games for user");
                Ok(Some(games.into_iter().map(|game| game.name).collect()))
            }
            Err(DirectoryError::NotFound { .. }) => Ok(None),
            Err(error) => Err(ReconcileError::from_directory(
                error,
                format!("Failed to fetch games for user {username}"),
            )),
        }
    }

    pub async fn get_all_games(&self, ctx: &RequestContext) -> Result<Vec<String>, ReconcileError> {
        let games = self
            .directory
            .list_games(ctx)
            .await
            .map_err(|error| ReconcileError::from_directory(error, "Failed to get all games".into()))?;
        debug!(count = games.len(), "found games");
        Ok(games.into_iter().map(|game| game.name).collect())
    }

    pub async fn get_all_users(&self, ctx: &RequestContext) -> Result<Vec<String>, ReconcileError> {
        let users = self
            .directory
            .list_users(ctx)
            .await
            .map_err(|error| ReconcileError::from_directory(error, "Failed to get all users".into()))?;
        debug!(count = users.len(), "found users");
        Ok(users.into_iter().map(|user| user.username).collect())
    }

    async fn find_user(
        &self,
        ctx: &RequestContext,
        username: &str,
    ) -> Result<Option<User>, ReconcileError> {
        self.directory
            .find_user_by_name(ctx, username)
            .await
            .map_err(|error| {
                ReconcileError::from_directory(error, format!("Failed to fetch user {username}"))
            })
    }

    async fn resolve_user(
        &self,
        ctx: &RequestContext,
        username: &str,
    ) -> Result<(User, bool), ReconcileError> {
        if let Some(user) = self.find_user(ctx, username).await? {
            return Ok((user, false));
        }

        let user = self
            .directory
            .create_user(ctx, username)
            .await
            .map_err(|error| {
                ReconcileError::from_directory(error, format!("Failed to create user {username}"))
            })?;
        Ok((user, true))
    }

    async fn resolve_game(
        &self,
        ctx: &RequestContext,
        game_name: &str,
    ) -> Result<Game, ReconcileError> {
        let existing = self
            .directory
            .find_game_by_name(ctx, game_name)
            .await
            .map_err(|error| {
                ReconcileError::from_directory(error, format!("Failed to fetch game {game_name}"))
            })?;
        if let Some(game) = existing {
            return Ok(game);
        }

        self.directory
            .create_game(ctx, game_name)
            .await
            .map_err(|error| {
                ReconcileError::from_directory(error, format!("Failed to create game {game_name}"))
            })
    }

    async fn reconcile_game(
        &self,
        ctx: &RequestContext,
        user: &User,
        game_name: &str,
    ) -> Result<Game, ReconcileError> {
        let game = self.resolve_game(ctx, game_name).await?;
        self.check_demo_fault(&user.username, game_name)?;

        let linked = self
            .directory
            .link_user_game(ctx, user.id, game.id)
            .await
            .map_err(|error| {
                ReconcileError::from_directory(
                    error,
                    format!("Failed to add game {game_name} for user {}", user.username),
                )
            })?;
        if !linked {
            error!(user_id = user.id, game_id = game.id, "failed to link game to user");
            return Err(ReconcileError::operation(format!(
                "Failed to add game {game_name} for user {}",
                user.username
            )));
        }

        Ok(game)
    }

    /// Demo-only fault hook; carries no business meaning.
    fn check_demo_fault(&self, username: &str, game_name: &str) -> Result<(), ReconcileError> {
        if self.fault_injection && game_names_match(game_name, DEMO_FAILURE_GAME_NAME) {
            error!(
                username = %username,
                game_name = %game_name,
                "demo failure triggered"
            );
            return Err(ReconcileError::operation(DEMO_FAILURE_MESSAGE));
        }
        Ok(())
    }
}
