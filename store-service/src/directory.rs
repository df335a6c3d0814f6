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

//! Client for the publisher's `/management` CRUD surface.
//!
//! Name lookups list the whole collection and scan it; the directory exposes
//! no by-name query.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use gameclient_common::{
    CORRELATION_ID_HEADER, CorrelationId, Game, GameId, User, UserId, game_names_match,
    parse_env_millis,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Request-scoped data threaded through every directory call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: CorrelationId,
}

impl RequestContext {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self { correlation_id }
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory transport failure during {operation}: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
    #[error("directory returned 404 for {operation}")]
    NotFound { operation: &'static str },
    #[error("directory returned {status} for {operation}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("invalid directory response for {operation}: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },
}

#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn list_users(&self, ctx: &RequestContext) -> Result<Vec<User>, DirectoryError>;

    async fn list_games(&self, ctx: &RequestContext) -> Result<Vec<Game>, DirectoryError>;

    async fn create_user(&self, ctx: &RequestContext, username: &str)
    -> Result<User, DirectoryError>;

    async fn create_game(&self, ctx: &RequestContext, name: &str) -> Result<Game, DirectoryError>;

    async fn list_user_games(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
    ) -> Result<Vec<Game>, DirectoryError>;

    /// `Ok(false)` when the directory answers with a non-success status.
    async fn link_user_game(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        game_id: GameId,
    ) -> Result<bool, DirectoryError>;

    async fn unlink_user_game(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        game_id: GameId,
    ) -> Result<(), DirectoryError>;

    async fn find_user_by_name(
        &self,
        ctx: &RequestContext,
        username: &str,
    ) -> Result<Option<User>, DirectoryError> {
        let user = self
            .list_users(ctx)
            .await?
            .into_iter()
            .find(|user| user.username == username);
        match &user {
            Some(user) => debug!(username = %username, user_id = user.id, "found user"),
            None => debug!(username = %username, "user not found"),
        }
        Ok(user)
    }

    async fn find_game_by_name(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> Result<Option<Game>, DirectoryError> {
        let game = self
            .list_games(ctx)
            .await?
            .into_iter()
            .find(|game| game_names_match(&game.name, name));
        match &game {
            Some(game) => debug!(game_name = %name, game_id = game.id, "found game"),
            None => debug!(game_name = %name, "game not found"),
        }
        Ok(game)
    }
}

#[derive(Clone)]
pub struct HttpDirectoryClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDirectoryClient {
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var("PUBLISHER_BASE_URL")
            .ok()
            .unwrap_or_else(|| "http://publisher-service:8092".to_string());
        let call_timeout = parse_env_millis("DIRECTORY_CALL_TIMEOUT_MS", 3000);
        Self::new(base_url, call_timeout)
    }

    pub fn new(base_url: impl Into<String>, call_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .context("failed to build directory HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn send(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, DirectoryError> {
        request
            .header(CORRELATION_ID_HEADER, ctx.correlation_id.as_str())
            .send()
            .await
            .map_err(|error| DirectoryError::Transport {
                operation,
                message: error.to_string(),
            })
    }

    async fn read_json<T: DeserializeOwned>(
        operation: &'static str,
        response: Response,
    ) -> Result<T, DirectoryError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            warn!(operation, "directory returned not found");
            return Err(DirectoryError::NotFound { operation });
        }
        if !status.is_success() {
            let body = failure_body(response).await;
            warn!(operation, status = %status, body = %body, "directory call failed");
            return Err(DirectoryError::Status {
                operation,
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|error| DirectoryError::Transport {
                operation,
                message: error.to_string(),
            })?;
        serde_json::from_str(&body).map_err(|error| DirectoryError::Decode {
            operation,
            message: error.to_string(),
        })
    }
}

async fn failure_body(response: Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "<response body unavailable>".to_string())
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn list_users(&self, ctx: &RequestContext) -> Result<Vec<User>, DirectoryError> {
        let operation = "list users";
        let response = self
            .send(ctx, operation, self.client.get(self.endpoint("management/users")))
            .await?;
        Self::read_json(operation, response).await
    }

    async fn list_games(&self, ctx: &RequestContext) -> Result<Vec<Game>, DirectoryError> {
        let operation = "list games";
        let response = self
            .send(ctx, operation, self.client.get(self.endpoint("management/games")))
            .await?;
        Self::read_json(operation, response).await
    }

    async fn create_user(
        &self,
        ctx: &RequestContext,
        username: &str,
    ) -> Result<User, DirectoryError> {
        info!(username = %username, "creating user");
        let operation = "create user";
        let request = self
            .client
            .post(self.endpoint("management/users"))
            .query(&[("name", username)]);
        let response = self.send(ctx, operation, request).await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = failure_body(response).await;
            warn!(username = %username, status = %status, body = %body, "create user failed");
            return Err(DirectoryError::Status {
                operation,
                status: status.as_u16(),
                body,
            });
        }

        let user: User = Self::read_json(operation, response).await?;
        info!(username = %username, user_id = user.id, "user created");
        Ok(user)
    }

    async fn create_game(&self, ctx: &RequestContext, name: &str) -> Result<Game, DirectoryError> {
        info!(game_name = %name, "creating game");
        let operation = "create game";
        let request = self
            .client
            .post(self.endpoint("management/games"))
            .query(&[("name", name)]);
        let response = self.send(ctx, operation, request).await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = failure_body(response).await;
            warn!(game_name = %name, status = %status, body = %body, "create game failed");
            return Err(DirectoryError::Status {
                operation,
                status: status.as_u16(),
                body,
            });
        }

        let game: Game = Self::read_json(operation, response).await?;
        info!(game_name = %name, game_id = game.id, "game created");
        Ok(game)
    }

    async fn list_user_games(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
    ) -> Result<Vec<Game>, DirectoryError> {
        debug!(user_id, "fetching games for user");
        let operation = "list user games";
        let url = self.endpoint(&format!("management/users/{user_id}/games"));
        let response = self.send(ctx, operation, self.client.get(url)).await?;
        Self::read_json(operation, response).await
    }

    async fn link_user_game(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        game_id: GameId,
    ) -> Result<bool, DirectoryError> {
        debug!(user_id, game_id, "linking game to user");
        let url = self.endpoint(&format!("management/users/{user_id}/games/{game_id}"));
        let response = self.send(ctx, "link user game", self.client.post(url)).await?;

        let status = response.status();
        if !status.is_success() {
            let body = failure_body(response).await;
            warn!(user_id, game_id, status = %status, body = %body, "link user game failed");
            return Ok(false);
        }

        info!(user_id, game_id, "linked game to user");
        Ok(true)
    }

    async fn unlink_user_game(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        game_id: GameId,
    ) -> Result<(), DirectoryError> {
        debug!(user_id, game_id, "unlinking game from user");
        let operation = "unlink user game";
        let url = self.endpoint(&format!("management/users/{user_id}/games/{game_id}"));
        let response = self.send(ctx, operation, self.client.delete(url)).await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DirectoryError::NotFound { operation });
        }
        if !status.is_success() {
            return Err(DirectoryError::Status {
                operation,
                status: status.as_u16(),
                body: failure_body(response).await,
            });
        }

        info!(user_id, game_id, "unlinked game from user");
        Ok(())
    }
}
