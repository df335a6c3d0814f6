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

//! In-memory directory used by the engine and handler tests.

use std::{sync::Mutex, time::Duration};

use async_trait::async_trait;
use gameclient_common::{Game, GameId, User, UserId};

use crate::directory::{DirectoryClient, DirectoryError, RequestContext};

#[derive(Default)]
pub(crate) struct DirectoryState {
    pub(crate) users: Vec<User>,
    pub(crate) games: Vec<Game>,
    pub(crate) links: Vec<(UserId, GameId)>,
    pub(crate) calls: Vec<String>,
}

#[derive(Default)]
pub(crate) struct InMemoryDirectory {
    pub(crate) state: Mutex<DirectoryState>,
    pub(crate) reject_duplicate_links: bool,
    pub(crate) fail_user_creation: bool,
    pub(crate) fail_game_creation: Option<String>,
    pub(crate) fail_unlink: Option<GameId>,
    pub(crate) unavailable: bool,
    pub(crate) delay: Option<Duration>,
}

impl InMemoryDirectory {
    pub(crate) fn seed_user(&self, username: &str) -> User {
        let mut state = self.state.lock().unwrap();
        let user = User {
            id: state.users.len() as UserId + 1,
            username: username.to_string(),
        };
        state.users.push(user.clone());
        user
    }

    pub(crate) fn seed_game(&self, name: &str) -> Game {
        let mut state = self.state.lock().unwrap();
        let game = Game {
            id: state.games.len() as GameId + 1,
            name: name.to_string(),
        };
        state.games.push(game.clone());
        game
    }

    pub(crate) fn seed_link(&self, user_id: UserId, game_id: GameId) {
        self.state.lock().unwrap().links.push((user_id, game_id));
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn user_count(&self) -> usize {
        self.state.lock().unwrap().users.len()
    }

    /// Linked game names for a user, one entry per link row.
    pub(crate) fn linked_game_names(&self, username: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let Some(user) = state.users.iter().find(|user| user.username == username) else {
            return Vec::new();
        };
        state
            .links
            .iter()
            .filter(|(user_id, _)| *user_id == user.id)
            .filter_map(|(_, game_id)| state.games.iter().find(|game| game.id == *game_id))
            .map(|game| game.name.clone())
            .collect()
    }

    async fn enter(&self, operation: &'static str, call: String) -> Result<(), DirectoryError> {
        self.state.lock().unwrap().calls.push(call);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable {
            return Err(DirectoryError::Transport {
                operation,
                message: "connection refused (os error 111)".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryClient for InMemoryDirectory {
    async fn list_users(&self, _ctx: &RequestContext) -> Result<Vec<User>, DirectoryError> {
        self.enter("list users", "list_users".to_string()).await?;
        Ok(self.state.lock().unwrap().users.clone())
    }

    async fn list_games(&self, _ctx: &RequestContext) -> Result<Vec<Game>, DirectoryError> {
        self.enter("list games", "list_games".to_string()).await?;
        Ok(self.state.lock().unwrap().games.clone())
    }

    async fn create_user(
        &self,
        _ctx: &RequestContext,
        username: &str,
    ) -> Result<User, DirectoryError> {
        self.enter("create user", format!("create_user:{username}"))
            .await?;
        if self.fail_user_creation {
            return Err(DirectoryError::Status {
                operation: "create user",
                status: 500,
                body: "insert failed".to_string(),
            });
        }
        Ok(self.seed_user(username))
    }

    async fn create_game(&self, _ctx: &RequestContext, name: &str) -> Result<Game, DirectoryError> {
        self.enter("create game", format!("create_game:{name}")).await?;
        if self.fail_game_creation.as_deref() == Some(name) {
            return Err(DirectoryError::Status {
                operation: "create game",
                status: 500,
                body: "insert failed".to_string(),
            });
        }
        Ok(self.seed_game(name))
    }

    async fn list_user_games(
        &self,
        _ctx: &RequestContext,
        user_id: UserId,
    ) -> Result<Vec<Game>, DirectoryError> {
        self.enter("list user games", format!("list_user_games:{user_id}"))
            .await?;
        let state = self.state.lock().unwrap();
        if !state.users.iter().any(|user| user.id == user_id) {
            return Err(DirectoryError::NotFound {
                operation: "list user games",
            });
        }
        Ok(state
            .links
            .iter()
            .filter(|(linked_user, _)| *linked_user == user_id)
            .filter_map(|(_, game_id)| state.games.iter().find(|game| game.id == *game_id))
            .cloned()
            .collect())
    }

    async fn link_user_game(
        &self,
        _ctx: &RequestContext,
        user_id: UserId,
        game_id: GameId,
    ) -> Result<bool, DirectoryError> {
        self.enter("link user game", format!("link:{user_id}:{game_id}"))
            .await?;
        let mut state = self.state.lock().unwrap();
        let known = state.users.iter().any(|user| user.id == user_id)
            && state.games.iter().any(|game| game.id == game_id);
        let duplicate = state.links.contains(&(user_id, game_id));
        if !known || (duplicate && self.reject_duplicate_links) {
            return Ok(false);
        }
        state.links.push((user_id, game_id));
        Ok(true)
    }

    async fn unlink_user_game(
        &self,
        _ctx: &RequestContext,
        user_id: UserId,
        game_id: GameId,
    ) -> Result<(), DirectoryError> {
        self.enter("unlink user game", format!("unlink:{user_id}:{game_id}"))
            .await?;
        if self.fail_unlink == Some(game_id) {
            return Err(DirectoryError::Status {
                operation: "unlink user game",
                status: 500,
                body: "delete failed".to_string(),
            });
        }
        let mut state = self.state.lock().unwrap();
        let Some(position) = state
            .links
            .iter()
            .position(|link| *link == (user_id, game_id))
        else {
            return Err(DirectoryError::NotFound {
                operation: "unlink user game",
            });
        };
        state.links.remove(position);
        Ok(())
    }
}
