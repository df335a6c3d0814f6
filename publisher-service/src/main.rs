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

use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use gameclient_common::{
    CORRELATION_ID_HEADER, Game, GameId, User, UserGameDto, UserId, expand_env_vars,
    parse_env_bool,
};
use lambda_http::run as lambda_run;
use rand::{Rng, seq::SliceRandom};
use serde::Deserialize;
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info, info_span, warn};

#[derive(Clone)]
struct AppState {
    store: Arc<RwLock<DirectoryStore>>,
    duplicate_links: DuplicateLinkPolicy,
}

/// What the directory does when a user/game pair is linked a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DuplicateLinkPolicy {
    Reject,
    Allow,
}

impl DuplicateLinkPolicy {
    fn from_env() -> Self {
        let Some(raw) = std::env::var("PUBLISHER_DUPLICATE_LINKS")
            .ok()
            .map(|value| value.trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty())
        else {
            return Self::Reject;
        };

        match raw.as_str() {
            "reject" => Self::Reject,
            "allow" => Self::Allow,
            other => {
                warn!(value = %other, "unknown PUBLISHER_DUPLICATE_LINKS value; rejecting duplicates");
                Self::Reject
            }
        }
    }
}

#[derive(Debug, Clone)]
struct UserGameLink {
    user_id: UserId,
    game_id: GameId,
    linked_at: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Eq)]
enum LinkRejection {
    UnknownEntity,
    AlreadyLinked,
}

#[derive(Default)]
struct DirectoryStore {
    users: BTreeMap<UserId, User>,
    games: BTreeMap<GameId, Game>,
    links: Vec<UserGameLink>,
    last_user_id: UserId,
    last_game_id: GameId,
}

impl DirectoryStore {
    fn add_user(&mut self, username: &str) -> User {
        self.last_user_id += 1;
        let user = User {
            id: self.last_user_id,
            username: username.to_string(),
        };
        self.users.insert(user.id, user.clone());
        user
    }

    fn add_game(&mut self, name: &str) -> Game {
        self.last_game_id += 1;
        let game = Game {
            id: self.last_game_id,
            name: name.to_string(),
        };
        self.games.insert(game.id, game.clone());
        game
    }

    fn delete_user(&mut self, user_id: UserId) -> bool {
        if self.users.remove(&user_id).is_none() {
            return false;
        }
        self.links.retain(|link| link.user_id != user_id);
        true
    }

    fn delete_game(&mut self, game_id: GameId) -> bool {
        if self.games.remove(&game_id).is_none() {
            return false;
        }
        self.links.retain(|link| link.game_id != game_id);
        true
    }

    /// `None` when the user does not exist.
    fn user_games(&self, user_id: UserId) -> Option<Vec<Game>> {
        if !self.users.contains_key(&user_id) {
            return None;
        }

        Some(
            self.links
                .iter()
                .filter(|link| link.user_id == user_id)
                .filter_map(|link| self.games.get(&link.game_id).cloned())
                .collect(),
        )
    }

    fn link(
        &mut self,
        user_id: UserId,
        game_id: GameId,
        policy: DuplicateLinkPolicy,
    ) -> Result<UserGameDto, LinkRejection> {
        let (Some(user), Some(game)) = (self.users.get(&user_id), self.games.get(&game_id)) else {
            return Err(LinkRejection::UnknownEntity);
        };

        let already_linked = self
            .links
            .iter()
            .any(|link| link.user_id == user_id && link.game_id == game_id);
        if already_linked && policy == DuplicateLinkPolicy::Reject {
            return Err(LinkRejection::AlreadyLinked);
        }

        let linked_at = Utc::now();
        let dto = UserGameDto {
            user_id,
            username: user.username.clone(),
            game_id,
            game_name: game.name.clone(),
            linked_at: Some(linked_at),
        };
        self.links.push(UserGameLink {
            user_id,
            game_id,
            linked_at,
        });
        Ok(dto)
    }

    /// Removes a single link row for the pair.
    fn unlink(&mut self, user_id: UserId, game_id: GameId) -> bool {
        let Some(position) = self
            .links
            .iter()
            .position(|link| link.user_id == user_id && link.game_id == game_id)
        else {
            return false;
        };
        let removed = self.links.remove(position);
        info!(
            user_id,
            game_id,
            linked_for_secs = (Utc::now() - removed.linked_at).num_seconds(),
            "link removed"
        );
        true
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct SeedConfig {
    users: Vec<String>,
    games: Vec<String>,
    games_per_user: usize,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            users: [
                "alice", "bob", "charlie", "dave", "eve", "frank", "grace", "heidi", "alex",
                "judy",
            ]
            .into_iter()
            .map(ToOwned::to_owned)
            .collect(),
            games: [
                "The Witcher 3",
                "Cyberpunk 2077",
                "Minecraft",
                "The Last of Us Part I",
                "Hollow Knight",
                "Celeste",
                "Among Us",
                "Factorio",
                "Terraria",
                "Hades",
                "CS2",
            ]
            .into_iter()
            .map(ToOwned::to_owned)
            .collect(),
            games_per_user: 3,
        }
    }
}

fn load_seed_config() -> SeedConfig {
    let Some(path) = std::env::var("PUBLISHER_SEED_CONFIG_PATH")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    else {
        return SeedConfig::default();
    };

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path, error = %error, "failed to read seed config file");
            return SeedConfig::default();
        }
    };

    match serde_yaml::from_str::<SeedConfig>(&expand_env_vars(&raw)) {
        Ok(config) => {
            info!(
                path = %path,
                users = config.users.len(),
                games = config.games.len(),
                "loaded seed config from YAML"
            );
            config
        }
        Err(error) => {
            warn!(path = %path, error = %error, "failed to parse seed config yaml");
            SeedConfig::default()
        }
    }
}

/// Populates an empty store; each user gets `games_per_user` distinct random games.
fn seed_store<R: Rng + ?Sized>(store: &mut DirectoryStore, config: &SeedConfig, rng: &mut R) {
    if !store.users.is_empty() {
        return;
    }

    let users: Vec<User> = config
        .users
        .iter()
        .map(|username| store.add_user(username))
        .collect();
    let game_ids: Vec<GameId> = config
        .games
        .iter()
        .map(|name| store.add_game(name).id)
        .collect();

    for user in &users {
        let mut candidates = game_ids.clone();
        candidates.shuffle(rng);
        for game_id in candidates.into_iter().take(config.games_per_user) {
            if let Err(rejection) = store.link(user.id, game_id, DuplicateLinkPolicy::Reject) {
                warn!(user_id = user.id, game_id, ?rejection, "seed link skipped");
            }
        }
    }

    info!(
        users = store.users.len(),
        games = store.games.len(),
        links = store.links.len(),
        "seeded directory store"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "publisher_service=debug,tower_http=info".to_string()),
        )
        .init();

    let mut store = DirectoryStore::default();
    if parse_env_bool("PUBLISHER_SEED_DATA", true) {
        seed_store(&mut store, &load_seed_config(), &mut rand::rng());
    }

    let state = AppState {
        store: Arc::new(RwLock::new(store)),
        duplicate_links: DuplicateLinkPolicy::from_env(),
    };
    info!(duplicate_links = ?state.duplicate_links, "directory link policy");

    let app = build_router(state);

    if std::env::var("AWS_LAMBDA_RUNTIME_API").is_ok() {
        info!("AWS Lambda runtime detected; running publisher-service in lambda mode");
        lambda_run(app)
            .await
            .map_err(|e| anyhow::Error::msg(format!("lambda runtime error: {e}")))?;
        return Ok(());
    }

    let bind_addr = parse_bind_addr("PUBLISHER_BIND", "0.0.0.0:8092")?;
    info!(%bind_addr, "publisher-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/management/users",
            get(list_users_handler).post(create_user_handler),
        )
        .route("/management/users/{user_id}", delete(delete_user_handler))
        .route(
            "/management/games",
            get(list_games_handler).post(create_game_handler),
        )
        .route("/management/games/{game_id}", delete(delete_game_handler))
        .route(
            "/management/users/{user_id}/games",
            get(list_user_games_handler),
        )
        .route(
            "/management/users/{user_id}/games/{game_id}",
            post(link_handler).delete(unlink_handler),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
}

fn request_span(request: &Request<Body>) -> Span {
    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");
    info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri(),
        correlation_id = %correlation_id
    )
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "publisher-service"}))
}

#[derive(Debug, Default, Deserialize)]
struct NameQuery {
    name: Option<String>,
}

fn required_name(query: NameQuery) -> Result<String, ApiError> {
    query
        .name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("query parameter `name` is required"))
}

async fn list_users_handler(State(state): State<AppState>) -> Json<Vec<User>> {
    let store = state.store.read().await;
    Json(store.users.values().cloned().collect())
}

async fn create_user_handler(
    State(state): State<AppState>,
    Query(query): Query<NameQuery>,
) -> Result<Json<User>, ApiError> {
    let username = required_name(query)?;
    let user = state.store.write().await.add_user(&username);
    info!(user_id = user.id, username = %user.username, "user added");
    Ok(Json(user))
}

async fn delete_user_handler(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<StatusCode, ApiError> {
    if !state.store.write().await.delete_user(user_id) {
        return Err(ApiError::not_found(format!("user {user_id} not found")));
    }
    info!(user_id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_games_handler(State(state): State<AppState>) -> Json<Vec<Game>> {
    let store = state.store.read().await;
    Json(store.games.values().cloned().collect())
}

async fn create_game_handler(
    State(state): State<AppState>,
    Query(query): Query<NameQuery>,
) -> Result<Json<Game>, ApiError> {
    let name = required_name(query)?;
    let game = state.store.write().await.add_game(&name);
    info!(game_id = game.id, game_name = %game.name, "game added");
    Ok(Json(game))
}

async fn delete_game_handler(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
) -> Result<StatusCode, ApiError> {
    if !state.store.write().await.delete_game(game_id) {
        return Err(ApiError::not_found(format!("game {game_id} not found")));
    }
    info!(game_id, "game deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_user_games_handler(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<Vec<Game>>, ApiError> {
    let games = state
        .store
        .read()
        .await
        .user_games(user_id)
        .ok_or_else(|| ApiError::not_found(format!("user {user_id} not found")))?;
    info!(user_id, count = games.len(), "fetched user games");
    Ok(Json(games))
}

async fn link_handler(
    State(state): State<AppState>,
    Path((user_id, game_id)): Path<(UserId, GameId)>,
) -> Result<Json<UserGameDto>, ApiError> {
    let result = state
        .store
        .write()
        .await
        .link(user_id, game_id, state.duplicate_links);

    match result {
        Ok(dto) => {
            info!(user_id, game_id, "game linked to user");
            Ok(Json(dto))
        }
        Err(LinkRejection::UnknownEntity) => Err(ApiError::not_found(format!(
            "cannot link game {game_id} to user {user_id}: user or game not found"
        ))),
        Err(LinkRejection::AlreadyLinked) => Err(ApiError::conflict(format!(
            "game {game_id} is already linked to user {user_id}"
        ))),
    }
}

async fn unlink_handler(
    State(state): State<AppState>,
    Path((user_id, game_id)): Path<(UserId, GameId)>,
) -> Result<StatusCode, ApiError> {
    if !state.store.write().await.unlink(user_id, game_id) {
        return Err(ApiError::not_found(format!(
            "game {game_id} is not linked to user {user_id}"
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn app_state(policy: DuplicateLinkPolicy) -> AppState {
        AppState {
            store: Arc::new(RwLock::new(DirectoryStore::default())),
            duplicate_links: policy,
        }
    }

    fn name(value: &str) -> Query<NameQuery> {
        Query(NameQuery {
            name: Some(value.to_string()),
        })
    }

    #[test]
    fn seed_store_links_distinct_games_per_user() {
        let mut store = DirectoryStore::default();
        seed_store(&mut store, &SeedConfig::default(), &mut rand::rng());

        assert_eq!(store.users.len(), 10);
        assert_eq!(store.games.len(), 11);
        for user_id in store.users.keys() {
            let games = store.user_games(*user_id).unwrap();
            let distinct: HashSet<GameId> = games.iter().map(|game| game.id).collect();
            assert_eq!(games.len(), 3);
            assert_eq!(distinct.len(), 3);
        }
    }

    #[test]
    fn seed_store_skips_non_empty_store() {
        let mut store = DirectoryStore::default();
        store.add_user("existing");
        seed_store(&mut store, &SeedConfig::default(), &mut rand::rng());

        assert_eq!(store.users.len(), 1);
        assert!(store.games.is_empty());
    }

    #[test]
    fn seed_config_yaml_fills_missing_fields_from_defaults() {
        let config: SeedConfig = serde_yaml::from_str("users: [zoe]\ngames_per_user: 1\n").unwrap();
        assert_eq!(config.users, vec!["zoe".to_string()]);
        assert_eq!(config.games.len(), 11);
        assert_eq!(config.games_per_user, 1);
    }

    #[test]
    fn delete_user_removes_its_links() {
        let mut store = DirectoryStore::default();
        let user = store.add_user("alice");
        let game = store.add_game("Hades");
        store
            .link(user.id, game.id, DuplicateLinkPolicy::Reject)
            .unwrap();

        assert!(store.delete_user(user.id));
        assert!(store.links.is_empty());
        assert!(!store.delete_user(user.id));
    }

    #[tokio::test]
    async fn create_user_assigns_sequential_ids() {
        let state = app_state(DuplicateLinkPolicy::Reject);
        let first = create_user_handler(State(state.clone()), name("alice"))
            .await
            .unwrap()
            .0;
        let second = create_user_handler(State(state.clone()), name("bob"))
            .await
            .unwrap()
            .0;

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        let users = list_users_handler(State(state)).await.0;
        assert_eq!(users, vec![first, second]);
    }

    #[tokio::test]
    async fn create_keeps_names_exactly_as_given() {
        let state = app_state(DuplicateLinkPolicy::Reject);
        let user = create_user_handler(State(state.clone()), name(" bob"))
            .await
            .unwrap()
            .0;
        let game = create_game_handler(State(state), name("Celeste "))
            .await
            .unwrap()
            .0;

        assert_eq!(user.username, " bob");
        assert_eq!(game.name, "Celeste ");
    }

    #[tokio::test]
    async fn create_user_with_blank_name_is_bad_request() {
        let state = app_state(DuplicateLinkPolicy::Reject);
        let err = create_user_handler(State(state), name("   "))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_game_without_name_is_bad_request() {
        let state = app_state(DuplicateLinkPolicy::Reject);
        let err = create_game_handler(State(state), Query(NameQuery::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn link_unknown_game_is_not_found() {
        let state = app_state(DuplicateLinkPolicy::Reject);
        let user = create_user_handler(State(state.clone()), name("alice"))
            .await
            .unwrap()
            .0;

        let err = link_handler(State(state), Path((user.id, 99)))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_link_is_conflict_when_rejecting() {
        let state = app_state(DuplicateLinkPolicy::Reject);
        let user = create_user_handler(State(state.clone()), name("alice"))
            .await
            .unwrap()
            .0;
        let game = create_game_handler(State(state.clone()), name("Celeste"))
            .await
            .unwrap()
            .0;

        let dto = link_handler(State(state.clone()), Path((user.id, game.id)))
            .await
            .unwrap()
            .0;
        assert_eq!(dto.username, "alice");
        assert_eq!(dto.game_name, "Celeste");
        assert!(dto.linked_at.is_some());

        let err = link_handler(State(state.clone()), Path((user.id, game.id)))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);

        let games = list_user_games_handler(State(state), Path(user.id))
            .await
            .unwrap()
            .0;
        assert_eq!(games.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_links_accumulate_when_allowed() {
        let state = app_state(DuplicateLinkPolicy::Allow);
        let user = create_user_handler(State(state.clone()), name("alice"))
            .await
            .unwrap()
            .0;
        let game = create_game_handler(State(state.clone()), name("Celeste"))
            .await
            .unwrap()
            .0;

        link_handler(State(state.clone()), Path((user.id, game.id)))
            .await
            .unwrap();
        link_handler(State(state.clone()), Path((user.id, game.id)))
            .await
            .unwrap();

        let games = list_user_games_handler(State(state.clone()), Path(user.id))
            .await
            .unwrap()
            .0;
        assert_eq!(games.len(), 2);

        let status = unlink_handler(State(state.clone()), Path((user.id, game.id)))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        let games = list_user_games_handler(State(state), Path(user.id))
            .await
            .unwrap()
            .0;
        assert_eq!(games.len(), 1);
    }

    #[tokio::test]
    async fn unlink_missing_pair_is_not_found() {
        let state = app_state(DuplicateLinkPolicy::Reject);
        let err = unlink_handler(State(state), Path((1, 1)))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_user_games_for_unknown_user_is_not_found() {
        let state = app_state(DuplicateLinkPolicy::Reject);
        let err = list_user_games_handler(State(state), Path(42))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_game_handler_reports_missing_game() {
        let state = app_state(DuplicateLinkPolicy::Reject);
        let game = create_game_handler(State(state.clone()), name("Factorio"))
            .await
            .unwrap()
            .0;

        let status = delete_game_handler(State(state.clone()), Path(game.id))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        let err = delete_game_handler(State(state), Path(game.id))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
