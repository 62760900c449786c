use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{TimeDelta, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand_core::OsRng;
use uuid::Uuid;

use encore_db::Database;
use encore_gateway::dispatcher::Dispatcher;
use encore_types::UserId;
use encore_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};

use crate::blocking::{run_blocking, with_db};
use crate::error::SocialError;
use crate::listens::ListenTracker;
use crate::notifications::NotificationStore;
use crate::songs::SongPublisher;
use crate::subscriptions::SubscriptionGraph;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub token_days: i64,
    pub dispatcher: Dispatcher,
    pub notifications: NotificationStore,
    pub listens: ListenTracker,
    pub graph: SubscriptionGraph,
    pub songs: SongPublisher,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher, jwt_secret: String, token_days: i64) -> Self {
        let notifications = NotificationStore::new(db.clone());
        let listens = ListenTracker::new(db.clone());
        let graph = SubscriptionGraph::new(db.clone(), dispatcher.clone(), notifications.clone());
        let songs = SongPublisher::new(db.clone(), dispatcher.clone(), graph.clone(), notifications.clone());
        Self {
            db,
            jwt_secret,
            token_days,
            dispatcher,
            notifications,
            listens,
            graph,
            songs,
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, SocialError> {
    // Validate input
    let login_len = req.login.chars().count();
    if !(3..=32).contains(&login_len) {
        return Err(SocialError::BadRequest("Login must be 3-32 characters"));
    }
    if req.password.chars().count() < 8 {
        return Err(SocialError::BadRequest("Password must be at least 8 characters"));
    }

    // Hash password with Argon2id
    let password = req.password;
    let password_hash = run_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
            .to_string();
        Ok(hash)
    })
    .await?;

    // The UNIQUE login decides between concurrent registrations.
    let user_id = Uuid::new_v4();
    let login = req.login.clone();
    let created = with_db(&state.db, move |db| {
        db.create_user(user_id, &login, &password_hash, Utc::now())
    })
    .await?;
    if !created {
        return Err(SocialError::Conflict);
    }

    let token = create_token(&state.jwt_secret, state.token_days, user_id, &req.login)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user_id,
            login: req.login,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, SocialError> {
    let login = req.login;
    let user = with_db(&state.db, move |db| db.get_user_by_login(&login))
        .await?
        .ok_or(SocialError::Unauthorized)?;

    // Verify password
    let stored = user.password.clone();
    let stored_login = user.login.clone();
    let password = req.password;
    run_blocking(move || {
        let parsed_hash = PasswordHash::new(&stored)
            .map_err(|e| anyhow::anyhow!("stored hash for {} is corrupt: {}", stored_login, e))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| SocialError::Unauthorized)
    })
    .await?;

    let user_id: UserId = user.id.parse().map_err(anyhow::Error::from)?;
    let token = create_token(&state.jwt_secret, state.token_days, user_id, &user.login)?;

    Ok(Json(AuthResponse {
        user_id,
        login: user.login,
        token,
    }))
}

/// "Who am I". Also the only trigger for purging the caller's expired
/// notifications.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, SocialError> {
    let user_id = claims.sub;
    let user = with_db(&state.db, move |db| {
        db.get_user_by_id(user_id)?.map(|row| row.into_model()).transpose()
    })
    .await?
    .ok_or(SocialError::Unauthorized)?;

    state.notifications.expire_for(user.id).await?;

    Ok(Json(user))
}

pub fn create_token(secret: &str, days: i64, user_id: UserId, login: &str) -> anyhow::Result<String> {
    let lifetime = TimeDelta::try_days(days)
        .filter(|d| *d > TimeDelta::zero())
        .ok_or_else(|| anyhow::anyhow!("token lifetime of {} days is out of range", days))?;
    let expires_at = Utc::now()
        .checked_add_signed(lifetime)
        .ok_or_else(|| anyhow::anyhow!("token expiry overflows after {} days", days))?;

    let claims = Claims {
        sub: user_id,
        login: login.to_string(),
        exp: usize::try_from(expires_at.timestamp())?,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation, decode};

    #[test]
    fn token_carries_subject_and_future_expiry() {
        let user = Uuid::new_v4();
        let token = create_token("secret", 30, user, "alice").unwrap();
        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"secret"),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(data.claims.sub, user);
        assert_eq!(data.claims.login, "alice");
        assert!(data.claims.exp as i64 > Utc::now().timestamp() + 29 * 86_400);
    }

    #[test]
    fn out_of_range_lifetimes_are_errors_not_panics() {
        let user = Uuid::new_v4();
        assert!(create_token("secret", i64::MAX, user, "alice").is_err());
        assert!(create_token("secret", 1_000_000_000, user, "alice").is_err());
        assert!(create_token("secret", 0, user, "alice").is_err());
        assert!(create_token("secret", -5, user, "alice").is_err());
    }
}
