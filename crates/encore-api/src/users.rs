use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};

use encore_db::models::{UserRow, UserSort};
use encore_types::UserId;
use encore_types::api::{Claims, Page, ProfileResponse, UserListQuery, UserSortKey};
use encore_types::models::User;

use crate::auth::AppStateInner;
use crate::blocking::with_db;
use crate::error::SocialError;

/// Upper bound for any `size`/`limit` query parameter.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Plays shown on a profile.
pub const RECENT_LISTENS_SHOWN: u32 = 20;

pub(crate) fn into_users(rows: Vec<UserRow>) -> anyhow::Result<Vec<User>> {
    rows.into_iter().map(|row| row.into_model()).collect()
}

/// Profile fetch. The inbox is read as stored; expiry happens in `auth::me`.
pub async fn get_profile(
    State(state): State<Arc<AppStateInner>>,
    Path(user_id): Path<UserId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, SocialError> {
    let user = with_db(&state.db, move |db| {
        db.get_user_by_id(user_id)?.map(|row| row.into_model()).transpose()
    })
    .await?
    .ok_or(SocialError::NotFound)?;

    let notifications = state.notifications.list_for(user_id).await?;
    let subscribers = state.graph.subscribers_of(user_id).await?;
    let subscriptions = state.graph.subscriptions_of(user_id).await?;
    let recent_listens = state.listens.recent_for(user_id, RECENT_LISTENS_SHOWN).await?;
    let followed_by_me = claims.sub != user_id && state.graph.is_following(claims.sub, user_id).await?;

    Ok(Json(ProfileResponse {
        user,
        notifications,
        subscribers,
        subscriptions,
        recent_listens,
        followed_by_me,
    }))
}

/// `GET /users`: one page of accounts plus the total matching `search`.
pub async fn list_users(
    State(state): State<Arc<AppStateInner>>,
    Query(query): Query<UserListQuery>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, SocialError> {
    let sort = if query.recommended {
        UserSort::Popular
    } else {
        match query.sort_by {
            Some(UserSortKey::Popular) => UserSort::Popular,
            Some(UserSortKey::NameAsc) => UserSort::NameAsc,
            Some(UserSortKey::NameDesc) => UserSort::NameDesc,
            None => UserSort::Newest,
        }
    };
    let size = query.size.clamp(1, MAX_PAGE_SIZE);
    let offset = query.page.saturating_mul(size);
    let search = query.search;

    let page = with_db(&state.db, move |db| {
        let items = into_users(db.list_users(&search, sort, offset, size)?)?;
        let total = db.count_users(&search)?;
        Ok(Page { items, total })
    })
    .await?;

    Ok(Json(page))
}

/// `GET /users/{id}/songs`, newest upload first.
pub async fn list_user_songs(
    State(state): State<Arc<AppStateInner>>,
    Path(user_id): Path<UserId>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, SocialError> {
    let songs = state.songs.by_user(user_id).await?;
    Ok(Json(songs))
}
