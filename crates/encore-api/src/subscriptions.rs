use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;

use encore_db::Database;
use encore_db::models::UserRow;
use encore_gateway::dispatcher::Dispatcher;
use encore_types::UserId;
use encore_types::api::{Claims, FollowResponse, LimitQuery};
use encore_types::events::GatewayEvent;
use encore_types::models::{SubscriptionEdge, User};

use crate::auth::AppStateInner;
use crate::blocking::{run_blocking, with_db};
use crate::error::SocialError;
use crate::notifications::NotificationStore;
use crate::users::{MAX_PAGE_SIZE, into_users};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    Followed,
    AlreadyFollowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnfollowOutcome {
    Unfollowed,
    NotFollowed,
}

impl FollowOutcome {
    pub fn message(self) -> &'static str {
        match self {
            Self::Followed => "Followed!",
            Self::AlreadyFollowed => "Already followed!",
        }
    }
}

impl UnfollowOutcome {
    pub fn message(self) -> &'static str {
        match self {
            Self::Unfollowed => "Unfollowed!",
            Self::NotFollowed => "Not followed!",
        }
    }
}

/// Directed follow edges and the messages they trigger.
///
/// `follow` leaves a durable notification for the target; `unfollow` only
/// dispatches to whoever is online.
#[derive(Clone)]
pub struct SubscriptionGraph {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    notifications: NotificationStore,
}

impl SubscriptionGraph {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher, notifications: NotificationStore) -> Self {
        Self {
            db,
            dispatcher,
            notifications,
        }
    }

    pub async fn follow(&self, subscriber_id: UserId, target_id: UserId) -> Result<FollowOutcome, SocialError> {
        let (subscriber, target) = self.resolve_pair(subscriber_id, target_id).await?;

        // Insert-if-absent runs under the store lock; the pair is UNIQUE.
        let added = with_db(&self.db, move |db| {
            db.insert_follow_if_absent(subscriber_id, target_id, Utc::now())
        })
        .await?;
        if !added {
            return Ok(FollowOutcome::AlreadyFollowed);
        }
        info!("{} now follows {}", subscriber.login, target.login);

        self.dispatcher
            .send_to_user(
                subscriber_id,
                GatewayEvent::notification(format!("You are following {} now!", target.login)),
            )
            .await;

        let text = format!("{} is following you now!", subscriber.login);
        self.dispatcher
            .send_to_user(target_id, GatewayEvent::notification(text.clone()))
            .await;

        self.notifications
            .create(target_id, &text, &format!("/profile/{}", subscriber_id))
            .await?;

        Ok(FollowOutcome::Followed)
    }

    pub async fn unfollow(&self, subscriber_id: UserId, target_id: UserId) -> Result<UnfollowOutcome, SocialError> {
        let (subscriber, target) = self.resolve_pair(subscriber_id, target_id).await?;

        let removed = with_db(&self.db, move |db| db.delete_follow(subscriber_id, target_id)).await?;
        if !removed {
            return Ok(UnfollowOutcome::NotFollowed);
        }
        info!("{} no longer follows {}", subscriber.login, target.login);

        self.dispatcher
            .send_to_user(
                subscriber_id,
                GatewayEvent::notification(format!("You are not following {} now!", target.login)),
            )
            .await;
        self.dispatcher
            .send_to_user(
                target_id,
                GatewayEvent::notification(format!("{} is not following you now!", subscriber.login)),
            )
            .await;

        Ok(UnfollowOutcome::Unfollowed)
    }

    /// Everyone following `user_id`, oldest edge first.
    pub async fn subscribers_of(&self, user_id: UserId) -> Result<Vec<UserId>, SocialError> {
        let raw = with_db(&self.db, move |db| db.get_subscriber_ids(user_id)).await?;
        parse_ids(raw)
    }

    /// Everyone `user_id` follows, oldest edge first.
    pub async fn subscriptions_of(&self, user_id: UserId) -> Result<Vec<UserId>, SocialError> {
        let raw = with_db(&self.db, move |db| db.get_subscription_ids(user_id)).await?;
        parse_ids(raw)
    }

    pub async fn is_following(&self, subscriber_id: UserId, target_id: UserId) -> Result<bool, SocialError> {
        with_db(&self.db, move |db| db.follow_exists(subscriber_id, target_id)).await
    }

    /// Followers of `user_id` as accounts, most-followed first.
    pub async fn subscriber_users(&self, user_id: UserId, limit: u32) -> Result<Vec<User>, SocialError> {
        let db = self.db.clone();
        run_blocking(move || {
            if db.get_user_by_id(user_id)?.is_none() {
                return Err(SocialError::NotFound);
            }
            Ok(into_users(db.get_subscriber_users(user_id, limit)?)?)
        })
        .await
    }

    /// Accounts `user_id` follows, most-followed first.
    pub async fn subscription_users(&self, user_id: UserId, limit: u32) -> Result<Vec<User>, SocialError> {
        let db = self.db.clone();
        run_blocking(move || {
            if db.get_user_by_id(user_id)?.is_none() {
                return Err(SocialError::NotFound);
            }
            Ok(into_users(db.get_subscription_users(user_id, limit)?)?)
        })
        .await
    }

    async fn resolve_pair(&self, subscriber_id: UserId, target_id: UserId) -> Result<(UserRow, UserRow), SocialError> {
        if subscriber_id == target_id {
            return Err(SocialError::InvalidTarget);
        }
        let db = self.db.clone();
        run_blocking(move || {
            let target = db.get_user_by_id(target_id)?.ok_or(SocialError::NotFound)?;
            let subscriber = db.get_user_by_id(subscriber_id)?.ok_or(SocialError::Unauthorized)?;
            Ok((subscriber, target))
        })
        .await
    }
}

fn parse_ids(raw: Vec<String>) -> Result<Vec<UserId>, SocialError> {
    raw.iter()
        .map(|id| id.parse::<UserId>().map_err(|e| SocialError::Persistence(e.into())))
        .collect()
}

pub async fn follow(
    State(state): State<Arc<AppStateInner>>,
    Path(target_id): Path<UserId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, SocialError> {
    let outcome = state.graph.follow(claims.sub, target_id).await?;
    Ok(Json(follow_response(outcome.message(), claims.sub, target_id)))
}

pub async fn unfollow(
    State(state): State<Arc<AppStateInner>>,
    Path(target_id): Path<UserId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, SocialError> {
    let outcome = state.graph.unfollow(claims.sub, target_id).await?;
    Ok(Json(follow_response(outcome.message(), claims.sub, target_id)))
}

fn follow_response(message: &str, subscriber_id: UserId, subscribed_id: UserId) -> FollowResponse {
    FollowResponse {
        message: message.to_string(),
        user_id: subscriber_id,
        edge: SubscriptionEdge {
            subscriber_id,
            subscribed_id,
        },
    }
}

pub async fn list_subscribers(
    State(state): State<Arc<AppStateInner>>,
    Path(user_id): Path<UserId>,
    Query(query): Query<LimitQuery>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, SocialError> {
    let users = state
        .graph
        .subscriber_users(user_id, query.limit.min(MAX_PAGE_SIZE))
        .await?;
    Ok(Json(users))
}

pub async fn list_subscriptions(
    State(state): State<Arc<AppStateInner>>,
    Path(user_id): Path<UserId>,
    Query(query): Query<LimitQuery>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, SocialError> {
    let users = state
        .graph
        .subscription_users(user_id, query.limit.min(MAX_PAGE_SIZE))
        .await?;
    Ok(Json(users))
}
