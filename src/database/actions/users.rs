use std::collections::HashMap;

use sqlx::{Pool, Postgres};

use crate::{
    error::ApiError,
    jwt::Identity,
    schema::{User, UserProfile, Uuid},
};

pub async fn get_user_by_id(user_id: Uuid, pool: &Pool<Postgres>) -> Result<Option<User>, ApiError> {
    let row: Option<User> = sqlx::query_as(
        "SELECT id, email, username, first_name, last_name FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

pub async fn is_following(
    follower: Uuid,
    author: Uuid,
    pool: &Pool<Postgres>,
) -> Result<bool, ApiError> {
    let row: Option<(Uuid,)> =
        sqlx::query_as("SELECT author_id FROM follows WHERE user_id = $1 AND author_id = $2")
            .bind(follower)
            .bind(author)
            .fetch_optional(pool)
            .await?;

    Ok(row.is_some())
}

/// Public profile of a user, with the subscription flag computed relative to
/// the viewing identity. Anonymous viewers always see `is_subscribed: false`.
pub async fn get_profile(
    user_id: Uuid,
    identity: Identity,
    pool: &Pool<Postgres>,
) -> Result<UserProfile, ApiError> {
    let user = get_user_by_id(user_id, pool)
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    let is_subscribed = match identity.user_id() {
        Some(viewer) => is_following(viewer, user.id, pool).await?,
        None => false,
    };

    Ok(UserProfile::from_user(user, is_subscribed))
}

pub async fn current_profile(
    identity: Identity,
    pool: &Pool<Postgres>,
) -> Result<UserProfile, ApiError> {
    let user_id = identity.require()?;

    get_profile(user_id, identity, pool).await
}

/// Batch profile lookup for a page of authors; one query regardless of page
/// size, with the subscription flag folded into the SELECT.
pub(crate) async fn fetch_profiles(
    user_ids: &[Uuid],
    identity: Identity,
    pool: &Pool<Postgres>,
) -> Result<HashMap<Uuid, UserProfile>, ApiError> {
    if user_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<UserProfile> = sqlx::query_as(
        "
        SELECT u.email, u.id, u.username, u.first_name, u.last_name,
            EXISTS (
                SELECT 1 FROM follows f WHERE f.user_id = $2 AND f.author_id = u.id
            ) AS is_subscribed
        FROM users u
        WHERE u.id = ANY($1)
    ",
    )
    .bind(user_ids)
    .bind(identity.user_id())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|row| (row.id, row)).collect())
}
