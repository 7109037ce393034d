use std::collections::HashMap;

use sqlx::{Pool, Postgres};

use crate::{
    constants::SUBSCRIPTION_COUNT_PER_PAGE,
    error::ApiError,
    jwt::Identity,
    pagination::PageContext,
    schema::{AuthorRecipeRow, FollowView, RecipeSummary, User, Uuid},
};

use super::users::get_user_by_id;

pub async fn add_favorite(
    identity: Identity,
    recipe_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<RecipeSummary, ApiError> {
    add_recipe_relation(
        identity,
        recipe_id,
        "favorites",
        "You have already added this recipe to favorites",
        pool,
    )
    .await
}

pub async fn remove_favorite(
    identity: Identity,
    recipe_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<(), ApiError> {
    remove_recipe_relation(identity, recipe_id, "favorites", "favorite", pool).await
}

pub async fn add_to_cart(
    identity: Identity,
    recipe_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<RecipeSummary, ApiError> {
    add_recipe_relation(
        identity,
        recipe_id,
        "shopping_carts",
        "You have already added this recipe to the shopping cart",
        pool,
    )
    .await
}

pub async fn remove_from_cart(
    identity: Identity,
    recipe_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<(), ApiError> {
    remove_recipe_relation(identity, recipe_id, "shopping_carts", "shopping cart entry", pool).await
}

/// Shared create path for the two (user, recipe) relations. The unique pair
/// constraint backs the affected-row check against concurrent duplicates.
async fn add_recipe_relation(
    identity: Identity,
    recipe_id: Uuid,
    table: &str,
    conflict: &'static str,
    pool: &Pool<Postgres>,
) -> Result<RecipeSummary, ApiError> {
    let user_id = identity.require()?;
    let summary = recipe_summary(recipe_id, pool)
        .await?
        .ok_or(ApiError::NotFound("recipe"))?;

    let result = sqlx::query(&format!(
        "INSERT INTO {table} (user_id, recipe_id) VALUES ($1, $2) ON CONFLICT DO NOTHING"
    ))
    .bind(user_id)
    .bind(recipe_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::Conflict(conflict));
    }

    Ok(summary)
}

async fn remove_recipe_relation(
    identity: Identity,
    recipe_id: Uuid,
    table: &str,
    entry: &'static str,
    pool: &Pool<Postgres>,
) -> Result<(), ApiError> {
    let user_id = identity.require()?;

    if recipe_summary(recipe_id, pool).await?.is_none() {
        return Err(ApiError::NotFound("recipe"));
    }

    let result = sqlx::query(&format!(
        "DELETE FROM {table} WHERE user_id = $1 AND recipe_id = $2"
    ))
    .bind(user_id)
    .bind(recipe_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(entry));
    }

    Ok(())
}

pub async fn recipe_summary(
    recipe_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<Option<RecipeSummary>, ApiError> {
    let row: Option<RecipeSummary> =
        sqlx::query_as("SELECT id, name, image, cooking_time FROM recipes WHERE id = $1")
            .bind(recipe_id)
            .fetch_optional(pool)
            .await?;

    Ok(row)
}

pub async fn follow_user(
    identity: Identity,
    author_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<FollowView, ApiError> {
    let user_id = identity.require()?;
    if user_id == author_id {
        return Err(ApiError::SelfReferenceRejected);
    }

    let author = get_user_by_id(author_id, pool)
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    let result = sqlx::query(
        "INSERT INTO follows (user_id, author_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(user_id)
    .bind(author_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::Conflict(
            "You are already subscribed to this user",
        ));
    }

    let recipes_by_author = fetch_author_recipes(&[author_id], pool).await?;
    let mut views = compose_follow_views(vec![author], recipes_by_author);
    views.pop().ok_or(ApiError::NotFound("user"))
}

pub async fn unfollow_user(
    identity: Identity,
    author_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<(), ApiError> {
    let user_id = identity.require()?;

    if get_user_by_id(author_id, pool).await?.is_none() {
        return Err(ApiError::NotFound("user"));
    }

    let result = sqlx::query("DELETE FROM follows WHERE user_id = $1 AND author_id = $2")
        .bind(user_id)
        .bind(author_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("subscription"));
    }

    Ok(())
}

/// Page of the identity's subscriptions, each author rendered with their
/// embedded recipe summaries and recipe count.
pub async fn list_subscriptions(
    identity: Identity,
    offset: i64,
    pool: &Pool<Postgres>,
) -> Result<PageContext<FollowView>, ApiError> {
    let user_id = identity.require()?;

    let rows: Vec<(Uuid, i64)> = sqlx::query_as(
        "
        SELECT f.author_id, COUNT(*) OVER() AS count
        FROM follows f
        WHERE f.user_id = $1
        ORDER BY f.author_id
        LIMIT $2 OFFSET $3
    ",
    )
    .bind(user_id)
    .bind(SUBSCRIPTION_COUNT_PER_PAGE)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total_count = rows.first().map(|row| row.1).unwrap_or(0);
    let author_ids: Vec<Uuid> = rows.into_iter().map(|row| row.0).collect();

    let users: Vec<User> = sqlx::query_as(
        "SELECT id, email, username, first_name, last_name FROM users WHERE id = ANY($1) ORDER BY id",
    )
    .bind(&author_ids)
    .fetch_all(pool)
    .await?;

    let recipes_by_author = fetch_author_recipes(&author_ids, pool).await?;
    let views = compose_follow_views(users, recipes_by_author);

    Ok(PageContext::from_rows(
        views,
        total_count,
        SUBSCRIPTION_COUNT_PER_PAGE,
        offset,
    ))
}

async fn fetch_author_recipes(
    author_ids: &[Uuid],
    pool: &Pool<Postgres>,
) -> Result<HashMap<Uuid, Vec<RecipeSummary>>, ApiError> {
    if author_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<AuthorRecipeRow> = sqlx::query_as(
        "
        SELECT author_id, id, name, image, cooking_time
        FROM recipes
        WHERE author_id = ANY($1)
        ORDER BY id DESC
    ",
    )
    .bind(author_ids)
    .fetch_all(pool)
    .await?;

    Ok(group_by_author(rows))
}

fn group_by_author(rows: Vec<AuthorRecipeRow>) -> HashMap<Uuid, Vec<RecipeSummary>> {
    let mut map: HashMap<Uuid, Vec<RecipeSummary>> = HashMap::new();
    for row in rows {
        map.entry(row.author_id).or_default().push(row.into());
    }
    map
}

/// Already-followed authors by construction, so `is_subscribed` is always
/// true in these views.
fn compose_follow_views(
    authors: Vec<User>,
    mut recipes_by_author: HashMap<Uuid, Vec<RecipeSummary>>,
) -> Vec<FollowView> {
    authors
        .into_iter()
        .map(|author| {
            let recipes = recipes_by_author.remove(&author.id).unwrap_or_default();
            let recipes_count = recipes.len() as i64;

            FollowView {
                email: author.email,
                id: author.id,
                username: author.username,
                first_name: author.first_name,
                last_name: author.last_name,
                is_subscribed: true,
                recipes,
                recipes_count,
            }
        })
        .collect()
}
