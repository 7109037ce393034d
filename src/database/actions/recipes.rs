use std::collections::{HashMap, HashSet};

use sqlx::{Pool, Postgres, QueryBuilder, Transaction};

use crate::{
    constants::RECIPE_COUNT_PER_PAGE,
    error::{ApiError, ValidationError},
    jwt::Identity,
    media::decode_image_data_uri,
    pagination::PageContext,
    schema::{
        Flag, Recipe, RecipeIngredientRow, RecipePayload, RecipeQuery, RecipeRow, RecipeTagRow,
        RecipeView, Tag, UserProfile, Uuid,
    },
};

use super::users::fetch_profiles;

/// Filtered, newest-first page of recipes composed for the given identity.
/// Favorite/cart predicates silently no-op for anonymous callers.
pub async fn fetch_recipes(
    query: &RecipeQuery,
    identity: Identity,
    offset: i64,
    pool: &Pool<Postgres>,
) -> Result<PageContext<RecipeView>, ApiError> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT r.id, r.author_id, r.name, r.image, r.text, r.cooking_time, COUNT(*) OVER() AS count FROM recipes r WHERE TRUE",
    );

    if let Some(author) = query.author {
        builder.push(" AND r.author_id = ").push_bind(author);
    }

    if !query.tags.is_empty() {
        builder
            .push(
                " AND EXISTS (SELECT 1 FROM recipe_tags rt INNER JOIN tags t ON t.id = rt.tag_id WHERE rt.recipe_id = r.id AND t.slug = ANY(",
            )
            .push_bind(query.tags.clone())
            .push("))");
    }

    if let Some(user_id) = identity.user_id() {
        push_membership_predicate(&mut builder, "favorites", query.is_favorited, user_id);
        push_membership_predicate(
            &mut builder,
            "shopping_carts",
            query.is_in_shopping_cart,
            user_id,
        );
    }

    builder
        .push(" ORDER BY r.id DESC LIMIT ")
        .push_bind(RECIPE_COUNT_PER_PAGE)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows: Vec<RecipeRow> = builder.build_query_as().fetch_all(pool).await?;

    let total_count = rows.first().map(|row| row.count).unwrap_or(0);
    let recipes: Vec<Recipe> = rows.into_iter().map(Recipe::from).collect();
    let views = compose_views(recipes, identity, pool).await?;

    Ok(PageContext::from_rows(
        views,
        total_count,
        RECIPE_COUNT_PER_PAGE,
        offset,
    ))
}

fn push_membership_predicate(
    builder: &mut QueryBuilder<Postgres>,
    table: &str,
    flag: Option<Flag>,
    user_id: Uuid,
) {
    let Some(flag) = flag else { return };

    builder.push(match flag {
        Flag::Include => " AND EXISTS",
        Flag::Exclude => " AND NOT EXISTS",
    });
    builder
        .push(format!(
            " (SELECT 1 FROM {table} m WHERE m.recipe_id = r.id AND m.user_id = "
        ))
        .push_bind(user_id)
        .push(")");
}

pub async fn get_recipe(id: Uuid, pool: &Pool<Postgres>) -> Result<Option<Recipe>, ApiError> {
    let row: Option<Recipe> = sqlx::query_as("SELECT * FROM recipes WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}

pub async fn get_recipe_view(
    id: Uuid,
    identity: Identity,
    pool: &Pool<Postgres>,
) -> Result<RecipeView, ApiError> {
    let recipe = get_recipe(id, pool)
        .await?
        .ok_or(ApiError::NotFound("recipe"))?;

    let mut views = compose_views(vec![recipe], identity, pool).await?;
    views.pop().ok_or(ApiError::NotFound("recipe"))
}

/// Resolves a recipe for a mutating verb: the caller must be authenticated
/// and must be the author.
pub async fn get_recipe_mut(
    id: Uuid,
    identity: Identity,
    pool: &Pool<Postgres>,
) -> Result<Recipe, ApiError> {
    let user_id = identity.require()?;

    match get_recipe(id, pool).await? {
        Some(recipe) => {
            if recipe.author_id != user_id {
                Err(ApiError::PermissionDenied)
            } else {
                Ok(recipe)
            }
        }
        None => Err(ApiError::NotFound("recipe")),
    }
}

pub async fn create_recipe(
    identity: Identity,
    payload: &RecipePayload,
    pool: &Pool<Postgres>,
) -> Result<RecipeView, ApiError> {
    let author_id = identity.require()?;
    validate_payload(payload)?;
    let upload = decode_image_data_uri(&payload.image)?;

    let mut tr = pool.begin().await?;

    let row: (Uuid,) = sqlx::query_as(
        "INSERT INTO recipes (author_id, name, image, text, cooking_time) VALUES ($1, $2, '', $3, $4) RETURNING id",
    )
    .bind(author_id)
    .bind(&payload.name)
    .bind(&payload.text)
    .bind(payload.cooking_time)
    .fetch_one(&mut *tr)
    .await?;

    let recipe_id = row.0;

    sqlx::query("UPDATE recipes SET image = $1 WHERE id = $2")
        .bind(upload.stored_path(recipe_id))
        .bind(recipe_id)
        .execute(&mut *tr)
        .await?;

    replace_associations(recipe_id, payload, &mut tr).await?;

    tr.commit().await?;
    log::trace!("created recipe {recipe_id} for user {author_id}");

    get_recipe_view(recipe_id, identity, pool).await
}

pub async fn update_recipe(
    id: Uuid,
    identity: Identity,
    payload: &RecipePayload,
    pool: &Pool<Postgres>,
) -> Result<RecipeView, ApiError> {
    let recipe = get_recipe_mut(id, identity, pool).await?;
    validate_payload(payload)?;
    let upload = decode_image_data_uri(&payload.image)?;

    let mut tr = pool.begin().await?;

    sqlx::query("UPDATE recipes SET name = $1, image = $2, text = $3, cooking_time = $4 WHERE id = $5")
        .bind(&payload.name)
        .bind(upload.stored_path(recipe.id))
        .bind(&payload.text)
        .bind(payload.cooking_time)
        .bind(recipe.id)
        .execute(&mut *tr)
        .await?;

    replace_associations(recipe.id, payload, &mut tr).await?;

    tr.commit().await?;
    log::trace!("updated recipe {}", recipe.id);

    get_recipe_view(recipe.id, identity, pool).await
}

pub async fn delete_recipe(
    id: Uuid,
    identity: Identity,
    pool: &Pool<Postgres>,
) -> Result<(), ApiError> {
    let recipe = get_recipe_mut(id, identity, pool).await?;

    let mut tr = pool.begin().await?;

    for table in [
        "favorites",
        "shopping_carts",
        "recipe_tags",
        "recipe_ingredients",
    ] {
        sqlx::query(&format!("DELETE FROM {table} WHERE recipe_id = $1"))
            .bind(recipe.id)
            .execute(&mut *tr)
            .await?;
    }

    sqlx::query("DELETE FROM recipes WHERE id = $1")
        .bind(recipe.id)
        .execute(&mut *tr)
        .await?;

    tr.commit().await?;
    log::trace!("deleted recipe {}", recipe.id);

    Ok(())
}

/// Shared validation for create and update. Fails the whole operation before
/// any row is written.
pub fn validate_payload(payload: &RecipePayload) -> Result<(), ValidationError> {
    if payload.ingredients.is_empty() {
        return Err(ValidationError::EmptyIngredients);
    }
    let mut seen_ingredients = HashSet::new();
    if !payload
        .ingredients
        .iter()
        .all(|part| seen_ingredients.insert(part.id))
    {
        return Err(ValidationError::DuplicateIngredient);
    }
    if payload.ingredients.iter().any(|part| part.amount < 1) {
        return Err(ValidationError::Amount);
    }

    if payload.tags.is_empty() {
        return Err(ValidationError::EmptyTags);
    }
    let mut seen_tags = HashSet::new();
    if !payload.tags.iter().all(|tag| seen_tags.insert(*tag)) {
        return Err(ValidationError::DuplicateTag);
    }

    if payload.cooking_time < 1 {
        return Err(ValidationError::CookingTime);
    }

    Ok(())
}

/// Replaces both association sets wholesale: post-mutation state matches the
/// payload exactly instead of being merged with prior rows.
async fn replace_associations(
    recipe_id: Uuid,
    payload: &RecipePayload,
    tr: &mut Transaction<'_, Postgres>,
) -> Result<(), ApiError> {
    let known_tags: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM tags WHERE id = ANY($1)")
        .bind(&payload.tags)
        .fetch_all(&mut **tr)
        .await?;
    if known_tags.len() != payload.tags.len() {
        return Err(ValidationError::UnknownReference("tag").into());
    }

    let ingredient_ids: Vec<Uuid> = payload.ingredients.iter().map(|part| part.id).collect();
    let known_ingredients: Vec<(Uuid,)> =
        sqlx::query_as("SELECT id FROM ingredients WHERE id = ANY($1)")
            .bind(&ingredient_ids)
            .fetch_all(&mut **tr)
            .await?;
    if known_ingredients.len() != ingredient_ids.len() {
        return Err(ValidationError::UnknownReference("ingredient").into());
    }

    sqlx::query("DELETE FROM recipe_tags WHERE recipe_id = $1")
        .bind(recipe_id)
        .execute(&mut **tr)
        .await?;
    sqlx::query("DELETE FROM recipe_ingredients WHERE recipe_id = $1")
        .bind(recipe_id)
        .execute(&mut **tr)
        .await?;

    for tag_id in &payload.tags {
        sqlx::query("INSERT INTO recipe_tags (recipe_id, tag_id) VALUES ($1, $2)")
            .bind(recipe_id)
            .bind(tag_id)
            .execute(&mut **tr)
            .await?;
    }
    for part in &payload.ingredients {
        sqlx::query(
            "INSERT INTO recipe_ingredients (recipe_id, ingredient_id, amount) VALUES ($1, $2, $3)",
        )
        .bind(recipe_id)
        .bind(part.id)
        .bind(part.amount)
        .execute(&mut **tr)
        .await?;
    }

    Ok(())
}

/// Composes views for a page of recipes in five queries total: tag map,
/// ingredient map, author profiles, and the two membership sets.
pub async fn compose_views(
    recipes: Vec<Recipe>,
    identity: Identity,
    pool: &Pool<Postgres>,
) -> Result<Vec<RecipeView>, ApiError> {
    if recipes.is_empty() {
        return Ok(vec![]);
    }

    let ids: Vec<Uuid> = recipes.iter().map(|recipe| recipe.id).collect();
    let author_ids: Vec<Uuid> = {
        let unique: HashSet<Uuid> = recipes.iter().map(|recipe| recipe.author_id).collect();
        unique.into_iter().collect()
    };

    let tag_rows: Vec<RecipeTagRow> = sqlx::query_as(
        "
        SELECT rt.recipe_id, t.id, t.name, t.color, t.slug
        FROM recipe_tags rt
        INNER JOIN tags t ON t.id = rt.tag_id
        WHERE rt.recipe_id = ANY($1)
        ORDER BY t.name
    ",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let ingredient_rows: Vec<RecipeIngredientRow> = sqlx::query_as(
        "
        SELECT ri.recipe_id, i.id, i.name, i.measurement_unit, ri.amount
        FROM recipe_ingredients ri
        INNER JOIN ingredients i ON i.id = ri.ingredient_id
        WHERE ri.recipe_id = ANY($1)
    ",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let profiles = fetch_profiles(&author_ids, identity, pool).await?;

    let (favorited, in_cart) = match identity.user_id() {
        Some(user_id) => (
            fetch_membership("favorites", user_id, &ids, pool).await?,
            fetch_membership("shopping_carts", user_id, &ids, pool).await?,
        ),
        None => (HashSet::new(), HashSet::new()),
    };

    Ok(annotate_views(
        recipes,
        tag_rows,
        ingredient_rows,
        profiles,
        favorited,
        in_cart,
    ))
}

async fn fetch_membership(
    table: &str,
    user_id: Uuid,
    recipe_ids: &[Uuid],
    pool: &Pool<Postgres>,
) -> Result<HashSet<Uuid>, ApiError> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(&format!(
        "SELECT recipe_id FROM {table} WHERE user_id = $1 AND recipe_id = ANY($2)"
    ))
    .bind(user_id)
    .bind(recipe_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|row| row.0).collect())
}

/// Pure annotation step: joins a page of recipes with prefetched associations
/// and membership sets, preserving row order.
fn annotate_views(
    recipes: Vec<Recipe>,
    tag_rows: Vec<RecipeTagRow>,
    ingredient_rows: Vec<RecipeIngredientRow>,
    profiles: HashMap<Uuid, UserProfile>,
    favorited: HashSet<Uuid>,
    in_cart: HashSet<Uuid>,
) -> Vec<RecipeView> {
    let mut tags_by_recipe: HashMap<Uuid, Vec<Tag>> = HashMap::new();
    for row in tag_rows {
        tags_by_recipe
            .entry(row.recipe_id)
            .or_default()
            .push(row.into());
    }

    let mut ingredients_by_recipe: HashMap<Uuid, Vec<_>> = HashMap::new();
    for row in ingredient_rows {
        ingredients_by_recipe
            .entry(row.recipe_id)
            .or_default()
            .push(row.into());
    }

    recipes
        .into_iter()
        .filter_map(|recipe| {
            let Some(author) = profiles.get(&recipe.author_id) else {
                log::error!(
                    "recipe {} references missing author {}",
                    recipe.id,
                    recipe.author_id
                );
                return None;
            };

            Some(RecipeView {
                id: recipe.id,
                tags: tags_by_recipe.remove(&recipe.id).unwrap_or_default(),
                author: author.clone(),
                ingredients: ingredients_by_recipe
                    .remove(&recipe.id)
                    .unwrap_or_default(),
                is_favorited: favorited.contains(&recipe.id),
                is_in_shopping_cart: in_cart.contains(&recipe.id),
                name: recipe.name,
                image: recipe.image,
                text: recipe.text,
                cooking_time: recipe.cooking_time,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IngredientAmount;

    fn payload() -> RecipePayload {
        RecipePayload {
            tags: vec![1, 2],
            ingredients: vec![
                IngredientAmount { id: 10, amount: 200 },
                IngredientAmount { id: 11, amount: 2 },
            ],
            name: String::from("Pancakes"),
            image: String::from("data:image/png;base64,aGVsbG8="),
            text: String::from("Mix and fry."),
            cooking_time: 20,
        }
    }

    fn recipe(id: Uuid, author_id: Uuid) -> Recipe {
        Recipe {
            id,
            author_id,
            name: format!("recipe-{id}"),
            image: format!("recipes/{id}.png"),
            text: String::from("text"),
            cooking_time: 10,
        }
    }

    fn profile(id: Uuid) -> UserProfile {
        UserProfile {
            email: format!("user{id}@example.com"),
            id,
            username: format!("user{id}"),
            first_name: String::from("A"),
            last_name: String::from("B"),
            is_subscribed: false,
        }
    }

    #[test]
    fn valid_payload_passes() {
        assert_eq!(validate_payload(&payload()), Ok(()));
    }

    #[test]
    fn empty_ingredient_list_fails() {
        let mut p = payload();
        p.ingredients.clear();
        assert_eq!(validate_payload(&p), Err(ValidationError::EmptyIngredients));
    }

    #[test]
    fn repeated_ingredient_id_fails() {
        let mut p = payload();
        p.ingredients.push(IngredientAmount { id: 10, amount: 1 });
        assert_eq!(
            validate_payload(&p),
            Err(ValidationError::DuplicateIngredient)
        );
    }

    #[test]
    fn empty_tag_list_fails() {
        let mut p = payload();
        p.tags.clear();
        assert_eq!(validate_payload(&p), Err(ValidationError::EmptyTags));
    }

    #[test]
    fn repeated_tag_id_fails() {
        let mut p = payload();
        p.tags.push(1);
        assert_eq!(validate_payload(&p), Err(ValidationError::DuplicateTag));
    }

    #[test]
    fn zero_cooking_time_fails() {
        let mut p = payload();
        p.cooking_time = 0;
        assert_eq!(validate_payload(&p), Err(ValidationError::CookingTime));
    }

    #[test]
    fn zero_amount_fails() {
        let mut p = payload();
        p.ingredients[0].amount = 0;
        assert_eq!(validate_payload(&p), Err(ValidationError::Amount));
    }

    #[test]
    fn anonymous_views_never_carry_flags() {
        let recipes = vec![recipe(1, 7), recipe(2, 7)];
        let profiles = HashMap::from([(7, profile(7))]);

        let views = annotate_views(
            recipes,
            vec![],
            vec![],
            profiles,
            HashSet::new(),
            HashSet::new(),
        );

        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|view| !view.is_favorited));
        assert!(views.iter().all(|view| !view.is_in_shopping_cart));
    }

    #[test]
    fn membership_sets_drive_the_flags() {
        let recipes = vec![recipe(1, 7), recipe(2, 7), recipe(3, 7)];
        let profiles = HashMap::from([(7, profile(7))]);
        let favorited = HashSet::from([1]);
        let in_cart = HashSet::from([2, 3]);

        let views = annotate_views(recipes, vec![], vec![], profiles, favorited, in_cart);

        assert!(views[0].is_favorited && !views[0].is_in_shopping_cart);
        assert!(!views[1].is_favorited && views[1].is_in_shopping_cart);
        assert!(!views[2].is_favorited && views[2].is_in_shopping_cart);
    }

    #[test]
    fn associations_land_on_their_recipe() {
        let recipes = vec![recipe(1, 7), recipe(2, 8)];
        let profiles = HashMap::from([(7, profile(7)), (8, profile(8))]);
        let tag_rows = vec![RecipeTagRow {
            recipe_id: 2,
            id: 5,
            name: String::from("breakfast"),
            color: String::from("#E26C2D"),
            slug: String::from("breakfast"),
        }];
        let ingredient_rows = vec![RecipeIngredientRow {
            recipe_id: 1,
            id: 10,
            name: String::from("flour"),
            measurement_unit: String::from("g"),
            amount: 200,
        }];

        let views = annotate_views(
            recipes,
            tag_rows,
            ingredient_rows,
            profiles,
            HashSet::new(),
            HashSet::new(),
        );

        assert!(views[0].tags.is_empty());
        assert_eq!(views[0].ingredients.len(), 1);
        assert_eq!(views[0].ingredients[0].name, "flour");
        assert_eq!(views[1].tags.len(), 1);
        assert_eq!(views[1].tags[0].slug, "breakfast");
        assert!(views[1].ingredients.is_empty());
    }

    #[test]
    fn views_keep_newest_first_row_order() {
        let recipes = vec![recipe(9, 7), recipe(4, 7), recipe(1, 7)];
        let profiles = HashMap::from([(7, profile(7))]);

        let views = annotate_views(
            recipes,
            vec![],
            vec![],
            profiles,
            HashSet::new(),
            HashSet::new(),
        );

        let ids: Vec<Uuid> = views.iter().map(|view| view.id).collect();
        assert_eq!(ids, vec![9, 4, 1]);
    }
}
