use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub type Uuid = i32;

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub slug: String,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ingredient {
    pub id: Uuid,
    pub name: String,
    pub measurement_unit: String,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct Recipe {
    pub id: Uuid,
    pub author_id: Uuid,
    pub name: String,
    pub image: String,
    pub text: String,
    pub cooking_time: i32,
}

/// Recipe row plus the `COUNT(*) OVER()` window total of a filtered page.
#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct RecipeRow {
    pub id: Uuid,
    pub author_id: Uuid,
    pub name: String,
    pub image: String,
    pub text: String,
    pub cooking_time: i32,

    pub count: i64,
}

impl From<RecipeRow> for Recipe {
    fn from(row: RecipeRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            name: row.name,
            image: row.image,
            text: row.text,
            cooking_time: row.cooking_time,
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct RecipeTagRow {
    pub recipe_id: Uuid,
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub slug: String,
}

impl From<RecipeTagRow> for Tag {
    fn from(row: RecipeTagRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            color: row.color,
            slug: row.slug,
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct RecipeIngredientRow {
    pub recipe_id: Uuid,
    pub id: Uuid,
    pub name: String,
    pub measurement_unit: String,
    pub amount: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipeIngredientView {
    pub id: Uuid,
    pub name: String,
    pub measurement_unit: String,
    pub amount: i32,
}

impl From<RecipeIngredientRow> for RecipeIngredientView {
    fn from(row: RecipeIngredientRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            measurement_unit: row.measurement_unit,
            amount: row.amount,
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct UserProfile {
    pub email: String,
    pub id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_subscribed: bool,
}

impl UserProfile {
    pub fn from_user(user: User, is_subscribed: bool) -> Self {
        Self {
            email: user.email,
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            is_subscribed,
        }
    }
}

/// The full per-identity read representation of a recipe.
#[derive(Debug, Clone, Serialize)]
pub struct RecipeView {
    pub id: Uuid,
    pub tags: Vec<Tag>,
    pub author: UserProfile,
    pub ingredients: Vec<RecipeIngredientView>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
    pub name: String,
    pub image: String,
    pub text: String,
    pub cooking_time: i32,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct RecipeSummary {
    pub id: Uuid,
    pub name: String,
    pub image: String,
    pub cooking_time: i32,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct AuthorRecipeRow {
    pub author_id: Uuid,
    pub id: Uuid,
    pub name: String,
    pub image: String,
    pub cooking_time: i32,
}

impl From<AuthorRecipeRow> for RecipeSummary {
    fn from(row: AuthorRecipeRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            image: row.image,
            cooking_time: row.cooking_time,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FollowView {
    pub email: String,
    pub id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_subscribed: bool,
    pub recipes: Vec<RecipeSummary>,
    pub recipes_count: i64,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct CartIngredientRow {
    pub ingredient_id: Uuid,
    pub name: String,
    pub measurement_unit: String,
    pub amount: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShoppingListItem {
    pub name: String,
    pub measurement_unit: String,
    pub total_amount: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecipePayload {
    pub tags: Vec<Uuid>,
    pub ingredients: Vec<IngredientAmount>,
    pub name: String,
    pub image: String,
    pub text: String,
    pub cooking_time: i32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IngredientAmount {
    pub id: Uuid,
    pub amount: i32,
}

/// Membership filter over a per-user relation: `1` keeps matching recipes,
/// `0` excludes them. Any other value is rejected rather than ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Include,
    Exclude,
}

impl Flag {
    pub fn parse(value: Option<&str>) -> Result<Option<Self>, ValidationError> {
        match value {
            None => Ok(None),
            Some("1") => Ok(Some(Self::Include)),
            Some("0") => Ok(Some(Self::Exclude)),
            Some(_) => Err(ValidationError::InvalidFlag),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecipeQuery {
    pub author: Option<Uuid>,
    pub tags: Vec<String>,
    pub is_favorited: Option<Flag>,
    pub is_in_shopping_cart: Option<Flag>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parses_only_zero_and_one() {
        assert_eq!(Flag::parse(None), Ok(None));
        assert_eq!(Flag::parse(Some("1")), Ok(Some(Flag::Include)));
        assert_eq!(Flag::parse(Some("0")), Ok(Some(Flag::Exclude)));
        assert_eq!(Flag::parse(Some("2")), Err(ValidationError::InvalidFlag));
        assert_eq!(Flag::parse(Some("yes")), Err(ValidationError::InvalidFlag));
    }

    #[test]
    fn recipe_row_strips_window_count() {
        let row = RecipeRow {
            id: 3,
            author_id: 7,
            name: String::from("Pancakes"),
            image: String::from("recipes/3.png"),
            text: String::from("Mix and fry."),
            cooking_time: 20,
            count: 42,
        };

        let recipe = Recipe::from(row);
        assert_eq!(recipe.id, 3);
        assert_eq!(recipe.author_id, 7);
    }
}
