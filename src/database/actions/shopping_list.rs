use std::collections::HashMap;

use sqlx::{Pool, Postgres};

use crate::{
    error::ApiError,
    jwt::Identity,
    schema::{CartIngredientRow, ShoppingListItem, Uuid},
};

/// Plain-text shopping list for everything in the identity's cart. An empty
/// cart renders as an empty document.
pub async fn download_shopping_list(
    identity: Identity,
    pool: &Pool<Postgres>,
) -> Result<String, ApiError> {
    let user_id = identity.require()?;
    let rows = fetch_cart_ingredients(user_id, pool).await?;
    let items = aggregate_shopping_list(rows);

    log::trace!("rendered shopping list of {} items for user {user_id}", items.len());

    Ok(render_shopping_list(&items))
}

pub async fn fetch_cart_ingredients(
    user_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<Vec<CartIngredientRow>, ApiError> {
    let rows: Vec<CartIngredientRow> = sqlx::query_as(
        "
        SELECT i.id AS ingredient_id, i.name, i.measurement_unit, ri.amount
        FROM shopping_carts sc
        INNER JOIN recipe_ingredients ri ON ri.recipe_id = sc.recipe_id
        INNER JOIN ingredients i ON i.id = ri.ingredient_id
        WHERE sc.user_id = $1
    ",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Reduces cart rows into one total per ingredient, keyed by ingredient id so
/// that same-named ingredients with different units never merge. Output keeps
/// first-seen order.
pub fn aggregate_shopping_list(rows: Vec<CartIngredientRow>) -> Vec<ShoppingListItem> {
    let mut items: Vec<ShoppingListItem> = vec![];
    let mut index: HashMap<Uuid, usize> = HashMap::new();

    for row in rows {
        match index.get(&row.ingredient_id) {
            Some(position) => items[*position].total_amount += i64::from(row.amount),
            None => {
                index.insert(row.ingredient_id, items.len());
                items.push(ShoppingListItem {
                    name: row.name,
                    measurement_unit: row.measurement_unit,
                    total_amount: i64::from(row.amount),
                });
            }
        }
    }

    items
}

pub fn render_shopping_list(items: &[ShoppingListItem]) -> String {
    items
        .iter()
        .map(|item| {
            format!(
                "{} ({}) — {}\n",
                item.name, item.measurement_unit, item.total_amount
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ingredient_id: Uuid, name: &str, unit: &str, amount: i32) -> CartIngredientRow {
        CartIngredientRow {
            ingredient_id,
            name: String::from(name),
            measurement_unit: String::from(unit),
            amount,
        }
    }

    #[test]
    fn sums_amounts_across_recipes() {
        // cart = {recipeA (flour:200g, egg:2), recipeB (flour:100g, milk:50ml)}
        let rows = vec![
            row(1, "flour", "g", 200),
            row(2, "egg", "pcs", 2),
            row(1, "flour", "g", 100),
            row(3, "milk", "ml", 50),
        ];

        let items = aggregate_shopping_list(rows);
        assert_eq!(items.len(), 3);
        assert_eq!(
            items[0],
            ShoppingListItem {
                name: String::from("flour"),
                measurement_unit: String::from("g"),
                total_amount: 300,
            }
        );
        assert_eq!(items[1].total_amount, 2);
        assert_eq!(items[2].total_amount, 50);
    }

    #[test]
    fn same_name_different_id_stays_separate() {
        let rows = vec![row(1, "pepper", "g", 10), row(2, "pepper", "pcs", 3)];

        let items = aggregate_shopping_list(rows);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].measurement_unit, "g");
        assert_eq!(items[1].measurement_unit, "pcs");
    }

    #[test]
    fn renders_one_line_per_item() {
        let items = aggregate_shopping_list(vec![
            row(1, "flour", "g", 300),
            row(2, "egg", "pcs", 2),
        ]);

        let content = render_shopping_list(&items);
        assert_eq!(content, "flour (g) — 300\negg (pcs) — 2\n");
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn empty_cart_renders_zero_lines() {
        let items = aggregate_shopping_list(vec![]);
        assert!(items.is_empty());
        assert_eq!(render_shopping_list(&items), "");
    }
}
