//! Drinks catalog: domain types and the store abstraction
//!
//! The HTTP layer talks to the catalog only through [`CatalogStore`].
//! [`LocalCatalog`] is the bundled implementation.

mod local;

pub use local::LocalCatalog;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One recipe line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    /// Ingredient name, e.g. `milk`
    pub name: String,
    /// Display color, e.g. `#f3e5ab`
    pub color: String,
    /// Relative amount
    pub parts: u32,
}

/// A catalog item, serialized as its detail view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drink {
    /// Store-assigned id
    pub id: u64,
    /// Unique title
    pub title: String,
    /// Ordered ingredients
    pub recipe: Vec<Ingredient>,
}

/// Public view of a drink: id and title only
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrinkSummary {
    /// Store-assigned id
    pub id: u64,
    /// Title
    pub title: String,
}

impl Drink {
    /// The public summary view
    pub fn summary(&self) -> DrinkSummary {
        DrinkSummary {
            id: self.id,
            title: self.title.clone(),
        }
    }
}

/// A recipe as clients send it: a list of ingredients, or a lone ingredient
/// object which is treated as a one-item list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RecipeInput {
    /// `[{...}, {...}]`
    Many(Vec<Ingredient>),
    /// `{...}`
    One(Ingredient),
}

impl RecipeInput {
    /// Normalize into a list
    pub fn into_vec(self) -> Vec<Ingredient> {
        match self {
            RecipeInput::Many(ingredients) => ingredients,
            RecipeInput::One(ingredient) => vec![ingredient],
        }
    }
}

/// Body of `POST /drinks`
#[derive(Debug, Clone, Deserialize)]
pub struct NewDrink {
    /// Title
    pub title: String,
    /// Recipe
    pub recipe: RecipeInput,
}

/// Body of `PATCH /drinks/{id}`; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DrinkPatch {
    /// New title
    pub title: Option<String>,
    /// New recipe
    pub recipe: Option<RecipeInput>,
}

/// Catalog failures, one per cause
#[derive(Debug, Error)]
pub enum CatalogError {
    /// No drink with this id
    #[error("Drink {0} not found")]
    NotFound(u64),

    /// The change violates a catalog constraint
    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    /// `DB_URL` is not a supported location
    #[error("Unsupported catalog location `{0}`; use memory:// or file://<path>")]
    UnsupportedLocation(String),

    /// Reading or writing the backing store failed
    #[error("Catalog storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for CatalogError {
    fn from(err: std::io::Error) -> Self {
        CatalogError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Storage(err.to_string())
    }
}

/// Catalog persistence
#[async_trait]
pub trait CatalogStore: Send + Sync + std::fmt::Debug {
    /// Every drink, ordered by id
    async fn list(&self) -> Result<Vec<Drink>, CatalogError>;

    /// One drink
    async fn get(&self, id: u64) -> Result<Drink, CatalogError>;

    /// Insert a drink and assign its id
    async fn create(&self, drink: NewDrink) -> Result<Drink, CatalogError>;

    /// Apply a partial update
    async fn update(&self, id: u64, patch: DrinkPatch) -> Result<Drink, CatalogError>;

    /// Remove a drink, returning its id
    async fn delete(&self, id: u64) -> Result<u64, CatalogError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recipe_accepts_single_object() {
        let recipe: RecipeInput =
            serde_json::from_value(json!({"name": "water", "color": "blue", "parts": 1})).unwrap();
        assert_eq!(
            recipe.into_vec(),
            vec![Ingredient {
                name: "water".into(),
                color: "blue".into(),
                parts: 1
            }]
        );
    }

    #[test]
    fn test_recipe_rejects_wrong_shape() {
        assert!(serde_json::from_value::<RecipeInput>(json!("water")).is_err());
        assert!(serde_json::from_value::<RecipeInput>(json!([{"name": "water"}])).is_err());
    }

    #[test]
    fn test_views() {
        let drink = Drink {
            id: 3,
            title: "flatwhite".into(),
            recipe: vec![Ingredient {
                name: "milk".into(),
                color: "grey".into(),
                parts: 3,
            }],
        };
        assert_eq!(
            serde_json::to_value(drink.summary()).unwrap(),
            json!({"id": 3, "title": "flatwhite"})
        );
        assert_eq!(
            serde_json::to_value(&drink).unwrap(),
            json!({
                "id": 3,
                "title": "flatwhite",
                "recipe": [{"name": "milk", "color": "grey", "parts": 3}]
            })
        );
    }
}
