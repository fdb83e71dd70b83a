//! In-process catalog, optionally persisted as a JSON snapshot file

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{CatalogError, CatalogStore, Drink, DrinkPatch, NewDrink};

const MEMORY_SCHEME: &str = "memory://";
const FILE_SCHEME: &str = "file://";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot {
    next_id: u64,
    drinks: Vec<Drink>,
}

#[derive(Debug, Clone)]
struct State {
    next_id: u64,
    drinks: BTreeMap<u64, Drink>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            next_id: 1,
            drinks: BTreeMap::new(),
        }
    }
}

impl State {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let drinks: BTreeMap<u64, Drink> =
            snapshot.drinks.into_iter().map(|d| (d.id, d)).collect();
        let floor = drinks.keys().next_back().map_or(1, |id| id + 1);
        Self {
            next_id: snapshot.next_id.max(floor),
            drinks,
        }
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            next_id: self.next_id,
            drinks: self.drinks.values().cloned().collect(),
        }
    }

    /// Title must not belong to any drink other than `except`
    fn ensure_unique_title(&self, title: &str, except: Option<u64>) -> Result<(), CatalogError> {
        let taken = self
            .drinks
            .values()
            .any(|d| d.title == title && Some(d.id) != except);
        if taken {
            return Err(CatalogError::Unprocessable(format!(
                "a drink titled `{title}` already exists"
            )));
        }
        Ok(())
    }
}

/// Catalog held in memory behind a lock.
///
/// With a `file://` location every mutation rewrites the snapshot file
/// before it becomes visible; a failed write leaves the catalog unchanged.
#[derive(Debug)]
pub struct LocalCatalog {
    state: RwLock<State>,
    snapshot_path: Option<PathBuf>,
}

impl Default for LocalCatalog {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl LocalCatalog {
    /// Empty, non-persistent catalog
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(State::default()),
            snapshot_path: None,
        }
    }

    /// Open the catalog named by a `DB_URL`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unsupported scheme, or an existing snapshot
    /// file that cannot be read.
    pub async fn open(db_url: &str) -> Result<Self, CatalogError> {
        if db_url == MEMORY_SCHEME {
            info!("Using in-memory drinks catalog");
            return Ok(Self::in_memory());
        }

        match db_url.strip_prefix(FILE_SCHEME) {
            Some(path) if !path.is_empty() => Self::open_file(Path::new(path)).await,
            _ => Err(CatalogError::UnsupportedLocation(db_url.to_string())),
        }
    }

    /// Open a snapshot file, starting empty if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open_file(path: &Path) -> Result<Self, CatalogError> {
        let state = match tokio::fs::read(path).await {
            Ok(bytes) => State::from_snapshot(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::default(),
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            drinks = state.drinks.len(),
            "Opened drinks catalog snapshot"
        );
        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(path.to_path_buf()),
        })
    }

    async fn persist(&self, state: &State) -> Result<(), CatalogError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let bytes = serde_json::to_vec_pretty(&state.to_snapshot())?;
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, path).await?;
        debug!(path = %path.display(), "Catalog snapshot written");
        Ok(())
    }

    /// Apply `change` to a copy of the state, persist it, then publish it.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut State) -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        let out = change(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }
}

#[async_trait]
impl CatalogStore for LocalCatalog {
    async fn list(&self) -> Result<Vec<Drink>, CatalogError> {
        Ok(self.state.read().await.drinks.values().cloned().collect())
    }

    async fn get(&self, id: u64) -> Result<Drink, CatalogError> {
        self.state
            .read()
            .await
            .drinks
            .get(&id)
            .cloned()
            .ok_or(CatalogError::NotFound(id))
    }

    async fn create(&self, drink: NewDrink) -> Result<Drink, CatalogError> {
        self.mutate(|state| {
            state.ensure_unique_title(&drink.title, None)?;
            let created = Drink {
                id: state.next_id,
                title: drink.title,
                recipe: drink.recipe.into_vec(),
            };
            state.next_id += 1;
            state.drinks.insert(created.id, created.clone());
            Ok(created)
        })
        .await
    }

    async fn update(&self, id: u64, patch: DrinkPatch) -> Result<Drink, CatalogError> {
        self.mutate(|state| {
            if !state.drinks.contains_key(&id) {
                return Err(CatalogError::NotFound(id));
            }
            if let Some(title) = &patch.title {
                state.ensure_unique_title(title, Some(id))?;
            }
            let drink = state.drinks.get_mut(&id).ok_or(CatalogError::NotFound(id))?;
            if let Some(title) = patch.title {
                drink.title = title;
            }
            if let Some(recipe) = patch.recipe {
                drink.recipe = recipe.into_vec();
            }
            Ok(drink.clone())
        })
        .await
    }

    async fn delete(&self, id: u64) -> Result<u64, CatalogError> {
        self.mutate(|state| {
            state
                .drinks
                .remove(&id)
                .map(|d| d.id)
                .ok_or(CatalogError::NotFound(id))
        })
        .await
    }
}
