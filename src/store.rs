//! # Product Store Module
//!
//! Questo modulo gestisce la persistenza delle righe prodotto.
//!
//! ## Responsabilità:
//! - CRUD semplice su righe `Product` indicizzate per id
//! - Assegnazione id monotona e timestamp di creazione/aggiornamento
//! - Persistenza opzionale in un file JSON, riscritto dopo ogni mutazione
//!
//! ## Strategia di persistence:
//! - `ProductStore::in_memory()`: nessun file, utile per test e per chi ha già un database
//! - `ProductStore::open(path)`: carica lo snapshot se esiste, altrimenti parte vuoto
//! - Lo snapshot viene scritto mentre il lock in scrittura è preso, quindi l'ordine
//!   delle scritture su disco segue quello delle mutazioni
//!
//! ## Esempio struttura snapshot:
//! ```json
//! {
//!   "next_id": 2,
//!   "products": {
//!     "1": {
//!       "id": 1,
//!       "name": "Lamp",
//!       "description": "",
//!       "price": 19.9,
//!       "image_path": "uploads/2f1c0a2e-....jpg",
//!       "created_at": 1642680000,
//!       "updated_at": 1642680000
//!     }
//!   }
//! }
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

/// Catalog row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub image_path: Option<PathBuf>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Fields of a product about to be created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
}

/// A row as it was before and after `ProductStore::modify`
#[derive(Debug, Clone, PartialEq)]
pub struct Modified {
    pub previous: Product,
    pub current: Product,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    next_id: u64,
    products: BTreeMap<u64, Product>,
}

/// Row storage for products
pub struct ProductStore {
    snapshot_path: Option<PathBuf>,
    state: RwLock<StoreState>,
}

impl ProductStore {
    pub fn in_memory() -> Self {
        Self {
            snapshot_path: None,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Opens a store persisted at `path`, loading the snapshot if present
    pub async fn open(path: &Path) -> Result<Self> {
        let state = if path.exists() {
            let content = fs::read_to_string(path).await?;
            serde_json::from_str(&content).map_err(|e| {
                anyhow::anyhow!("Corrupt product snapshot {}: {}", path.display(), e)
            })?
        } else {
            StoreState::default()
        };

        debug!(
            "Opened product store {} with {} products",
            path.display(),
            state.products.len()
        );

        Ok(Self {
            snapshot_path: Some(path.to_path_buf()),
            state: RwLock::new(state),
        })
    }

    pub async fn insert(&self, new: NewProduct, image_path: Option<PathBuf>) -> Result<Product> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let now = now_secs();

        let product = Product {
            id: state.next_id,
            name: new.name,
            description: new.description,
            price: new.price,
            image_path,
            created_at: now,
            updated_at: now,
        };
        state.products.insert(product.id, product.clone());

        if let Err(e) = self.save(&state).await {
            state.products.remove(&product.id);
            return Err(e);
        }
        Ok(product)
    }

    pub async fn get(&self, id: u64) -> Option<Product> {
        self.state.read().await.products.get(&id).cloned()
    }

    /// Products ordered by id, skipping `offset` and returning at most `limit`
    pub async fn list(&self, offset: usize, limit: usize) -> Vec<Product> {
        self.state
            .read()
            .await
            .products
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> u64 {
        self.state.read().await.products.len() as u64
    }

    /// Applies `apply` to the row `id` under the write lock and saves it.
    ///
    /// Returns `None` if the id is unknown. `id` and `created_at` cannot be
    /// changed. If saving fails the row is restored and the error returned.
    pub async fn modify<F>(&self, id: u64, apply: F) -> Result<Option<Modified>>
    where
        F: FnOnce(&mut Product),
    {
        let mut state = self.state.write().await;
        let Some(previous) = state.products.get(&id).cloned() else {
            return Ok(None);
        };

        let mut current = previous.clone();
        apply(&mut current);
        current.id = previous.id;
        current.created_at = previous.created_at;
        current.updated_at = now_secs().max(previous.updated_at);
        state.products.insert(id, current.clone());

        if let Err(e) = self.save(&state).await {
            state.products.insert(id, previous);
            return Err(e);
        }
        Ok(Some(Modified { previous, current }))
    }

    pub async fn remove(&self, id: u64) -> Result<Option<Product>> {
        let mut state = self.state.write().await;
        let Some(removed) = state.products.remove(&id) else {
            return Ok(None);
        };

        if let Err(e) = self.save(&state).await {
            state.products.insert(id, removed);
            return Err(e);
        }
        Ok(Some(removed))
    }

    /// Image paths referenced by any product
    pub async fn image_paths(&self) -> Vec<PathBuf> {
        self.state
            .read()
            .await
            .products
            .values()
            .filter_map(|p| p.image_path.clone())
            .collect()
    }

    async fn save(&self, state: &StoreState) -> Result<()> {
        if let Some(ref path) = self.snapshot_path {
            let content = serde_json::to_string_pretty(state)?;
            fs::write(path, content).await?;
        }
        Ok(())
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
