//! RC-011: Recipe cache keyed by record type.
//!
//! Recipes are inserted fully built, so readers never see a partial one.
//! Concurrent first callers may each build; the first insert wins and the
//! rest adopt it.

use super::builder::Builder;
use super::error::{Error, Result};
use super::recipe::Recipe;
use super::record::RecordType;
use rustc_hash::FxHashMap;
use std::any::TypeId;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Debug)]
pub struct RecipeCache {
    builder: Builder,
    recipes: RwLock<FxHashMap<TypeId, Arc<Recipe>>>,
}

impl RecipeCache {
    pub fn new(builder: Builder) -> Self {
        Self {
            builder,
            recipes: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn builder(&self) -> &Builder {
        &self.builder
    }

    fn read(&self) -> RwLockReadGuard<'_, FxHashMap<TypeId, Arc<Recipe>>> {
        self.recipes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, FxHashMap<TypeId, Arc<Recipe>>> {
        self.recipes.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, record_type: RecordType) -> Option<Arc<Recipe>> {
        self.read().get(&record_type.id()).cloned()
    }

    /// Cached recipe for the type, building and inserting one on a miss.
    pub fn get_or_build(&self, record_type: RecordType) -> Result<Arc<Recipe>> {
        if let Some(recipe) = self.get(record_type) {
            return Ok(recipe);
        }
        let built = Arc::new(self.builder.build(record_type)?);
        let mut recipes = self.write();
        let cached = recipes
            .entry(record_type.id())
            .or_insert_with(|| Arc::clone(&built));
        if Arc::ptr_eq(cached, &built) {
            debug!(record = record_type.short_name(), "cached recipe");
        }
        Ok(Arc::clone(cached))
    }

    /// Store a recipe for a record type, replacing any cached one.
    pub fn set(&self, record_type: RecordType, recipe: Recipe) -> Result<()> {
        if !record_type.is_record() {
            return Err(Error::NotARecordType(record_type.name()));
        }
        self.write().insert(record_type.id(), Arc::new(recipe));
        Ok(())
    }

    /// Publish a resolved recipe. If a resolved recipe is already cached for
    /// the type, that one is kept and returned instead.
    pub fn publish_resolved(&self, recipe: Recipe) -> Arc<Recipe> {
        let record_type = recipe.record_type;
        let mut recipes = self.write();
        if let Some(existing) = recipes.get(&record_type.id()) {
            if existing.resolved {
                return Arc::clone(existing);
            }
        }
        let published = Arc::new(recipe);
        recipes.insert(record_type.id(), Arc::clone(&published));
        debug!(record = record_type.short_name(), "published resolved recipe");
        published
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        self.write().clear();
    }
}
