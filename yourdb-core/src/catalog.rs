//! Catalog (C8): the database root, tracking which entities exist and
//! brokering access to their [`EntityEngine`]s (spec §4.8, §6).

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::entity::EntityEngine;
use crate::error::{Result, YourDbError};
use crate::gate::Gate;
use crate::persistence::catalog_meta::CatalogMeta;
use crate::persistence::schema_meta::SchemaMeta;
use crate::schema::Schema;

/// Catalog-level state: the persisted entity list plus the live handles
/// opened so far. Reuses the same writer-preference gate entities use
/// (spec §4.5/§4.8), so many concurrent `open_entity` calls for different
/// names run as readers while `create_entity`/`drop_entity` take the
/// gate as a writer.
struct CatalogState {
    meta: CatalogMeta,
    entities: HashMap<String, Arc<EntityEngine>>,
}

/// Root of a YourDB database directory. Owns `catalog.meta` and a live
/// handle to every entity opened so far.
///
/// # Safety
/// `state` is accessed only while `gate` is held, exactly the invariant
/// [`crate::entity::EntityEngine`] relies on for its own `UnsafeCell`.
pub struct Catalog {
    root: PathBuf,
    config: EngineConfig,
    gate: Gate,
    state: UnsafeCell<CatalogState>,
}

// SAFETY: see the struct-level safety comment.
unsafe impl Sync for Catalog {}

impl Catalog {
    /// Opens (creating if absent) the database root at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(root, EngineConfig::default())
    }

    pub fn open_with_config(root: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| YourDbError::IoError {
            context: "creating database root",
            source: e,
        })?;
        let meta = CatalogMeta::read_from(&root.join("catalog.meta"))?;
        tracing::info!(root = %root.display(), entities = meta.entities.len(), "catalog opened");
        Ok(Self {
            root,
            config,
            gate: Gate::new(),
            state: UnsafeCell::new(CatalogState {
                meta,
                entities: HashMap::new(),
            }),
        })
    }

    #[allow(clippy::mut_from_ref)]
    fn state_mut(&self) -> &mut CatalogState {
        // SAFETY: caller holds a write guard for the duration of use.
        unsafe { &mut *self.state.get() }
    }

    fn state_ref(&self) -> &CatalogState {
        // SAFETY: caller holds at least a read guard for the duration of use.
        unsafe { &*self.state.get() }
    }

    fn meta_path(&self) -> PathBuf {
        self.root.join("catalog.meta")
    }

    fn entity_dir(&self, entity: &str) -> PathBuf {
        self.root.join("entities").join(entity)
    }

    /// Registers a brand-new entity under `schema.entity` and opens it.
    /// Fails with [`YourDbError::EntityExists`] if the name is already
    /// registered (spec §4.8).
    pub fn create_entity(&self, schema: Schema) -> Result<Arc<EntityEngine>> {
        let name = schema.entity.clone();
        let _guard = self.gate.write_enter();

        if self.state_ref().meta.contains(&name) {
            return Err(YourDbError::EntityExists(name));
        }

        let dir = self.entity_dir(&name);
        std::fs::create_dir_all(&dir).map_err(|e| YourDbError::IoError {
            context: "creating entity directory",
            source: e,
        })?;
        let schema_meta = SchemaMeta::from_schema(&schema);
        schema_meta.write_to(&dir.join("schema.meta"))?;

        let engine = Arc::new(EntityEngine::open(&dir, schema, self.config.clone())?);
        let checksum = schema_meta.checksum()?;

        let state = self.state_mut();
        state.meta.insert(name.clone(), checksum);
        state.meta.write_to(&self.meta_path())?;
        state.entities.insert(name, engine.clone());
        Ok(engine)
    }

    /// Opens a previously-created entity. The caller must supply a fresh
    /// `Schema` with its full upgrade chain re-registered: upgrade
    /// closures cannot be persisted, so they are never reconstructed from
    /// disk (spec §4.1 GLOSSARY: "Lazy upgrade"). The persisted
    /// `schema.meta` is used only to check the supplied schema hasn't
    /// drifted structurally and that its version hasn't regressed.
    pub fn open_entity(&self, schema: Schema) -> Result<Arc<EntityEngine>> {
        let name = schema.entity.clone();

        // Fast path: already open, admitted as a reader since no mutation
        // of catalog state is needed.
        {
            let _guard = self.gate.read_enter();
            if let Some(existing) = self.state_ref().entities.get(&name) {
                return Ok(existing.clone());
            }
            if !self.state_ref().meta.contains(&name) {
                return Err(YourDbError::EntityNotFound(name));
            }
        }

        // Slow path: first open in this process, needs to mutate the
        // cached-handle map, so this is taken as a writer.
        let _guard = self.gate.write_enter();
        if let Some(existing) = self.state_ref().entities.get(&name) {
            return Ok(existing.clone());
        }
        if !self.state_ref().meta.contains(&name) {
            return Err(YourDbError::EntityNotFound(name));
        }

        let dir = self.entity_dir(&name);
        let persisted = SchemaMeta::read_from(&dir.join("schema.meta"))?;
        persisted.validate_against(&schema)?;

        let engine = Arc::new(EntityEngine::open(&dir, schema, self.config.clone())?);
        self.state_mut().entities.insert(name, engine.clone());
        Ok(engine)
    }

    /// Drops an entity's registration and deletes its on-disk directory.
    /// A handle already cloned out by a caller keeps working until
    /// dropped; new opens fail with [`YourDbError::EntityNotFound`]
    /// immediately (spec §4.8).
    pub fn drop_entity(&self, entity: &str) -> Result<()> {
        let _guard = self.gate.write_enter();
        if !self.state_ref().meta.contains(entity) {
            return Err(YourDbError::EntityNotFound(entity.to_string()));
        }

        let state = self.state_mut();
        state.meta.remove(entity);
        state.meta.write_to(&self.meta_path())?;
        state.entities.remove(entity);

        let dir = self.entity_dir(entity);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| YourDbError::IoError {
                context: "removing dropped entity directory",
                source: e,
            })?;
        }
        Ok(())
    }

    pub fn entity_names(&self) -> Vec<String> {
        let _guard = self.gate.read_enter();
        self.state_ref().meta.entities.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FieldKind;
    use std::collections::BTreeMap;

    fn users_schema() -> Schema {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), FieldKind::Int);
        Schema::new("users", "id", fields, vec![]).unwrap()
    }

    #[test]
    fn create_then_reopen_entity() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        catalog.create_entity(users_schema()).unwrap();
        assert_eq!(catalog.entity_names(), vec!["users".to_string()]);

        drop(catalog);
        let catalog2 = Catalog::open(dir.path()).unwrap();
        let engine = catalog2.open_entity(users_schema()).unwrap();
        assert_eq!(engine.entity_name(), "users");
    }

    #[test]
    fn create_duplicate_entity_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        catalog.create_entity(users_schema()).unwrap();
        let err = catalog.create_entity(users_schema());
        assert!(matches!(err, Err(YourDbError::EntityExists(_))));
    }

    #[test]
    fn open_unknown_entity_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        let err = catalog.open_entity(users_schema());
        assert!(matches!(err, Err(YourDbError::EntityNotFound(_))));
    }

    #[test]
    fn drop_entity_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        catalog.create_entity(users_schema()).unwrap();
        catalog.drop_entity("users").unwrap();
        assert!(catalog.entity_names().is_empty());
        let err = catalog.open_entity(users_schema());
        assert!(matches!(err, Err(YourDbError::EntityNotFound(_))));
    }
}
