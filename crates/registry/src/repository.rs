//! Versioned template repository.
//!
//! Versions are immutable: a content change allocates the next version
//! number and flips the per-name `is_latest` pointer. Status moves forward
//! only. All writes for a given name serialize through a per-name lock, so
//! racing identical proposals resolve to one winning version id.

use std::sync::Arc;

use promptforge_core::{
    Error, Result, TemplateMetadata, TemplateStatus, TemplateVersion, TemplateVersionId,
};
use promptforge_storage::{KeyedLocks, Store};
use tracing::{debug, info};

/// Immutable, versioned storage of template content and status.
pub struct TemplateRepository {
    store: Arc<dyn Store>,
    name_locks: KeyedLocks,
}

impl TemplateRepository {
    /// Create a repository over a storage backend.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            name_locks: KeyedLocks::new(),
        }
    }

    /// Latest active version of a name.
    pub async fn get_latest(&self, name: &str) -> Result<TemplateVersion> {
        let versions = self.store.list_versions(name).await?;
        versions
            .into_iter()
            .filter(|v| v.status == TemplateStatus::Active)
            .max_by_key(|v| v.version)
            .ok_or_else(|| Error::NotFound(format!("no active version of template '{name}'")))
    }

    /// The version currently flagged `is_latest`, regardless of status.
    pub async fn head(&self, name: &str) -> Result<TemplateVersion> {
        let versions = self.store.list_versions(name).await?;
        versions
            .into_iter()
            .find(|v| v.is_latest)
            .ok_or_else(|| Error::NotFound(format!("unknown template '{name}'")))
    }

    /// A specific immutable version snapshot.
    pub async fn get_version(&self, name: &str, version: u32) -> Result<TemplateVersion> {
        let versions = self.store.list_versions(name).await?;
        versions
            .into_iter()
            .find(|v| v.version == version)
            .ok_or_else(|| Error::NotFound(format!("template '{name}' version {version}")))
    }

    /// Load a version by id.
    pub async fn get_by_id(&self, id: TemplateVersionId) -> Result<TemplateVersion> {
        self.store
            .load_template(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("template version {id}")))
    }

    /// Propose content for a name.
    ///
    /// If the content differs byte-wise from the current latest, a new
    /// draft version is allocated and the prior latest is demoted. If it is
    /// identical, the existing version is returned unchanged; no churn.
    pub async fn propose(
        &self,
        name: &str,
        content: &str,
        meta: TemplateMetadata,
    ) -> Result<TemplateVersion> {
        let _guard = self.name_locks.acquire(name).await;

        let versions = self.store.list_versions(name).await?;
        let latest = versions.iter().filter(|v| v.is_latest).max_by_key(|v| v.version);

        if let Some(latest) = latest {
            if latest.content == content {
                debug!(name, version = latest.version, "proposal identical to latest; reusing");
                return Ok(latest.clone());
            }

            let mut demoted = latest.clone();
            demoted.is_latest = false;
            self.store.save_template(&demoted).await?;

            let next = TemplateVersion::next_of(name, latest.version + 1, content, meta);
            self.store.save_template(&next).await?;
            info!(name, version = next.version, id = %next.id, "proposed new template version");
            return Ok(next);
        }

        let first = TemplateVersion::first(name, content, meta);
        self.store.save_template(&first).await?;
        info!(name, id = %first.id, "proposed first template version");
        Ok(first)
    }

    /// Advance a draft or testing version one step toward active.
    pub async fn promote(&self, id: TemplateVersionId) -> Result<TemplateVersion> {
        let current = self.get_by_id(id).await?;
        let target = match current.status {
            TemplateStatus::Draft => TemplateStatus::Testing,
            TemplateStatus::Testing => TemplateStatus::Active,
            other => {
                return Err(Error::State {
                    entity: "template".into(),
                    from: other.to_string(),
                    to: "promoted".into(),
                })
            }
        };
        self.transition(id, target).await
    }

    /// Deprecate an active version.
    pub async fn deprecate(&self, id: TemplateVersionId) -> Result<TemplateVersion> {
        self.transition(id, TemplateStatus::Deprecated).await
    }

    /// Archive a deprecated version.
    pub async fn archive(&self, id: TemplateVersionId) -> Result<TemplateVersion> {
        self.transition(id, TemplateStatus::Archived).await
    }

    async fn transition(
        &self,
        id: TemplateVersionId,
        target: TemplateStatus,
    ) -> Result<TemplateVersion> {
        // Re-read under the name lock so concurrent transitions serialize.
        let name = self.get_by_id(id).await?.name;
        let _guard = self.name_locks.acquire(&name).await;

        let mut version = self.get_by_id(id).await?;
        if !version.status.can_advance_to(target) {
            return Err(Error::State {
                entity: "template".into(),
                from: version.status.to_string(),
                to: target.to_string(),
            });
        }
        version.status = target;
        self.store.save_template(&version).await?;
        info!(name = %version.name, version = version.version, status = %target, "template transitioned");
        Ok(version)
    }
}
