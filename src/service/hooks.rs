use crate::core::Result;
use crate::model::Instance;
use crate::security::SecurityContext;
use crate::validation::ValidationReport;
use async_trait::async_trait;

/// Callbacks run by [`DocumentService`](super::DocumentService) around its
/// write paths. Every hook defaults to a no-op; an error aborts the
/// operation before anything further reaches the store.
///
/// Hooks see live instances, which are not `Send`, so the returned
/// futures are not either.
#[async_trait(?Send)]
pub trait LifecycleHooks: Send + Sync {
    async fn before_validate(&self, _instance: &Instance, _context: &SecurityContext) -> Result<()> {
        Ok(())
    }

    /// `report` is `None` when validation was skipped.
    async fn after_validate(
        &self,
        _instance: &Instance,
        _context: &SecurityContext,
        _report: Option<&ValidationReport>,
    ) -> Result<()> {
        Ok(())
    }

    async fn before_create(&self, _instance: &Instance, _context: &SecurityContext) -> Result<()> {
        Ok(())
    }

    async fn after_create(&self, _instance: &Instance, _context: &SecurityContext) -> Result<()> {
        Ok(())
    }

    async fn before_update(&self, _instance: &Instance, _context: &SecurityContext) -> Result<()> {
        Ok(())
    }

    async fn after_update(&self, _instance: &Instance, _context: &SecurityContext) -> Result<()> {
        Ok(())
    }

    async fn before_save(&self, _instance: &Instance, _context: &SecurityContext) -> Result<()> {
        Ok(())
    }

    async fn after_save(&self, _instance: &Instance, _context: &SecurityContext) -> Result<()> {
        Ok(())
    }

    async fn before_remove(&self, _instance: &Instance, _context: &SecurityContext) -> Result<()> {
        Ok(())
    }

    async fn after_remove(&self, _instance: &Instance, _context: &SecurityContext) -> Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl LifecycleHooks for NoHooks {}
