//! Identifier lifecycle operations
//!
//! Wraps the registry traits with the mint / reserve / resolve / redirect / delete
//! operations. Standalone operations commit their own change set; `ensure_pid`
//! stages into a caller-owned [`ChangeSet`] so the pipeline and the version linker
//! commit identifiers together with documents.

use crate::adapters::database::{ChangeSet, MigrationBackend, PidOp};
use crate::domain::{
    DocumentId, DocumentKind, LineageError, Lookup, PersistentIdentifier, PidError, PidKey,
    PidStatus, PidType, Result, StoreError,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Longest redirect chain followed before giving up
const MAX_REDIRECT_DEPTH: usize = 16;

/// Object a PID is bound to
pub type Binding = (DocumentKind, DocumentId);

/// Identifier lifecycle manager
#[derive(Clone)]
pub struct IdentifierManager {
    backend: Arc<dyn MigrationBackend>,
}

impl IdentifierManager {
    /// Creates a manager over a backend
    pub fn new(backend: Arc<dyn MigrationBackend>) -> Self {
        Self { backend }
    }

    /// The underlying backend
    pub fn backend(&self) -> &Arc<dyn MigrationBackend> {
        &self.backend
    }

    /// Reads a PID without following redirects
    ///
    /// Reserved, registered and redirected PIDs are `Found`.
    pub async fn lookup(&self, key: &PidKey) -> Result<Lookup<PersistentIdentifier>> {
        Ok(match self.backend.get_pid(key).await? {
            None => Lookup::NotFound,
            Some(pid) if pid.status == PidStatus::Deleted => Lookup::Deleted,
            Some(pid) => Lookup::Found(pid),
        })
    }

    /// Creates a PID
    ///
    /// # Errors
    ///
    /// [`PidError::Duplicate`] if `(type, value)` already exists, including when a
    /// concurrent writer created it first.
    pub async fn mint(
        &self,
        key: PidKey,
        binding: Option<Binding>,
        status: PidStatus,
    ) -> Result<PersistentIdentifier> {
        if self.backend.get_pid(&key).await?.is_some() {
            return Err(PidError::Duplicate(key.to_string()).into());
        }
        let pid = new_pid(key, status, binding);

        let mut changes = ChangeSet::new();
        changes.push_pid(PidOp::Create(pid.clone()));
        match self.backend.commit(changes).await {
            Ok(()) => {
                tracing::debug!(pid = %pid.key(), status = %pid.status, "Minted PID");
                Ok(pid)
            }
            Err(LineageError::Store(StoreError::Conflict(_))) => {
                Err(PidError::Duplicate(pid.key().to_string()).into())
            }
            Err(e) => Err(e),
        }
    }

    /// Allocates the next unused value of a type
    ///
    /// The value is never handed out again; no PID is created.
    pub async fn reserve_next(&self, pid_type: PidType) -> Result<PidKey> {
        let value = self.backend.next_value(pid_type).await?;
        Ok(PidKey::new(pid_type, value.to_string()))
    }

    /// Resolves a PID, following redirects
    ///
    /// # Errors
    ///
    /// [`PidError::BrokenRedirect`] for redirect loops, chains longer than the
    /// supported depth and redirected PIDs without a target.
    pub async fn resolve(&self, key: &PidKey) -> Result<Lookup<PersistentIdentifier>> {
        let mut current = key.clone();
        let mut seen = HashSet::new();

        loop {
            if !seen.insert(current.clone()) || seen.len() > MAX_REDIRECT_DEPTH {
                return Err(PidError::BrokenRedirect(current.to_string()).into());
            }
            let pid = match self.backend.get_pid(&current).await? {
                None => return Ok(Lookup::NotFound),
                Some(pid) => pid,
            };
            match pid.status {
                PidStatus::Deleted => return Ok(Lookup::Deleted),
                PidStatus::Redirected => match pid.redirect {
                    Some(target) => current = target,
                    None => return Err(PidError::BrokenRedirect(current.to_string()).into()),
                },
                PidStatus::Reserved | PidStatus::Registered => return Ok(Lookup::Found(pid)),
            }
        }
    }

    /// Resolves a PID to its bound object
    ///
    /// # Errors
    ///
    /// [`PidError::NotFound`] when the PID does not exist or is not bound, and
    /// [`PidError::Deleted`] when it was retracted.
    pub async fn resolve_object(&self, key: &PidKey) -> Result<Binding> {
        let pid = self.resolve(key).await?.into_result(key)?;
        match (pid.object_type, pid.object_uuid) {
            (Some(kind), Some(object)) => Ok((kind, object)),
            _ => Err(PidError::NotFound(format!("{key} is not bound to an object")).into()),
        }
    }

    /// Marks `key` redirected to `target`
    ///
    /// # Errors
    ///
    /// Not-found or deleted errors for either PID, and [`PidError::BrokenRedirect`]
    /// if the target already resolves back to `key`.
    pub async fn redirect(&self, key: &PidKey, target: &PidKey) -> Result<()> {
        self.lookup(key).await?.into_result(key)?;
        self.lookup(target).await?.into_result(target)?;
        if key == target {
            return Err(PidError::BrokenRedirect(key.to_string()).into());
        }
        if let Lookup::Found(end) = self.resolve(target).await? {
            if &end.key() == key {
                return Err(PidError::BrokenRedirect(key.to_string()).into());
            }
        }

        let mut changes = ChangeSet::new();
        changes.push_pid(PidOp::Redirect {
            key: key.clone(),
            target: target.clone(),
        });
        self.backend.commit(changes).await?;
        tracing::debug!(pid = %key, target = %target, "Redirected PID");
        Ok(())
    }

    /// Retracts a PID
    ///
    /// Deleting an already deleted PID is a no-op.
    pub async fn soft_delete(&self, key: &PidKey) -> Result<()> {
        self.set_status(key, PidStatus::Deleted).await
    }

    /// Makes a PID publicly resolvable
    pub async fn register(&self, key: &PidKey) -> Result<()> {
        self.set_status(key, PidStatus::Registered).await
    }

    /// Returns a PID to the reserved state
    pub async fn reserve(&self, key: &PidKey) -> Result<()> {
        self.set_status(key, PidStatus::Reserved).await
    }

    async fn set_status(&self, key: &PidKey, status: PidStatus) -> Result<()> {
        let pid = self
            .backend
            .get_pid(key)
            .await?
            .ok_or_else(|| PidError::NotFound(key.to_string()))?;
        if pid.status == status {
            return Ok(());
        }
        pid.check_transition(status)?;

        let mut changes = ChangeSet::new();
        changes.push_pid(PidOp::SetStatus {
            key: key.clone(),
            status,
        });
        self.backend.commit(changes).await?;
        tracing::debug!(pid = %key, from = %pid.status, to = %status, "PID status changed");
        Ok(())
    }

    /// Stages a PID so that it exists with at least `status` and the given binding
    ///
    /// An existing PID is reused: it is bound if unbound and promoted from reserved
    /// to registered when asked, but never downgraded. A PID already created in
    /// `changes` is returned as staged. Calling this twice is harmless.
    ///
    /// # Errors
    ///
    /// - [`PidError::Deleted`] when the PID was retracted
    /// - [`LineageError::IdentifierConflict`] when it is bound to another object
    pub async fn ensure_pid(
        &self,
        changes: &mut ChangeSet,
        key: &PidKey,
        status: PidStatus,
        binding: Option<Binding>,
    ) -> Result<PersistentIdentifier> {
        if let Some(staged) = staged_pid(changes, key) {
            return Ok(staged);
        }

        let Some(mut pid) = self.backend.get_pid(key).await? else {
            let pid = new_pid(key.clone(), status, binding);
            changes.push_pid(PidOp::Create(pid.clone()));
            return Ok(pid);
        };

        if pid.status == PidStatus::Deleted {
            return Err(PidError::Deleted(key.to_string()).into());
        }

        if let Some((kind, object)) = binding {
            match pid.object_uuid {
                Some(bound) if bound != object => {
                    return Err(LineageError::IdentifierConflict(format!(
                        "{key} is bound to {bound}, not {object}"
                    )))
                }
                Some(_) => {}
                None => {
                    changes.push_pid(PidOp::Bind {
                        key: key.clone(),
                        kind,
                        object,
                    });
                    pid = pid.bound_to(kind, object);
                }
            }
        }

        if status == PidStatus::Registered && pid.status == PidStatus::Reserved {
            changes.push_pid(PidOp::SetStatus {
                key: key.clone(),
                status,
            });
            pid.status = status;
        }
        Ok(pid)
    }
}

fn new_pid(key: PidKey, status: PidStatus, binding: Option<Binding>) -> PersistentIdentifier {
    let pid = PersistentIdentifier::new(key, status);
    match binding {
        Some((kind, object)) => pid.bound_to(kind, object),
        None => pid,
    }
}

fn staged_pid(changes: &ChangeSet, key: &PidKey) -> Option<PersistentIdentifier> {
    changes.pid_ops.iter().find_map(|op| match op {
        PidOp::Create(pid) if &pid.key() == key => Some(pid.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryBackend;

    fn manager() -> IdentifierManager {
        IdentifierManager::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn test_mint_rejects_duplicates() {
        let ids = manager();
        ids.mint(PidKey::recid(1), None, PidStatus::Registered)
            .await
            .unwrap();

        let err = ids
            .mint(PidKey::recid(1), None, PidStatus::Reserved)
            .await
            .unwrap_err();
        assert!(matches!(err, LineageError::Pid(PidError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_reserve_next_is_unique() {
        let ids = manager();
        ids.mint(PidKey::recid(10), None, PidStatus::Registered)
            .await
            .unwrap();

        let a = ids.reserve_next(PidType::Recid).await.unwrap();
        let b = ids.reserve_next(PidType::Recid).await.unwrap();
        assert_ne!(a, b);
        assert_ne!(a, PidKey::recid(10));
        assert_ne!(b, PidKey::recid(10));
    }

    #[tokio::test]
    async fn test_resolve_follows_redirects() {
        let ids = manager();
        let object = DocumentId::generate();
        ids.mint(PidKey::recid(1), None, PidStatus::Reserved)
            .await
            .unwrap();
        ids.mint(
            PidKey::recid(2),
            Some((DocumentKind::Record, object)),
            PidStatus::Registered,
        )
        .await
        .unwrap();

        ids.redirect(&PidKey::recid(1), &PidKey::recid(2))
            .await
            .unwrap();

        let resolved = ids.resolve(&PidKey::recid(1)).await.unwrap().found().unwrap();
        assert_eq!(resolved.key(), PidKey::recid(2));
        assert_eq!(
            ids.resolve_object(&PidKey::recid(1)).await.unwrap(),
            (DocumentKind::Record, object)
        );
    }

    #[tokio::test]
    async fn test_redirect_loop_rejected() {
        let ids = manager();
        ids.mint(PidKey::recid(1), None, PidStatus::Registered)
            .await
            .unwrap();
        ids.mint(PidKey::recid(2), None, PidStatus::Registered)
            .await
            .unwrap();
        ids.redirect(&PidKey::recid(1), &PidKey::recid(2))
            .await
            .unwrap();

        let err = ids
            .redirect(&PidKey::recid(2), &PidKey::recid(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LineageError::Pid(PidError::BrokenRedirect(_))));
    }

    #[tokio::test]
    async fn test_deleted_is_distinct_from_not_found() {
        let ids = manager();
        ids.mint(PidKey::recid(5), None, PidStatus::Registered)
            .await
            .unwrap();
        ids.soft_delete(&PidKey::recid(5)).await.unwrap();
        ids.soft_delete(&PidKey::recid(5)).await.unwrap();

        assert_eq!(ids.resolve(&PidKey::recid(5)).await.unwrap(), Lookup::Deleted);
        assert_eq!(ids.resolve(&PidKey::recid(6)).await.unwrap(), Lookup::NotFound);

        let err = ids.resolve_object(&PidKey::recid(5)).await.unwrap_err();
        assert!(matches!(err, LineageError::Pid(PidError::Deleted(_))));

        let err = ids.register(&PidKey::recid(5)).await.unwrap_err();
        assert!(matches!(err, LineageError::Pid(PidError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_ensure_pid_reuses_and_promotes() {
        let ids = manager();
        let object = DocumentId::generate();
        ids.mint(PidKey::recid(3), None, PidStatus::Reserved)
            .await
            .unwrap();

        let mut changes = ChangeSet::new();
        let pid = ids
            .ensure_pid(
                &mut changes,
                &PidKey::recid(3),
                PidStatus::Registered,
                Some((DocumentKind::Record, object)),
            )
            .await
            .unwrap();
        assert_eq!(pid.status, PidStatus::Registered);
        assert_eq!(pid.object_uuid, Some(object));
        assert_eq!(changes.pid_ops.len(), 2);
        assert_eq!(changes.created_pids().count(), 0);

        ids.backend().commit(changes).await.unwrap();

        let mut again = ChangeSet::new();
        ids.ensure_pid(
            &mut again,
            &PidKey::recid(3),
            PidStatus::Reserved,
            Some((DocumentKind::Record, object)),
        )
        .await
        .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_pid_conflicting_binding() {
        let ids = manager();
        ids.mint(
            PidKey::recid(4),
            Some((DocumentKind::Record, DocumentId::generate())),
            PidStatus::Registered,
        )
        .await
        .unwrap();

        let mut changes = ChangeSet::new();
        let err = ids
            .ensure_pid(
                &mut changes,
                &PidKey::recid(4),
                PidStatus::Registered,
                Some((DocumentKind::Record, DocumentId::generate())),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LineageError::IdentifierConflict(_)));
    }

    #[tokio::test]
    async fn test_ensure_pid_staged_twice_creates_once() {
        let ids = manager();
        let mut changes = ChangeSet::new();
        for _ in 0..2 {
            ids.ensure_pid(&mut changes, &PidKey::depid(8), PidStatus::Reserved, None)
                .await
                .unwrap();
        }
        assert_eq!(changes.created_pids().count(), 1);
    }
}
