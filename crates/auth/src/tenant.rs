//! Tenant (organization) removal.
//!
//! Removal is three separately committed steps, because dropping constraints on
//! a dedicated schema is not transactional:
//!
//! ```text
//! Active ─► SchemaMarkedDeleted ─► ConstraintsDropped ─► Removed
//!   (1) mark_schema_deleted  (2) drop_schema_constraints  (3) remove_tenant
//! ```
//!
//! A failure after step 1 leaves the tenant marked but present. Such a tenant
//! denies every access (see `AccessGate`) until an operator resumes removal.
//! Every step checks the persisted state first, so re-running is a no-op.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatehouse_core::{DatastoreId, Entity, TenantId};

use crate::policy::{EntityAccessPolicy, Protected, RequiredPrivilege};
use crate::privilege::builtin;
use crate::resolver::ResolvedAuthority;
use crate::store::{AssignmentStore, StoreError, TenantDatastore, TenantRepository};
use crate::Privilege;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    /// Dedicated schema/partition, if the tenant has one.
    pub assigned_datastore_id: Option<DatastoreId>,
    pub schema_deleted: bool,
    pub constraints_dropped: bool,
}

impl Tenant {
    pub fn new(id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            assigned_datastore_id: None,
            schema_deleted: false,
            constraints_dropped: false,
        }
    }

    pub fn with_datastore(mut self, datastore_id: DatastoreId) -> Self {
        self.assigned_datastore_id = Some(datastore_id);
        self
    }

    pub fn phase(&self) -> TenantPhase {
        match (self.schema_deleted, self.constraints_dropped) {
            (false, _) => TenantPhase::Active,
            (true, false) => TenantPhase::SchemaMarkedDeleted,
            (true, true) => TenantPhase::ConstraintsDropped,
        }
    }
}

impl Entity for Tenant {
    type Id = TenantId;

    fn id(&self) -> TenantId {
        self.id
    }
}

impl Protected for Tenant {
    const ENTITY_TYPE: &'static str = "organization";

    fn access_policy() -> EntityAccessPolicy {
        EntityAccessPolicy::new(
            Self::ENTITY_TYPE,
            RequiredPrivilege::Privilege(builtin::CAN_READ_ORG_DATA),
            RequiredPrivilege::Privilege(builtin::CAN_MANAGE_ORG_DATA),
        )
    }

    fn scope_tenant(&self) -> Option<TenantId> {
        Some(self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantPhase {
    Active,
    SchemaMarkedDeleted,
    ConstraintsDropped,
    /// Terminal: the tenant row and its scoped data are gone.
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalStep {
    MarkSchemaDeleted,
    DropSchemaConstraints,
    RemoveTenant,
}

/// Proof that step 1 committed; required to run step 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaMarkedDeleted {
    pub tenant_id: TenantId,
    pub datastore_id: Option<DatastoreId>,
}

/// Proof that step 2 committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintsDropped {
    pub tenant_id: TenantId,
}

/// Summary of step 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TenantRemoved {
    pub tenant_id: TenantId,
    /// `false` if the tenant was already gone.
    pub removed: bool,
    pub purged_rows: usize,
    pub removed_assignments: usize,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("forbidden: tenant removal requires '{0}'")]
    Forbidden(Privilege),

    #[error("tenant {0} not found")]
    UnknownTenant(TenantId),

    #[error("tenant {tenant_id} is assigned datastore {assigned:?}, got {given:?}")]
    DatastoreMismatch {
        tenant_id: TenantId,
        assigned: Option<DatastoreId>,
        given: Option<DatastoreId>,
    },

    #[error("step result belongs to tenant {given}, not {expected}")]
    StepResultMismatch { expected: TenantId, given: TenantId },

    #[error("tenant {tenant_id} is in phase {actual:?}, expected {expected:?}")]
    OutOfOrder {
        tenant_id: TenantId,
        expected: TenantPhase,
        actual: TenantPhase,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure of a removal sequence, with what had already been committed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("tenant {tenant_id} removal failed at {step:?} (committed phase: {committed:?}): {source}")]
pub struct RemovalError {
    pub tenant_id: TenantId,
    pub step: RemovalStep,
    pub committed: TenantPhase,
    #[source]
    pub source: LifecycleError,
}

#[derive(Debug)]
pub struct TenantLifecycle<S, D> {
    store: Arc<S>,
    datastore: Arc<D>,
}

impl<S, D> TenantLifecycle<S, D>
where
    S: TenantRepository + AssignmentStore,
    D: TenantDatastore,
{
    pub fn new(store: Arc<S>, datastore: Arc<D>) -> Self {
        Self { store, datastore }
    }

    /// Current phase; a missing row means `Removed`.
    pub fn phase(&self, tenant_id: TenantId) -> Result<TenantPhase, StoreError> {
        Ok(self
            .store
            .get_tenant(tenant_id)?
            .map_or(TenantPhase::Removed, |tenant| tenant.phase()))
    }

    /// Step 1. Idempotent.
    pub fn mark_schema_deleted(
        &self,
        requester: &ResolvedAuthority,
        tenant_id: TenantId,
        datastore_id: Option<DatastoreId>,
    ) -> Result<SchemaMarkedDeleted, LifecycleError> {
        ensure_allowed(requester)?;
        let mut tenant = self.load(tenant_id)?;

        if tenant.assigned_datastore_id != datastore_id {
            return Err(LifecycleError::DatastoreMismatch {
                tenant_id,
                assigned: tenant.assigned_datastore_id,
                given: datastore_id,
            });
        }

        if tenant.schema_deleted {
            tracing::debug!(tenant_id = %tenant_id, "schema already marked deleted");
        } else {
            tenant.schema_deleted = true;
            self.store.save_tenant(&tenant)?;
            tracing::info!(tenant_id = %tenant_id, ?datastore_id, "tenant schema marked deleted");
        }

        Ok(SchemaMarkedDeleted {
            tenant_id,
            datastore_id,
        })
    }

    /// Step 2. A tenant without a dedicated datastore has nothing to drop but
    /// still records the phase.
    pub fn drop_schema_constraints(
        &self,
        requester: &ResolvedAuthority,
        tenant_id: TenantId,
        prior: &SchemaMarkedDeleted,
        datastore_id: Option<DatastoreId>,
    ) -> Result<ConstraintsDropped, LifecycleError> {
        ensure_allowed(requester)?;
        if prior.tenant_id != tenant_id {
            return Err(LifecycleError::StepResultMismatch {
                expected: tenant_id,
                given: prior.tenant_id,
            });
        }

        let mut tenant = self.load(tenant_id)?;
        if tenant.assigned_datastore_id != datastore_id {
            return Err(LifecycleError::DatastoreMismatch {
                tenant_id,
                assigned: tenant.assigned_datastore_id,
                given: datastore_id,
            });
        }

        match tenant.phase() {
            TenantPhase::ConstraintsDropped => {
                tracing::debug!(tenant_id = %tenant_id, "constraints already dropped");
                return Ok(ConstraintsDropped { tenant_id });
            }
            TenantPhase::SchemaMarkedDeleted => {}
            actual => {
                return Err(LifecycleError::OutOfOrder {
                    tenant_id,
                    expected: TenantPhase::SchemaMarkedDeleted,
                    actual,
                });
            }
        }

        if let Some(datastore_id) = datastore_id {
            self.datastore.drop_constraints(datastore_id)?;
        }

        tenant.constraints_dropped = true;
        self.store.save_tenant(&tenant)?;
        tracing::info!(tenant_id = %tenant_id, ?datastore_id, "tenant schema constraints dropped");

        Ok(ConstraintsDropped { tenant_id })
    }

    /// Step 3. Deletes scoped rows, assignments, then the tenant itself.
    pub fn remove_tenant(
        &self,
        requester: &ResolvedAuthority,
        tenant_id: TenantId,
    ) -> Result<TenantRemoved, LifecycleError> {
        ensure_allowed(requester)?;

        let Some(tenant) = self.store.get_tenant(tenant_id)? else {
            tracing::debug!(tenant_id = %tenant_id, "tenant already removed");
            return Ok(TenantRemoved {
                tenant_id,
                removed: false,
                purged_rows: 0,
                removed_assignments: 0,
            });
        };

        let actual = tenant.phase();
        if actual != TenantPhase::ConstraintsDropped {
            return Err(LifecycleError::OutOfOrder {
                tenant_id,
                expected: TenantPhase::ConstraintsDropped,
                actual,
            });
        }

        let purged_rows = self.datastore.purge_tenant(tenant_id)?;
        let removed_assignments = self.store.delete_assignments_for_tenant(tenant_id)?;
        let removed = self.store.delete_tenant(tenant_id)?;

        tracing::info!(
            tenant_id = %tenant_id,
            purged_rows,
            removed_assignments,
            "tenant removed"
        );

        Ok(TenantRemoved {
            tenant_id,
            removed,
            purged_rows,
            removed_assignments,
        })
    }

    /// Run (or resume) the full sequence from the persisted phase.
    pub fn run_removal(
        &self,
        requester: &ResolvedAuthority,
        tenant_id: TenantId,
    ) -> Result<TenantPhase, RemovalError> {
        let fail = |step: RemovalStep, committed: TenantPhase| {
            move |source: LifecycleError| {
                tracing::warn!(tenant_id = %tenant_id, ?step, ?committed, "tenant removal step failed: {source}");
                RemovalError {
                    tenant_id,
                    step,
                    committed,
                    source,
                }
            }
        };

        let phase = self
            .phase(tenant_id)
            .map_err(|e| fail(RemovalStep::MarkSchemaDeleted, TenantPhase::Active)(e.into()))?;
        if phase == TenantPhase::Removed {
            return Ok(TenantPhase::Removed);
        }

        let datastore_id = self
            .load(tenant_id)
            .map_err(fail(RemovalStep::MarkSchemaDeleted, phase))?
            .assigned_datastore_id;

        let marked = self
            .mark_schema_deleted(requester, tenant_id, datastore_id)
            .map_err(fail(RemovalStep::MarkSchemaDeleted, phase))?;

        self.drop_schema_constraints(requester, tenant_id, &marked, datastore_id)
            .map_err(fail(
                RemovalStep::DropSchemaConstraints,
                phase.max(TenantPhase::SchemaMarkedDeleted),
            ))?;

        self.remove_tenant(requester, tenant_id)
            .map_err(fail(RemovalStep::RemoveTenant, TenantPhase::ConstraintsDropped))?;

        Ok(TenantPhase::Removed)
    }

    fn load(&self, tenant_id: TenantId) -> Result<Tenant, LifecycleError> {
        self.store
            .get_tenant(tenant_id)?
            .ok_or(LifecycleError::UnknownTenant(tenant_id))
    }
}

fn ensure_allowed(requester: &ResolvedAuthority) -> Result<(), LifecycleError> {
    if requester.has_global(&builtin::CAN_MANAGE_ORGANIZATIONS) {
        Ok(())
    } else {
        tracing::warn!(requester = %requester.principal_id, "tenant lifecycle operation denied");
        Err(LifecycleError::Forbidden(builtin::CAN_MANAGE_ORGANIZATIONS))
    }
}
