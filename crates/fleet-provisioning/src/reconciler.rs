//! Create-or-patch reconciliation of tenant compute resources

use fleet_providers::{ComputeApi, CreateResource, IamPolicy, Operation, PolicyBinding};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::ProvisioningError;
use crate::poller::OperationPoller;

pub const INVOKER_ROLE: &str = "roles/run.invoker";
pub const ALL_USERS: &str = "allUsers";

/// Kind of compute resource being reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Service,
    Job,
}

impl ResourceKind {
    fn label(&self) -> &'static str {
        match self {
            ResourceKind::Service => "service",
            ResourceKind::Job => "job",
        }
    }
}

/// A resource whose live state should match `spec`.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredResource {
    pub kind: ResourceKind,
    pub parent: String,
    /// Short id, e.g. `tenant-<uuid>`
    pub id: String,
    pub spec: Value,
}

impl DesiredResource {
    pub fn name(&self) -> String {
        let collection = match self.kind {
            ResourceKind::Service => "services",
            ResourceKind::Job => "jobs",
        };
        format!("{}/{}/{}", self.parent, collection, self.id)
    }
}

#[derive(Clone)]
pub struct ResourceReconciler {
    compute: Arc<dyn ComputeApi>,
    poller: OperationPoller,
}

impl ResourceReconciler {
    pub fn new(compute: Arc<dyn ComputeApi>) -> Self {
        let poller = OperationPoller::new(compute.clone());
        Self { compute, poller }
    }

    pub fn poller(&self) -> &OperationPoller {
        &self.poller
    }

    /// Start reconciling `desired` and return the pending operation.
    ///
    /// A missing resource is created; an existing one is patched. Any read
    /// error other than not-found is returned untouched.
    pub async fn reconcile(&self, desired: DesiredResource) -> Result<Operation, ProvisioningError> {
        let name = desired.name();

        match self.compute.get_resource(&name).await {
            Ok(_) => {
                info!("Updating existing {} {}", desired.kind.label(), name);
                Ok(self.compute.patch_resource(&name, desired.spec).await?)
            }
            Err(e) if e.is_not_found() => {
                info!("Creating new {} {}", desired.kind.label(), name);
                let (service_id, job_id) = match desired.kind {
                    ResourceKind::Service => (Some(desired.id), None),
                    ResourceKind::Job => (None, Some(desired.id)),
                };
                let operation = self
                    .compute
                    .create_resource(CreateResource {
                        parent: desired.parent,
                        service_id,
                        job_id,
                        spec: desired.spec,
                    })
                    .await?;
                Ok(operation)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Make `name` invokable by anyone, keeping every existing binding.
    ///
    /// Returns `true` when the policy had to be written.
    pub async fn ensure_public_access(&self, name: &str) -> Result<bool, ProvisioningError> {
        let policy = self.compute.get_iam_policy(name).await?;

        match merge_public_invoker(policy) {
            Some(updated) => {
                self.compute.set_iam_policy(name, updated).await?;
                info!("Granted public access to {}", name);
                Ok(true)
            }
            None => {
                debug!("{} is already publicly invokable", name);
                Ok(false)
            }
        }
    }
}

/// Add `allUsers` to the invoker binding, or `None` if it is already there.
pub fn merge_public_invoker(mut policy: IamPolicy) -> Option<IamPolicy> {
    match policy.bindings.iter_mut().find(|b| b.role == INVOKER_ROLE) {
        Some(binding) => {
            if binding.members.iter().any(|m| m == ALL_USERS) {
                return None;
            }
            binding.members.push(ALL_USERS.to_string());
        }
        None => policy.bindings.push(PolicyBinding {
            role: INVOKER_ROLE.to_string(),
            members: vec![ALL_USERS.to_string()],
        }),
    }
    Some(policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleet_providers::{JobExecution, ProviderError, ProviderResult, Resource};
    use mockall::mock;
    use mockall::predicate::*;
    use std::sync::Mutex;

    mock! {
        pub Compute {}

        #[async_trait]
        impl ComputeApi for Compute {
            async fn get_resource(&self, name: &str) -> ProviderResult<Resource>;
            async fn create_resource(&self, request: CreateResource) -> ProviderResult<Operation>;
            async fn patch_resource(&self, name: &str, spec: Value) -> ProviderResult<Operation>;
            async fn delete_resource(&self, name: &str) -> ProviderResult<Operation>;
            async fn get_iam_policy(&self, name: &str) -> ProviderResult<IamPolicy>;
            async fn set_iam_policy(&self, name: &str, policy: IamPolicy) -> ProviderResult<IamPolicy>;
            async fn run_job(&self, name: &str) -> ProviderResult<Operation>;
            async fn get_execution(&self, name: &str) -> ProviderResult<JobExecution>;
            async fn get_operation(&self, name: &str) -> ProviderResult<Operation>;
        }
    }

    fn desired(kind: ResourceKind, id: &str) -> DesiredResource {
        DesiredResource {
            kind,
            parent: "projects/p/locations/r".to_string(),
            id: id.to_string(),
            spec: serde_json::json!({"template": {"containers": [{"image": "img"}]}}),
        }
    }

    fn op(name: &str) -> Operation {
        Operation {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_service_is_created_with_service_id_only() {
        let mut compute = MockCompute::new();
        compute
            .expect_get_resource()
            .with(eq("projects/p/locations/r/services/tenant-1"))
            .times(1)
            .returning(|name| Err(ProviderError::NotFound(name.to_string())));
        compute
            .expect_create_resource()
            .withf(|req| {
                req.service_id.as_deref() == Some("tenant-1")
                    && req.job_id.is_none()
                    && req.parent == "projects/p/locations/r"
                    && req.spec["template"]["containers"][0]["image"] == "img"
            })
            .times(1)
            .returning(|_| Ok(op("op-create")));
        compute.expect_patch_resource().never();

        let reconciler = ResourceReconciler::new(Arc::new(compute));
        let operation = reconciler
            .reconcile(desired(ResourceKind::Service, "tenant-1"))
            .await
            .unwrap();

        assert_eq!(operation.name, "op-create");
    }

    #[tokio::test]
    async fn test_missing_job_is_created_with_job_id_only() {
        let mut compute = MockCompute::new();
        compute
            .expect_get_resource()
            .returning(|name| Err(ProviderError::NotFound(name.to_string())));
        compute
            .expect_create_resource()
            .withf(|req| req.job_id.as_deref() == Some("migration-1") && req.service_id.is_none())
            .times(1)
            .returning(|_| Ok(op("op-job")));

        let reconciler = ResourceReconciler::new(Arc::new(compute));
        reconciler
            .reconcile(desired(ResourceKind::Job, "migration-1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_existing_resource_is_patched_never_created() {
        let mut compute = MockCompute::new();
        compute.expect_get_resource().times(1).returning(|name| {
            Ok(Resource {
                name: name.to_string(),
                ..Default::default()
            })
        });
        compute
            .expect_patch_resource()
            .with(
                eq("projects/p/locations/r/services/tenant-1"),
                always(),
            )
            .times(1)
            .returning(|_, _| Ok(op("op-patch")));
        compute.expect_create_resource().never();

        let reconciler = ResourceReconciler::new(Arc::new(compute));
        let operation = reconciler
            .reconcile(desired(ResourceKind::Service, "tenant-1"))
            .await
            .unwrap();

        assert_eq!(operation.name, "op-patch");
    }

    #[tokio::test]
    async fn test_other_read_errors_propagate() {
        let mut compute = MockCompute::new();
        compute.expect_get_resource().returning(|_| {
            Err(ProviderError::Api {
                status: 403,
                codes: vec![],
                message: "Permission denied".to_string(),
            })
        });
        compute.expect_create_resource().never();
        compute.expect_patch_resource().never();

        let reconciler = ResourceReconciler::new(Arc::new(compute));
        let err = reconciler
            .reconcile(desired(ResourceKind::Service, "tenant-1"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProvisioningError::ProviderCallFailed(ProviderError::Api { status: 403, .. })
        ));
    }

    /// Stores the policy so repeated merges observe earlier writes.
    struct PolicyStore {
        policy: Mutex<IamPolicy>,
        writes: Mutex<usize>,
    }

    #[async_trait]
    impl ComputeApi for PolicyStore {
        async fn get_resource(&self, _name: &str) -> ProviderResult<Resource> {
            unimplemented!()
        }
        async fn create_resource(&self, _request: CreateResource) -> ProviderResult<Operation> {
            unimplemented!()
        }
        async fn patch_resource(&self, _name: &str, _spec: Value) -> ProviderResult<Operation> {
            unimplemented!()
        }
        async fn delete_resource(&self, _name: &str) -> ProviderResult<Operation> {
            unimplemented!()
        }
        async fn get_iam_policy(&self, _name: &str) -> ProviderResult<IamPolicy> {
            Ok(self.policy.lock().unwrap().clone())
        }
        async fn set_iam_policy(&self, _name: &str, policy: IamPolicy) -> ProviderResult<IamPolicy> {
            *self.writes.lock().unwrap() += 1;
            *self.policy.lock().unwrap() = policy.clone();
            Ok(policy)
        }
        async fn run_job(&self, _name: &str) -> ProviderResult<Operation> {
            unimplemented!()
        }
        async fn get_execution(&self, _name: &str) -> ProviderResult<JobExecution> {
            unimplemented!()
        }
        async fn get_operation(&self, _name: &str) -> ProviderResult<Operation> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_public_access_merge_is_idempotent_and_keeps_members() {
        let store = Arc::new(PolicyStore {
            policy: Mutex::new(IamPolicy {
                version: Some(1),
                bindings: vec![
                    PolicyBinding {
                        role: INVOKER_ROLE.to_string(),
                        members: vec!["serviceAccount:ci@p.iam.gserviceaccount.com".to_string()],
                    },
                    PolicyBinding {
                        role: "roles/run.developer".to_string(),
                        members: vec!["user:dev@vendin.store".to_string()],
                    },
                ],
                etag: Some("BwX=".to_string()),
            }),
            writes: Mutex::new(0),
        });
        let reconciler = ResourceReconciler::new(store.clone());

        assert!(reconciler.ensure_public_access("svc").await.unwrap());
        assert!(!reconciler.ensure_public_access("svc").await.unwrap());

        let policy = store.policy.lock().unwrap().clone();
        let invoker = policy
            .bindings
            .iter()
            .find(|b| b.role == INVOKER_ROLE)
            .unwrap();
        assert_eq!(
            invoker.members.iter().filter(|m| *m == ALL_USERS).count(),
            1
        );
        assert!(invoker
            .members
            .contains(&"serviceAccount:ci@p.iam.gserviceaccount.com".to_string()));
        assert_eq!(policy.bindings.len(), 2);
        assert_eq!(*store.writes.lock().unwrap(), 1);
    }

    #[test]
    fn test_merge_appends_missing_binding() {
        let merged = merge_public_invoker(IamPolicy::default()).unwrap();

        assert_eq!(merged.bindings.len(), 1);
        assert_eq!(merged.bindings[0].role, INVOKER_ROLE);
        assert_eq!(merged.bindings[0].members, vec![ALL_USERS.to_string()]);
    }
}
