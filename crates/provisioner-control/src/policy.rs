//! Compute policy reconciliation.
//!
//! Every template either names a compute policy, which must exist and be
//! attached to the template's VMs, or names none, in which case any policy
//! attached to them is removed.

use provisioner_core::TemplateDefinition;
use provisioner_platform::{PlatformSession, PolicyBackend};

use crate::error::Result;

/// Reconcile templates against the session's policy backend.
///
/// A platform without compute policies is not an error.
///
/// # Errors
///
/// Returns the first platform error other than `NotSupported`.
pub async fn enforce(
    session: &dyn PlatformSession,
    templates: &[TemplateDefinition],
    org: &str,
    catalog: &str,
) -> Result<()> {
    match session.policy_backend() {
        Ok(backend) => reconcile(templates, backend.as_ref(), org, catalog).await,
        Err(e) if e.is_not_supported() => {
            tracing::info!(reason = %e, "Compute policies not supported, skipping reconciliation");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Bring every template's VMs in line with its compute policy.
///
/// Templates are processed in order.
///
/// # Errors
///
/// Returns the first platform error other than `NotSupported`, which
/// skips the rest of the reconciliation.
pub async fn reconcile(
    templates: &[TemplateDefinition],
    backend: &dyn PolicyBackend,
    org: &str,
    catalog: &str,
) -> Result<()> {
    tracing::info!(template_count = templates.len(), "Reconciling compute policies");

    for template in templates {
        match reconcile_template(template, backend, org, catalog).await {
            Ok(()) => {}
            Err(e) if e.is_not_supported() => {
                tracing::info!(reason = %e, "Compute policies not supported, skipping reconciliation");
                return Ok(());
            }
            Err(e) => {
                tracing::error!(
                    template = %template.name,
                    revision = %template.revision,
                    error = %e,
                    "Failed to reconcile compute policy"
                );
                return Err(e.into());
            }
        }
    }

    Ok(())
}

async fn reconcile_template(
    template: &TemplateDefinition,
    backend: &dyn PolicyBackend,
    org: &str,
    catalog: &str,
) -> provisioner_platform::Result<()> {
    let item = &template.catalog_item_name;

    if !template.has_compute_policy() {
        backend.detach_all(org, catalog, item).await?;
        tracing::debug!(template = %template.name, "Removed compute policies from template");
        return Ok(());
    }

    let name = template.compute_policy.trim();
    let policy = match backend.get_policy(name).await {
        Ok(policy) => policy,
        Err(e) if e.is_not_found() => {
            tracing::info!(policy = %name, "Creating compute policy");
            backend.create_policy(name).await?
        }
        Err(e) => return Err(e),
    };

    backend.attach(&policy.href, org, catalog, item).await?;
    tracing::info!(
        template = %template.name,
        revision = %template.revision,
        policy = %policy.name,
        "Compute policy attached"
    );
    Ok(())
}
