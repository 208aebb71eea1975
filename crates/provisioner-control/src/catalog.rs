//! Template catalog loading.

use provisioner_core::TemplateDefinition;
use provisioner_platform::PlatformSession;

use crate::config::CatalogConfig;
use crate::error::{ControlError, Result};

/// Load every template from the configured catalog and check that the
/// default template is among them.
///
/// # Errors
///
/// Returns `ControlError::NoTemplates` if the catalog holds no templates,
/// `ControlError::DefaultTemplateMissing` if the default template at its
/// configured revision is absent, or the platform error if the catalog
/// cannot be read.
pub async fn load_templates(
    session: &dyn PlatformSession,
    catalog: &CatalogConfig,
) -> Result<Vec<TemplateDefinition>> {
    tracing::info!(
        org = %catalog.org,
        catalog = %catalog.catalog,
        "Loading templates from catalog"
    );

    let templates = session
        .list_templates(&catalog.org, &catalog.catalog)
        .await?;

    if templates.is_empty() {
        return Err(ControlError::NoTemplates {
            org: catalog.org.clone(),
            catalog: catalog.catalog.clone(),
        });
    }

    for template in &templates {
        tracing::info!(
            template = %template.name,
            revision = %template.revision,
            catalog_item = %template.catalog_item_name,
            compute_policy = %template.compute_policy,
            kind = ?template.kind,
            "Found template"
        );
    }

    let name = &catalog.default_template_name;
    let revision = &catalog.default_template_revision;
    if !templates.iter().any(|t| t.is(name, revision)) {
        return Err(ControlError::DefaultTemplateMissing {
            name: name.clone(),
            revision: revision.clone(),
        });
    }

    tracing::info!(
        template = %name,
        revision = %revision,
        "Default template found"
    );

    Ok(templates)
}

#[cfg(test)]
mod tests {
    use provisioner_core::{ApiVersion, Revision};
    use provisioner_platform::{MockPlatform, Platform};

    use super::*;
    use crate::config::fixtures;

    fn catalog(name: &str, revision: &str) -> CatalogConfig {
        CatalogConfig {
            default_template_name: name.to_string(),
            default_template_revision: Revision::from(revision),
            ..fixtures::config().catalog
        }
    }

    fn platform(templates: Vec<TemplateDefinition>) -> MockPlatform {
        MockPlatform::new(ApiVersion::new(35, 0)).with_templates(templates)
    }

    #[tokio::test]
    async fn default_template_present() {
        let platform = platform(vec![
            TemplateDefinition::new("ubuntu", "1", "ubuntu_rev1"),
            TemplateDefinition::new("photon-v2", 1_u64, "photon-v2_rev1"),
        ]);
        let session = platform.login().await.unwrap();

        let templates = load_templates(&*session, &catalog("photon-v2", "1"))
            .await
            .unwrap();
        assert_eq!(templates.len(), 2);
    }

    #[tokio::test]
    async fn empty_catalog() {
        let session = platform(Vec::new()).login().await.unwrap();

        let err = load_templates(&*session, &catalog("photon-v2", "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::NoTemplates { .. }));
    }

    #[tokio::test]
    async fn default_revision_must_match() {
        let session = platform(vec![TemplateDefinition::new(
            "photon-v2",
            "2",
            "photon-v2_rev2",
        )])
        .login()
        .await
        .unwrap();

        let err = load_templates(&*session, &catalog("photon-v2", "1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::DefaultTemplateMissing { ref name, .. } if name == "photon-v2"
        ));
    }

    #[tokio::test]
    async fn catalog_failure_propagates() {
        let session = MockPlatform::new(ApiVersion::new(35, 0))
            .fail_list_templates()
            .login()
            .await
            .unwrap();

        let err = load_templates(&*session, &catalog("photon-v2", "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Platform(_)));
    }
}
