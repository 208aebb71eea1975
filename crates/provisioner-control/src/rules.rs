//! Template rule engine.

use provisioner_core::{ApiVersion, TemplateDefinition, TemplateRule};

/// First API version whose templates no longer need rule processing.
pub const RULES_MAX_VERSION: ApiVersion = ApiVersion::new(35, 0);

/// Returns true if templates on this platform version are patched by rules.
#[must_use]
pub fn rules_required(api_version: ApiVersion) -> bool {
    api_version < RULES_MAX_VERSION
}

/// Apply `rules` to `templates` in declaration order.
///
/// Every matching template is patched; later rules overwrite earlier ones.
/// A rule that matches nothing is reported and otherwise ignored.
pub fn apply_rules(rules: &[TemplateRule], templates: &mut [TemplateDefinition]) {
    for rule in rules {
        let mut matched = false;

        for template in templates.iter_mut().filter(|t| rule.target.matches(t)) {
            rule.action.apply_to(template);
            matched = true;
            tracing::info!(
                rule = %rule.name,
                template = %template.name,
                revision = %template.revision,
                compute_policy = %template.compute_policy,
                cpu = ?template.cpu,
                memory_mb = ?template.memory_mb,
                kind = ?template.kind,
                "Applied template rule"
            );
        }

        if !matched {
            tracing::warn!(rule = %rule, "Template rule matched no template");
        }
    }
}

#[cfg(test)]
mod tests {
    use provisioner_core::{Revision, RuleAction, RuleTarget};

    use super::*;

    fn rule(name: &str, target: &str, revision: &str, policy: &str) -> TemplateRule {
        TemplateRule {
            name: name.to_string(),
            target: RuleTarget {
                name: target.to_string(),
                revision: Revision::from(revision),
            },
            action: RuleAction {
                compute_policy: Some(policy.to_string()),
                ..RuleAction::default()
            },
        }
    }

    fn templates() -> Vec<TemplateDefinition> {
        vec![
            TemplateDefinition::new("ubuntu", "1", "ubuntu_rev1"),
            TemplateDefinition::new("photon-v2", "1", "photon-v2_rev1").with_compute_policy("old"),
        ]
    }

    #[test]
    fn version_gate() {
        assert!(rules_required(ApiVersion::new(34, 0)));
        assert!(!rules_required(ApiVersion::new(35, 0)));
        assert!(!rules_required(ApiVersion::new(36, 0)));
    }

    #[test]
    fn no_rules_is_a_no_op() {
        let mut patched = templates();
        apply_rules(&[], &mut patched);
        assert_eq!(patched, templates());
    }

    #[test]
    fn later_rules_win() {
        let mut patched = templates();
        apply_rules(
            &[
                rule("A", "photon-v2", "1", "p1"),
                rule("B", "photon-v2", "1", "p2"),
            ],
            &mut patched,
        );
        assert_eq!(patched[1].compute_policy, "p2");
        assert_eq!(patched[0].compute_policy, "");
    }

    #[test]
    fn unmatched_rule_changes_nothing() {
        let mut patched = templates();
        apply_rules(&[rule("stale", "photon-v2", "7", "p1")], &mut patched);
        assert_eq!(patched, templates());
    }

    #[test]
    fn rule_can_remove_policy() {
        let mut patched = templates();
        apply_rules(&[rule("clear", "photon-v2", "1", "")], &mut patched);
        assert!(!patched[1].has_compute_policy());
    }
}
