//! Checkpoint registry
//!
//! Built-in completeness expectations per (domain, category). Operators can
//! override or extend them through the `checkpoints:` list of the config file.

use std::collections::BTreeMap;

use crate::model::{Checkpoint, Domain, ImportanceTier};

/// Read-only lookup of checkpoints, keyed by (domain, category)
#[derive(Debug, Clone)]
pub struct CheckpointRegistry {
    checkpoints: BTreeMap<(Domain, String), Checkpoint>,
}

impl CheckpointRegistry {
    /// Registry with the built-in defaults
    pub fn builtin() -> Self {
        Self::from_checkpoints(default_checkpoints())
    }

    pub fn from_checkpoints(checkpoints: Vec<Checkpoint>) -> Self {
        let checkpoints = checkpoints
            .into_iter()
            .map(|c| ((c.domain, c.category.clone()), c))
            .collect();
        Self { checkpoints }
    }

    /// Built-in defaults with operator overrides merged on top
    pub fn with_overrides(overrides: Vec<Checkpoint>) -> Self {
        let mut registry = Self::builtin();
        for checkpoint in overrides {
            tracing::debug!(
                domain = %checkpoint.domain,
                category = %checkpoint.category,
                min_items = checkpoint.min_items,
                "Checkpoint override applied"
            );
            registry
                .checkpoints
                .insert((checkpoint.domain, checkpoint.category.clone()), checkpoint);
        }
        registry
    }

    pub fn get(&self, domain: Domain, category: &str) -> Option<&Checkpoint> {
        self.checkpoints.get(&(domain, category.to_string()))
    }

    /// Checkpoint for a category, or a permissive one for categories nobody configured
    pub fn get_or_default(&self, domain: Domain, category: &str) -> Checkpoint {
        self.get(domain, category)
            .cloned()
            .unwrap_or_else(|| Checkpoint::new(domain, category, 0, ImportanceTier::Low))
    }

    pub fn for_domain(&self, domain: Domain) -> Vec<&Checkpoint> {
        self.checkpoints
            .values()
            .filter(|c| c.domain == domain)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}

impl Default for CheckpointRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn default_checkpoints() -> Vec<Checkpoint> {
    use Domain::*;
    use ImportanceTier::*;

    vec![
        Checkpoint::new(Infrastructure, "hosting", 1, Critical).requiring(&["location"]),
        Checkpoint::new(Infrastructure, "compute", 1, High),
        Checkpoint::new(Infrastructure, "storage", 0, Medium),
        Checkpoint::new(Infrastructure, "backup_dr", 1, Critical),
        Checkpoint::new(Infrastructure, "cloud", 0, Medium).with_max(20),
        Checkpoint::new(Network, "wan", 1, High),
        Checkpoint::new(Network, "lan", 0, Medium),
        Checkpoint::new(Network, "security_devices", 0, Medium),
        Checkpoint::new(Cybersecurity, "security_tools", 1, Critical),
        Checkpoint::new(Cybersecurity, "compliance", 0, High),
        Checkpoint::new(Cybersecurity, "incident_response", 1, High),
        Checkpoint::new(Applications, "erp", 1, Critical)
            .with_max(3)
            .requiring(&["vendor"]),
        Checkpoint::new(Applications, "crm", 0, High).with_max(3),
        Checkpoint::new(Applications, "custom_apps", 0, Medium),
        Checkpoint::new(Applications, "saas", 0, Low),
        Checkpoint::new(Applications, "application_inventory", 0, Medium).with_max(1),
        Checkpoint::new(IdentityAccess, "directory", 1, Critical),
        Checkpoint::new(IdentityAccess, "mfa", 1, High),
        Checkpoint::new(IdentityAccess, "pam", 0, Medium),
        Checkpoint::new(Organization, "leadership", 1, High),
        Checkpoint::new(Organization, "teams", 1, Critical).requiring(&["headcount"]),
        Checkpoint::new(Organization, "outsourcing", 0, Medium),
        Checkpoint::new(Organization, "budget", 0, High).with_max(2),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_domain_has_a_mandatory_category() {
        let registry = CheckpointRegistry::builtin();
        for domain in Domain::ALL {
            let checkpoints = registry.for_domain(domain);
            assert!(!checkpoints.is_empty(), "{} has no checkpoints", domain);
            assert!(checkpoints.iter().any(|c| c.min_items > 0));
        }
    }

    #[test]
    fn test_override_replaces_builtin() {
        let registry = CheckpointRegistry::with_overrides(vec![
            Checkpoint::new(Domain::Infrastructure, "backup_dr", 2, ImportanceTier::High),
            Checkpoint::new(Domain::Network, "sd_wan", 1, ImportanceTier::Low),
        ]);
        let backup = registry.get(Domain::Infrastructure, "backup_dr").unwrap();
        assert_eq!(backup.min_items, 2);
        assert!(!backup.is_mandatory());
        assert!(registry.get(Domain::Network, "sd_wan").is_some());
        assert_eq!(registry.len(), CheckpointRegistry::builtin().len() + 1);
    }

    #[test]
    fn test_unknown_category_gets_permissive_default() {
        let registry = CheckpointRegistry::builtin();
        let checkpoint = registry.get_or_default(Domain::Network, "voip");
        assert_eq!(checkpoint.min_items, 0);
        assert!(checkpoint.required_fields.is_empty());
    }
}
