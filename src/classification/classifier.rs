//! VM Classifier
//!
//! Assigns every virtual machine to exactly one power category. Rules are
//! evaluated first-match-wins:
//!
//! 1. Names starting with the infrastructure prefix are excluded entirely
//! 2. Names on the priority list belong to [`VmCategory::Priority`]
//! 3. The first tag group whose key/value matches claims the VM
//! 4. Everything else is [`VmCategory::Other`]
//!
//! Category orders for each direction are resolved once from configuration.

use crate::config::{ClassificationConfig, TagGroupConfig};
use crate::domain::ports::{Direction, VmInfo};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

const PRIORITY_ID: &str = "priority";
const OTHER_ID: &str = "other";

// =============================================================================
// Categories
// =============================================================================

/// Power category of a virtual machine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "group")]
pub enum VmCategory {
    /// Control-plane critical VMs
    Priority,
    /// A configured tag group
    TagGroup(String),
    /// Everything not matched by another rule
    Other,
    /// Platform-managed VMs, never targeted
    InfrastructureManaged,
}

impl VmCategory {
    /// Whether operations may ever be issued against this category
    pub fn is_targetable(&self) -> bool {
        !matches!(self, VmCategory::InfrastructureManaged)
    }

    /// Category id as used in configured orders
    pub fn id(&self) -> &str {
        match self {
            VmCategory::Priority => PRIORITY_ID,
            VmCategory::TagGroup(name) => name,
            VmCategory::Other => OTHER_ID,
            VmCategory::InfrastructureManaged => "infrastructure-managed",
        }
    }
}

impl std::fmt::Display for VmCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

// =============================================================================
// Classification Result
// =============================================================================

/// VMs partitioned by category, in execution order for one direction
#[derive(Debug, Clone)]
pub struct Classification {
    /// Direction the order applies to
    pub direction: Direction,
    /// Every targetable category in order, possibly with no members
    pub groups: IndexMap<VmCategory, Vec<VmInfo>>,
    /// Infrastructure-managed VMs left untouched
    pub excluded: Vec<VmInfo>,
}

impl Classification {
    /// Members of a category
    pub fn members(&self, category: &VmCategory) -> &[VmInfo] {
        self.groups.get(category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of targeted VMs across all categories
    pub fn target_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Categories in execution order
    pub fn order(&self) -> impl Iterator<Item = &VmCategory> {
        self.groups.keys()
    }
}

// =============================================================================
// VM Classifier
// =============================================================================

#[derive(Debug, Clone)]
struct TagRule {
    name: String,
    key: String,
    value: String,
}

impl TagRule {
    fn matches(&self, vm: &VmInfo) -> bool {
        vm.tags.get(&self.key).is_some_and(|v| v == &self.value)
    }
}

/// Classifies VMs into power categories
#[derive(Debug, Clone)]
pub struct VmClassifier {
    infrastructure_prefix: String,
    priority: BTreeSet<String>,
    tag_rules: Vec<TagRule>,
    startup_order: Vec<VmCategory>,
    shutdown_order: Vec<VmCategory>,
}

impl VmClassifier {
    /// Build a classifier, validating every category reference
    pub fn from_config(config: &ClassificationConfig) -> Result<Self> {
        if config.infrastructure_prefix.is_empty() {
            return Err(Error::Configuration(
                "classification.infrastructure_prefix must not be empty".into(),
            ));
        }

        let tag_rules = build_tag_rules(&config.tag_groups)?;
        let groups: Vec<VmCategory> = tag_rules
            .iter()
            .map(|r| VmCategory::TagGroup(r.name.clone()))
            .collect();

        let startup_order = match &config.startup_order {
            Some(ids) => resolve_order("startup_order", ids, &groups)?,
            None => default_startup_order(&groups),
        };
        let shutdown_order = match &config.shutdown_order {
            Some(ids) => resolve_order("shutdown_order", ids, &groups)?,
            None => default_shutdown_order(&groups),
        };

        debug!(
            "Classifier resolved: startup {:?}, shutdown {:?}",
            startup_order.iter().map(VmCategory::id).collect::<Vec<_>>(),
            shutdown_order.iter().map(VmCategory::id).collect::<Vec<_>>()
        );

        Ok(Self {
            infrastructure_prefix: config.infrastructure_prefix.clone(),
            priority: config.priority_vms.iter().cloned().collect(),
            tag_rules,
            startup_order,
            shutdown_order,
        })
    }

    /// Whether a VM is platform-managed and must never be targeted
    pub fn is_excluded(&self, vm_name: &str) -> bool {
        vm_name.starts_with(&self.infrastructure_prefix)
    }

    /// Category of a single VM
    pub fn category_of(&self, vm: &VmInfo) -> VmCategory {
        if self.is_excluded(&vm.name) {
            return VmCategory::InfrastructureManaged;
        }
        if self.priority.contains(&vm.name) {
            return VmCategory::Priority;
        }
        self.tag_rules
            .iter()
            .find(|rule| rule.matches(vm))
            .map(|rule| VmCategory::TagGroup(rule.name.clone()))
            .unwrap_or(VmCategory::Other)
    }

    /// Category execution order for a direction
    pub fn order(&self, direction: Direction) -> &[VmCategory] {
        match direction {
            Direction::Startup => &self.startup_order,
            Direction::Shutdown => &self.shutdown_order,
        }
    }

    /// Partition VMs into categories ordered for the given direction
    pub fn classify<'a, I>(&self, vms: I, direction: Direction) -> Classification
    where
        I: IntoIterator<Item = &'a VmInfo>,
    {
        let mut groups: IndexMap<VmCategory, Vec<VmInfo>> = self
            .order(direction)
            .iter()
            .map(|c| (c.clone(), Vec::new()))
            .collect();
        let mut excluded = Vec::new();

        for vm in vms {
            let category = self.category_of(vm);
            if category.is_targetable() {
                groups.entry(category).or_default().push(vm.clone());
            } else {
                excluded.push(vm.clone());
            }
        }

        Classification {
            direction,
            groups,
            excluded,
        }
    }
}

fn build_tag_rules(groups: &[TagGroupConfig]) -> Result<Vec<TagRule>> {
    let mut seen = HashSet::new();
    let mut rules = Vec::with_capacity(groups.len());

    for group in groups {
        if group.name.is_empty() || group.key.is_empty() || group.value.is_empty() {
            return Err(Error::Configuration(format!(
                "tag group '{}' needs a name, key and value",
                group.name
            )));
        }
        if group.name == PRIORITY_ID || group.name == OTHER_ID {
            return Err(Error::Configuration(format!(
                "tag group name '{}' is reserved",
                group.name
            )));
        }
        if !seen.insert(group.name.as_str()) {
            return Err(Error::Configuration(format!(
                "duplicate tag group '{}'",
                group.name
            )));
        }
        rules.push(TagRule {
            name: group.name.clone(),
            key: group.key.clone(),
            value: group.value.clone(),
        });
    }

    Ok(rules)
}

fn default_startup_order(groups: &[VmCategory]) -> Vec<VmCategory> {
    let mut order = Vec::with_capacity(groups.len() + 2);
    order.push(VmCategory::Priority);
    order.extend(groups.iter().cloned());
    order.push(VmCategory::Other);
    order
}

/// Dependent tiers go down before the tiers they rely on; priority goes
/// down after every tier and before the unclassified remainder.
fn default_shutdown_order(groups: &[VmCategory]) -> Vec<VmCategory> {
    let mut order = Vec::with_capacity(groups.len() + 2);
    order.extend(groups.iter().rev().cloned());
    order.push(VmCategory::Priority);
    order.push(VmCategory::Other);
    order
}

fn resolve_order(field: &str, ids: &[String], groups: &[VmCategory]) -> Result<Vec<VmCategory>> {
    let mut order = Vec::with_capacity(ids.len());

    for id in ids {
        let category = match id.as_str() {
            PRIORITY_ID => VmCategory::Priority,
            OTHER_ID => VmCategory::Other,
            name => groups
                .iter()
                .find(|c| c.id() == name)
                .cloned()
                .ok_or_else(|| {
                    Error::Configuration(format!(
                        "classification.{} references unknown category '{}'",
                        field, name
                    ))
                })?,
        };
        if order.contains(&category) {
            return Err(Error::Configuration(format!(
                "classification.{} lists '{}' more than once",
                field, id
            )));
        }
        order.push(category);
    }

    let expected = groups.len() + 2;
    if order.len() != expected {
        return Err(Error::Configuration(format!(
            "classification.{} must list all {} categories, got {}",
            field,
            expected,
            order.len()
        )));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::VmPowerState;
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;

    fn make_vm(name: &str, tags: &[(&str, &str)]) -> VmInfo {
        VmInfo {
            name: name.to_string(),
            power_state: VmPowerState::On,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            host_name: "esx-01".to_string(),
        }
    }

    fn three_tier_config() -> ClassificationConfig {
        ClassificationConfig {
            priority_vms: vec!["vcsa-01".to_string()],
            tag_groups: vec![
                TagGroupConfig {
                    name: "infra".into(),
                    key: "tier".into(),
                    value: "infra".into(),
                },
                TagGroupConfig {
                    name: "databases".into(),
                    key: "tier".into(),
                    value: "db".into(),
                },
                TagGroupConfig {
                    name: "apps".into(),
                    key: "tier".into(),
                    value: "app".into(),
                },
            ],
            ..Default::default()
        }
    }

    fn ids(order: &[VmCategory]) -> Vec<&str> {
        order.iter().map(VmCategory::id).collect()
    }

    #[test]
    fn test_default_orders_are_asymmetric() {
        let classifier = VmClassifier::from_config(&three_tier_config()).unwrap();

        assert_eq!(
            ids(classifier.order(Direction::Startup)),
            vec!["priority", "infra", "databases", "apps", "other"]
        );
        assert_eq!(
            ids(classifier.order(Direction::Shutdown)),
            vec!["apps", "databases", "infra", "priority", "other"]
        );
    }

    #[test]
    fn test_first_match_wins() {
        let classifier = VmClassifier::from_config(&three_tier_config()).unwrap();

        // Priority beats a matching tag
        let vm = make_vm("vcsa-01", &[("tier", "db")]);
        assert_eq!(classifier.category_of(&vm), VmCategory::Priority);

        let vm = make_vm("pg-01", &[("tier", "db")]);
        assert_eq!(
            classifier.category_of(&vm),
            VmCategory::TagGroup("databases".into())
        );

        let vm = make_vm("scratch", &[("owner", "qa")]);
        assert_eq!(classifier.category_of(&vm), VmCategory::Other);

        // Infrastructure prefix beats everything
        let vm = make_vm("vCLS-a1b2", &[("tier", "app")]);
        assert_eq!(classifier.category_of(&vm), VmCategory::InfrastructureManaged);
    }

    #[test]
    fn test_tag_groups_evaluated_in_configured_order() {
        let mut config = three_tier_config();
        config.tag_groups.push(TagGroupConfig {
            name: "web".into(),
            key: "role".into(),
            value: "frontend".into(),
        });
        let classifier = VmClassifier::from_config(&config).unwrap();

        let vm = make_vm("web-01", &[("role", "frontend"), ("tier", "app")]);
        assert_eq!(classifier.category_of(&vm), VmCategory::TagGroup("apps".into()));
    }

    #[test]
    fn test_every_vm_in_exactly_one_category() {
        let classifier = VmClassifier::from_config(&three_tier_config()).unwrap();
        let vms = vec![
            make_vm("vcsa-01", &[]),
            make_vm("vCLS-1", &[]),
            make_vm("vCLS-2", &[("tier", "db")]),
            make_vm("pg-01", &[("tier", "db")]),
            make_vm("pg-02", &[("tier", "db")]),
            make_vm("api-01", &[("tier", "app")]),
            make_vm("dns-01", &[("tier", "infra")]),
            make_vm("misc", &[]),
        ];

        let classification = classifier.classify(&vms, Direction::Shutdown);

        assert_eq!(classification.excluded.len(), 2);
        assert_eq!(classification.target_count(), 6);
        assert!(classification.groups.keys().all(VmCategory::is_targetable));

        let mut seen = HashSet::new();
        for members in classification.groups.values() {
            for vm in members {
                assert!(!vm.name.starts_with("vCLS"));
                assert!(seen.insert(vm.name.clone()), "{} classified twice", vm.name);
            }
        }
        assert_eq!(
            classification.members(&VmCategory::TagGroup("databases".into())).len(),
            2
        );
        assert_eq!(
            classification.order().map(VmCategory::id).collect::<Vec<_>>(),
            vec!["apps", "databases", "infra", "priority", "other"]
        );
    }

    #[test]
    fn test_explicit_order() {
        let mut config = three_tier_config();
        config.shutdown_order = Some(
            ["priority", "apps", "databases", "infra", "other"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        let classifier = VmClassifier::from_config(&config).unwrap();
        assert_eq!(
            ids(classifier.order(Direction::Shutdown)),
            vec!["priority", "apps", "databases", "infra", "other"]
        );
    }

    #[test]
    fn test_invalid_orders_rejected() {
        let mut config = three_tier_config();
        config.startup_order = Some(vec!["priority".into(), "other".into()]);
        assert_matches!(VmClassifier::from_config(&config), Err(Error::Configuration(_)));

        let mut config = three_tier_config();
        config.startup_order = Some(
            ["priority", "infra", "infra", "apps", "other"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        assert_matches!(VmClassifier::from_config(&config), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_reserved_and_duplicate_group_names() {
        let mut config = three_tier_config();
        config.tag_groups[0].name = "other".into();
        assert!(VmClassifier::from_config(&config).is_err());

        let mut config = three_tier_config();
        config.tag_groups[1].name = "infra".into();
        assert!(VmClassifier::from_config(&config).is_err());
    }
}
