//! Derived values and the ripple rules that keep them current
//!
//! Derived values are domain totals summed from facts. They are recomputed
//! after every pipeline run and updated incrementally by corrections.

use std::collections::BTreeMap;

use crate::model::{Domain, Fact};

pub const TOTAL_HEADCOUNT: &str = "organization.total_headcount";
pub const TOTAL_IT_COST: &str = "organization.total_it_cost";
pub const TOTAL_APPLICATIONS: &str = "applications.total_applications";
pub const TOTAL_SERVERS: &str = "infrastructure.total_servers";

/// A correction of `field` on a matching fact changes `target` by the same delta
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RippleRule {
    pub field: &'static str,
    pub domain: Option<Domain>,
    pub target: &'static str,
}

pub const RIPPLE_RULES: &[RippleRule] = &[
    RippleRule {
        field: "headcount",
        domain: None,
        target: TOTAL_HEADCOUNT,
    },
    RippleRule {
        field: "annual_cost",
        domain: None,
        target: TOTAL_IT_COST,
    },
    RippleRule {
        field: "server_count",
        domain: Some(Domain::Infrastructure),
        target: TOTAL_SERVERS,
    },
];

impl RippleRule {
    pub fn applies_to(&self, fact: &Fact, field: &str) -> bool {
        self.field == field && self.domain.is_none_or(|d| d == fact.domain)
    }
}

pub fn ripple_rules_for<'a>(fact: &'a Fact, field: &'a str) -> impl Iterator<Item = &'static RippleRule> + 'a {
    RIPPLE_RULES.iter().filter(move |r| r.applies_to(fact, field))
}

/// Sum of a numeric detail over the facts carrying it, `None` when no fact does
pub fn sum_field<'a>(facts: impl IntoIterator<Item = &'a Fact>, field: &str) -> Option<f64> {
    let values: Vec<f64> = facts
        .into_iter()
        .filter_map(|f| f.numeric_detail(field))
        .collect();
    (!values.is_empty()).then(|| values.iter().sum())
}

/// First stated value of a detail field across facts
pub fn stated_value<'a>(facts: impl IntoIterator<Item = &'a Fact>, field: &str) -> Option<f64> {
    facts.into_iter().find_map(|f| f.numeric_detail(field))
}

/// Recompute every derived value from the current fact set
pub fn compute_derived(facts: &[Fact]) -> BTreeMap<String, f64> {
    let mut values = BTreeMap::new();

    values.insert(
        TOTAL_HEADCOUNT.to_string(),
        sum_field(facts, "headcount").unwrap_or(0.0),
    );

    let it_cost = sum_field(facts, "annual_cost")
        .or_else(|| stated_value(facts, "total_it_cost"))
        .unwrap_or(0.0);
    values.insert(TOTAL_IT_COST.to_string(), it_cost);

    let applications = facts
        .iter()
        .filter(|f| f.domain == Domain::Applications && f.category != "application_inventory")
        .count();
    values.insert(TOTAL_APPLICATIONS.to_string(), applications as f64);

    values.insert(
        TOTAL_SERVERS.to_string(),
        sum_field(
            facts.iter().filter(|f| f.domain == Domain::Infrastructure),
            "server_count",
        )
        .unwrap_or(0.0),
    );

    values
}

/// IT cost per IT head, undefined without headcount
pub fn cost_per_head(total_it_cost: f64, total_headcount: f64) -> Option<f64> {
    (total_headcount > 0.0 && total_it_cost > 0.0).then(|| total_it_cost / total_headcount)
}
