//! Extracted facts and the domains they belong to

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

/// Structured detail map attached to a fact
pub type Details = BTreeMap<String, serde_json::Value>;

/// Fact identifier (content hash of the dedup key)
pub type FactId = String;

/// Due-diligence domain a fact describes
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Infrastructure,
    Network,
    Cybersecurity,
    Applications,
    IdentityAccess,
    Organization,
}

impl Domain {
    pub const ALL: [Domain; 6] = [
        Domain::Infrastructure,
        Domain::Network,
        Domain::Cybersecurity,
        Domain::Applications,
        Domain::IdentityAccess,
        Domain::Organization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Infrastructure => "infrastructure",
            Domain::Network => "network",
            Domain::Cybersecurity => "cybersecurity",
            Domain::Applications => "applications",
            Domain::IdentityAccess => "identity_access",
            Domain::Organization => "organization",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Domain::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown domain '{}'", s))
    }
}

/// Fact as submitted by the extraction collaborator
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewFact {
    pub domain: Domain,
    pub category: String,
    pub item: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub details: Details,
    #[serde(default)]
    pub evidence_quote: String,
    pub source_document_ref: String,
    #[serde(default)]
    pub entity: Option<String>,
}

impl NewFact {
    /// Content-based key used to make ingestion idempotent
    pub fn dedup_key(&self) -> String {
        dedup_key(
            self.domain,
            &self.category,
            &self.item,
            self.entity.as_deref(),
            &self.source_document_ref,
        )
    }
}

/// An atomic extracted assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Fact {
    pub id: FactId,
    pub domain: Domain,
    pub category: String,
    pub item: String,
    #[schema(value_type = Object)]
    pub details: Details,
    pub evidence_quote: String,
    pub source_document_ref: String,
    pub entity: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Fact {
    pub fn from_new(new: NewFact) -> Self {
        let id = compute_fact_id(&new.dedup_key());
        Self {
            id,
            domain: new.domain,
            category: new.category,
            item: new.item,
            details: new.details,
            evidence_quote: new.evidence_quote,
            source_document_ref: new.source_document_ref,
            entity: new.entity,
            created_at: Utc::now(),
        }
    }

    pub fn dedup_key(&self) -> String {
        dedup_key(
            self.domain,
            &self.category,
            &self.item,
            self.entity.as_deref(),
            &self.source_document_ref,
        )
    }

    /// Numeric view of a detail field, tolerant of formatted values like "$1,200" or "35 FTE"
    pub fn numeric_detail(&self, field: &str) -> Option<f64> {
        self.details.get(field).and_then(numeric_value)
    }

    /// Current value of a correctable field (`item`, `entity`, `evidence_quote` or a detail key)
    pub fn field_value(&self, field: &str) -> Option<serde_json::Value> {
        match field {
            "item" => Some(serde_json::Value::String(self.item.clone())),
            "entity" => Some(
                self.entity
                    .clone()
                    .map(serde_json::Value::String)
                    .unwrap_or(serde_json::Value::Null),
            ),
            "evidence_quote" => Some(serde_json::Value::String(self.evidence_quote.clone())),
            other => self.details.get(other).cloned(),
        }
    }

    /// Set a correctable field, returns false when the field is not correctable on this fact
    pub fn set_field(&mut self, field: &str, value: serde_json::Value) -> bool {
        match field {
            "item" => {
                self.item = value_to_text(&value);
                true
            }
            "entity" => {
                self.entity = match value {
                    serde_json::Value::Null => None,
                    other => Some(value_to_text(&other)),
                };
                true
            }
            "evidence_quote" => {
                self.evidence_quote = value_to_text(&value);
                true
            }
            other => match self.details.get_mut(other) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            },
        }
    }
}

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d[\d,]*(?:\.\d+)?").expect("valid number pattern"));

/// Parse a JSON value into a number, accepting numeric strings with separators/units
pub fn numeric_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => NUMBER_RE
            .find(s)
            .and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok()),
        _ => None,
    }
}

fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn normalize_label(label: &str) -> String {
    label
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn dedup_key(
    domain: Domain,
    category: &str,
    item: &str,
    entity: Option<&str>,
    source_document_ref: &str,
) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        domain,
        normalize_label(category),
        normalize_label(item),
        entity.map(normalize_label).unwrap_or_default(),
        source_document_ref.trim()
    )
}

fn compute_fact_id(key: &str) -> FactId {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..24].to_string()
}

/// Information the extraction collaborator declared as absent from the source
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Gap {
    pub domain: Domain,
    pub category: String,
    pub description: String,
}
