//! Rule set configuration
//!
//! Rule sets are declared in JSON:
//!
//! ```json
//! { "rules": [ { "name": "posts", "selector": "article",
//!                "fields": { "title": "h2", "link": { "selector": "a @abs:href", "required": true } } } ] }
//! ```
//!
//! A field is either a bare expression string or an object with
//! `selector`, `required`, `list` and nested `fields`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::error::RuleConfigError;
use super::rule::{ExtractionRule, FieldExpr, FieldMapping, FieldSpec};
use super::rule_set::RuleSet;
use crate::parsing::Selector;

#[derive(Error, Debug)]
pub enum RuleLoadError {
    #[error("failed to read rule file: {0}")]
    Io(#[from] std::io::Error),

    #[error("rule file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] RuleConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSetConfig {
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub name: String,
    pub selector: String,
    pub fields: BTreeMap<String, FieldConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldConfig {
    Expr(String),
    Detailed(FieldDetail),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDetail {
    pub selector: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub list: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, FieldConfig>>,
}

impl RuleSetConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Validate and compile every rule
    pub fn build(&self) -> Result<RuleSet, RuleConfigError> {
        let rules = self
            .rules
            .iter()
            .map(RuleConfig::build)
            .collect::<Result<Vec<_>, _>>()?;
        RuleSet::new(rules)
    }
}

impl RuleConfig {
    pub fn build(&self) -> Result<ExtractionRule, RuleConfigError> {
        if self.name.trim().is_empty() {
            return Err(RuleConfigError::rule(&self.name, "rule name is empty"));
        }
        let selector = Selector::parse(&self.selector)
            .map_err(|e| RuleConfigError::rule(&self.name, e.to_string()))?;
        let fields = build_mapping(&self.name, "", &self.fields)?;
        Ok(ExtractionRule::new(self.name.clone(), selector, fields))
    }
}

fn build_mapping(
    rule: &str,
    prefix: &str,
    fields: &BTreeMap<String, FieldConfig>,
) -> Result<FieldMapping, RuleConfigError> {
    if fields.is_empty() {
        let reason = if prefix.is_empty() {
            "rule has no fields"
        } else {
            "nested mapping has no fields"
        };
        return Err(match prefix.strip_suffix('.') {
            Some(parent) => RuleConfigError::field(rule, parent, reason),
            None => RuleConfigError::rule(rule, reason),
        });
    }

    fields
        .iter()
        .map(|(name, config)| {
            let path = format!("{prefix}{name}");
            if name.trim().is_empty() {
                return Err(RuleConfigError::field(rule, path, "field name is empty"));
            }
            build_field(rule, &path, config).map(|spec| (name.clone(), spec))
        })
        .collect()
}

fn build_field(rule: &str, path: &str, config: &FieldConfig) -> Result<FieldSpec, RuleConfigError> {
    let (expr, required, list, nested) = match config {
        FieldConfig::Expr(expr) => (expr.as_str(), false, false, None),
        FieldConfig::Detailed(detail) => (
            detail.selector.as_str(),
            detail.required,
            detail.list,
            detail.fields.as_ref(),
        ),
    };

    if expr.trim().is_empty() {
        return Err(RuleConfigError::field(rule, path, "expression is empty"));
    }
    let expr =
        FieldExpr::parse(expr).map_err(|e| RuleConfigError::field(rule, path, e.to_string()))?;

    let mut spec = FieldSpec::new(expr);
    spec.required = required;
    spec.list = list;

    if let Some(nested) = nested {
        if spec.expr.has_explicit_accessor() {
            return Err(RuleConfigError::field(
                rule,
                path,
                "nested fields take no accessor",
            ));
        }
        spec.fields = Some(build_mapping(rule, &format!("{path}."), nested)?);
    }
    Ok(spec)
}

/// Parse and validate a rule set from JSON text
pub fn rule_set_from_json(json: &str) -> Result<RuleSet, RuleLoadError> {
    Ok(RuleSetConfig::from_json(json)?.build()?)
}

/// Load a rule set from a JSON file
pub async fn load_rule_set(path: impl AsRef<Path>) -> Result<RuleSet, RuleLoadError> {
    let path = path.as_ref();
    let json = tokio::fs::read_to_string(path).await?;
    let rule_set = rule_set_from_json(&json)?;
    info!("📋 Loaded {} extraction rules from {}", rule_set.len(), path.display());
    Ok(rule_set)
}
