//! Extraction layer - declarative rules projected onto document trees
//!
//! Rules are data, not code: new extraction behaviour is added by declaring
//! selectors and field mappings in a rule file.

pub mod config;
pub mod error;
pub mod rule;
pub mod rule_set;

pub use config::{load_rule_set, rule_set_from_json, RuleLoadError, RuleSetConfig};
pub use error::{ExpressionError, FieldError, MissingReason, RuleConfigError};
pub use rule::{Accessor, ExtractionRule, FieldExpr, FieldMapping, FieldSpec};
pub use rule_set::{Extraction, RuleSet};
