//! Extraction rules and field evaluation
//!
//! A rule's selector picks candidate nodes from the whole document; each
//! field of the rule is then evaluated with the candidate as scope.

use std::collections::BTreeMap;
use std::fmt;

use super::error::{ExpressionError, MissingReason};
use crate::domain::{FieldMap, FieldValue, Record};
use crate::parsing::{DocumentTree, Node, NodeId, Selector};

/// Field name → spec, ordered by field name
pub type FieldMapping = BTreeMap<String, FieldSpec>;

/// How a value is read from a matched node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    /// Descendant text, whitespace collapsed and trimmed
    Text,
    /// Direct text children only, whitespace collapsed and trimmed
    OwnText,
    Attr(String),
    /// Attribute resolved against the document base URL
    AbsAttr(String),
}

impl Accessor {
    pub fn parse(text: &str) -> Result<Self, ExpressionError> {
        let text = text.trim();
        let valid_name = |name: &str| {
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| !c.is_whitespace() && !matches!(c, '"' | '\'' | '>' | '/' | '=' | '@'))
        };

        if text.eq_ignore_ascii_case("text") {
            Ok(Self::Text)
        } else if text.eq_ignore_ascii_case("owntext") {
            Ok(Self::OwnText)
        } else if let Some(attr) = text.strip_prefix("abs:") {
            if valid_name(attr) {
                Ok(Self::AbsAttr(attr.to_string()))
            } else {
                Err(ExpressionError::Accessor(text.to_string()))
            }
        } else if valid_name(text) {
            Ok(Self::Attr(text.to_string()))
        } else {
            Err(ExpressionError::Accessor(text.to_string()))
        }
    }

    /// Read the value of `node`; `None` when the node has no such value
    pub fn read(&self, tree: &DocumentTree, node: NodeId) -> Option<String> {
        let value = match self {
            Self::Text => collapse_whitespace(&tree.text(node)),
            Self::OwnText => collapse_whitespace(&tree.own_text(node)),
            Self::Attr(name) => tree.element(node)?.attr(name)?.to_string(),
            Self::AbsAttr(name) => {
                let raw = tree.element(node)?.attr(name)?;
                tree.resolve_url(raw)?.to_string()
            }
        };
        (!value.is_empty()).then_some(value)
    }
}

impl fmt::Display for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::OwnText => f.write_str("ownText"),
            Self::Attr(name) => f.write_str(name),
            Self::AbsAttr(name) => write!(f, "abs:{name}"),
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A parsed `selector [@accessor]` expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldExpr {
    selector: Selector,
    accessor: Accessor,
    explicit_accessor: bool,
}

impl FieldExpr {
    pub fn parse(expr: &str) -> Result<Self, ExpressionError> {
        let (selector, accessor) = match split_accessor(expr) {
            Some((selector, accessor)) => (selector, Some(Accessor::parse(accessor)?)),
            None => (expr, None),
        };
        let selector = selector.trim();
        let selector = Selector::parse(if selector.is_empty() { "." } else { selector })?;

        Ok(Self {
            selector,
            explicit_accessor: accessor.is_some(),
            accessor: accessor.unwrap_or(Accessor::Text),
        })
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn accessor(&self) -> &Accessor {
        &self.accessor
    }

    pub fn has_explicit_accessor(&self) -> bool {
        self.explicit_accessor
    }
}

impl fmt::Display for FieldExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.explicit_accessor {
            write!(f, "{} @{}", self.selector, self.accessor)
        } else {
            write!(f, "{}", self.selector)
        }
    }
}

/// Split at the last `@` outside brackets and quotes
fn split_accessor(expr: &str) -> Option<(&str, &str)> {
    let mut bracket_depth = 0usize;
    let mut quote: Option<char> = None;
    let mut split = None;

    for (i, c) in expr.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[') => bracket_depth += 1,
            (None, ']') => bracket_depth = bracket_depth.saturating_sub(1),
            (None, '@') if bracket_depth == 0 => split = Some(i),
            _ => {}
        }
    }

    split.map(|i| (&expr[..i], &expr[i + 1..]))
}

/// One field of a rule's mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub expr: FieldExpr,
    pub required: bool,
    pub list: bool,
    /// When set, matches produce nested records instead of strings
    pub fields: Option<FieldMapping>,
}

impl FieldSpec {
    pub fn new(expr: FieldExpr) -> Self {
        Self {
            expr,
            required: false,
            list: false,
            fields: None,
        }
    }

    pub fn parse(expr: &str) -> Result<Self, ExpressionError> {
        FieldExpr::parse(expr).map(Self::new)
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn list(mut self) -> Self {
        self.list = true;
        self
    }

    #[must_use]
    pub fn nested(mut self, fields: FieldMapping) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Evaluate against one candidate; an empty result means "absent"
    fn evaluate(
        &self,
        tree: &DocumentTree,
        candidate: NodeId,
    ) -> (FieldValue, Option<MissingReason>) {
        let mut matches = self.expr.selector.select(tree, candidate).peekable();
        if matches.peek().is_none() {
            let value = if self.list {
                self.empty_list()
            } else {
                FieldValue::Null
            };
            let reason = MissingReason::NoMatch {
                selector: self.expr.selector.to_string(),
            };
            return (value, Some(reason));
        }

        match (&self.fields, self.list) {
            (None, false) => match matches
                .next()
                .and_then(|node| self.expr.accessor.read(tree, node))
            {
                Some(text) => (FieldValue::Text(text), None),
                None => (FieldValue::Null, Some(MissingReason::EmptyValue)),
            },
            (None, true) => {
                let items: Vec<String> = matches
                    .filter_map(|node| self.expr.accessor.read(tree, node))
                    .collect();
                let reason = items.is_empty().then_some(MissingReason::EmptyValue);
                (FieldValue::List(items), reason)
            }
            (Some(fields), false) => {
                let first = matches.next().unwrap_or(candidate);
                match build_fields(fields, tree, first) {
                    Ok(nested) => (FieldValue::Nested(nested), None),
                    Err((field, _)) => (
                        FieldValue::Null,
                        Some(MissingReason::IncompleteNested { field }),
                    ),
                }
            }
            (Some(fields), true) => {
                let mut records = Vec::new();
                let mut last_missing = None;
                for node in matches {
                    match build_fields(fields, tree, node) {
                        Ok(nested) => records.push(nested),
                        Err((field, _)) => last_missing = Some(field),
                    }
                }
                let reason = match (records.is_empty(), last_missing) {
                    (true, Some(field)) => Some(MissingReason::IncompleteNested { field }),
                    (true, None) => Some(MissingReason::EmptyValue),
                    (false, _) => None,
                };
                (FieldValue::NestedList(records), reason)
            }
        }
    }

    fn empty_list(&self) -> FieldValue {
        if self.fields.is_some() {
            FieldValue::NestedList(Vec::new())
        } else {
            FieldValue::List(Vec::new())
        }
    }
}

/// Build every field of `mapping` for one candidate
///
/// Fails with the first missing required field, in field-name order.
pub(crate) fn build_fields(
    mapping: &FieldMapping,
    tree: &DocumentTree,
    candidate: NodeId,
) -> Result<FieldMap, (String, MissingReason)> {
    let mut fields = FieldMap::new();
    for (name, spec) in mapping {
        let (value, missing) = spec.evaluate(tree, candidate);
        if spec.required && value.is_empty() {
            let reason = missing.unwrap_or(MissingReason::EmptyValue);
            return Err((name.clone(), reason));
        }
        fields.insert(name.clone(), value);
    }
    Ok(fields)
}

/// A named selector plus field mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRule {
    name: String,
    selector: Selector,
    fields: FieldMapping,
}

impl ExtractionRule {
    pub fn new(name: impl Into<String>, selector: Selector, fields: FieldMapping) -> Self {
        Self {
            name: name.into(),
            selector,
            fields,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn fields(&self) -> &FieldMapping {
        &self.fields
    }

    /// Candidate nodes for this rule, in document order
    pub fn candidates<'a>(&'a self, tree: &'a DocumentTree) -> impl Iterator<Item = NodeId> + 'a {
        self.selector
            .select(tree, tree.root())
            .filter(|&node| !matches!(tree.node(node), Node::Document))
    }

    /// Build the record for one candidate
    pub fn build_record(
        &self,
        tree: &DocumentTree,
        candidate: NodeId,
    ) -> Result<Record, (String, MissingReason)> {
        build_fields(&self.fields, tree, candidate).map(|fields| Record::new(&self.name, fields))
    }
}
