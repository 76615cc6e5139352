//! Structural selectors
//!
//! A small CSS-like language evaluated against a `DocumentTree`. Matching is
//! always relative to a scope node: results are strict descendants of the
//! scope (except for the `.` self selector), and combinators never look past
//! the scope when walking ancestors.

use std::fmt;
use std::str::FromStr;

use super::error::SelectorError;
use super::tree::{Descendants, DocumentTree, Element, NodeId};

/// A parsed selector group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Alternative {
    /// `.`, the scope node itself
    Scope,
    Path(Path),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Path {
    /// Leading `>`: the first compound must be a direct child of the scope
    anchored: bool,
    compounds: Vec<Compound>,
    /// `combinators[i]` sits between `compounds[i]` and `compounds[i + 1]`
    combinators: Vec<Combinator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Compound {
    /// `None` matches any element
    tag: Option<String>,
    filters: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Filter {
    Class(String),
    Id(String),
    Attribute {
        name: String,
        test: Option<(AttrOp, String)>,
    },
    NthOfType(Nth),
    LastOfType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Equals,
    Includes,
    Prefix,
    Suffix,
    Substring,
}

impl AttrOp {
    fn test(self, actual: &str, expected: &str) -> bool {
        match self {
            Self::Equals => actual == expected,
            Self::Includes => actual.split_ascii_whitespace().any(|word| word == expected),
            Self::Prefix => !expected.is_empty() && actual.starts_with(expected),
            Self::Suffix => !expected.is_empty() && actual.ends_with(expected),
            Self::Substring => !expected.is_empty() && actual.contains(expected),
        }
    }
}

/// `an+b` position pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Nth {
    a: i64,
    b: i64,
}

impl Nth {
    fn matches(self, position: usize) -> bool {
        // i128 holds any usize - i64 difference
        let (a, b) = (i128::from(self.a), i128::from(self.b));
        let Ok(position) = i128::try_from(position) else {
            return false;
        };
        if a == 0 {
            return position == b;
        }
        let offset = position - b;
        offset % a == 0 && offset / a >= 0
    }

    fn parse(text: &str) -> Option<Self> {
        let compact: String = text
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();

        match compact.as_str() {
            "odd" => return Some(Self { a: 2, b: 1 }),
            "even" => return Some(Self { a: 2, b: 0 }),
            "" => return None,
            _ => {}
        }

        let Some((a, b)) = compact.split_once('n') else {
            return compact.parse().ok().map(|b| Self { a: 0, b });
        };
        let a = match a {
            "" | "+" => 1,
            "-" => -1,
            other => other.parse().ok()?,
        };
        let b = if b.is_empty() {
            0
        } else if b.starts_with(['+', '-']) {
            b.parse().ok()?
        } else {
            return None;
        };
        Some(Self { a, b })
    }
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        SelectorParser::new(source).parse()
    }

    /// Original selector text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True for the plain `.` selector
    pub fn is_scope_only(&self) -> bool {
        self.alternatives.iter().all(|alt| matches!(alt, Alternative::Scope))
    }

    /// Lazily iterate matches below `scope` in document order
    pub fn select<'a>(&'a self, tree: &'a DocumentTree, scope: NodeId) -> Matches<'a> {
        let includes_scope = self
            .alternatives
            .iter()
            .any(|alt| matches!(alt, Alternative::Scope));
        Matches {
            selector: self,
            tree,
            scope,
            pending_scope: includes_scope,
            descendants: tree.descendants(scope),
        }
    }

    pub fn select_first(&self, tree: &DocumentTree, scope: NodeId) -> Option<NodeId> {
        self.select(tree, scope).next()
    }

    /// Whether `node` would be produced by `select(tree, scope)`
    pub fn matches(&self, tree: &DocumentTree, node: NodeId, scope: NodeId) -> bool {
        if node == scope {
            return self
                .alternatives
                .iter()
                .any(|alt| matches!(alt, Alternative::Scope));
        }
        tree.is_descendant_of(node, scope) && self.matches_descendant(tree, node, scope)
    }

    fn matches_descendant(&self, tree: &DocumentTree, node: NodeId, scope: NodeId) -> bool {
        self.alternatives.iter().any(|alt| match alt {
            Alternative::Scope => false,
            Alternative::Path(path) => path.matches(tree, node, scope),
        })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Matches of one selector in one scope
///
/// Every candidate node is visited once, so group members that select the
/// same node never produce duplicates.
#[derive(Debug, Clone)]
pub struct Matches<'a> {
    selector: &'a Selector,
    tree: &'a DocumentTree,
    scope: NodeId,
    pending_scope: bool,
    descendants: Descendants,
}

impl Iterator for Matches<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if std::mem::take(&mut self.pending_scope) {
            return Some(self.scope);
        }
        let (selector, tree, scope) = (self.selector, self.tree, self.scope);
        self.descendants
            .find(|&node| selector.matches_descendant(tree, node, scope))
    }
}

impl Path {
    fn matches(&self, tree: &DocumentTree, node: NodeId, scope: NodeId) -> bool {
        self.match_from(tree, node, scope, self.compounds.len() - 1)
    }

    /// Right-to-left match of compound `index` at `node`
    fn match_from(&self, tree: &DocumentTree, node: NodeId, scope: NodeId, index: usize) -> bool {
        if !self.compounds[index].matches(tree, node) {
            return false;
        }
        if index == 0 {
            return !self.anchored || tree.parent(node) == Some(scope);
        }
        match self.combinators[index - 1] {
            Combinator::Child => match tree.parent(node) {
                Some(parent) if parent != scope => self.match_from(tree, parent, scope, index - 1),
                _ => false,
            },
            Combinator::Descendant => tree
                .ancestors(node)
                .take_while(|&ancestor| ancestor != scope)
                .any(|ancestor| self.match_from(tree, ancestor, scope, index - 1)),
        }
    }
}

impl Compound {
    fn matches(&self, tree: &DocumentTree, node: NodeId) -> bool {
        let Some(element) = tree.element(node) else {
            return false;
        };
        if self
            .tag
            .as_deref()
            .is_some_and(|tag| !element.name().eq_ignore_ascii_case(tag))
        {
            return false;
        }
        self.filters
            .iter()
            .all(|filter| filter.matches(tree, node, element))
    }
}

impl Filter {
    fn matches(&self, tree: &DocumentTree, node: NodeId, element: &Element) -> bool {
        match self {
            Self::Class(class) => element.has_class(class),
            Self::Id(id) => element.id() == Some(id.as_str()),
            Self::Attribute { name, test } => match (element.attr(name), test) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(actual), Some((op, expected))) => op.test(actual, expected),
            },
            Self::NthOfType(nth) => tree
                .position_of_type(node)
                .is_some_and(|(position, _)| nth.matches(position)),
            Self::LastOfType => tree
                .position_of_type(node)
                .is_some_and(|(position, total)| position == total),
        }
    }
}

/// Recursive-descent parser over the selector text
struct SelectorParser<'s> {
    source: &'s str,
    chars: Vec<char>,
    pos: usize,
}

impl<'s> SelectorParser<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn parse(mut self) -> Result<Selector, SelectorError> {
        let mut alternatives = Vec::new();
        loop {
            alternatives.push(self.alternative()?);
            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some(',') => self.pos += 1,
                Some(c) => return Err(self.error(format!("unexpected '{c}'"))),
            }
        }
        Ok(Selector {
            source: self.source.trim().to_string(),
            alternatives,
        })
    }

    fn alternative(&mut self) -> Result<Alternative, SelectorError> {
        self.skip_whitespace();
        if self.peek() == Some('.') && !self.peek_at(1).is_some_and(is_ident_char) {
            self.pos += 1;
            return Ok(Alternative::Scope);
        }

        let anchored = self.eat('>');
        if anchored {
            self.skip_whitespace();
        }

        let mut compounds = vec![self.compound()?];
        let mut combinators = Vec::new();
        loop {
            let had_whitespace = self.skip_whitespace();
            match self.peek() {
                None | Some(',') => break,
                Some('>') => {
                    self.pos += 1;
                    self.skip_whitespace();
                    combinators.push(Combinator::Child);
                }
                Some(_) if had_whitespace => combinators.push(Combinator::Descendant),
                Some(c) => return Err(self.error(format!("unexpected '{c}'"))),
            }
            compounds.push(self.compound()?);
        }

        Ok(Alternative::Path(Path {
            anchored,
            compounds,
            combinators,
        }))
    }

    fn compound(&mut self) -> Result<Compound, SelectorError> {
        let start = self.pos;
        let tag = if self.eat('*') {
            None
        } else if self.peek().is_some_and(is_ident_char) {
            Some(self.ident()?.to_ascii_lowercase())
        } else {
            None
        };

        let mut filters = Vec::new();
        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    filters.push(Filter::Class(self.ident()?));
                }
                Some('#') => {
                    self.pos += 1;
                    filters.push(Filter::Id(self.ident()?));
                }
                Some('[') => filters.push(self.attribute()?),
                Some(':') => filters.push(self.pseudo_class()?),
                _ => break,
            }
        }

        if self.pos == start {
            return Err(self.error("expected a tag, '*', class, id, attribute or pseudo-class"));
        }
        Ok(Compound { tag, filters })
    }

    fn attribute(&mut self) -> Result<Filter, SelectorError> {
        self.expect('[')?;
        self.skip_whitespace();
        let name = self.ident()?;
        self.skip_whitespace();

        if self.eat(']') {
            return Ok(Filter::Attribute { name, test: None });
        }

        let op = match (self.peek(), self.peek_at(1)) {
            (Some('='), _) => {
                self.pos += 1;
                AttrOp::Equals
            }
            (Some(c), Some('=')) => {
                let op = match c {
                    '~' => AttrOp::Includes,
                    '^' => AttrOp::Prefix,
                    '$' => AttrOp::Suffix,
                    '*' => AttrOp::Substring,
                    _ => return Err(self.error(format!("unknown attribute operator '{c}='"))),
                };
                self.pos += 2;
                op
            }
            _ => return Err(self.error("expected ']' or an attribute operator")),
        };

        self.skip_whitespace();
        let value = match self.peek() {
            Some(quote @ ('"' | '\'')) => self.quoted(quote)?,
            _ => self.ident()?,
        };
        self.skip_whitespace();
        self.expect(']')?;

        Ok(Filter::Attribute {
            name,
            test: Some((op, value)),
        })
    }

    fn pseudo_class(&mut self) -> Result<Filter, SelectorError> {
        self.expect(':')?;
        let start = self.pos;
        let name = self.ident()?.to_ascii_lowercase();
        match name.as_str() {
            "first-of-type" => Ok(Filter::NthOfType(Nth { a: 0, b: 1 })),
            "last-of-type" => Ok(Filter::LastOfType),
            "nth-of-type" => {
                self.expect('(')?;
                let argument_start = self.pos;
                while self.peek().is_some_and(|c| c != ')') {
                    self.pos += 1;
                }
                let argument: String = self.chars[argument_start..self.pos].iter().collect();
                self.expect(')')?;
                Nth::parse(&argument).map(Filter::NthOfType).ok_or_else(|| {
                    SelectorError::new(
                        self.source,
                        argument_start,
                        format!("invalid an+b expression '{}'", argument.trim()),
                    )
                })
            }
            other => Err(SelectorError::new(
                self.source,
                start,
                format!("unsupported pseudo-class ':{other}'"),
            )),
        }
    }

    fn quoted(&mut self, quote: char) -> Result<String, SelectorError> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(SelectorError::new(
                        self.source,
                        start,
                        "unterminated string",
                    ));
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(value);
                }
                Some('\\') => {
                    self.pos += 1;
                    if let Some(escaped) = self.peek() {
                        value.push(escaped);
                        self.pos += 1;
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn ident(&mut self) -> Result<String, SelectorError> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected an identifier"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), SelectorError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{expected}'")))
        }
    }

    fn error(&self, reason: impl Into<String>) -> SelectorError {
        SelectorError::new(self.source, self.pos, reason)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_' || !c.is_ascii()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::HtmlParser;
    use rstest::rstest;

    const PAGE: &str = r#"
        <html><body>
          <div id="main" class="content wide">
            <ul class="items">
              <li class="item" data-kind="book"><a href="/b1">One</a></li>
              <li class="item sale" data-kind="book-set"><a href="/b2">Two</a></li>
              <li class="item" data-kind="film"><a href="https://other.test/f">Three</a></li>
            </ul>
            <p>Intro <b>bold</b></p>
            <p>Outro</p>
          </div>
          <div class="footer"><p>Footer</p></div>
        </body></html>
    "#;

    fn tree() -> DocumentTree {
        HtmlParser::default().parse_str(PAGE, None).unwrap()
    }

    fn texts(tree: &DocumentTree, selector: &str) -> Vec<String> {
        let selector = Selector::parse(selector).unwrap();
        selector
            .select(tree, tree.root())
            .map(|id| tree.text(id).trim().to_string())
            .collect()
    }

    #[rstest]
    #[case("li", 3)]
    #[case("LI", 3)]
    #[case("ul > li", 3)]
    #[case("div li", 3)]
    #[case("body > li", 0)]
    #[case(".item", 3)]
    #[case("li.sale", 1)]
    #[case("#main p", 2)]
    #[case("div.footer p", 1)]
    #[case("[data-kind]", 3)]
    #[case("[data-kind=book]", 1)]
    #[case("[data-kind^=book]", 2)]
    #[case("[data-kind$='set']", 1)]
    #[case("[data-kind*=oo]", 2)]
    #[case("[class~=sale]", 1)]
    #[case("a[href^=\"https://\"]", 1)]
    #[case("li:first-of-type", 1)]
    #[case("li:last-of-type", 1)]
    #[case("li:nth-of-type(odd)", 2)]
    #[case("li:nth-of-type(2n)", 1)]
    #[case("p:nth-of-type(2)", 1)]
    #[case("li:nth-of-type(n-9223372036854775808)", 3)]
    #[case("li:nth-of-type(-n+9223372036854775807)", 3)]
    #[case("li:nth-of-type(-9223372036854775808n)", 0)]
    #[case("*", 16)]
    #[case("section", 0)]
    fn counts_matches(#[case] selector: &str, #[case] expected: usize) {
        let tree = tree();
        let selector = Selector::parse(selector).unwrap();
        assert_eq!(selector.select(&tree, tree.root()).count(), expected);
    }

    #[test]
    fn results_are_in_document_order() {
        let tree = tree();
        assert_eq!(texts(&tree, "li a"), vec!["One", "Two", "Three"]);
    }

    #[test]
    fn group_is_a_deduplicated_union_in_document_order() {
        let tree = tree();
        assert_eq!(
            texts(&tree, "p, li.sale, .footer p"),
            vec!["Two", "Intro bold", "Outro", "Footer"]
        );
    }

    #[test]
    fn matches_stay_inside_the_scope() {
        let tree = tree();
        let footer = Selector::parse(".footer").unwrap().select_first(&tree, tree.root()).unwrap();
        let p = Selector::parse("p").unwrap();
        let inside: Vec<_> = p.select(&tree, footer).collect();
        assert_eq!(inside.len(), 1);
        assert_eq!(tree.text(inside[0]), "Footer");

        // Ancestor checks stop at the scope: `div p` must not see the
        // scope itself as the `div`.
        assert_eq!(Selector::parse("div p").unwrap().select(&tree, footer).count(), 0);
    }

    #[test]
    fn leading_child_combinator_anchors_to_the_scope() {
        let tree = tree();
        let main = Selector::parse("#main").unwrap().select_first(&tree, tree.root()).unwrap();
        assert_eq!(Selector::parse("> p").unwrap().select(&tree, main).count(), 2);
        assert_eq!(Selector::parse("> li").unwrap().select(&tree, main).count(), 0);
        assert_eq!(Selector::parse("> ul > li").unwrap().select(&tree, main).count(), 3);
    }

    #[test]
    fn dot_selects_the_scope_itself() {
        let tree = tree();
        let main = Selector::parse("#main").unwrap().select_first(&tree, tree.root()).unwrap();
        let selector = Selector::parse(".").unwrap();
        assert!(selector.is_scope_only());
        assert_eq!(selector.select(&tree, main).collect::<Vec<_>>(), vec![main]);
        assert!(selector.matches(&tree, main, main));
    }

    #[test]
    fn selection_is_restartable() {
        let tree = tree();
        let selector = Selector::parse("li").unwrap();
        let first: Vec<_> = selector.select(&tree, tree.root()).collect();
        let second: Vec<_> = selector.select(&tree, tree.root()).collect();
        assert_eq!(first, second);
    }

    #[rstest]
    #[case("", 0)]
    #[case("li >", 4)]
    #[case("li,", 3)]
    #[case("[href", 5)]
    #[case("[href|=x]", 5)]
    #[case("a[href='x]", 7)]
    #[case("li:hover", 3)]
    #[case("li:nth-of-type(x)", 15)]
    #[case("li!", 2)]
    fn rejects_invalid_selectors(#[case] source: &str, #[case] position: usize) {
        let err = Selector::parse(source).unwrap_err();
        assert_eq!(err.selector, source);
        assert_eq!(err.position, position, "{err}");
    }

    #[rstest]
    #[case("odd", 1, true)]
    #[case("odd", 2, false)]
    #[case("even", 4, true)]
    #[case("3", 3, true)]
    #[case("3", 4, false)]
    #[case("2n+1", 5, true)]
    #[case("-n+2", 2, true)]
    #[case("-n+2", 3, false)]
    #[case("n", 7, true)]
    #[case("3n - 1", 2, true)]
    fn nth_patterns(#[case] pattern: &str, #[case] position: usize, #[case] expected: bool) {
        assert_eq!(Nth::parse(pattern).unwrap().matches(position), expected);
    }
}
