//! Link discovery for crawl mode
//!
//! Pulls `a[href]` links out of a parsed page, makes them absolute, and
//! keeps the ones inside the crawl scope.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use url::Url;

use crate::domain::SourceRef;
use crate::parsing::{DocumentTree, Selector};

static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("link selector is valid"));

const CRAWLABLE_SCHEMES: [&str; 2] = ["http", "https"];

/// URL prefixes a discovered link must start with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlScope {
    prefixes: Vec<String>,
}

impl CrawlScope {
    pub fn new(prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Scope each seed to its own URL: `https://a.test/docs/` admits
    /// everything under it, `https://a.test/guide` admits `guide/...` and
    /// `guide.html` but not `https://a.test/blog/`
    pub fn from_seeds<'a>(seeds: impl IntoIterator<Item = &'a SourceRef>) -> Self {
        let prefixes = seeds
            .into_iter()
            .filter_map(SourceRef::as_url)
            .filter(|url| CRAWLABLE_SCHEMES.contains(&url.scheme()))
            .map(|mut url| {
                url.set_fragment(None);
                url.to_string()
            })
            .collect();
        Self { prefixes }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn contains(&self, url: &Url) -> bool {
        CRAWLABLE_SCHEMES.contains(&url.scheme())
            && self.prefixes.iter().any(|prefix| url.as_str().starts_with(prefix))
    }
}

/// In-scope links of one document, absolute, fragment-free, deduplicated,
/// in document order
pub fn discover_links(tree: &DocumentTree, scope: &CrawlScope) -> Vec<SourceRef> {
    let mut seen = HashSet::new();
    LINK_SELECTOR
        .select(tree, tree.root())
        .filter_map(|node| tree.element(node)?.attr("href"))
        .filter_map(|href| tree.resolve_url(href))
        .filter_map(|mut url| {
            url.set_fragment(None);
            scope.contains(&url).then(|| url.to_string())
        })
        .filter(|url| seen.insert(url.clone()))
        .map(SourceRef::from)
        .collect()
}
