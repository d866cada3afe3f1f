use std::collections::BTreeSet;

use crate::client::{EncyclopediaApi, TitleLookup};
use crate::filter::TermFilter;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermCollection {
    pub terms: BTreeSet<String>,
    /// Outbound links on the topic page before filtering.
    pub total_links: usize,
}

impl TermCollection {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Collect the filtered, deduplicated outbound links of `topic`.
///
/// The topic title must match exactly. Any lookup failure is reported and
/// yields an empty collection.
pub fn collect_terms(
    api: &mut dyn EncyclopediaApi,
    language: &str,
    topic: &str,
    filter: &TermFilter,
) -> TermCollection {
    tracing::info!(topic, language, "collecting related terms");
    let page = match api.fetch_page(language, topic, TitleLookup::Exact) {
        Ok(page) => page,
        Err(error) => {
            tracing::warn!(topic, language, "failed to load topic page: {error:#}");
            return TermCollection::default();
        }
    };
    let links = match api.page_links(&page) {
        Ok(links) => links,
        Err(error) => {
            tracing::warn!(topic, language, "failed to load topic links: {error:#}");
            return TermCollection::default();
        }
    };

    let total_links = links.len();
    let terms = links
        .into_iter()
        .filter(|title| filter.is_valid_term(title))
        .collect::<BTreeSet<_>>();
    tracing::debug!(topic, total_links, kept = terms.len(), "filtered topic links");
    TermCollection { terms, total_links }
}
