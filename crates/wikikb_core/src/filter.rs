pub const DEFAULT_MAX_TERM_CHARS: usize = 20;

const ZH_MARKERS: &[&str] = &["列表", "分类:", "索引"];
const EN_MARKERS: &[&str] = &["List of", "Category:", "Index of"];

/// Decides whether a linked title is worth fetching as a term.
///
/// Titles are rejected when they are longer than `max_chars` (counted in
/// characters, not bytes) or contain any of the language's list, category or
/// index markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermFilter {
    pub max_chars: usize,
    pub markers: Vec<String>,
}

impl TermFilter {
    pub fn for_language(language: &str) -> Self {
        let markers = match language {
            "zh" | "zh-hans" | "zh-hant" | "zh-cn" | "zh-tw" => ZH_MARKERS,
            _ => EN_MARKERS,
        };
        Self {
            max_chars: DEFAULT_MAX_TERM_CHARS,
            markers: markers.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn is_valid_term(&self, title: &str) -> bool {
        if title.chars().count() > self.max_chars {
            return false;
        }
        !self
            .markers
            .iter()
            .any(|marker| title.contains(marker.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chinese_markers_reject_list_category_and_index_pages() {
        let filter = TermFilter::for_language("zh");
        assert!(filter.is_valid_term("深度学习"));
        assert!(!filter.is_valid_term("机器学习算法列表"));
        assert!(!filter.is_valid_term("分类:人工智能"));
        assert!(!filter.is_valid_term("数学索引"));
    }

    #[test]
    fn length_is_counted_in_characters() {
        let filter = TermFilter::for_language("zh");
        let twenty = "字".repeat(20);
        let twenty_one = "字".repeat(21);
        assert!(filter.is_valid_term(&twenty));
        assert!(!filter.is_valid_term(&twenty_one));
        assert!(filter.is_valid_term(&"a".repeat(20)));
        assert!(!filter.is_valid_term(&"a".repeat(21)));
    }

    #[test]
    fn other_languages_use_english_markers() {
        let filter = TermFilter::for_language("de");
        assert!(!filter.is_valid_term("List of algorithms"));
        assert!(!filter.is_valid_term("Category:Physics"));
        assert!(filter.is_valid_term("Backpropagation"));
    }

    #[test]
    fn custom_markers_replace_defaults() {
        let filter = TermFilter {
            max_chars: 8,
            markers: vec!["一覧".to_string()],
        };
        assert!(!filter.is_valid_term("数学一覧"));
        assert!(filter.is_valid_term("分类:数学"));
        assert!(!filter.is_valid_term("abcdefghi"));
    }

    #[test]
    fn empty_title_is_accepted() {
        assert!(TermFilter::for_language("zh").is_valid_term(""));
    }
}
