//! Wikitext to lightweight Markdown conversion.
//!
//! Headings, internal and external links and emphasis survive the conversion.
//! Rendering-only markup (templates, tables, references, comments, media and
//! category links, behaviour switches) is dropped.

const HIDDEN_LINK_PREFIXES: &[&str] = &[
    "file:", "image:", "media:", "category:", "文件:", "檔案:", "图像:", "圖像:", "分类:", "分類:",
];

const MAGIC_WORDS: &[&str] = &["__TOC__", "__NOTOC__", "__FORCETOC__", "__NOEDITSECTION__"];

pub fn wikitext_to_markdown(content: &str) -> String {
    let stripped = strip_comments(content);
    let stripped = strip_references(&stripped);
    let stripped = strip_templates(&stripped);
    let stripped = strip_tables(&stripped);

    let mut lines = Vec::new();
    let mut previous_blank = true;
    for line in stripped.lines() {
        let mut line = line.trim_end().to_string();
        for word in MAGIC_WORDS {
            line = line.replace(word, "");
        }
        let converted = match convert_heading(&line) {
            Some(heading) => heading,
            None => convert_emphasis(&convert_internal_links(&convert_external_links(&line))),
        };
        let blank = converted.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        previous_blank = blank;
        lines.push(if blank { String::new() } else { converted });
    }
    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines.join("\n")
}

fn convert_heading(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if !trimmed.starts_with('=') || !trimmed.ends_with('=') || trimmed.len() < 4 {
        return None;
    }
    let start_equals = trimmed.chars().take_while(|ch| *ch == '=').count();
    let end_equals = trimmed.chars().rev().take_while(|ch| *ch == '=').count();
    if start_equals < 2 || start_equals != end_equals || start_equals * 2 >= trimmed.len() {
        return None;
    }
    let level = start_equals.min(6);
    let content = trimmed[start_equals..trimmed.len() - end_equals].trim();
    if content.is_empty() {
        return None;
    }
    Some(format!("{} {}", "#".repeat(level), content))
}

fn convert_internal_links(line: &str) -> String {
    let chars = line.chars().collect::<Vec<_>>();
    let mut output = String::new();
    let mut index = 0usize;
    while index < chars.len() {
        if is_pair(&chars, index, '[')
            && let Some(end) = find_link_end(&chars, index + 2)
        {
            let inner = chars[index + 2..end].iter().collect::<String>();
            output.push_str(&render_internal_link(&inner));
            index = end + 2;
            continue;
        }
        output.push(chars[index]);
        index += 1;
    }
    output
}

fn find_link_end(chars: &[char], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut cursor = start;
    while cursor + 1 < chars.len() {
        if is_pair(chars, cursor, '[') {
            depth += 1;
            cursor += 2;
            continue;
        }
        if is_pair(chars, cursor, ']') {
            if depth == 0 {
                return Some(cursor);
            }
            depth -= 1;
            cursor += 2;
            continue;
        }
        cursor += 1;
    }
    None
}

fn render_internal_link(inner: &str) -> String {
    let mut parts = inner.splitn(2, '|');
    let target = parts.next().unwrap_or("").trim();
    let lowered = target.to_lowercase();
    if HIDDEN_LINK_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
    {
        return String::new();
    }
    let label = parts
        .next()
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .unwrap_or(target);
    if target.is_empty() {
        return label.to_string();
    }
    format!("[{label}](wiki://{target})")
}

fn convert_external_links(line: &str) -> String {
    let chars = line.chars().collect::<Vec<_>>();
    let mut output = String::new();
    let mut index = 0usize;
    while index < chars.len() {
        let standalone = chars[index] == '['
            && chars.get(index + 1) != Some(&'[')
            && (index == 0 || chars[index - 1] != '[');
        if standalone {
            let head = chars[index + 1..].iter().take(8).collect::<String>();
            let is_url =
                head.starts_with("http://") || head.starts_with("https://") || head.starts_with("//");
            if is_url
                && let Some(offset) = chars[index + 1..].iter().position(|ch| *ch == ']')
            {
                let end = index + 1 + offset;
                let inner = chars[index + 1..end].iter().collect::<String>();
                let mut parts = inner.splitn(2, char::is_whitespace);
                let url = parts.next().unwrap_or("").trim();
                match parts.next().map(str::trim).filter(|label| !label.is_empty()) {
                    Some(label) => output.push_str(&format!("[{label}]({url})")),
                    None => output.push_str(&format!("<{url}>")),
                }
                index = end + 1;
                continue;
            }
        }
        output.push(chars[index]);
        index += 1;
    }
    output
}

fn convert_emphasis(line: &str) -> String {
    line.replace("'''''", "***")
        .replace("'''", "**")
        .replace("''", "*")
}

fn strip_comments(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<!--") {
        output.push_str(&rest[..start]);
        match rest[start..].find("-->") {
            Some(end) => rest = &rest[start + end + 3..],
            None => return output,
        }
    }
    output.push_str(rest);
    output
}

fn strip_references(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = find_ref_open(rest) {
        output.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(tag_end) = tail.find('>') else {
            return output;
        };
        if tail[..tag_end].ends_with('/') {
            rest = &tail[tag_end + 1..];
            continue;
        }
        match tail.find("</ref>") {
            Some(close) if close > tag_end => rest = &tail[close + "</ref>".len()..],
            _ => rest = &tail[tag_end + 1..],
        }
    }
    output.push_str(rest);
    output
}

fn find_ref_open(text: &str) -> Option<usize> {
    let mut offset = 0usize;
    while let Some(found) = text[offset..].find("<ref") {
        let position = offset + found;
        let next = text[position + 4..].chars().next();
        if matches!(next, Some(' ' | '>' | '/' | '\t' | '\n')) {
            return Some(position);
        }
        offset = position + 4;
    }
    None
}

fn strip_templates(text: &str) -> String {
    let chars = text.chars().collect::<Vec<_>>();
    let mut output = String::with_capacity(text.len());
    let mut depth = 0usize;
    let mut index = 0usize;
    while index < chars.len() {
        if is_pair(&chars, index, '{') {
            depth += 1;
            index += 2;
            continue;
        }
        if depth > 0 && is_pair(&chars, index, '}') {
            depth -= 1;
            index += 2;
            continue;
        }
        if depth == 0 {
            output.push(chars[index]);
        }
        index += 1;
    }
    output
}

fn strip_tables(text: &str) -> String {
    let mut output = Vec::new();
    let mut depth = 0usize;
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("{|") {
            depth += 1;
            continue;
        }
        if depth > 0 {
            if trimmed.starts_with("|}") {
                depth -= 1;
            }
            continue;
        }
        output.push(line);
    }
    output.join("\n")
}

fn is_pair(chars: &[char], index: usize, ch: char) -> bool {
    index + 1 < chars.len() && chars[index] == ch && chars[index + 1] == ch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_and_link_conversion_are_deterministic() {
        assert_eq!(
            convert_heading("== Heading =="),
            Some("## Heading".to_string())
        );
        assert_eq!(convert_heading("===="), None);
        assert_eq!(
            convert_internal_links("See [[Alpha|A]] and [[Beta]]"),
            "See [A](wiki://Alpha) and [Beta](wiki://Beta)"
        );
    }

    #[test]
    fn media_and_category_links_are_dropped() {
        assert_eq!(
            convert_internal_links("x[[File:A.png|thumb|A [[Beta]] caption]]y"),
            "xy"
        );
        assert_eq!(convert_internal_links("[[分类:数学]]"), "");
        assert_eq!(convert_internal_links("[[Category:Physics]]"), "");
    }

    #[test]
    fn external_links_keep_their_labels() {
        assert_eq!(
            convert_external_links("see [https://example.org Example site]."),
            "see [Example site](https://example.org)."
        );
        assert_eq!(
            convert_external_links("[https://example.org]"),
            "<https://example.org>"
        );
        assert_eq!(convert_external_links("[not a link]"), "[not a link]");
    }

    #[test]
    fn emphasis_becomes_markdown() {
        assert_eq!(
            convert_emphasis("'''bold''' and ''italic'' and '''''both'''''"),
            "**bold** and *italic* and ***both***"
        );
    }

    #[test]
    fn rendering_markup_is_stripped() {
        let source = "{{Infobox\n| name = {{lang|en|Deep}}\n}}\n'''深度学习'''<ref name=\"a\">cite</ref>是[[机器学习]]的分支。<ref name=\"b\" /><!-- hidden -->\n{| class=\"wikitable\"\n|-\n| cell\n|}\n__TOC__\n== 历史 ==\n早期研究。";
        let markdown = wikitext_to_markdown(source);
        assert_eq!(
            markdown,
            "**深度学习**是[机器学习](wiki://机器学习)的分支。\n\n## 历史\n早期研究。"
        );
    }

    #[test]
    fn blank_runs_collapse_to_one_line() {
        let markdown = wikitext_to_markdown("a\n\n\n\nb\n\n");
        assert_eq!(markdown, "a\n\nb");
    }

    #[test]
    fn unterminated_comment_drops_the_tail() {
        assert_eq!(strip_comments("keep<!-- never closed"), "keep");
    }
}
