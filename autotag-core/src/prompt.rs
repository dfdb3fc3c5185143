//! Prompt construction for tag generation.
//!
//! Prompts are provider-agnostic. The builder picks one of two templates
//! depending on whether a usable description exists, then appends numbered
//! instructions derived from a heuristic scan of the title:
//!
//! - series/volume numbering asks the model for a `series` tag
//! - titles that look system-generated (ISBNs, file names, code-like tokens)
//!   ask the model for a `rename` tag
//!
//! Caller-supplied extra instructions are appended last.

use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Last line of every prompt.
pub const TRAILING_MARKER: &str = "TAGS (comma-separated only):";

/// Tag added for titles that belong to a series.
pub const SERIES_TAG: &str = "series";

/// Tag added for titles that look machine-generated.
pub const RENAME_TAG: &str = "rename";

/// Prompt template selected for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTemplate {
    /// Title and description available
    Rich,
    /// Only the title is known
    TitleOnly,
}

impl PromptTemplate {
    /// Select the template for a (cleaned) description.
    pub fn for_description(description: Option<&str>) -> Self {
        match description {
            Some(d) if !d.trim().is_empty() => Self::Rich,
            _ => Self::TitleOnly,
        }
    }

    /// Inclusive range of tags the template asks for.
    pub fn tag_range(&self) -> (usize, usize) {
        match self {
            Self::Rich => (4, 6),
            Self::TitleOnly => (3, 4),
        }
    }

    fn intro(&self) -> String {
        let (min, max) = self.tag_range();
        match self {
            Self::Rich => format!(
                "Analyze the following book information and generate between {} and {} relevant tags.\n\
                 The tags should cover genre, key themes and the intended audience.",
                min, max
            ),
            Self::TitleOnly => format!(
                "Only the title of the following book is known. Generate between {} and {} relevant tags\n\
                 inferred from the title alone, preferring broad genre and subject tags.",
                min, max
            ),
        }
    }

    fn rules(&self) -> Vec<&'static str> {
        let mut rules = vec![
            "Return ONLY a single line of comma-separated tags.",
            "Do not include any other text, preamble, numbering or explanation.",
            "Each tag must be one standalone concept. Never join words into compound or concatenated tags (write \"Science Fiction\", not \"ScienceFiction\" or \"SciFi-Space\").",
            "Do not return near-duplicate tags such as \"Magic\" and \"Magical\" or \"Mystery\" and \"Mysteries\".",
        ];
        match self {
            Self::Rich => rules.push("Example format: Fantasy,Epic Fantasy,Magic,Young Adult"),
            Self::TitleOnly => rules.push(
                "If the title gives no reliable hint, return broad tags such as Fiction or Nonfiction.",
            ),
        }
        rules
    }
}

/// Heuristic signals extracted from a title.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleSignals {
    /// Title carries series or volume numbering
    pub series: bool,
    /// Title looks system-generated rather than human-authored
    pub needs_rename: bool,
}

impl TitleSignals {
    /// Scan a title against the series and generated-title patterns.
    pub fn analyze(title: &str) -> Self {
        let patterns = TitlePatterns::get();
        Self {
            series: patterns.series.is_match(title),
            needs_rename: patterns.generated.is_match(title),
        }
    }

}

/// Compiled title patterns.
struct TitlePatterns {
    series: RegexSet,
    generated: RegexSet,
}

impl TitlePatterns {
    fn get() -> &'static Self {
        static PATTERNS: OnceLock<TitlePatterns> = OnceLock::new();
        PATTERNS.get_or_init(Self::new)
    }

    fn new() -> Self {
        Self {
            series: RegexSet::new([
                // Number next to a word: "Dune 2", "Foundation: 3"
                r"(?i)\b[a-z][a-z'’]*[\s:,.\-]+\d{1,3}\b",
                r"(?i)\b\d{1,3}(?:st|nd|rd|th)?[\s:.\-]+[a-z]{2,}",
                // Volume markers: "Vol. 3", "Book 2", "Part #4", "#7"
                r"(?i)\b(?:vol(?:ume)?|book|part|tome|no|issue|episode)\.?\s*#?\s*\d+\b",
                r"\b(?:Vol(?:ume)?|Book|Part|Tome)\.?\s+[IVX]{1,4}\b",
                r"#\s*\d+\b",
                // Version markers: "v2", "Version 1.1"
                r"(?i)\bv(?:er(?:sion)?)?\.?\s?\d+(?:\.\d+)*\b",
            ])
            .expect("series patterns compile"),
            generated: RegexSet::new([
                // Leading ISBN-like digit run
                r"^\s*(?:97[89][\-\s]?)?\d{9}[\dXx]",
                // File-extension suffix
                r"(?i)\.(?:pdf|epub|mobi|azw3?|kfx|docx?|txt|rtf|djvu|cb[rz]|fb2|lit|htmlz?)\s*$",
                // Long digit run
                r"\d{6,}",
                // Dash-joined uppercase tokens: "ABC-123-XYZ"
                r"\b[A-Z0-9]{2,}(?:-[A-Z0-9]{2,}){2,}\b",
                // Underscore-delimited code-like tokens: "my_book_final"
                r"\b[A-Za-z0-9]+_[A-Za-z0-9_]+\b",
            ])
            .expect("generated-title patterns compile"),
        }
    }
}

/// Strip markup and collapse whitespace in a catalog description.
///
/// Calibre stores comments as HTML.
pub fn clean_description(description: &str) -> String {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    let tag_re = TAG_RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("markup pattern compiles"));

    let text = tag_re.replace_all(description, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build the tagging prompt for one record.
pub fn build_prompt(
    title: &str,
    description: Option<&str>,
    existing_tags: &[String],
    extra_instructions: Option<&str>,
) -> String {
    let description = description.map(clean_description).filter(|d| !d.is_empty());
    let template = PromptTemplate::for_description(description.as_deref());
    let signals = TitleSignals::analyze(title);

    let mut rules: Vec<String> = template.rules().into_iter().map(String::from).collect();
    if signals.series {
        rules.push(format!(
            "This title appears to be part of a series or numbered volume. Include the tag \"{}\".",
            SERIES_TAG
        ));
    }
    if signals.needs_rename {
        rules.push(format!(
            "This title looks system-generated (an ISBN, file name or code) rather than a real book title. Include the tag \"{}\".",
            RENAME_TAG
        ));
    }
    if let Some(extra) = extra_instructions.map(str::trim).filter(|e| !e.is_empty()) {
        rules.push(extra.to_string());
    }

    let mut prompt = template.intro();
    prompt.push_str("\n\nRULES:\n");
    for (i, rule) in rules.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, rule));
    }

    prompt.push_str(&format!("\nBOOK TITLE: \"{}\"\n", title));
    if let Some(description) = &description {
        prompt.push_str(&format!("BOOK DESCRIPTION: \"{}\"\n", description));
    }

    let existing: Vec<&str> = existing_tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if !existing.is_empty() {
        prompt.push_str(&format!(
            "EXISTING TAGS (for reference only; reuse, revise or drop them): {}\n",
            existing.join(", ")
        ));
    }

    prompt.push('\n');
    prompt.push_str(TRAILING_MARKER);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn numbered_rules(prompt: &str) -> Vec<usize> {
        prompt
            .lines()
            .filter_map(|line| line.split_once(". "))
            .filter_map(|(n, _)| n.parse().ok())
            .collect()
    }

    #[test]
    fn test_rich_template_with_description() {
        let prompt = build_prompt(
            "The Hobbit",
            Some("<p>A hobbit goes on an   unexpected journey.</p>"),
            &[],
            None,
        );
        assert!(prompt.contains("between 4 and 6"));
        assert!(prompt.contains("BOOK DESCRIPTION: \"A hobbit goes on an unexpected journey.\""));
        assert!(prompt.ends_with(TRAILING_MARKER));
    }

    #[test]
    fn test_title_only_template() {
        for description in [None, Some(""), Some("   "), Some("<p></p>")] {
            let prompt = build_prompt("The Hobbit", description, &[], None);
            assert!(prompt.contains("between 3 and 4"), "{:?}", description);
            assert!(!prompt.contains("BOOK DESCRIPTION"));
        }
    }

    #[test]
    fn test_series_detection() {
        for title in ["Dune 2", "Harry Potter, Book 3", "The Expanse Vol. 4", "Discworld #12", "Part II of Everything", "Manual v2.1"] {
            assert!(TitleSignals::analyze(title).series, "{}", title);
        }
        for title in ["The Great Gatsby", "1984", "Pride and Prejudice"] {
            assert!(!TitleSignals::analyze(title).series, "{}", title);
        }

        let prompt = build_prompt("Dune 2", None, &[], None);
        assert!(prompt.contains("\"series\""));
        let plain = build_prompt("The Great Gatsby", None, &[], None);
        assert!(!plain.contains("\"series\""));
    }

    #[test]
    fn test_generated_title_detection() {
        for title in [
            "9780261103573 The Hobbit",
            "the_hobbit_final",
            "My Book.epub",
            "scan 20231104113",
            "ABC-123-XYZ",
        ] {
            assert!(TitleSignals::analyze(title).needs_rename, "{}", title);
        }
        for title in ["The Great Gatsby", "X-Men", "COVID-19 Explained"] {
            assert!(!TitleSignals::analyze(title).needs_rename, "{}", title);
        }

        let prompt = build_prompt("document_0042.pdf", None, &[], None);
        assert!(prompt.contains("\"rename\""));
    }

    #[test]
    fn test_appended_instructions_are_numbered_contiguously() {
        let prompt = build_prompt(
            "Book 2 of Things.pdf",
            Some("Some description"),
            &[],
            Some("Prefer tags in British English."),
        );

        let numbers = numbered_rules(&prompt);
        assert_eq!(numbers, (1..=8).collect::<Vec<_>>());
        assert!(prompt.contains("8. Prefer tags in British English."));
    }

    #[test]
    fn test_blank_extra_instruction_ignored() {
        let with_blank = build_prompt("Emma", None, &[], Some("  "));
        let without = build_prompt("Emma", None, &[], None);
        assert_eq!(with_blank, without);
    }

    #[test]
    fn test_existing_tags_rendered_as_reference() {
        let existing = vec!["Fantasy".to_string(), " ".to_string(), "Quest".to_string()];
        let prompt = build_prompt("The Hobbit", None, &existing, None);
        assert!(prompt.contains("EXISTING TAGS (for reference only; reuse, revise or drop them): Fantasy, Quest"));

        let none = build_prompt("The Hobbit", None, &[], None);
        assert!(!none.contains("EXISTING TAGS"));
    }

    #[test]
    fn test_title_embedded_as_given() {
        for title in ["Dune ", " Emma", "The Hobbit  "] {
            let prompt = build_prompt(title, None, &[], None);
            assert!(prompt.contains(&format!("BOOK TITLE: \"{}\"", title)));
        }
    }

    #[test]
    fn test_clean_description() {
        assert_eq!(
            clean_description("<div><p>Tom &amp; Jerry&nbsp;return.</p>\n\n<p>Again.</p></div>"),
            "Tom & Jerry return. Again."
        );
    }

    proptest! {
        #[test]
        fn prompt_contains_title_and_ends_with_marker(
            title in "[A-Za-z][A-Za-z0-9 ]{0,40}",
            description in proptest::option::of("[a-z ]{0,2000}"),
        ) {
            let prompt = build_prompt(&title, description.as_deref(), &[], None);
            prop_assert!(prompt.contains(&title));
            prop_assert!(prompt.ends_with(TRAILING_MARKER));

            let template = PromptTemplate::for_description(
                description.as_deref().map(clean_description).as_deref(),
            );
            let (min, max) = template.tag_range();
            prop_assert!(max <= 6);
            let range = format!("between {} and {}", min, max);
            prop_assert!(prompt.contains(&range));
        }
    }
}
