use crate::error::{KilnError, Result};
use crate::types::Vars;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use pulldown_cmark::{CowStr, Event, LinkType, Options, Parser, Tag, TagEnd, TextMergeStream};
use serde_json::Value;
use std::path::Path;

pub const FRONTMATTER_DELIMITER: &str = "---";
pub const DEFAULT_LAYOUT: &str = "plain";

pub struct MarkdownRenderer {
    options: Options,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        Self { options }
    }

    pub fn render(&self, content: &str) -> String {
        let parser = TextMergeStream::new(Parser::new_ext(content, self.options));
        let mut events = Vec::new();
        let mut literal_depth = 0usize;

        for event in parser {
            match &event {
                Event::Start(Tag::Link { .. })
                | Event::Start(Tag::Image { .. })
                | Event::Start(Tag::CodeBlock(_)) => literal_depth += 1,
                Event::End(TagEnd::Link) | Event::End(TagEnd::Image) | Event::End(TagEnd::CodeBlock) => {
                    literal_depth = literal_depth.saturating_sub(1)
                }
                _ => {}
            }

            match event {
                Event::Text(text) if literal_depth == 0 => autolink(text, &mut events),
                other => events.push(other),
            }
        }

        let mut html_output = String::new();
        pulldown_cmark::html::push_html(&mut html_output, events.into_iter());
        html_output
    }
}

pub fn parse_markdown(content: &str) -> String {
    MarkdownRenderer::new().render(content)
}

/// Turns bare `http://` and `https://` runs inside a text event into links.
fn autolink<'a>(text: CowStr<'a>, events: &mut Vec<Event<'a>>) {
    let mut remaining: &str = &text;
    let mut found = false;
    let mut pieces: Vec<Event<'a>> = Vec::new();

    while let Some(start) = find_url_start(remaining) {
        let candidate = &remaining[start..];
        let length = candidate
            .find(|character: char| character.is_whitespace() || character == '<')
            .unwrap_or(candidate.len());
        let url = candidate[..length].trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '\'', '"']);

        if url.ends_with("://") {
            pieces.push(Event::Text(CowStr::from(remaining[..start + url.len()].to_string())));
            remaining = &remaining[start + url.len()..];
            continue;
        }

        found = true;
        if start > 0 {
            pieces.push(Event::Text(CowStr::from(remaining[..start].to_string())));
        }
        pieces.push(Event::Start(Tag::Link {
            link_type: LinkType::Autolink,
            dest_url: CowStr::from(url.to_string()),
            title: CowStr::from(""),
            id: CowStr::from(""),
        }));
        pieces.push(Event::Text(CowStr::from(url.to_string())));
        pieces.push(Event::End(TagEnd::Link));
        remaining = &remaining[start + url.len()..];
    }

    if !found {
        events.push(Event::Text(text));
        return;
    }

    if !remaining.is_empty() {
        pieces.push(Event::Text(CowStr::from(remaining.to_string())));
    }
    events.extend(pieces);
}

fn find_url_start(text: &str) -> Option<usize> {
    match (text.find("http://"), text.find("https://")) {
        (Some(http), Some(https)) => Some(http.min(https)),
        (http, https) => http.or(https),
    }
}

/// Splits a file into its front-matter and body.
///
/// A front-matter block starts with a line that is exactly `---` and ends at
/// the next such line. The body is everything after the closing line,
/// byte-for-byte. Files without a block, including those whose opening `---`
/// is never closed, return their whole text as the body;
/// markdown files additionally get empty `title`/`date` and the `plain`
/// layout.
pub fn extract_frontmatter(content: &str, path: &Path, markdown: bool) -> Result<(Vars, String)> {
    let lines: Vec<&str> = content.split('\n').collect();

    let closing = (lines.len() > 2 && is_delimiter(lines[0]))
        .then(|| lines[1..].iter().position(|line| is_delimiter(line)))
        .flatten()
        .map(|index| index + 1);

    if let Some(closing) = closing {
        let frontmatter = parse_yaml_frontmatter(&lines[1..closing].join("\n"), path)?;
        let body = lines[closing + 1..].join("\n");
        return Ok((frontmatter, body));
    }

    let mut frontmatter = Vars::new();
    if markdown {
        frontmatter.insert("title", "");
        frontmatter.insert("date", "");
        frontmatter.insert("layout", DEFAULT_LAYOUT);
    }
    Ok((frontmatter, content.to_string()))
}

fn is_delimiter(line: &str) -> bool {
    line.trim_end_matches('\r') == FRONTMATTER_DELIMITER
}

fn parse_yaml_frontmatter(yaml: &str, path: &Path) -> Result<Vars> {
    if yaml.trim().is_empty() {
        return Ok(Vars::new());
    }

    let value: Value = serde_yml::from_str(yaml).map_err(|error| KilnError::InvalidFrontmatter {
        path: path.to_path_buf(),
        message: error.to_string(),
    })?;

    match value {
        Value::Object(map) => Ok(Vars::from_map(map)),
        Value::Null => Ok(Vars::new()),
        _ => Err(KilnError::InvalidFrontmatter {
            path: path.to_path_buf(),
            message: "expected a mapping".to_string(),
        }),
    }
}

/// Parses a `YYYY-MM-DD-` prefix off a file stem, returning the date and
/// the remaining slug.
pub fn parse_date_from_filename(stem: &str) -> Option<(NaiveDate, &str)> {
    let prefix = stem.get(..11)?;
    if !prefix.ends_with('-') {
        return None;
    }

    let date_part = &prefix[..10];
    let parts: Vec<&str> = date_part.split('-').collect();

    if parts.len() != 3 {
        return None;
    }

    if parts[0].len() != 4 || parts[1].len() != 2 || parts[2].len() != 2 {
        return None;
    }

    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    Some((date, &stem[11..]))
}

/// Parses an explicit front-matter `date`.
///
/// Accepts `2006-01-02 15:04:05.999999999 -0700 MST` (zone name optional),
/// RFC 3339, and naive `YYYY-MM-DD[ HH:MM:SS]` which is taken as UTC.
pub fn parse_frontmatter_date(input: &str) -> Option<DateTime<FixedOffset>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(date) = DateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S%.f %z") {
        return Some(date);
    }

    if let Some((without_zone, zone)) = input.rsplit_once(' ')
        && zone.chars().all(|character| character.is_ascii_alphabetic())
        && let Ok(date) = DateTime::parse_from_str(without_zone, "%Y-%m-%d %H:%M:%S%.f %z")
    {
        return Some(date);
    }

    if let Ok(date) = DateTime::parse_from_rfc3339(input) {
        return Some(date);
    }

    let utc = FixedOffset::east_opt(0)?;

    if let Ok(naive) = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_local_timezone(utc).single()?);
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_time(NaiveTime::MIN).and_local_timezone(utc).single())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use std::path::PathBuf;

    fn path() -> PathBuf {
        PathBuf::from("_posts/2020-01-01-test.md")
    }

    #[test]
    fn test_parse_markdown() {
        let input = "# Hello\n\nThis is **bold**.";
        let output = parse_markdown(input);
        assert!(output.contains("<h1>"));
        assert!(output.contains("Hello"));
        assert!(output.contains("<strong>bold</strong>"));
    }

    #[test]
    fn test_parse_markdown_extensions() {
        let output = parse_markdown("| a | b |\n|---|---|\n| 1 | 2 |\n\n~~gone~~\n\n```go\nfunc main() {}\n```");
        assert!(output.contains("<table>"));
        assert!(output.contains("<del>gone</del>"));
        assert!(output.contains("<code class=\"language-go\">"));
    }

    #[test]
    fn test_heading_requires_space() {
        let output = parse_markdown("#notaheading");
        assert!(!output.contains("<h1>"));
    }

    #[test]
    fn test_no_intra_word_underscore_emphasis() {
        let output = parse_markdown("snake_case_name");
        assert!(!output.contains("<em>"));
    }

    #[test]
    fn test_bare_urls_are_linked() {
        let output = parse_markdown("See https://example.com/a_b for more.");
        assert!(output.contains("<a href=\"https://example.com/a_b\">https://example.com/a_b</a>"));
        assert!(output.contains(" for more."));
    }

    #[test]
    fn test_existing_links_are_untouched() {
        let output = parse_markdown("[site](https://example.com)");
        assert_eq!(output.matches("<a ").count(), 1);
    }

    #[test]
    fn test_frontmatter_round_trip() {
        let content = "---\ntitle: Test\nlayout: post\ncategory: rust\n---\nLine one\n\nLine --- two\n";
        let (frontmatter, body) = extract_frontmatter(content, &path(), true).unwrap();
        assert_eq!(frontmatter.str("title"), "Test");
        assert_eq!(frontmatter.str("layout"), "post");
        assert_eq!(frontmatter.str("category"), "rust");
        assert_eq!(body, "Line one\n\nLine --- two\n");
    }

    #[test]
    fn test_no_frontmatter_returns_whole_file() {
        let content = "Just text\n---\nmore";
        let (frontmatter, body) = extract_frontmatter(content, Path::new("a.html"), false).unwrap();
        assert!(frontmatter.is_empty());
        assert_eq!(body, content);
    }

    #[test]
    fn test_markdown_without_frontmatter_gets_defaults() {
        let (frontmatter, body) = extract_frontmatter("# Hi", Path::new("a.md"), true).unwrap();
        assert_eq!(frontmatter.str("layout"), "plain");
        assert_eq!(frontmatter.str("title"), "");
        assert_eq!(frontmatter.str("date"), "");
        assert_eq!(body, "# Hi");
    }

    #[test]
    fn test_malformed_frontmatter_names_the_file() {
        let content = "---\ntitle: [unclosed\n---\nbody";
        let error = extract_frontmatter(content, &path(), true).unwrap_err();
        assert!(matches!(error, KilnError::InvalidFrontmatter { .. }));
        assert!(error.to_string().contains("2020-01-01-test.md"));
    }

    #[test]
    fn test_unterminated_delimiter_is_body_text() {
        let content = "---\nJust a rule then text\nmore";
        let (frontmatter, body) = extract_frontmatter(content, &path(), true).unwrap();
        assert_eq!(body, content);
        assert_eq!(frontmatter.str("layout"), DEFAULT_LAYOUT);
    }

    #[test]
    fn test_empty_frontmatter_block() {
        let (frontmatter, body) = extract_frontmatter("---\n---\nbody", &path(), true).unwrap();
        assert!(frontmatter.is_empty());
        assert_eq!(body, "body");
    }

    #[test]
    fn test_convertable_flag_is_boolean() {
        let (frontmatter, _) =
            extract_frontmatter("---\nconvertable: false\n---\n{{ x }}", &path(), true).unwrap();
        assert_eq!(frontmatter.bool("convertable"), Some(false));
    }

    #[test]
    fn test_parse_date_from_filename() {
        let (date, slug) = parse_date_from_filename("2024-01-15-hello-world").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(slug, "hello-world");
        assert_eq!(parse_date_from_filename("about"), None);
        assert_eq!(parse_date_from_filename("2024-1-15-hello"), None);
        assert_eq!(parse_date_from_filename("2024-13-45-bogus"), None);
    }

    #[test]
    fn test_parse_frontmatter_date_formats() {
        let full = parse_frontmatter_date("2013-11-22 21:42:47.123456789 +0900 JST").unwrap();
        assert_eq!((full.year(), full.month(), full.day()), (2013, 11, 22));
        assert_eq!(full.hour(), 21);
        assert_eq!(full.offset().local_minus_utc(), 9 * 3600);

        let rfc = parse_frontmatter_date("2021-03-01T10:00:00+00:00").unwrap();
        assert_eq!(rfc.month(), 3);

        let naive = parse_frontmatter_date("2013-11-22 21:42:47").unwrap();
        assert_eq!(naive.minute(), 42);

        let day = parse_frontmatter_date("2021-02-01").unwrap();
        assert_eq!((day.month(), day.day(), day.hour()), (2, 1, 0));

        assert_eq!(parse_frontmatter_date(""), None);
        assert_eq!(parse_frontmatter_date("yesterday"), None);
    }
}
