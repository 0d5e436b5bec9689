use crate::error::{KilnError, Result};
use chrono::{DateTime, FixedOffset};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A rendering context: string keys mapped to template values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Vars {
    raw: Map<String, Value>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(raw: Map<String, Value>) -> Self {
        Self { raw }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.raw.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.raw.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Lenient string read: missing keys and non-string values yield `""`.
    pub fn str(&self, key: &str) -> String {
        self.raw
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.raw.get(key).and_then(Value::as_bool)
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.raw
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| KilnError::TypeMismatch {
                key: key.to_string(),
                expected: "string",
            })
    }

    /// Copies every key of `other` into `self`, overwriting existing keys.
    pub fn merge(&mut self, other: &Vars) {
        for (key, value) in &other.raw {
            self.raw.insert(key.clone(), value.clone());
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.raw)
    }

    pub fn to_tera(&self) -> tera::Context {
        let mut context = tera::Context::new();
        for (key, value) in &self.raw {
            context.insert(key.as_str(), value);
        }
        context
    }
}

/// A page or post discovered during a build.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentItem {
    pub path: PathBuf,
    pub url: String,
    pub date: DateTime<FixedOffset>,
    pub content: Option<String>,
    pub frontmatter: Vars,
}

impl ContentItem {
    pub fn title(&self) -> String {
        self.frontmatter.str("title")
    }

    pub fn category(&self) -> Option<String> {
        self.frontmatter
            .contains_key("category")
            .then(|| self.frontmatter.str("category"))
    }

    /// Front-matter keys first, then the computed `path`, `url`, `date` and
    /// `content`, which always win.
    pub fn to_value(&self) -> Value {
        let mut vars = self.frontmatter.clone();
        vars.insert("path", self.path.to_string_lossy().replace('\\', "/"));
        vars.insert("url", self.url.clone());
        vars.insert("date", timestamp(&self.date));
        if let Some(content) = &self.content {
            vars.insert("content", content.clone());
        }
        vars.into_value()
    }
}

impl Serialize for ContentItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

pub fn timestamp(date: &DateTime<FixedOffset>) -> String {
    date.to_rfc3339()
}

fn serialize_timestamp<S: Serializer>(
    date: &DateTime<FixedOffset>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&timestamp(date))
}

/// Newest first; items with equal dates keep their discovery order.
pub fn sort_by_date_desc(items: &mut [ContentItem]) {
    items.sort_by(|a, b| b.date.cmp(&a.date));
}

/// Groups posts by front-matter `category`, preserving the order of `posts`.
pub fn categorize(posts: &[ContentItem]) -> BTreeMap<String, Vec<ContentItem>> {
    let mut categories: BTreeMap<String, Vec<ContentItem>> = BTreeMap::new();
    for post in posts {
        if let Some(category) = post.category() {
            categories.entry(category).or_default().push(post.clone());
        }
    }
    categories
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Paginator {
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
    pub total_posts: usize,
    pub posts: Vec<ContentItem>,
    pub previous_page: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_page_path: Option<String>,
    pub next_page: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_path: Option<String>,
}

impl Paginator {
    pub fn total_pages(total_posts: usize, per_page: usize) -> usize {
        if per_page == 0 {
            0
        } else {
            total_posts.div_ceil(per_page).max(1)
        }
    }

    /// Builds the window for 1-based `page`. `page_path` maps a page number
    /// to its public URL.
    pub fn for_page(
        posts: &[ContentItem],
        per_page: usize,
        page: usize,
        page_path: impl Fn(usize) -> String,
    ) -> Self {
        let total_posts = posts.len();
        let total_pages = Self::total_pages(total_posts, per_page);
        let start = (per_page * (page - 1)).min(total_posts);
        let end = (per_page * page).min(total_posts);

        let previous_page = page > 1;
        let next_page = page < total_pages;

        Self {
            page,
            per_page,
            total_pages,
            total_posts,
            posts: posts[start..end].to_vec(),
            previous_page,
            previous_page_path: previous_page.then(|| page_path(page - 1)),
            next_page,
            next_page_path: next_page.then(|| page_path(page + 1)),
        }
    }
}

/// Everything templates see as `site`.
#[derive(Debug, Clone, Serialize)]
pub struct SiteModel {
    pub title: String,
    pub name: String,
    pub url: String,
    pub baseurl: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub time: DateTime<FixedOffset>,
    pub pages: Vec<ContentItem>,
    pub posts: Vec<ContentItem>,
    pub categories: BTreeMap<String, Vec<ContentItem>>,
    pub data: BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(name: &str, day: u32, category: Option<&str>) -> ContentItem {
        let mut frontmatter = Vars::new();
        frontmatter.insert("title", name);
        if let Some(category) = category {
            frontmatter.insert("category", category);
        }
        ContentItem {
            path: PathBuf::from(format!("/site/_posts/{name}.md")),
            url: format!("/{name}.html"),
            date: FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2021, 1, day, 0, 0, 0)
                .unwrap(),
            content: None,
            frontmatter,
        }
    }

    #[test]
    fn test_str_is_lenient() {
        let mut vars = Vars::new();
        vars.insert("title", "Dude");
        vars.insert("count", 1);
        assert_eq!(vars.str("title"), "Dude");
        assert_eq!(vars.str("count"), "");
        assert_eq!(vars.str("missing"), "");
    }

    #[test]
    fn test_require_str_reports_mismatch() {
        let mut vars = Vars::new();
        vars.insert("layout", 3);
        let error = vars.require_str("layout").unwrap_err();
        assert!(matches!(error, KilnError::TypeMismatch { .. }));
        assert!(vars.require_str("missing").is_err());
    }

    #[test]
    fn test_merge_overrides() {
        let mut base = Vars::new();
        base.insert("layout", "post");
        base.insert("title", "Base");
        let mut overlay = Vars::new();
        overlay.insert("layout", "default");
        base.merge(&overlay);
        assert_eq!(base.str("layout"), "default");
        assert_eq!(base.str("title"), "Base");
    }

    #[test]
    fn test_computed_fields_win_over_frontmatter() {
        let mut post = item("hello", 1, None);
        post.frontmatter.insert("url", "/bogus");
        post.frontmatter.insert("date", "not a date");
        let value = post.to_value();
        assert_eq!(value["url"], "/hello.html");
        assert_eq!(value["date"], "2021-01-01T00:00:00+00:00");
        assert_eq!(value["title"], "hello");
    }

    #[test]
    fn test_sort_is_descending_and_stable() {
        let mut posts = vec![
            item("a", 1, None),
            item("c", 3, None),
            item("b", 2, None),
            item("b2", 2, None),
        ];
        sort_by_date_desc(&mut posts);
        let titles: Vec<String> = posts.iter().map(ContentItem::title).collect();
        assert_eq!(titles, vec!["c", "b", "b2", "a"]);
    }

    #[test]
    fn test_categorize_preserves_order() {
        let posts = vec![
            item("c", 3, Some("rust")),
            item("b", 2, None),
            item("a", 1, Some("rust")),
        ];
        let categories = categorize(&posts);
        assert_eq!(categories.len(), 1);
        let rust: Vec<String> = categories["rust"].iter().map(ContentItem::title).collect();
        assert_eq!(rust, vec!["c", "a"]);
    }

    #[test]
    fn test_paginator_windows() {
        let posts: Vec<ContentItem> = (1..=5).map(|day| item("p", day, None)).collect();
        let path = |page: usize| format!("/page{page}/");

        assert_eq!(Paginator::total_pages(5, 2), 3);

        let first = Paginator::for_page(&posts, 2, 1, path);
        assert_eq!(first.posts.len(), 2);
        assert!(!first.previous_page);
        assert!(first.next_page);
        assert_eq!(first.next_page_path.as_deref(), Some("/page2/"));

        let last = Paginator::for_page(&posts, 2, 3, path);
        assert_eq!(last.posts.len(), 1);
        assert!(last.previous_page);
        assert!(!last.next_page);
        assert_eq!(last.next_page_path, None);
    }
}
