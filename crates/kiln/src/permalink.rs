//! Destination paths and public URLs for pages, posts and pagination pages.
//!
//! Every function here is a pure function of the configuration, the source
//! path and the parsed front-matter, except for [`PermalinkResolver::to_date`]
//! which falls back to file modification time.

use crate::config::Config;
use crate::error::{KilnError, Result};
use crate::parsing::{parse_date_from_filename, parse_frontmatter_date};
use crate::types::Vars;
use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDate, NaiveTime};
use std::fs;
use std::path::{Path, PathBuf};

pub struct PermalinkResolver<'a> {
    config: &'a Config,
}

impl<'a> PermalinkResolver<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn is_post(&self, path: &Path) -> bool {
        path.starts_with(&self.config.posts)
    }

    /// The source path relative to the source root, with `/` separators and
    /// markdown extensions rewritten to `.html`.
    fn page_relative(&self, from: &Path) -> Result<String> {
        let relative =
            from.strip_prefix(&self.config.source)
                .map_err(|_| KilnError::InvalidPath {
                    path: from.to_path_buf(),
                })?;

        let relative = if self.config.is_markdown(relative) {
            relative.with_extension("html")
        } else {
            relative.to_path_buf()
        };

        Ok(relative.to_string_lossy().replace('\\', "/"))
    }

    pub fn to_page(&self, from: &Path) -> Result<PathBuf> {
        Ok(self.config.destination.join(self.page_relative(from)?))
    }

    pub fn to_page_url(&self, from: &Path) -> Result<String> {
        Ok(url_join(&self.config.baseurl, &self.page_relative(from)?))
    }

    pub fn to_post(&self, from: &Path, frontmatter: &Vars) -> PathBuf {
        if frontmatter.contains_key("permalink") {
            return self.destination_for(&frontmatter.str("permalink"));
        }

        match self.expand_pattern(from, frontmatter) {
            Some(expanded) => self.destination_for(&expanded),
            None => self
                .config
                .destination
                .join(format!("{}.html", file_stem(from))),
        }
    }

    pub fn to_post_url(&self, from: &Path, frontmatter: &Vars) -> String {
        if frontmatter.contains_key("permalink") {
            return url_join(&self.config.baseurl, &frontmatter.str("permalink"));
        }

        match self.expand_pattern(from, frontmatter) {
            Some(expanded) => url_join(&self.config.baseurl, &expanded),
            None => url_join(&self.config.baseurl, &format!("{}.html", file_stem(from))),
        }
    }

    pub fn to_paginate(&self, page: usize) -> PathBuf {
        self.config
            .destination
            .join(format!("page{page}"))
            .join("index.html")
    }

    /// Public URL of a pagination page; page 1 is the site root.
    pub fn paginate_url(&self, page: usize) -> String {
        if page <= 1 {
            url_join(&self.config.baseurl, "/")
        } else {
            url_join(&self.config.baseurl, &format!("/page{page}/"))
        }
    }

    /// Front-matter `date`, then a `YYYY-MM-DD-` filename prefix, then the
    /// file's modification time.
    pub fn to_date(&self, from: &Path, frontmatter: &Vars) -> DateTime<FixedOffset> {
        if let Some(date) = parse_frontmatter_date(&frontmatter.str("date")) {
            return date;
        }

        if let Some((date, _)) = parse_date_from_filename(&file_stem(from)) {
            return midnight_utc(date);
        }

        modified_time(from)
    }

    fn expand_pattern(&self, from: &Path, frontmatter: &Vars) -> Option<String> {
        let stem = file_stem(from);
        let (date, title) = parse_date_from_filename(&stem)?;

        let expanded = self
            .config
            .permalink
            .pattern()
            .replace(":categories", &frontmatter.str("category"))
            .replace(":year", &date.year().to_string())
            .replace(":month", &format!("{:02}", date.month()))
            .replace(":i_month", &date.month().to_string())
            .replace(":day", &format!("{:02}", date.day()))
            .replace(":i_day", &date.day().to_string())
            .replace(":title", title);

        Some(collapse_slashes(&expanded))
    }

    fn destination_for(&self, permalink: &str) -> PathBuf {
        let mut destination = self
            .config
            .destination
            .join(permalink.trim_start_matches('/'));
        if permalink.ends_with('/') {
            destination.push("index");
        }
        destination
    }
}

/// Joins two URL fragments with exactly one `/` between them.
pub fn url_join(left: &str, right: &str) -> String {
    match (left.ends_with('/'), right.starts_with('/')) {
        (true, true) => format!("{}{}", left, &right[1..]),
        (false, false) => format!("{left}/{right}"),
        _ => format!("{left}{right}"),
    }
}

fn collapse_slashes(path: &str) -> String {
    let mut collapsed = String::with_capacity(path.len());
    for character in path.chars() {
        if character == '/' && collapsed.ends_with('/') {
            continue;
        }
        collapsed.push(character);
    }
    collapsed
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn midnight_utc(date: NaiveDate) -> DateTime<FixedOffset> {
    date.and_time(NaiveTime::MIN).and_utc().fixed_offset()
}

pub(crate) fn modified_time(path: &Path) -> DateTime<FixedOffset> {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .map(|modified| DateTime::<Local>::from(modified).fixed_offset())
        .unwrap_or_else(|_| Local::now().fixed_offset())
}
