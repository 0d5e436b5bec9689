use crate::config::Config;
use crate::error::{IoContext, KilnError, Result};
use crate::parsing::{extract_frontmatter, parse_frontmatter_date};
use crate::permalink::{PermalinkResolver, modified_time};
use crate::render::BuildContext;
use crate::sitemap::write_sitemap;
use crate::types::{
    ContentItem, Paginator, SiteModel, Vars, categorize, sort_by_date_desc,
};
use chrono::Local;
use log::{info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

/// Drives one full build: discovery, the site model, then every render.
pub struct SiteBuilder<'a> {
    config: &'a Config,
    permalinks: PermalinkResolver<'a>,
}

/// What discovery found. `all_posts` keeps every post for rendering even
/// when `site.posts` is truncated by `limit_posts`.
pub struct Discovered {
    pub site: SiteModel,
    pub all_posts: Vec<ContentItem>,
}

impl<'a> SiteBuilder<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            permalinks: PermalinkResolver::new(config),
        }
    }

    pub fn build(&self) -> Result<SiteModel> {
        let Discovered { site, all_posts } = self.discover()?;

        fs::create_dir_all(&self.config.destination)
            .io_context("creating directory", &self.config.destination)?;

        let mut context = BuildContext::for_site(self.config, &site)?;

        for post in &all_posts {
            let destination = self.permalinks.to_post(&post.path, &post.frontmatter);
            self.render_one(&mut context, &post.path, &destination)?;
        }

        let mut index = None;
        for page in &site.pages {
            if self.is_index(&page.path) {
                index = Some(page.path.clone());
            }
            let destination = self.permalinks.to_page(&page.path)?;
            self.render_one(&mut context, &page.path, &destination)?;
        }

        if self.config.paginate > 0
            && let Some(index) = index
        {
            let total_pages = Paginator::total_pages(site.posts.len(), self.config.paginate);
            for page in 2..=total_pages {
                let paginator = context.paginator_for(&site, page);
                context.set_paginator(Some(&paginator))?;
                let destination = self.permalinks.to_paginate(page);
                self.render_one(&mut context, &index, &destination)?;
            }
        }

        let sitemap = write_sitemap(&mut context)?;
        info!("{}", sitemap.display());

        Ok(site)
    }

    /// Walks the tree and assembles the site model without writing anything.
    pub fn discover(&self) -> Result<Discovered> {
        let mut pages = self.load_pages()?;
        let mut all_posts = self.load_posts()?;

        sort_by_date_desc(&mut pages);
        sort_by_date_desc(&mut all_posts);

        let mut posts = all_posts.clone();
        if self.config.limit_posts > 0 {
            posts.truncate(self.config.limit_posts);
        }

        let site = SiteModel {
            title: self.config.title.clone(),
            name: self.config.name.clone(),
            url: self.config.baseurl.clone(),
            baseurl: self.config.baseurl.clone(),
            time: Local::now().fixed_offset(),
            pages,
            categories: categorize(&all_posts),
            posts,
            data: self.load_data()?,
        };

        Ok(Discovered { site, all_posts })
    }

    fn render_one(
        &self,
        context: &mut BuildContext<'_>,
        source: &Path,
        destination: &Path,
    ) -> Result<()> {
        if let Some(written) = context.convert_file(source, destination)? {
            info!("{} => {}", source.display(), written.display());
        }
        Ok(())
    }

    fn is_index(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.config.source) else {
            return false;
        };
        let Some(name) = relative.to_str() else {
            return false;
        };
        name == "index.html"
            || self
                .config
                .markdown_extensions()
                .any(|extension| name == format!("index.{extension}"))
    }

    fn load_pages(&self) -> Result<Vec<ContentItem>> {
        let source = &self.config.source;
        let destination = &self.config.destination;
        let mut pages = Vec::new();

        let walker = WalkDir::new(source)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !(is_hidden(entry) || entry.path() == destination)
            });

        for entry in walker {
            let entry = entry.map_err(|error| KilnError::WalkDir {
                path: source.clone(),
                message: error.to_string(),
            })?;

            if !entry.file_type().is_file() || self.config.is_excluded(entry.path()) {
                continue;
            }

            pages.push(self.load_page(entry.path())?);
        }

        Ok(pages)
    }

    /// Convertible pages contribute their front-matter; their date comes
    /// from a front-matter `date`, falling back to the file's mtime.
    fn load_page(&self, path: &Path) -> Result<ContentItem> {
        let frontmatter = if self.config.is_convertible(path) {
            let text = fs::read_to_string(path).io_context("reading page", path)?;
            extract_frontmatter(&text, path, self.config.is_markdown(path))?.0
        } else {
            Vars::new()
        };

        let date = parse_frontmatter_date(&frontmatter.str("date"))
            .unwrap_or_else(|| modified_time(path));

        Ok(ContentItem {
            path: path.to_path_buf(),
            url: self.permalinks.to_page_url(path)?,
            date,
            content: None,
            frontmatter,
        })
    }

    fn load_posts(&self) -> Result<Vec<ContentItem>> {
        let posts_dir = &self.config.posts;
        let mut posts = Vec::new();

        if !posts_dir.is_dir() {
            return Ok(posts);
        }

        for entry in WalkDir::new(posts_dir).sort_by_file_name().min_depth(1) {
            let entry = entry.map_err(|error| KilnError::WalkDir {
                path: posts_dir.clone(),
                message: error.to_string(),
            })?;
            let path = entry.path();

            if !entry.file_type().is_file() || !self.config.is_convertible(path) {
                continue;
            }

            posts.push(self.load_post(path)?);
        }

        Ok(posts)
    }

    fn load_post(&self, path: &Path) -> Result<ContentItem> {
        let text = fs::read_to_string(path).io_context("reading post", path)?;
        let (frontmatter, body) =
            extract_frontmatter(&text, path, self.config.is_markdown(path))?;

        Ok(ContentItem {
            path: path.to_path_buf(),
            url: self.permalinks.to_post_url(path, &frontmatter),
            date: self.permalinks.to_date(path, &frontmatter),
            content: Some(body),
            frontmatter,
        })
    }

    fn load_data(&self) -> Result<BTreeMap<String, Value>> {
        let data_dir = &self.config.data;
        let mut data = BTreeMap::new();

        if !data_dir.is_dir() {
            return Ok(data);
        }

        for entry in WalkDir::new(data_dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|error| KilnError::WalkDir {
                path: data_dir.clone(),
                message: error.to_string(),
            })?;
            let path = entry.path();

            let is_yaml = matches!(
                path.extension().and_then(|extension| extension.to_str()),
                Some("yaml") | Some("yml")
            );
            if !entry.file_type().is_file() || !is_yaml {
                continue;
            }

            let Some(key) = path.file_stem().map(|stem| stem.to_string_lossy().to_string())
            else {
                continue;
            };

            match load_data_file(path) {
                Ok(value) => {
                    data.insert(key, value);
                }
                Err(error) => warn!("skipping data file: {error}"),
            }
        }

        Ok(data)
    }
}

fn load_data_file(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path).io_context("reading data file", path)?;
    serde_yml::from_str(&content).map_err(|error| KilnError::YamlParse {
        path: path.to_path_buf(),
        message: error.to_string(),
    })
}

pub(crate) fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.') || name.starts_with('_'))
}
