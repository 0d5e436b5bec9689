//! Per-file conversion: copy, external command, or template + markdown +
//! layout chain.

use crate::config::{Config, ConversionRule, extension};
use crate::error::{IoContext, KilnError, Result};
use crate::parsing::{DEFAULT_LAYOUT, MarkdownRenderer, extract_frontmatter};
use crate::permalink::PermalinkResolver;
use crate::template::TemplateEngine;
use crate::types::{Paginator, SiteModel, Vars, timestamp};
use chrono::{DateTime, FixedOffset};
use log::{info, warn};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Maximum number of layouts a single file may be wrapped in.
pub const MAX_LAYOUT_DEPTH: usize = 16;

/// Extensions that are neither converted nor copied.
const IGNORED_EXTENSIONS: &[&str] = &["yml", "exe"];

/// State shared by every render of one build: configuration, the template
/// engine, and the global `site`/`paginator` context.
pub struct BuildContext<'a> {
    config: &'a Config,
    permalinks: PermalinkResolver<'a>,
    templates: TemplateEngine,
    markdown: MarkdownRenderer,
    globals: Vars,
}

impl<'a> BuildContext<'a> {
    pub fn new(config: &'a Config) -> Result<Self> {
        let mut globals = Vars::new();
        globals.insert("site", Value::Object(Default::default()));
        globals.insert("paginator", Value::Object(Default::default()));

        Ok(Self {
            config,
            permalinks: PermalinkResolver::new(config),
            templates: TemplateEngine::new(&config.includes)?,
            markdown: MarkdownRenderer::new(),
            globals,
        })
    }

    /// A context seeded with `site` and, when pagination is enabled, the
    /// paginator for the first page.
    pub fn for_site(config: &'a Config, site: &SiteModel) -> Result<Self> {
        let mut context = Self::new(config)?;
        context.set_site(site)?;
        if config.paginate > 0 {
            let paginator = context.paginator_for(site, 1);
            context.set_paginator(Some(&paginator))?;
        }
        Ok(context)
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    pub fn permalinks(&self) -> &PermalinkResolver<'a> {
        &self.permalinks
    }

    pub fn globals(&self) -> &Vars {
        &self.globals
    }

    pub fn set_site(&mut self, site: &SiteModel) -> Result<()> {
        self.globals.insert("site", serde_json::to_value(site)?);
        Ok(())
    }

    pub fn set_paginator(&mut self, paginator: Option<&Paginator>) -> Result<()> {
        let value = match paginator {
            Some(paginator) => serde_json::to_value(paginator)?,
            None => Value::Object(Default::default()),
        };
        self.globals.insert("paginator", value);
        Ok(())
    }

    pub fn paginator_for(&self, site: &SiteModel, page: usize) -> Paginator {
        Paginator::for_page(&site.posts, self.config.paginate, page, |number| {
            self.permalinks.paginate_url(number)
        })
    }

    /// Renders a standalone template against the global context.
    pub fn render_template(&mut self, source: &str, name: &Path) -> Result<String> {
        self.templates.render(source, &self.globals, name)
    }

    /// Converts `src` into `dst`, returning the path actually written (the
    /// extension may change), or `None` when the file was skipped.
    pub fn convert_file(&mut self, src: &Path, dst: &Path) -> Result<Option<PathBuf>> {
        let config = self.config;

        if !config.is_convertible(src) {
            if extension(src).is_some_and(|extension| IGNORED_EXTENSIONS.contains(&extension)) {
                return Ok(None);
            }
            ensure_parent(dst)?;
            fs::copy(src, dst).io_context("copying", src)?;
            return Ok(Some(dst.to_path_buf()));
        }

        if let Some(rule) = config.conversion_for(src) {
            let dst = dst.with_extension(&rule.ext);
            ensure_parent(&dst)?;
            return self.run_conversion(src, &dst, rule);
        }

        // Trailing-slash permalinks resolve to a bare `index`.
        let dst = if config.is_markdown(src) {
            dst.with_extension("html")
        } else if dst.extension().is_none() {
            dst.with_extension(extension(src).unwrap_or("html"))
        } else {
            dst.to_path_buf()
        };

        let content = self.render_layouts(src)?;
        ensure_parent(&dst)?;
        fs::write(&dst, content).io_context("writing", &dst)?;
        Ok(Some(dst))
    }

    fn run_conversion(
        &mut self,
        src: &Path,
        dst: &Path,
        rule: &ConversionRule,
    ) -> Result<Option<PathBuf>> {
        let mut vars = Vars::new();
        vars.insert("from", src.to_string_lossy().to_string());
        vars.insert("to", dst.to_string_lossy().to_string());

        let command = match self.templates.render(&rule.command, &vars, src) {
            Ok(command) => command,
            Err(error) => {
                warn!("skipping conversion of {}: {error}", src.display());
                return Ok(None);
            }
        };

        info!("converting: {command}");
        let status = shell(&command)
            .status()
            .map_err(|error| KilnError::Command {
                command: command.clone(),
                path: src.to_path_buf(),
                message: error.to_string(),
            })?;

        if !status.success() {
            return Err(KilnError::Command {
                command,
                path: src.to_path_buf(),
                message: status.to_string(),
            });
        }

        Ok(Some(dst.to_path_buf()))
    }

    /// The layout loop: render the file, then wrap the result in its layout,
    /// then in that layout's layout, until a layout is empty or `nil`.
    fn render_layouts(&mut self, src: &Path) -> Result<String> {
        let is_post = self.permalinks.is_post(src);
        let mut vars = Vars::new();
        vars.insert("content", "");

        let mut current = src.to_path_buf();
        let mut resolved: Option<(DateTime<FixedOffset>, String)> = None;

        for _ in 0..=MAX_LAYOUT_DEPTH {
            vars.merge(&self.globals);

            let text = fs::read_to_string(&current).io_context("reading", &current)?;
            let markdown = self.config.is_markdown(&current);
            let (frontmatter, body) = extract_frontmatter(&text, &current, markdown)?;
            vars.merge(&frontmatter);

            // url and date always describe the content file, never a layout
            let (date, url) = match resolved.clone() {
                Some(found) => found,
                None => {
                    let date = self.permalinks.to_date(src, &vars);
                    let url = if is_post {
                        self.permalinks.to_post_url(src, &frontmatter)
                    } else {
                        self.permalinks.to_page_url(src)?
                    };
                    resolved = Some((date, url.clone()));
                    (date, url)
                }
            };

            let page = json!({
                "date": timestamp(&date),
                "url": url,
                "title": vars.str("title"),
                "content": vars.str("content"),
            });
            vars.insert("post", page.clone());
            vars.insert("page", page);

            let convertible = frontmatter.bool("convertable").unwrap_or(true);
            let content = if convertible && !body.is_empty() {
                self.templates.render(&body, &vars, &current)?
            } else {
                body
            };

            let content = if markdown {
                self.markdown.render(&content)
            } else {
                content
            };

            let layout = vars.str("layout");
            if layout.is_empty() || layout == "nil" {
                return Ok(content);
            }

            let next = self.config.layouts.join(format!("{layout}.html"));
            if !next.is_file() {
                if layout == DEFAULT_LAYOUT {
                    return Ok(content);
                }
                return Err(KilnError::LayoutNotFound { name: layout, path: next });
            }

            vars.insert("content", content);
            vars.insert("layout", "");
            current = next;
        }

        Err(KilnError::LayoutCycle {
            path: src.to_path_buf(),
            limit: MAX_LAYOUT_DEPTH,
        })
    }
}

pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).io_context("creating directory", parent)?;
    }
    Ok(())
}

fn shell(command: &str) -> Command {
    if cfg!(windows) {
        let mut shell = Command::new("cmd");
        shell.arg("/C").arg(command);
        shell
    } else {
        let mut shell = Command::new("sh");
        shell.arg("-c").arg(command);
        shell
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        config: Config,
    }

    impl Fixture {
        fn new(yaml: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let mut config = Config::from_yaml(yaml, Path::new("_config.yml")).unwrap();
            config.resolve_paths(dir.path());
            fs::create_dir_all(&config.layouts).unwrap();
            fs::create_dir_all(&config.posts).unwrap();
            Self { dir, config }
        }

        fn write(&self, relative: &str, content: &str) -> PathBuf {
            let path = self.dir.path().join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            path
        }

        fn dest(&self, relative: &str) -> PathBuf {
            self.config.destination.join(relative)
        }
    }

    #[test]
    fn test_layout_chain_nests_innermost_first() {
        let fixture = Fixture::new("");
        fixture.write(
            "_layouts/default.html",
            "<html>{{ content }}</html>",
        );
        fixture.write(
            "_layouts/post.html",
            "---\nlayout: default\n---\n<article><h2>{{ page.title }}</h2>{{ content }}</article>",
        );
        let src = fixture.write(
            "_posts/2021-01-01-hello.md",
            "---\nlayout: post\ntitle: Hello\n---\nSome *text*",
        );

        let mut context = BuildContext::new(&fixture.config).unwrap();
        let dst = context.permalinks().to_post(&src, &Vars::new());
        let written = context.convert_file(&src, &dst).unwrap().unwrap();

        assert_eq!(written, fixture.dest("2021/01/01/hello.html"));
        let output = fs::read_to_string(written).unwrap();
        assert_eq!(
            output,
            "<html><article><h2>Hello</h2><p>Some <em>text</em></p>\n</article></html>"
        );
    }

    #[test]
    fn test_self_referencing_layout_is_a_cycle() {
        let fixture = Fixture::new("");
        fixture.write("_layouts/loop.html", "---\nlayout: loop\n---\n{{ content }}");
        let src = fixture.write("index.html", "---\nlayout: loop\n---\nhi");

        let mut context = BuildContext::new(&fixture.config).unwrap();
        let error = context
            .convert_file(&src, &fixture.dest("index.html"))
            .unwrap_err();
        assert!(matches!(error, KilnError::LayoutCycle { .. }));
    }

    #[test]
    fn test_missing_explicit_layout_is_an_error() {
        let fixture = Fixture::new("");
        let src = fixture.write("about.html", "---\nlayout: nope\n---\nhi");

        let mut context = BuildContext::new(&fixture.config).unwrap();
        let error = context
            .convert_file(&src, &fixture.dest("about.html"))
            .unwrap_err();
        assert!(matches!(error, KilnError::LayoutNotFound { .. }));
    }

    #[test]
    fn test_plain_markdown_without_plain_layout() {
        let fixture = Fixture::new("");
        let src = fixture.write("notes.md", "# Notes");

        let mut context = BuildContext::new(&fixture.config).unwrap();
        let written = context
            .convert_file(&src, &fixture.dest("notes.md"))
            .unwrap()
            .unwrap();
        assert_eq!(written, fixture.dest("notes.html"));
        assert_eq!(fs::read_to_string(written).unwrap(), "<h1>Notes</h1>\n");
    }

    #[test]
    fn test_plain_layout_is_used_when_present() {
        let fixture = Fixture::new("");
        fixture.write("_layouts/plain.html", "<main>{{ content }}</main>");
        let src = fixture.write("notes.md", "# Notes");

        let mut context = BuildContext::new(&fixture.config).unwrap();
        let written = context
            .convert_file(&src, &fixture.dest("notes.md"))
            .unwrap()
            .unwrap();
        assert_eq!(
            fs::read_to_string(written).unwrap(),
            "<main><h1>Notes</h1>\n</main>"
        );
    }

    #[test]
    fn test_convertable_false_skips_templating() {
        let fixture = Fixture::new("");
        let src = fixture.write(
            "raw.html",
            "---\nconvertable: false\n---\n{{ not_a_variable }}",
        );

        let mut context = BuildContext::new(&fixture.config).unwrap();
        let written = context
            .convert_file(&src, &fixture.dest("raw.html"))
            .unwrap()
            .unwrap();
        assert_eq!(fs::read_to_string(written).unwrap(), "{{ not_a_variable }}");
    }

    #[test]
    fn test_convertable_false_still_templates_the_layout() {
        let fixture = Fixture::new("");
        fixture.write("_layouts/wrap.html", "<div>{{ page.title }}|{{ content }}</div>");
        let src = fixture.write(
            "raw.html",
            "---\nlayout: wrap\ntitle: Raw\nconvertable: false\n---\n{{ x }}",
        );

        let mut context = BuildContext::new(&fixture.config).unwrap();
        let written = context
            .convert_file(&src, &fixture.dest("raw.html"))
            .unwrap()
            .unwrap();
        assert_eq!(
            fs::read_to_string(written).unwrap(),
            "<div>Raw|{{ x }}</div>"
        );
    }

    #[test]
    fn test_template_error_names_the_file() {
        let fixture = Fixture::new("");
        let src = fixture.write("broken.html", "{{ nope.nothing }}");

        let mut context = BuildContext::new(&fixture.config).unwrap();
        let error = context
            .convert_file(&src, &fixture.dest("broken.html"))
            .unwrap_err();
        assert!(error.to_string().contains("broken.html"));
    }

    #[test]
    fn test_page_sees_site_and_own_url() {
        let fixture = Fixture::new("title: Notebook");
        let src = fixture.write(
            "docs/guide.md",
            "---\ntitle: Guide\n---\n{{ page.title }} at {{ page.url }} on {{ site.title }}",
        );

        let mut context = BuildContext::new(&fixture.config).unwrap();
        let mut site = Vars::new();
        site.insert("title", "Notebook");
        context.globals.insert("site", site.into_value());

        let dst = context.permalinks().to_page(&src).unwrap();
        let written = context.convert_file(&src, &dst).unwrap().unwrap();
        assert_eq!(
            fs::read_to_string(written).unwrap(),
            "<p>Guide at /docs/guide.html on Notebook</p>\n"
        );
    }

    #[test]
    fn test_unconvertible_files_are_copied() {
        let fixture = Fixture::new("");
        let bytes = [0x89u8, b'P', b'N', b'G', 0, 1, 2, 255];
        let src = fixture.dir.path().join("img/logo.png");
        fs::create_dir_all(src.parent().unwrap()).unwrap();
        fs::write(&src, bytes).unwrap();

        let mut context = BuildContext::new(&fixture.config).unwrap();
        let written = context
            .convert_file(&src, &fixture.dest("img/logo.png"))
            .unwrap()
            .unwrap();
        assert_eq!(fs::read(written).unwrap(), bytes);
    }

    #[test]
    fn test_bare_index_destination_gets_source_extension() {
        let fixture = Fixture::new("");
        let html = fixture.write("_posts/2020-03-05-hello.html", "<p>hi</p>");
        let xml = fixture.write("_posts/2020-03-06-feed.xml", "<feed/>");

        let mut context = BuildContext::new(&fixture.config).unwrap();
        let written = context
            .convert_file(&html, &fixture.dest("2020/03/05/hello/index"))
            .unwrap()
            .unwrap();
        assert_eq!(written, fixture.dest("2020/03/05/hello/index.html"));
        assert_eq!(fs::read_to_string(written).unwrap(), "<p>hi</p>");

        let written = context
            .convert_file(&xml, &fixture.dest("2020/03/06/feed/index"))
            .unwrap()
            .unwrap();
        assert_eq!(written, fixture.dest("2020/03/06/feed/index.xml"));
    }

    #[test]
    fn test_ignored_extensions_are_skipped() {
        let fixture = Fixture::new("");
        let src = fixture.write("settings.yml", "a: 1");

        let mut context = BuildContext::new(&fixture.config).unwrap();
        let written = context
            .convert_file(&src, &fixture.dest("settings.yml"))
            .unwrap();
        assert_eq!(written, None);
        assert!(!fixture.dest("settings.yml").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_external_conversion() {
        let fixture = Fixture::new(
            "conversion:\n  txt:\n    ext: out\n    command: cp {{ from }} {{ to }}\n",
        );
        let src = fixture.write("notes.txt", "converted");

        let mut context = BuildContext::new(&fixture.config).unwrap();
        let written = context
            .convert_file(&src, &fixture.dest("notes.txt"))
            .unwrap()
            .unwrap();
        assert_eq!(written, fixture.dest("notes.out"));
        assert_eq!(fs::read_to_string(written).unwrap(), "converted");
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_external_conversion_is_an_error() {
        let fixture = Fixture::new("conversion:\n  txt:\n    ext: out\n    command: exit 3\n");
        let src = fixture.write("notes.txt", "x");

        let mut context = BuildContext::new(&fixture.config).unwrap();
        let error = context
            .convert_file(&src, &fixture.dest("notes.txt"))
            .unwrap_err();
        assert!(matches!(error, KilnError::Command { .. }));
    }

    #[test]
    fn test_unformattable_conversion_command_is_skipped() {
        let fixture = Fixture::new(
            "conversion:\n  txt:\n    ext: out\n    command: \"cp {{ from\"\n",
        );
        let src = fixture.write("notes.txt", "x");

        let mut context = BuildContext::new(&fixture.config).unwrap();
        let written = context
            .convert_file(&src, &fixture.dest("notes.txt"))
            .unwrap();
        assert_eq!(written, None);
    }
}
