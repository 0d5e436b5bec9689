use crate::error::{IoContext, Result};
use crate::render::BuildContext;
use std::fs;
use std::path::{Path, PathBuf};

pub const SITEMAP_FILE: &str = "sitemap.xml";

const SITEMAP_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
{%- for post in site.posts | limit(n=25) %}
  <url>
    <loc>{{ post.url | xml_escape }}</loc>
    <lastmod>{{ post.date | date(format="%Y-%m-%dT%H:%M:%S%z") }}</lastmod>
  </url>
{%- endfor %}
</urlset>
"#;

/// Renders `sitemap.xml` at the destination root from the 25 newest posts.
pub fn write_sitemap(context: &mut BuildContext<'_>) -> Result<PathBuf> {
    let path = context.config().destination.join(SITEMAP_FILE);
    let xml = context.render_template(SITEMAP_TEMPLATE, Path::new(SITEMAP_FILE))?;
    fs::write(&path, xml).io_context("writing sitemap", &path)?;
    Ok(path)
}
