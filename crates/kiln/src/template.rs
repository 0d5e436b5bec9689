use crate::error::{IoContext, KilnError, Result};
use crate::strftime;
use crate::types::Vars;
use crate::xml;
use chrono::{DateTime, FixedOffset};
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tera::{Tera, Value};
use walkdir::WalkDir;

/// Tera wrapper used for every template render in a build.
///
/// Files under the includes directory are registered by their relative path,
/// so `{% include "header.html" %}` inside content, layouts or other includes
/// renders against the caller's context.
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    pub fn new(includes_dir: &Path) -> Result<Self> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        register_filters(&mut tera);

        if includes_dir.is_dir() {
            for entry in WalkDir::new(includes_dir).min_depth(1) {
                let entry = entry.map_err(|error| KilnError::WalkDir {
                    path: includes_dir.to_path_buf(),
                    message: error.to_string(),
                })?;
                let path = entry.path();

                if !path.is_file() {
                    continue;
                }

                let name = path
                    .strip_prefix(includes_dir)
                    .map_err(|_| KilnError::InvalidPath {
                        path: path.to_path_buf(),
                    })?
                    .to_string_lossy()
                    .replace('\\', "/");
                let source = fs::read_to_string(path).io_context("reading include", path)?;

                tera.add_raw_template(&name, &source)
                    .map_err(|source| KilnError::Template {
                        path: path.to_path_buf(),
                        source,
                    })?;
                debug!("registered include {name}");
            }
        }

        Ok(Self { tera })
    }

    /// Renders `source` against `vars`; `path` names the file in errors.
    pub fn render(&mut self, source: &str, vars: &Vars, path: &Path) -> Result<String> {
        self.tera
            .render_str(source, &vars.to_tera())
            .map_err(|source| KilnError::Template {
                path: path.to_path_buf(),
                source,
            })
    }
}

fn register_filters(tera: &mut Tera) {
    tera.register_filter("date", date_filter);
    tera.register_filter("date_to_string", date_to_string_filter);
    tera.register_filter("xml_escape", xml_escape_filter);
    tera.register_filter("strip_html", strip_html_filter);
    tera.register_filter("limit", limit_filter);
}

fn to_date(value: &Value, filter: &str) -> tera::Result<DateTime<FixedOffset>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f %z"))
            .map_err(|_| tera::Error::msg(format!("{filter}: '{text}' is not a date"))),
        Value::Number(number) => number
            .as_i64()
            .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
            .map(|date| date.fixed_offset())
            .ok_or_else(|| tera::Error::msg(format!("{filter}: {number} is not a timestamp"))),
        other => Err(tera::Error::msg(format!(
            "{filter}: expected a date, got {other}"
        ))),
    }
}

/// Usage: `{{ post.date | date(format="%Y-%m-%d") }}`
fn date_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let format = args
        .get("format")
        .and_then(Value::as_str)
        .unwrap_or("%Y-%m-%d");
    let date = to_date(value, "date")?;
    Ok(Value::String(strftime::format(&date, format)))
}

fn date_to_string_filter(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    let date = to_date(value, "date_to_string")?;
    Ok(Value::String(strftime::format(&date, "%Y/%m/%d %I:%M:%S")))
}

fn xml_escape_filter(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    match value {
        Value::String(text) => Ok(Value::String(xml::escape(text))),
        other => Err(tera::Error::msg(format!(
            "xml_escape: expected a string, got {other}"
        ))),
    }
}

fn strip_html_filter(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    match value {
        Value::String(text) => Ok(Value::String(xml::strip_tags(text))),
        other => Err(tera::Error::msg(format!(
            "strip_html: expected a string, got {other}"
        ))),
    }
}

/// Usage: `{% for post in site.posts | limit(n=25) %}`
fn limit_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let limit = args
        .get("n")
        .and_then(Value::as_u64)
        .ok_or_else(|| tera::Error::msg("limit: missing integer argument `n`"))? as usize;

    match value {
        Value::Array(items) => Ok(Value::Array(items.iter().take(limit).cloned().collect())),
        Value::String(_) => Ok(value.clone()),
        other => Err(tera::Error::msg(format!(
            "limit: cannot limit {other}"
        ))),
    }
}
