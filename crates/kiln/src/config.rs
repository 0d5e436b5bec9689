use crate::error::{IoContext, KilnError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "_config.yml";
pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_MARKDOWN_EXT: &str = "md,mkd,markdown";

/// How post URLs are derived when a post has no explicit `permalink`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum PermalinkStyle {
    #[default]
    Date,
    Pretty,
    None,
    Custom(String),
}

impl PermalinkStyle {
    pub fn pattern(&self) -> &str {
        match self {
            PermalinkStyle::Date => "/:categories/:year/:month/:day/:title.html",
            PermalinkStyle::Pretty => "/:categories/:year/:month/:day/:title/",
            PermalinkStyle::None => "/:categories/:title.html",
            PermalinkStyle::Custom(pattern) => pattern,
        }
    }
}

impl From<String> for PermalinkStyle {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" | "date" => PermalinkStyle::Date,
            "pretty" => PermalinkStyle::Pretty,
            "none" => PermalinkStyle::None,
            _ => PermalinkStyle::Custom(value),
        }
    }
}

/// An external converter: files with the keyed extension are handed to
/// `command` (a template over `from` and `to`) and written with `ext`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConversionRule {
    pub ext: String,
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub baseurl: String,
    pub title: String,
    pub name: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub posts: PathBuf,
    pub data: PathBuf,
    pub includes: PathBuf,
    pub layouts: PathBuf,
    pub permalink: PermalinkStyle,
    pub exclude: Vec<String>,
    pub host: String,
    pub port: u16,
    pub limit_posts: usize,
    pub markdown_ext: String,
    pub paginate: usize,
    pub conversion: BTreeMap<String, ConversionRule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baseurl: String::new(),
            title: String::new(),
            name: String::new(),
            source: PathBuf::from("."),
            destination: PathBuf::from("_site"),
            posts: PathBuf::from("_posts"),
            data: PathBuf::from("_data"),
            includes: PathBuf::from("_includes"),
            layouts: PathBuf::from("_layouts"),
            permalink: PermalinkStyle::Date,
            exclude: Vec::new(),
            host: String::new(),
            port: DEFAULT_PORT,
            limit_posts: 0,
            markdown_ext: DEFAULT_MARKDOWN_EXT.to_string(),
            paginate: 0,
            conversion: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Reads and deserializes a YAML config file. Paths are left as written;
    /// call [`Config::resolve_paths`] once any command-line overrides are applied.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KilnError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path).io_context("reading config", path)?;
        Self::from_yaml(&content, path)
    }

    pub fn from_yaml(content: &str, path: &Path) -> Result<Self> {
        let mut config: Config = if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yml::from_str(content).map_err(|error| KilnError::YamlParse {
                path: path.to_path_buf(),
                message: error.to_string(),
            })?
        };

        if config.title.is_empty() {
            config.title = config.name.clone();
        }
        if config.port == 0 {
            config.port = DEFAULT_PORT;
        }
        if config.markdown_ext.trim().is_empty() {
            config.markdown_ext = DEFAULT_MARKDOWN_EXT.to_string();
        }

        Ok(config)
    }

    /// Makes every directory absolute. `source` and `destination` are taken
    /// relative to `base`; the posts, data, includes and layouts directories
    /// are taken relative to the source root.
    pub fn resolve_paths(&mut self, base: &Path) {
        self.source = normalize(&base.join(&self.source));
        self.destination = normalize(&base.join(&self.destination));
        self.posts = normalize(&self.source.join(&self.posts));
        self.data = normalize(&self.source.join(&self.data));
        self.includes = normalize(&self.source.join(&self.includes));
        self.layouts = normalize(&self.source.join(&self.layouts));
    }

    /// Rewrites a non-empty `baseurl` so that it points at the local preview
    /// server.
    pub fn for_serve(mut self) -> Self {
        if self.baseurl.is_empty() {
            return self;
        }

        if let Ok(mut parsed) = url::Url::parse(&self.baseurl) {
            let host = if self.host.is_empty() {
                "localhost"
            } else {
                self.host.as_str()
            };
            if parsed.set_host(Some(host)).is_ok() && parsed.set_port(Some(self.port)).is_ok() {
                self.baseurl = parsed.to_string();
            }
        }

        self
    }

    pub fn bind_host(&self) -> &str {
        if self.host.is_empty() {
            "127.0.0.1"
        } else {
            &self.host
        }
    }

    pub fn markdown_extensions(&self) -> impl Iterator<Item = &str> {
        self.markdown_ext
            .split(',')
            .map(str::trim)
            .filter(|extension| !extension.is_empty())
    }

    pub fn is_markdown(&self, path: &Path) -> bool {
        match extension(path) {
            Some(extension) => self
                .markdown_extensions()
                .any(|candidate| candidate == extension),
            None => false,
        }
    }

    pub fn is_convertible(&self, path: &Path) -> bool {
        if self.is_markdown(path) {
            return true;
        }
        match extension(path) {
            Some("html") | Some("xml") => true,
            Some(extension) => self.conversion.contains_key(extension),
            None => false,
        }
    }

    pub fn conversion_for(&self, path: &Path) -> Option<&ConversionRule> {
        extension(path).and_then(|extension| self.conversion.get(extension))
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        let path = path.to_string_lossy().replace('\\', "/");
        self.exclude
            .iter()
            .filter(|suffix| !suffix.is_empty())
            .any(|suffix| path.ends_with(suffix.as_str()))
    }
}

pub(crate) fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|extension| extension.to_str())
}

fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}
