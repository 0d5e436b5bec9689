use axum::Router;
use chrono::Local;
use kiln_ssg::{Config, SiteBuilder, SiteModel, WatchLoop};
use log::{error, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::broadcast;
use tower_http::services::ServeDir;

type CommandResult<T> = Result<T, Box<dyn std::error::Error>>;

const DEFAULT_POST_NAME: &str = "new-post";

const LAYOUT_DEFAULT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <link rel="stylesheet" href="/css/site.css" media="all">
    <title>{{ site.title }}</title>
</head>
<body>
{{ content }}
</body>
</html>
"#;

const LAYOUT_POST: &str = r#"---
layout: default
---
<h2>{{ page.title }}</h2>
<p class="meta">{{ page.date | date_to_string }}</p>

<div class="post">
{{ content }}
</div>
"#;

const CSS_SITE: &str = r#"body {
    font-family: sans-serif;
}

h1 {
    color: darkgreen;
}
"#;

const POST_WELCOME: &str = r#"---
layout: post
title: "Welcome to Kiln!"
---

You'll find this post in your `_posts` directory. Edit it and run
`kiln build`, or keep `kiln serve` running to see your changes live.

New posts go in `_posts` and follow the convention
`YYYY-MM-DD-name-of-post.md`. `kiln newpost name-of-post` creates one for you.

Code blocks work too:

```rust
fn main() {
    println!("Hello, world!");
}
```
"#;

const INDEX_PAGE: &str = r#"---
layout: default
title: Your New Kiln Site
---
<div id="home">
  <h1>Blog Posts</h1>
  <ul class="posts">
    {% for post in site.posts %}
      <li><span>{{ post.date | date_to_string }}</span> &raquo; <a href="{{ post.url }}">{{ post.title }}</a></li>
    {% endfor %}
  </ul>
</div>
"#;

const RSS_FEED: &str = r#"---
layout: nil
---
<?xml version="1.0" encoding="utf-8" ?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
  <channel>
    <title>{{ site.title | xml_escape }}</title>
    <link>{{ site.baseurl | xml_escape }}</link>
    <atom:link rel="self" type="application/rss+xml" href="{{ page.url | xml_escape }}" />
    <description>{{ site.title | xml_escape }}</description>
    <lastBuildDate>{{ site.time | date(format="%a, %d %b %Y %H:%M:%S %z") }}</lastBuildDate>
    {% for post in site.posts | limit(n=25) %}
    <item>
      <title>{{ post.title | xml_escape }}</title>
      <link>{{ post.url | xml_escape }}</link>
      <guid isPermaLink="true">{{ post.url | xml_escape }}</guid>
      <pubDate>{{ post.date | date(format="%a, %d %b %Y %H:%M:%S %z") }}</pubDate>
      <description>{{ post.content | xml_escape }}</description>
    </item>
    {% endfor %}
  </channel>
</rss>
"#;

const CONFIG_YML: &str = r#"name: Your New Kiln Site
permalink: date
"#;

/// Double-quoted YAML scalar for values written into generated front-matter.
fn yaml_quote(input: &str) -> String {
    let mut output = String::with_capacity(input.len() + 2);
    output.push('"');
    for character in input.chars() {
        match character {
            '\\' => output.push_str("\\\\"),
            '"' => output.push_str("\\\""),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            control if control < '\u{0020}' => {
                output.push_str(&format!("\\x{:02X}", control as u32));
            }
            other => output.push(other),
        }
    }
    output.push('"');
    output
}

/// Loads the config file and resolves every directory against the current
/// working directory, after applying command-line overrides.
pub fn load_config(
    path: &Path,
    source: Option<&Path>,
    destination: Option<&Path>,
) -> CommandResult<Config> {
    let mut config = Config::load(path)?;

    if let Some(source) = source {
        config.source = source.to_path_buf();
    }
    if let Some(destination) = destination {
        config.destination = destination.to_path_buf();
    }

    config.resolve_paths(&std::env::current_dir()?);
    Ok(config)
}

pub fn new_site(path: &Path) -> CommandResult<()> {
    if path.join(kiln_ssg::DEFAULT_CONFIG_FILE).exists() {
        return Err(format!("'{}' already contains a kiln site", path.display()).into());
    }

    for directory in ["_layouts", "_posts", "css"] {
        fs::create_dir_all(path.join(directory))?;
    }

    let welcome = format!("{}-welcome-to-kiln.md", Local::now().format("%Y-%m-%d"));
    let files: [(PathBuf, &str); 7] = [
        (path.join(kiln_ssg::DEFAULT_CONFIG_FILE), CONFIG_YML),
        (path.join("_layouts").join("default.html"), LAYOUT_DEFAULT),
        (path.join("_layouts").join("post.html"), LAYOUT_POST),
        (path.join("css").join("site.css"), CSS_SITE),
        (path.join("_posts").join(welcome), POST_WELCOME),
        (path.join("index.html"), INDEX_PAGE),
        (path.join("rss.xml"), RSS_FEED),
    ];

    for (file, content) in files {
        fs::write(file, content)?;
    }

    println!("Created new site: {}", path.display());
    println!("  cd {}", path.display());
    println!("  kiln serve");

    Ok(())
}

pub fn new_post(config: &Config, name: Option<&str>) -> CommandResult<PathBuf> {
    let name = name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_POST_NAME);
    let now = Local::now();

    let path = config
        .posts
        .join(format!("{}-{name}.md", now.format("%Y-%m-%d")));
    if path.exists() {
        return Err(format!("'{}' already exists", path.display()).into());
    }

    fs::create_dir_all(&config.posts)?;
    let content = format!(
        "---\nlayout: post\ntitle: {}\ndate: {}\n---\n\n",
        yaml_quote(name),
        now.format("%Y-%m-%d %H:%M:%S %z")
    );
    fs::write(&path, content)?;

    println!("Created {}", path.display());
    Ok(path)
}

pub fn build_site(config: &Config) -> CommandResult<SiteModel> {
    info!("Building site...");
    let start = Instant::now();

    let site = SiteBuilder::new(config).build()?;

    info!(
        "Built {} pages, {} posts to {} in {:.2?}",
        site.pages.len(),
        site.posts.len(),
        config.destination.display(),
        start.elapsed()
    );

    Ok(site)
}

pub async fn serve_site(config: Config, open_browser: bool) -> CommandResult<()> {
    let config = config.for_serve();
    let site = build_site(&config)?;

    let (reload_tx, _) = broadcast::channel::<()>(16);
    let watch_tx = reload_tx.clone();

    WatchLoop::new(config.clone(), site)?.spawn(move |_| {
        let _ = watch_tx.send(());
    });

    let livereload = tower_livereload::LiveReloadLayer::new();
    let reloader = livereload.reloader();

    let mut reload_rx = reload_tx.subscribe();
    tokio::spawn(async move {
        loop {
            match reload_rx.recv().await {
                Ok(()) => reloader.reload(),
                Err(broadcast::error::RecvError::Lagged(_)) => reloader.reload(),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let serve_dir = ServeDir::new(&config.destination).append_index_html_on_directories(true);
    let app = Router::new().fallback_service(serve_dir).layer(livereload);

    let listener = tokio::net::TcpListener::bind((config.bind_host(), config.port)).await?;
    let url = format!("http://{}", listener.local_addr()?);
    println!("Serving {} at {url}", config.destination.display());
    println!("Press Ctrl+C to stop");

    if open_browser && let Err(open_error) = open::that(&url) {
        error!("Failed to open browser: {open_error}");
    }

    axum::serve(listener, app).await?;

    Ok(())
}
