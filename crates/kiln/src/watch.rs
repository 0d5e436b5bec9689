//! Serve-mode incremental rebuilds.
//!
//! Each filesystem event is classified into a single `(source, destination)`
//! pair, pushed through a one-slot [`Debouncer`], and re-rendered on its own.
//! The site model from the initial build is reused as-is, so new posts show
//! up on disk but not in listings until the next full build.

use crate::config::Config;
use crate::error::Result;
use crate::parsing::extract_frontmatter;
use crate::permalink::PermalinkResolver;
use crate::render::BuildContext;
use crate::site::is_hidden;
use crate::types::SiteModel;
use log::{debug, error, info};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, channel};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use walkdir::WalkDir;

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Holds at most one pending item. Every push replaces the pending item and
/// restarts the window; the item fires once the window passes untouched.
#[derive(Debug)]
pub struct Debouncer<T> {
    window: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    pub fn push(&mut self, item: T, now: Instant) {
        self.pending = Some((item, now + self.window));
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }

    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match self.deadline() {
            Some(deadline) if deadline <= now => self.pending.take().map(|(item, _)| item),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildTarget {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Maps a changed path to the file it should be rebuilt into, or `None` if
/// the event should be ignored. `config` must hold canonical roots.
pub fn classify(config: &Config, path: &Path) -> Option<RebuildTarget> {
    let path = fs::canonicalize(path).ok()?;

    if path.starts_with(&config.destination) || !path.is_file() {
        return None;
    }

    let permalinks = PermalinkResolver::new(config);
    let is_post = permalinks.is_post(&path);

    if !is_post {
        let relative = path.strip_prefix(&config.source).ok()?;
        if relative.components().any(is_hidden_component) {
            return None;
        }
    } else if !config.is_convertible(&path)
        || path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with('.'))
    {
        return None;
    }

    // a half-written file fails here and is picked up by the next event
    let frontmatter = if config.is_convertible(&path) {
        let text = fs::read_to_string(&path).ok()?;
        extract_frontmatter(&text, &path, config.is_markdown(&path))
            .ok()?
            .0
    } else {
        Default::default()
    };

    let destination = if is_post {
        permalinks.to_post(&path, &frontmatter)
    } else {
        permalinks.to_page(&path).ok()?
    };

    Some(RebuildTarget {
        source: path,
        destination,
    })
}

fn is_hidden_component(component: Component<'_>) -> bool {
    match component {
        Component::Normal(name) => name
            .to_str()
            .is_some_and(|name| name.starts_with('.') || name.starts_with('_')),
        _ => false,
    }
}

/// Renders one target against the site model of the last full build.
pub fn rebuild(config: &Config, site: &SiteModel, target: &RebuildTarget) -> Result<Option<PathBuf>> {
    let mut context = BuildContext::for_site(config, site)?;
    context.convert_file(&target.source, &target.destination)
}

/// Replaces the configured roots with their canonical forms so they compare
/// equal to the canonical paths in filesystem events.
pub fn canonicalize_roots(config: &mut Config) {
    for root in [
        &mut config.source,
        &mut config.destination,
        &mut config.posts,
        &mut config.data,
        &mut config.includes,
        &mut config.layouts,
    ] {
        if let Ok(canonical) = fs::canonicalize(&*root) {
            *root = canonical;
        }
    }
}

pub struct WatchLoop {
    config: Config,
    site: SiteModel,
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
    window: Duration,
}

impl WatchLoop {
    /// Registers watches on every visible directory of the source tree and,
    /// recursively, on the posts directory.
    pub fn new(mut config: Config, site: SiteModel) -> Result<Self> {
        canonicalize_roots(&mut config);

        let (sender, events) = channel();
        let mut watcher = notify::recommended_watcher(sender)?;

        let walker = WalkDir::new(&config.source)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !(is_hidden(entry) || entry.path() == config.destination)
            });

        for entry in walker.filter_map(|entry| entry.ok()) {
            if entry.file_type().is_dir() {
                watcher.watch(entry.path(), RecursiveMode::NonRecursive)?;
                debug!("watching {}", entry.path().display());
            }
        }

        if config.posts.is_dir() {
            watcher.watch(&config.posts, RecursiveMode::Recursive)?;
            debug!("watching {}", config.posts.display());
        }

        Ok(Self {
            config,
            site,
            _watcher: watcher,
            events,
            window: DEBOUNCE_WINDOW,
        })
    }

    /// Blocks until the watcher shuts down. `on_rebuild` receives each
    /// written output path.
    pub fn run(self, mut on_rebuild: impl FnMut(&Path)) {
        let mut debouncer = Debouncer::new(self.window);

        loop {
            let received = match debouncer.deadline() {
                Some(deadline) => self
                    .events
                    .recv_timeout(deadline.saturating_duration_since(Instant::now())),
                None => self
                    .events
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };

            match received {
                Ok(Ok(event)) => {
                    if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        for path in &event.paths {
                            if let Some(target) = classify(&self.config, path) {
                                debouncer.push(target, Instant::now());
                            }
                        }
                    }
                }
                Ok(Err(watch_error)) => error!("watch error: {watch_error}"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if let Some(target) = debouncer.poll(Instant::now()) {
                match rebuild(&self.config, &self.site, &target) {
                    Ok(Some(written)) => {
                        info!("{} => {}", target.source.display(), written.display());
                        on_rebuild(&written);
                    }
                    Ok(None) => {}
                    Err(rebuild_error) => error!("{rebuild_error}"),
                }
            }
        }
    }

    pub fn spawn(self, on_rebuild: impl FnMut(&Path) + Send + 'static) -> JoinHandle<()> {
        std::thread::spawn(move || self.run(on_rebuild))
    }
}
