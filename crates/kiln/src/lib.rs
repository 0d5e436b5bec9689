pub mod config;
pub mod error;
pub mod parsing;
pub mod permalink;
pub mod render;
pub mod site;
pub mod sitemap;
pub mod strftime;
pub mod template;
pub mod types;
pub mod watch;
pub mod xml;

pub use config::*;
pub use error::*;
pub use parsing::*;
pub use permalink::*;
pub use render::*;
pub use site::*;
pub use sitemap::*;
pub use template::*;
pub use types::*;
pub use watch::*;
