//! Default collaborators for pundle.
//!
//! - [`FsResolver`] resolves relative, absolute and `node_modules` requests.
//! - [`ImportScanner`] registers the imports and dynamic chunks it finds in
//!   `js` and `css` sources.
//! - [`ConcatGenerator`] writes a chunk as the concatenation of its files.
//!
//! ```no_run
//! use std::sync::Arc;
//! use indexmap::IndexMap;
//! use pundle_core::{Context, Master};
//!
//! # async fn run() -> pundle_core::Result<()> {
//! let ctx = Arc::new(Context::native("/project"));
//! let extensions: IndexMap<String, String> =
//!     [("js".to_string(), "js".to_string())].into_iter().collect();
//! let master = pundle_components::install(Master::builder(ctx), extensions)
//!     .entry("./src/index.js")
//!     .build()?;
//! let generated = master.execute().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use indexmap::IndexMap;
use pundle_core::MasterBuilder;

pub mod generator;
pub mod resolver;
pub mod scanner;

pub use generator::ConcatGenerator;
pub use resolver::{FsResolver, is_builtin};
pub use scanner::{ImportScanner, RequestKind, ScannedRequest, scan_css, scan_js};

/// Register the default resolver, scanner and generator.
pub fn install(builder: MasterBuilder, extensions: IndexMap<String, String>) -> MasterBuilder {
    builder
        .resolver(Arc::new(FsResolver::new(extensions)))
        .transformer(Arc::new(ImportScanner::new()))
        .generator(Arc::new(ConcatGenerator::new()))
}
