//! # pundle-core
//!
//! Incremental build orchestration for the pundle bundler.
//!
//! The crate maintains a mutable module graph (a [`Job`]) of transformed
//! files and chunks, walks it concurrently with at most one in-flight
//! computation per file or chunk, rolls failed nodes back to their last good
//! state, and re-walks only the affected subgraph when files change.
//!
//! Resolution, transformation and generation are delegated to pluggable
//! collaborators ([`Resolver`], [`Transformer`], [`Generator`]) registered on
//! a [`Master`] through [`MasterBuilder`].

pub mod cache;
pub mod context;
pub mod error;
pub mod fs;
pub mod generator;
pub mod job;
pub mod keys;
pub mod master;
pub mod pool;
pub mod registry;
pub mod reporter;
pub mod resolver;
pub mod source_map;
pub mod transformer;
pub mod types;
pub mod watch;

pub use cache::{CacheEntry, CacheError, MemoryCache, PersistentCache, TransformCache};
pub use context::Context;
pub use error::{ErrorCode, ErrorKind, Location, PundleError, Result};
pub use fs::{FileStat, FileSystem, FsError, MemoryFileSystem, NativeFileSystem};
pub use generator::{Generator, GeneratorFacade, GeneratorOutput, OutputTemplates};
pub use job::Job;
pub use keys::{ChunkKey, FileKey, NodeKey};
pub use master::{JobTransformer, Master, MasterBuilder, WalkScope};
pub use pool::WorkerPool;
pub use registry::{Component, Registry};
pub use reporter::{CollectingReporter, Reporter, TracingReporter};
pub use resolver::{Resolution, ResolveHandle, ResolveOutcome, ResolveState, Resolver};
pub use source_map::SourceMapValue;
pub use transformer::{TransformApi, TransformInput, TransformOutput, Transformer};
pub use types::{Chunk, ChunkGenerated, ChunksGenerated, ImportResolved, ImportTransformed};
pub use watch::{
    ChangeSet, FsEvent, FsEventKind, GenerateHook, WatchController, WatchHandle, WatchState,
};
