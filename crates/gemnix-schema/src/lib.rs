//! Lockfile parsing, dependency declarations, and the gemset data model for gemnix.
//!
//! This crate defines the schema layer: the Bundler lockfile parser
//! (`Lockfile`), the TOML visibility declaration (`Declaration`) that
//! yields `DirectDependency` values, the output model (`Gemset`,
//! `PackageDescriptor`), the Nix expression writer, and a reader for
//! previously written gemsets.

pub mod declaration;
pub mod gemset;
pub mod lockfile;
pub mod nix;
pub mod reader;
pub mod types;

pub use declaration::{
    direct_dependencies, parse_declaration_file, parse_declaration_str, Declaration,
    DeclarationError, DirectDependency, FetchSection, GemSection,
};
pub use gemset::{Gemset, PackageDescriptor, PlatformAlias, SourceDescriptor, TargetDescriptor};
pub use lockfile::{
    DependencyEdge, GemSource, LockedDependency, Lockfile, LockfileError, ResolvedSpec,
};
pub use nix::{render_gemset, write_gemset_file};
pub use reader::{parse_gemset, read_gemset_file, GemsetReadError};
pub use types::{ContentHash, Revision};

/// Package name of the bootstrapping tool. It is implicitly satisfied by the
/// host environment and never fetched.
pub const BUNDLER: &str = "bundler";

/// Group every directly declared gem belongs to unless told otherwise.
pub const DEFAULT_GROUP: &str = "default";

/// Platform family meaning "no platform restriction".
pub const ALL_PLATFORMS: &str = "all";

/// Platform token of portable (non-native) gems.
pub const RUBY_PLATFORM: &str = "ruby";
