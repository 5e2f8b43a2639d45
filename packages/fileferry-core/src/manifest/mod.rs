//! File tree walking (C1) and manifest signing (C2).

mod node;
mod sign;

pub use node::{relative_file_paths, walk_roots, FileNode};
pub use sign::{sign, verify, ManifestMetadata, SignedManifest, DEFAULT_KEY_BITS};
