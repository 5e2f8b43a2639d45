//! The file tree walker (C1): builds an immutable tree of [`FileNode`]s with
//! per-file and per-directory content hashes.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Separator joining `childName:childChecksum` pairs when hashing a
/// directory's contents. Chosen to be unlikely inside a filename and to
/// keep the digest input unambiguous between pairs.
const DIR_HASH_SEPARATOR: &str = "\u{1f}";

/// Bytes read per chunk while hashing file contents, independent of the
/// wire chunk size used by the transfer engine (§4.3).
const HASH_READ_BUF: usize = 64 * 1024;

/// A node in the manifest tree.
///
/// A node is either a file (`is_dir = false`, no `children`, has
/// `mime_type`) or a directory (`is_dir = true`, `children` populated,
/// sorted by name, no `mime_type`). `path` is the absolute local path used
/// while walking and chunking; it is never serialized onto the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileNode {
    pub name: String,
    pub is_dir: bool,
    pub size: i64,
    pub mime_type: Option<String>,
    pub checksum: String,
    pub children: Vec<FileNode>,
    #[serde(skip)]
    pub path: PathBuf,
}

impl FileNode {
    /// Depth-first iterator over this node and all descendants.
    pub fn iter(&self) -> impl Iterator<Item = &FileNode> {
        FileNodeIter { stack: vec![self] }
    }
}

struct FileNodeIter<'a> {
    stack: Vec<&'a FileNode>,
}

impl<'a> Iterator for FileNodeIter<'a> {
    type Item = &'a FileNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        for child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some(node)
    }
}

/// Pairs each file (non-directory) descendant of `root_nodes` with its
/// path relative to the roots, so a sender can tell a receiver where a
/// nested file belongs under its output directory. The root's own name is
/// the leading path segment, so a root directory `photos` containing
/// `vacation/spain.jpg` yields `photos/vacation/spain.jpg` — built purely
/// from `name`s (not the local absolute `path`), the same way
/// `hash_directory` derives a directory's checksum.
pub fn relative_file_paths(root_nodes: &[FileNode]) -> Vec<(PathBuf, &FileNode)> {
    let mut out = Vec::new();
    for root in root_nodes {
        collect_relative(root, PathBuf::from(&root.name), &mut out);
    }
    out
}

fn collect_relative<'a>(
    node: &'a FileNode,
    relative: PathBuf,
    out: &mut Vec<(PathBuf, &'a FileNode)>,
) {
    if node.is_dir {
        for child in &node.children {
            collect_relative(child, relative.join(&child.name), out);
        }
    } else {
        out.push((relative, node));
    }
}

/// Walks each of `roots` and returns one [`FileNode`] per root, in the
/// order given. Fails only if a root itself cannot be stat'd; unreadable
/// descendants are skipped with a `tracing::warn!`.
pub fn walk_roots(roots: &[PathBuf]) -> Result<Vec<FileNode>> {
    roots.iter().map(|root| walk_one(root)).collect()
}

fn walk_one(path: &Path) -> Result<FileNode> {
    let meta = fs::symlink_metadata(path).map_err(|e| {
        Error::Io(format!("cannot stat {}: {e}", path.display()))
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());

    if meta.is_dir() {
        Ok(walk_dir(path, name)?)
    } else {
        Ok(walk_file(path, name)?)
    }
}

fn walk_file(path: &Path, name: String) -> Result<FileNode> {
    let (size, checksum) = hash_file(path)?;
    let mime_type = sniff_mime(path);
    Ok(FileNode {
        name,
        is_dir: false,
        size,
        mime_type: Some(mime_type),
        checksum,
        children: Vec::new(),
        path: path.to_path_buf(),
    })
}

fn walk_dir(path: &Path, name: String) -> Result<FileNode> {
    let mut children = Vec::new();
    let entries = match fs::read_dir(path) {
        Ok(e) => e,
        Err(e) => {
            return Err(Error::Io(format!("cannot read dir {}: {e}", path.display())))
        }
    };
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("skipping unreadable entry under {}: {e}", path.display());
                continue;
            }
        };
        match walk_one(&entry.path()) {
            Ok(node) => children.push(node),
            Err(e) => {
                tracing::warn!("skipping {}: {e}", entry.path().display());
            }
        }
    }
    children.sort_by(|a, b| a.name.cmp(&b.name));

    let size = children.iter().map(|c| c.size).sum();
    let checksum = hash_directory(&children);

    Ok(FileNode {
        name,
        is_dir: true,
        size,
        mime_type: None,
        checksum,
        children,
        path: path.to_path_buf(),
    })
}

fn hash_file(path: &Path) -> Result<(i64, String)> {
    let mut file = fs::File::open(path)
        .map_err(|e| Error::Io(format!("cannot open {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_READ_BUF];
    let mut total: i64 = 0;
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::Io(format!("cannot read {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as i64;
    }
    Ok((total, hex::encode(hasher.finalize())))
}

/// Digests `childName:childChecksum` pairs (children already sorted by
/// name) joined by [`DIR_HASH_SEPARATOR`], so the result is invariant under
/// permutation of the original directory listing and changes iff a child's
/// name or checksum changes.
fn hash_directory(sorted_children: &[FileNode]) -> String {
    let mut hasher = Sha256::new();
    let joined = sorted_children
        .iter()
        .map(|c| format!("{}:{}", c.name, c.checksum))
        .collect::<Vec<_>>()
        .join(DIR_HASH_SEPARATOR);
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

fn sniff_mime(path: &Path) -> String {
    match infer::get_from_path(path) {
        Ok(Some(kind)) => kind.mime_type().to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn single_file_has_content_checksum() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("hello.txt");
        fs::write(&file_path, b"hello world").unwrap();

        let node = walk_one(&file_path).unwrap();
        assert!(!node.is_dir);
        assert_eq!(node.size, 11);
        assert_eq!(node.mime_type.as_deref(), Some("application/octet-stream"));
        assert_eq!(
            node.checksum,
            hex::encode(Sha256::digest(b"hello world"))
        );
    }

    #[test]
    fn directory_checksum_is_permutation_invariant() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let node = walk_one(dir.path()).unwrap();
        assert!(node.is_dir);
        assert_eq!(node.children[0].name, "a.txt");
        assert_eq!(node.children[1].name, "b.txt");

        // Reordering the on-disk listing doesn't change the result because
        // children are always sorted before hashing.
        let again = walk_one(dir.path()).unwrap();
        assert_eq!(node.checksum, again.checksum);
    }

    #[test]
    fn directory_checksum_changes_when_child_changes() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let before = walk_one(dir.path()).unwrap().checksum;

        fs::write(dir.path().join("a.txt"), b"a-modified").unwrap();
        let after = walk_one(dir.path()).unwrap().checksum;

        assert_ne!(before, after);
    }

    #[test]
    fn directory_size_is_sum_of_descendants() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"12345").unwrap();
        fs::write(dir.path().join("b.txt"), b"1234567890").unwrap();

        let node = walk_one(dir.path()).unwrap();
        assert_eq!(node.size, 15);
    }

    #[test]
    fn unreadable_descendant_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("ok.txt"), b"fine").unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("inner.txt"), b"inner").unwrap();

        let node = walk_one(dir.path()).unwrap();
        assert_eq!(node.children.len(), 2);
    }

    #[test]
    fn missing_root_is_fatal() {
        let err = walk_one(Path::new("/nonexistent/path/for/fileferry-test"));
        assert!(err.is_err());
    }

    #[test]
    fn iter_visits_every_descendant() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("b.txt"), b"b").unwrap();

        let node = walk_one(dir.path()).unwrap();
        assert_eq!(node.iter().count(), 4); // root dir, a.txt, sub dir, b.txt
    }

    #[test]
    fn relative_file_paths_preserves_nesting_and_root_name() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("photos");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("cover.jpg"), b"cover").unwrap();
        let sub = root.join("vacation");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("spain.jpg"), b"spain").unwrap();

        let node = walk_one(&root).unwrap();
        let pairs = relative_file_paths(std::slice::from_ref(&node));
        let mut relatives: Vec<String> = pairs
            .iter()
            .map(|(rel, _)| rel.to_string_lossy().into_owned())
            .collect();
        relatives.sort();

        assert_eq!(
            relatives,
            vec!["photos/cover.jpg", "photos/vacation/spain.jpg"]
        );
    }

    #[test]
    fn relative_file_paths_skips_directory_nodes() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();

        let node = walk_one(dir.path()).unwrap();
        let pairs = relative_file_paths(std::slice::from_ref(&node));
        assert_eq!(pairs.len(), 1);
        assert!(!pairs[0].1.is_dir);
    }
}
