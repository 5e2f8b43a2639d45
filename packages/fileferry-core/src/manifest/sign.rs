//! The manifest signer (C2): packages a walked file tree with aggregate
//! metadata and signs it with an ephemeral per-session keypair.

use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};

use crate::error::{Error, Result};
use crate::manifest::node::FileNode;
use crate::time::now_timestamp;

/// Default RSA modulus size for the ephemeral per-session signing keypair.
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Aggregate stats embedded in a [`SignedManifest`] and covered by the
/// signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestMetadata {
    pub total_files: u64,
    pub total_dirs: u64,
    pub total_size: u64,
    pub created_at: i64,
    pub signed_at: i64,
    pub version: String,
}

/// A file manifest bound to an ephemeral keypair by an asymmetric
/// signature over its canonical serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedManifest {
    pub files: Vec<FileNode>,
    pub directories: Vec<FileNode>,
    pub root_nodes: Vec<FileNode>,
    pub metadata: ManifestMetadata,
    /// SPKI-encoded public key, base64.
    pub public_key: String,
    /// Signature bytes, base64.
    pub signature: String,
}

/// What gets hashed and signed — deliberately excludes `public_key` and
/// `signature` themselves, and uses `metadata.signed_at` as embedded
/// rather than recomputed "now" so verification is a pure function of the
/// manifest's bytes.
#[derive(Serialize)]
struct CanonicalPayload<'a> {
    files: &'a [FileNode],
    directories: &'a [FileNode],
    root_nodes: &'a [FileNode],
    total_files: u64,
    total_dirs: u64,
    total_size: u64,
    signed_at: i64,
}

fn canonical_bytes(
    files: &[FileNode],
    directories: &[FileNode],
    root_nodes: &[FileNode],
    metadata: &ManifestMetadata,
) -> Result<Vec<u8>> {
    let payload = CanonicalPayload {
        files,
        directories,
        root_nodes,
        total_files: metadata.total_files,
        total_dirs: metadata.total_dirs,
        total_size: metadata.total_size,
        signed_at: metadata.signed_at,
    };
    serde_json::to_vec(&payload)
        .map_err(|e| Error::Internal(format!("failed to serialize manifest payload: {e}")))
}

/// Flattens a tree of root nodes into parallel `files`/`directories` lists
/// (depth-first, including the roots themselves).
fn flatten(root_nodes: &[FileNode]) -> (Vec<FileNode>, Vec<FileNode>) {
    let mut files = Vec::new();
    let mut directories = Vec::new();
    for root in root_nodes {
        for node in root.iter() {
            if node.is_dir {
                directories.push(node.clone());
            } else {
                files.push(node.clone());
            }
        }
    }
    (files, directories)
}

/// Builds and signs a manifest from the given root nodes (as produced by
/// [`crate::manifest::node::walk_roots`]). Generates a fresh ephemeral
/// RSA-2048 keypair; the private key is not returned — a signer exists for
/// the lifetime of one sign operation.
pub fn sign(root_nodes: Vec<FileNode>) -> Result<SignedManifest> {
    let (files, directories) = flatten(&root_nodes);
    let total_size = root_nodes.iter().map(|n| n.size as u64).sum();
    let now = now_timestamp();

    let metadata = ManifestMetadata {
        total_files: files.len() as u64,
        total_dirs: directories.len() as u64,
        total_size,
        created_at: now,
        signed_at: now,
        version: "1.0".to_string(),
    };

    let mut rng = OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, DEFAULT_KEY_BITS)
        .map_err(|e| Error::Internal(format!("failed to generate signing key: {e}")))?;
    let public_key = RsaPublicKey::from(&private_key);

    let payload = canonical_bytes(&files, &directories, &root_nodes, &metadata)?;
    let digest = Sha256::digest(&payload);
    let signature = private_key
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|e| Error::Internal(format!("failed to sign manifest: {e}")))?;

    let public_key_der = public_key
        .to_public_key_der()
        .map_err(|e| Error::Internal(format!("failed to encode public key: {e}")))?;

    Ok(SignedManifest {
        files,
        directories,
        root_nodes,
        metadata,
        public_key: B64.encode(public_key_der.as_bytes()),
        signature: B64.encode(&signature),
    })
}

/// Verifies a manifest's signature against its embedded public key,
/// recomputing the canonical serialization using `metadata.signed_at` as
/// embedded (never "now"). Returns `Ok(())` on success, `InvalidSignature`
/// on any mismatch (bad key encoding, wrong algorithm, or verification
/// failure).
pub fn verify(manifest: &SignedManifest) -> Result<()> {
    let public_key_der = B64.decode(&manifest.public_key)
    .map_err(|e| Error::InvalidSignature(format!("bad public key encoding: {e}")))?;

    let public_key = RsaPublicKey::from_public_key_der(&public_key_der)
        .map_err(|e| Error::InvalidSignature(format!("not a valid SPKI RSA key: {e}")))?;

    let signature = B64.decode(&manifest.signature)
    .map_err(|e| Error::InvalidSignature(format!("bad signature encoding: {e}")))?;

    let payload = canonical_bytes(
        &manifest.files,
        &manifest.directories,
        &manifest.root_nodes,
        &manifest.metadata,
    )?;
    let digest = Sha256::digest(&payload);

    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
        .map_err(|_| Error::InvalidSignature("signature does not match manifest contents".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::node::walk_roots;
    use std::fs;
    use tempfile::tempdir;

    fn sample_manifest() -> SignedManifest {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        fs::write(dir.path().join("b.txt"), b"world").unwrap();
        let roots = walk_roots(&[dir.path().to_path_buf()]).unwrap();
        sign(roots).unwrap()
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let manifest = sample_manifest();
        assert!(verify(&manifest).is_ok());
    }

    #[test]
    fn empty_manifest_is_legal() {
        let manifest = sign(Vec::new()).unwrap();
        assert_eq!(manifest.metadata.total_files, 0);
        assert!(verify(&manifest).is_ok());
    }

    #[test]
    fn tampering_with_files_breaks_verification() {
        let mut manifest = sample_manifest();
        if let Some(first) = manifest.files.first_mut() {
            first.size += 1;
        }
        assert!(matches!(verify(&manifest), Err(Error::InvalidSignature(_))));
    }

    #[test]
    fn tampering_with_signed_at_breaks_verification() {
        let mut manifest = sample_manifest();
        manifest.metadata.signed_at += 1;
        assert!(matches!(verify(&manifest), Err(Error::InvalidSignature(_))));
    }

    #[test]
    fn tampering_with_signature_breaks_verification() {
        let mut manifest = sample_manifest();
        manifest.signature = B64.encode(b"not a real signature");
        assert!(matches!(verify(&manifest), Err(Error::InvalidSignature(_))));
    }

    #[test]
    fn tampering_with_directories_breaks_verification() {
        let mut manifest = sample_manifest();
        if let Some(dir) = manifest.directories.first_mut() {
            dir.checksum = "deadbeef".to_string();
        } else {
            // No directories in this fixture; fall back to mutating root.
            manifest.root_nodes[0].checksum = "deadbeef".to_string();
        }
        assert!(matches!(verify(&manifest), Err(Error::InvalidSignature(_))));
    }
}
