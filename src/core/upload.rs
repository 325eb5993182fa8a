//! Results upload transport.
//!
//! The default transport copies a result directory into an upload root that
//! the results server watches, then writes and verifies a `SHA256SUMS`
//! manifest. The server imports the drop and reports back through the
//! `setuploadresult` command.

use crate::core::error::RunnerError;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

pub const CHECKSUM_MANIFEST: &str = "SHA256SUMS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Results,
    CodeCoverage,
}

impl UploadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadKind::Results => "results",
            UploadKind::CodeCoverage => "codecoverage",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub kind: UploadKind,
    pub suite: String,
    pub run_id: String,
    pub import_type: Option<String>,
    pub source: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub destination: PathBuf,
    pub files: usize,
    pub bytes: u64,
}

pub trait ResultsUploader: Send + Sync {
    fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, RunnerError>;
}

#[derive(Debug, Clone)]
pub struct DirectoryUploader {
    root: PathBuf,
}

impl DirectoryUploader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn destination(&self, request: &UploadRequest) -> PathBuf {
        self.root
            .join(request.kind.as_str())
            .join(request.import_type.as_deref().unwrap_or("default"))
            .join(&request.suite)
            .join(&request.run_id)
    }
}

pub fn sha256_file(path: &Path) -> Result<String, RunnerError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Regular files below `root`, relative, in sorted order.
fn walk_files(root: &Path) -> Result<Vec<PathBuf>, RunnerError> {
    let mut out = Vec::new();
    let mut pending = vec![PathBuf::new()];
    while let Some(rel) = pending.pop() {
        for entry in fs::read_dir(root.join(&rel))? {
            let entry = entry?;
            let rel_child = rel.join(entry.file_name());
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(rel_child);
            } else if file_type.is_file() {
                out.push(rel_child);
            }
        }
    }
    out.sort();
    Ok(out)
}

impl ResultsUploader for DirectoryUploader {
    fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, RunnerError> {
        if !request.source.is_dir() {
            return Err(RunnerError::server(format!(
                "upload source {} does not exist",
                request.source.display()
            )));
        }
        let dest = self.destination(request);
        fs::create_dir_all(&dest)?;

        let files = walk_files(&request.source)?;
        let mut manifest = String::new();
        let mut bytes = 0u64;
        for rel in &files {
            let from = request.source.join(rel);
            let to = dest.join(rel);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)?;
            }
            bytes += fs::copy(&from, &to)?;
            manifest.push_str(&format!("{}  {}\n", sha256_file(&from)?, rel.display()));
        }
        fs::write(dest.join(CHECKSUM_MANIFEST), &manifest)?;

        for line in manifest.lines() {
            let Some((digest, rel)) = line.split_once("  ") else {
                continue;
            };
            if sha256_file(&dest.join(rel))? != digest {
                return Err(RunnerError::server(format!(
                    "checksum mismatch after upload: {rel}"
                )));
            }
        }

        Ok(UploadReceipt {
            destination: dest,
            files: files.len(),
            bytes,
        })
    }
}
