//! Artifact discovery.
//!
//! A cache directory produced by the IR writer contains, for every test
//! program, the original bitcode `foo.bc` and the writer's textual output
//! `foo.out.ll`. Generated suites contain bare `qux.ll` modules. Each
//! discoverable file is a *pair-root*: the other paths involved in a
//! comparison are derived from it by suffix substitution.

use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

pub const TEXTUAL_SUFFIX: &str = ".ll";
pub const BINARY_SUFFIX: &str = ".bc";
pub const GENERATED_TEXTUAL_SUFFIX: &str = ".out.ll";
pub const GENERATED_BINARY_SUFFIX: &str = ".out.bc";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    ReferenceBinary,
    GeneratedTextual,
    GeneratedBinary,
}

impl ArtifactKind {
    pub fn of(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if name.ends_with(GENERATED_BINARY_SUFFIX) {
            Some(Self::GeneratedBinary)
        } else if name.ends_with(BINARY_SUFFIX) {
            Some(Self::ReferenceBinary)
        } else if name.ends_with(TEXTUAL_SUFFIX) {
            Some(Self::GeneratedTextual)
        } else {
            None
        }
    }

    pub fn needs_assembly(self) -> bool {
        matches!(self, Self::GeneratedTextual)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let kind = ArtifactKind::of(&path)?;
        Some(Self { path, kind })
    }
}

/// Which naming convention marks a pair-root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `foo.out.ll` next to its original `foo.bc`.
    Reassembly,
    /// Freshly generated `qux.ll` with no stored reference.
    SelfConsistency,
}

impl Layout {
    /// Derive the pair for `path`, or `None` if it is not a pair-root.
    pub fn pair_root(self, path: &Path) -> Option<ArtifactPair> {
        let name = path.file_name()?.to_str()?;
        match self {
            Layout::Reassembly => {
                let stem = name.strip_suffix(GENERATED_TEXTUAL_SUFFIX)?;
                Some(ArtifactPair {
                    root: path.to_path_buf(),
                    reference: Some(path.with_file_name(format!("{stem}{BINARY_SUFFIX}"))),
                })
            }
            Layout::SelfConsistency => {
                if name.ends_with(GENERATED_TEXTUAL_SUFFIX) {
                    return None;
                }
                name.strip_suffix(TEXTUAL_SUFFIX)?;
                Some(ArtifactPair {
                    root: path.to_path_buf(),
                    reference: None,
                })
            }
        }
    }
}

/// All paths taking part in one comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPair {
    /// The discovered textual module.
    pub root: PathBuf,
    /// Stored original binary, when the layout has one.
    pub reference: Option<PathBuf>,
}

/// Path the assembler produces for a textual module (`x.ll` → `x.bc`).
pub fn assembled_path(textual: &Path) -> PathBuf {
    let name = textual
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(TEXTUAL_SUFFIX).unwrap_or(&name);
    textual.with_file_name(format!("{stem}{BINARY_SUFFIX}"))
}

/// Lazily walk `root` and yield every pair-root for `layout`.
///
/// Each call starts a fresh walk. Unreadable entries are logged and skipped.
pub fn discover(root: &Path, layout: Layout) -> impl Iterator<Item = ArtifactPair> {
    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(move |entry| layout.pair_root(entry.path()))
}
