//! Output file naming for downloaded artifacts.
//!
//! Image-to-image results land next to their source image:
//! `{dir}/{source_stem}{suffix}{remote_ext}`, de-duplicated with `_1`,
//! `_2`, ... when the path is taken. Pure generations keep the server's
//! own filename inside the output directory.

use std::path::{Path, PathBuf};

/// Sub-directory of the output folder that pure generations are written to.
pub const GENERATED_DIR_NAME: &str = "generated";

/// Where the artifacts of one submission are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Next to the local source image the submission was made from.
    BesideSource(PathBuf),
    /// Inside a directory, under the server-assigned filename.
    Directory(PathBuf),
}

impl OutputTarget {
    /// Target for pure generation under `output_folder`.
    pub fn generated_in(output_folder: &Path) -> Self {
        Self::Directory(output_folder.join(GENERATED_DIR_NAME))
    }

    /// Resolve the final local path for a remote artifact.
    pub fn resolve(&self, remote_filename: &str, suffix: &str) -> PathBuf {
        let remote_name = sanitize_remote_name(remote_filename);
        match self {
            Self::BesideSource(source) => {
                beside_source_candidate(source, suffix, remote_name).unique()
            }
            Self::Directory(dir) => dir.join(remote_name),
        }
    }
}

/// A file name kept as `{base}{ext}` so numbering always lands between
/// the two, whatever dots `base` contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateName {
    pub dir: PathBuf,
    pub base: String,
    /// Extension including the leading dot, or `""`.
    pub ext: String,
}

impl CandidateName {
    pub fn new(dir: impl Into<PathBuf>, base: impl Into<String>, ext: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base: base.into(),
            ext: ext.into(),
        }
    }

    /// `{dir}/{base}{ext}`.
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}{}", self.base, self.ext))
    }

    /// The plain path, then `{base}_1{ext}`, `{base}_2{ext}`, ...
    pub fn numbered(&self) -> impl Iterator<Item = PathBuf> + '_ {
        std::iter::once(self.path()).chain(
            (1u32..).map(move |n| self.dir.join(format!("{}_{n}{}", self.base, self.ext))),
        )
    }

    /// First path of [`numbered`](Self::numbered) that does not exist.
    pub fn unique(&self) -> PathBuf {
        self.numbered()
            .find(|path| !path.exists())
            .unwrap_or_else(|| self.path())
    }
}

/// First-choice name for an image-to-image result. The server's
/// extension is used, not the source image's.
pub fn beside_source_candidate(
    source: &Path,
    suffix: &str,
    remote_filename: &str,
) -> CandidateName {
    let dir = source.parent().unwrap_or_else(|| Path::new(""));
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    CandidateName::new(dir, format!("{stem}{suffix}"), remote_extension(remote_filename))
}

/// Extension of a server filename including the leading dot, or `""`.
pub fn remote_extension(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => &filename[idx..],
        _ => "",
    }
}

/// Strip any directory components a server might put in a filename.
fn sanitize_remote_name(remote_filename: &str) -> &str {
    Path::new(remote_filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(remote_filename)
}
