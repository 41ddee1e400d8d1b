use std::path::{Path, PathBuf};

/// A stored container, identified by a display name and its location on disk.
///
/// Nothing in this crate writes through an `Archive`; corruption always
/// targets a copy.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Archive {
    pub name: String,
    pub path: PathBuf,
}

impl Archive {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self { name: name.into(), path: path.into() }
    }

    /// Name defaults to the file name of `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { name, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
