use std::fs;
use std::path::{Path, PathBuf};

use crate::index::face_index::{flatten_index, FaceIndexReader, FileFaceIndex, IndexError};
use crate::shared::face::Face;

/// Reads a face index stored as a JSON array of per-file entries.
pub struct JsonFaceIndexReader {
    path: PathBuf,
}

impl JsonFaceIndexReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FaceIndexReader for JsonFaceIndexReader {
    fn read_faces(&self) -> Result<Vec<Face>, IndexError> {
        let bytes = fs::read(&self.path).map_err(|source| IndexError::Io {
            path: self.path.clone(),
            source,
        })?;
        let files: Vec<FileFaceIndex> =
            serde_json::from_slice(&bytes).map_err(|source| IndexError::Parse {
                path: self.path.clone(),
                source,
            })?;
        let faces = flatten_index(files);
        log::info!(
            "Loaded {} faces from {}",
            faces.len(),
            self.path.display()
        );
        Ok(faces)
    }
}
