//! Sequentially numbered capture files.
//!
//! A burst is stored as `capture_{n}_cam{i}.jpg` per camera slot plus
//! `capture_{n}_grid.jpg`, where `n` is one more than the highest number
//! already present in the directory.

use crate::error::StorageError;
use crate::imaging;
use crate::manager::CapturedImage;
use image::RgbImage;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const PREFIX: &str = "capture_";
const EXTENSION: &str = ".jpg";
const GRID_SUFFIX: &str = "_grid.jpg";

/// JPEG quality of saved captures.
pub const CAPTURE_QUALITY: u8 = 95;

/// File names written for one burst.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedCapture {
    /// Capture number shared by every file of the burst.
    pub number: u64,
    /// Per-camera file names in slot order.
    pub filenames: Vec<String>,
    /// Grid file name, when a grid was saved.
    pub grid_filename: Option<String>,
}

/// Capture directory.
#[derive(Debug, Clone)]
pub struct CaptureStore {
    dir: PathBuf,
}

impl CaptureStore {
    /// Open `dir`, creating it if needed.
    pub fn new(dir: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)?;
        debug!(dir = %dir.display(), "capture store ready");
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Capture directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn capture_files(&self) -> Result<Vec<(u64, String)>, StorageError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let Ok(name) = entry?.file_name().into_string() else {
                continue;
            };
            if let Some(number) = capture_number(&name) {
                files.push((number, name));
            }
        }
        Ok(files)
    }

    /// Number the next burst will use; 1 for an empty directory.
    pub fn next_capture_number(&self) -> Result<u64, StorageError> {
        let highest = self
            .capture_files()?
            .into_iter()
            .map(|(number, _)| number)
            .max()
            .unwrap_or(0);
        Ok(highest.saturating_add(1))
    }

    /// Write every image of a burst and, if given, its grid.
    pub fn save_burst(
        &self,
        images: &[CapturedImage],
        grid: Option<&RgbImage>,
    ) -> Result<SavedCapture, StorageError> {
        let number = self.next_capture_number()?;

        let mut filenames = Vec::with_capacity(images.len());
        for (slot, captured) in images.iter().enumerate() {
            let name = format!("{PREFIX}{number}_cam{slot}{EXTENSION}");
            self.write(&name, &captured.image)?;
            filenames.push(name);
        }

        let grid_filename = match grid {
            Some(grid) => {
                let name = format!("{PREFIX}{number}{GRID_SUFFIX}");
                self.write(&name, grid)?;
                Some(name)
            }
            None => None,
        };

        info!(number, files = filenames.len(), grid = grid_filename.is_some(), "burst saved");
        Ok(SavedCapture {
            number,
            filenames,
            grid_filename,
        })
    }

    /// Encode `image` as JPEG at `path`, outside the numbering scheme.
    pub fn save_image(&self, path: &Path, image: &RgbImage) -> Result<(), StorageError> {
        fs::write(path, imaging::encode_jpeg(image, CAPTURE_QUALITY)?)?;
        Ok(())
    }

    fn write(&self, name: &str, image: &RgbImage) -> Result<(), StorageError> {
        let path = self.dir.join(name);
        self.save_image(&path, image)?;
        debug!(path = %path.display(), "capture written");
        Ok(())
    }

    /// Grid file of the highest-numbered capture, if any.
    pub fn latest_grid(&self) -> Result<Option<PathBuf>, StorageError> {
        Ok(self
            .capture_files()?
            .into_iter()
            .filter(|(_, name)| name.ends_with(GRID_SUFFIX))
            .max_by_key(|(number, _)| *number)
            .map(|(_, name)| self.dir.join(name)))
    }
}

/// Number `n` of a `capture_{n}_*.jpg` or `capture_{n}.jpg` file name.
fn capture_number(name: &str) -> Option<u64> {
    let stem = name.strip_prefix(PREFIX)?.strip_suffix(EXTENSION)?;
    let digits = stem.split_once('_').map_or(stem, |(number, _)| number);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
