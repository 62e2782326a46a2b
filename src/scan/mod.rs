//! Scan volumes
//!
//! Reading and writing single-file NIfTI-1 images and restricting a
//! timeseries to a window of frames.

pub mod nifti;
pub mod volume;

pub use nifti::{read_volume, write_volume, ScanError};
pub use volume::ScanVolume;
