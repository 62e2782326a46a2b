//! In-memory image volume

use super::nifti::ScanError;
use std::ops::Range;

/// A 3D image or 4D timeseries held as `f32` voxels.
///
/// Voxels are stored x-fastest, frames last, so each frame is a contiguous
/// slice of `voxels_per_frame()` values.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanVolume {
    dims: [usize; 4],
    pixdim: [f32; 4],
    data: Vec<f32>,
}

impl ScanVolume {
    /// Build a volume from dimensions `[x, y, z, t]` and voxel data
    pub fn from_f32(dims: [usize; 4], data: Vec<f32>) -> Result<Self, ScanError> {
        Self::with_pixdim(dims, [1.0; 4], data)
    }

    pub fn with_pixdim(dims: [usize; 4], pixdim: [f32; 4], data: Vec<f32>) -> Result<Self, ScanError> {
        if dims.iter().any(|d| *d == 0) {
            return Err(ScanError::Header(format!("zero-sized dimension in {:?}", dims)));
        }
        let expected = dims.iter().product::<usize>();
        if data.len() != expected {
            return Err(ScanError::Truncated {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { dims, pixdim, data })
    }

    pub fn dims(&self) -> [usize; 4] {
        self.dims
    }

    pub fn pixdim(&self) -> [f32; 4] {
        self.pixdim
    }

    /// Native number of frames
    pub fn len_frames(&self) -> usize {
        self.dims[3]
    }

    pub fn voxels_per_frame(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn frame(&self, index: usize) -> Option<&[f32]> {
        let n = self.voxels_per_frame();
        self.data.get(index * n..(index + 1) * n)
    }

    pub fn frames(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.voxels_per_frame())
    }

    /// Copy of the volume restricted to frames in `range`.
    ///
    /// `range` must already be validated against `len_frames()`.
    pub fn trim(&self, range: Range<usize>) -> ScanVolume {
        let n = self.voxels_per_frame();
        let stop = range.end.min(self.len_frames());
        let start = range.start.min(stop);
        let mut dims = self.dims;
        dims[3] = stop - start;
        ScanVolume {
            dims,
            pixdim: self.pixdim,
            data: self.data[start * n..stop * n].to_vec(),
        }
    }
}
