//! Built-in intensity summary scorer

use super::{QualityScorer, ScoreOutput, ScoreRequest, ScoringError};
use crate::scan::ScanVolume;
use crate::session::ScanKind;
use async_trait::async_trait;

/// Intensity statistics computed in-process
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryScorer;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Moments {
    count: usize,
    mean: f64,
    std: f64,
}

/// Welford mean and population standard deviation
fn moments(values: impl Iterator<Item = f64>) -> Option<Moments> {
    let mut count = 0usize;
    let mut mean = 0.0f64;
    let mut m2 = 0.0f64;
    for value in values {
        count += 1;
        let delta = value - mean;
        mean += delta / count as f64;
        m2 += delta * (value - mean);
    }
    (count > 0).then(|| Moments {
        count,
        mean,
        std: (m2 / count as f64).sqrt(),
    })
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Voxelwise mean over frames
fn mean_image(volume: &ScanVolume) -> Vec<f32> {
    let frames = volume.len_frames() as f32;
    let mut sum = vec![0.0f32; volume.voxels_per_frame()];
    for frame in volume.frames() {
        for (acc, value) in sum.iter_mut().zip(frame) {
            *acc += *value;
        }
    }
    sum.iter_mut().for_each(|v| *v /= frames);
    sum
}

fn frame_volume(volume: &ScanVolume, data: Vec<f32>) -> Result<ScanVolume, ScoringError> {
    let [x, y, z, _] = volume.dims();
    Ok(ScanVolume::with_pixdim([x, y, z, 1], volume.pixdim(), data)?)
}

impl SummaryScorer {
    fn summarize(
        volume: &ScanVolume,
        kind: ScanKind,
        exclude_zeros: bool,
    ) -> Result<ScoreOutput, ScoringError> {
        let image = mean_image(volume);
        let output = Self::spatial(volume, &image, exclude_zeros)?;

        match kind {
            ScanKind::Anatomical => Ok(output),
            ScanKind::Functional => {
                let mut output = output
                    .metric("frames", volume.len_frames() as f64)
                    .artifact("mean_image", frame_volume(volume, image)?);
                if let Some(tsnr) = Self::temporal(volume, exclude_zeros) {
                    output = output.metric("median_tsnr", tsnr);
                }
                Ok(output)
            }
        }
    }

    fn spatial(
        volume: &ScanVolume,
        image: &[f32],
        exclude_zeros: bool,
    ) -> Result<ScoreOutput, ScoringError> {
        let total = image.len() as f64;
        let zeros = image.iter().filter(|v| **v == 0.0).count() as f64;
        let considered = image
            .iter()
            .filter(|v| !exclude_zeros || **v != 0.0)
            .map(|v| *v as f64);
        let stats = moments(considered).ok_or(ScoringError::EmptyVolume)?;

        let mask: Vec<f32> = image
            .iter()
            .map(|v| {
                let keep = (!exclude_zeros || *v != 0.0) && *v as f64 > stats.mean;
                if keep {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();
        let foreground = mask.iter().filter(|v| **v > 0.0).count() as f64;

        Ok(ScoreOutput::default()
            .metric("voxel_count", stats.count as f64)
            .metric("mean", stats.mean)
            .metric("std", stats.std)
            .metric("snr", ratio(stats.mean, stats.std))
            .metric("zero_fraction", ratio(zeros, total))
            .metric("foreground_fraction", ratio(foreground, total))
            .artifact("foreground_mask", frame_volume(volume, mask)?))
    }

    fn temporal(volume: &ScanVolume, exclude_zeros: bool) -> Option<f64> {
        let n = volume.voxels_per_frame();
        let tsnr: Vec<f64> = (0..n)
            .filter_map(|voxel| {
                let series = volume.frames().map(|frame| frame[voxel] as f64);
                let stats = moments(series)?;
                if stats.std <= 0.0 || (exclude_zeros && stats.mean == 0.0) {
                    return None;
                }
                Some(stats.mean / stats.std)
            })
            .collect();
        median(tsnr)
    }
}

#[async_trait]
impl QualityScorer for SummaryScorer {
    fn name(&self) -> &str {
        "summary"
    }

    async fn score(&self, request: ScoreRequest<'_>) -> Result<ScoreOutput, ScoringError> {
        let volume = request.volume.clone();
        let kind = request.unit.kind();
        let exclude_zeros = request.exclude_zeros;
        tokio::task::spawn_blocking(move || Self::summarize(&volume, kind, exclude_zeros)).await?
    }
}
