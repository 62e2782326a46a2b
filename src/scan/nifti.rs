//! NIfTI-1 single-file codec
//!
//! Supports `.nii` and `.nii.gz` (detected from the gzip magic, not the file
//! name), either byte order, and the common integer and float datatypes.
//! Volumes are always written as little-endian float32.

use super::volume::ScanVolume;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const HEADER_SIZE: usize = 348;
const DATA_OFFSET: usize = 352;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const DT_UINT8: i16 = 2;
const DT_INT16: i16 = 4;
const DT_INT32: i16 = 8;
const DT_FLOAT32: i16 = 16;
const DT_FLOAT64: i16 = 64;
const DT_INT8: i16 = 256;
const DT_UINT16: i16 = 512;
const DT_UINT32: i16 = 768;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid NIfTI header: {0}")]
    Header(String),
    #[error("unsupported NIfTI datatype code {0}")]
    UnsupportedDatatype(i16),
    #[error("image data truncated: expected {expected} voxels, found {actual}")]
    Truncated { expected: usize, actual: usize },
}

impl ScanError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        ScanError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

struct Reader<'a> {
    bytes: &'a [u8],
    order: ByteOrder,
}

impl Reader<'_> {
    fn array<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[offset..offset + N]);
        if self.order == ByteOrder::Big {
            out.reverse();
        }
        out
    }

    fn i16(&self, offset: usize) -> i16 {
        i16::from_le_bytes(self.array(offset))
    }

    fn i32(&self, offset: usize) -> i32 {
        i32::from_le_bytes(self.array(offset))
    }

    fn f32(&self, offset: usize) -> f32 {
        f32::from_le_bytes(self.array(offset))
    }
}

struct Header {
    dims: [usize; 4],
    pixdim: [f32; 4],
    datatype: i16,
    vox_offset: usize,
    slope: f32,
    intercept: f32,
}

fn bytes_per_voxel(datatype: i16) -> Result<usize, ScanError> {
    match datatype {
        DT_UINT8 | DT_INT8 => Ok(1),
        DT_INT16 | DT_UINT16 => Ok(2),
        DT_INT32 | DT_UINT32 | DT_FLOAT32 => Ok(4),
        DT_FLOAT64 => Ok(8),
        other => Err(ScanError::UnsupportedDatatype(other)),
    }
}

fn parse_header(reader: &Reader<'_>) -> Result<Header, ScanError> {
    let magic = &reader.bytes[344..348];
    if magic != b"n+1\0" {
        return Err(ScanError::Header(
            "missing single-file magic \"n+1\"".to_string(),
        ));
    }

    let rank = reader.i16(40);
    if !(1..=7).contains(&rank) {
        return Err(ScanError::Header(format!("dim[0] = {} is out of range", rank)));
    }
    let mut dims = [1usize; 4];
    for (axis, dim) in dims.iter_mut().enumerate() {
        if axis as i16 >= rank {
            break;
        }
        let value = reader.i16(42 + axis * 2);
        if value < 0 {
            return Err(ScanError::Header(format!(
                "dim[{}] = {} is negative",
                axis + 1,
                value
            )));
        }
        *dim = (value as usize).max(1);
    }
    // Higher dimensions are folded into the frame axis
    for axis in 4..rank as usize {
        let value = reader.i16(42 + axis * 2);
        if value > 1 {
            dims[3] = dims[3].checked_mul(value as usize).ok_or_else(|| {
                ScanError::Header(format!("dim[{}] = {} overflows the frame count", axis + 1, value))
            })?;
        }
    }
    if dims.iter().try_fold(1usize, |acc, dim| acc.checked_mul(*dim)).is_none() {
        return Err(ScanError::Header(format!("dimensions {:?} overflow the voxel count", dims)));
    }

    let mut pixdim = [1.0f32; 4];
    for (axis, size) in pixdim.iter_mut().enumerate() {
        *size = reader.f32(80 + axis * 4);
    }

    let datatype = reader.i16(70);
    bytes_per_voxel(datatype)?;

    let vox_offset = reader.f32(108);
    if !vox_offset.is_finite() || vox_offset < HEADER_SIZE as f32 {
        return Err(ScanError::Header(format!("vox_offset {} is invalid", vox_offset)));
    }

    Ok(Header {
        dims,
        pixdim,
        datatype,
        vox_offset: vox_offset as usize,
        slope: reader.f32(112),
        intercept: reader.f32(116),
    })
}

fn decode_voxels(reader: &Reader<'_>, header: &Header) -> Result<Vec<f32>, ScanError> {
    let count: usize = header.dims.iter().product();
    let width = bytes_per_voxel(header.datatype)?;
    let available = reader.bytes.len().saturating_sub(header.vox_offset) / width;
    if available < count {
        return Err(ScanError::Truncated {
            expected: count,
            actual: available,
        });
    }

    let scale = header.slope.is_finite() && header.slope != 0.0;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let at = header.vox_offset + i * width;
        let raw = match header.datatype {
            DT_UINT8 => reader.bytes[at] as f32,
            DT_INT8 => reader.bytes[at] as i8 as f32,
            DT_INT16 => reader.i16(at) as f32,
            DT_UINT16 => u16::from_le_bytes(reader.array(at)) as f32,
            DT_INT32 => reader.i32(at) as f32,
            DT_UINT32 => u32::from_le_bytes(reader.array(at)) as f32,
            DT_FLOAT32 => reader.f32(at),
            DT_FLOAT64 => f64::from_le_bytes(reader.array(at)) as f32,
            other => return Err(ScanError::UnsupportedDatatype(other)),
        };
        out.push(if scale {
            raw * header.slope + header.intercept
        } else {
            raw
        });
    }
    Ok(out)
}

/// Decode an uncompressed or gzip-compressed NIfTI-1 image
pub fn decode(bytes: &[u8]) -> Result<ScanVolume, ScanError> {
    let inflated;
    let bytes = if bytes.starts_with(&GZIP_MAGIC) {
        let mut buf = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut buf)
            .map_err(|e| ScanError::Header(format!("corrupt gzip stream: {}", e)))?;
        inflated = buf;
        &inflated[..]
    } else {
        bytes
    };

    if bytes.len() < HEADER_SIZE {
        return Err(ScanError::Header(format!(
            "file is {} bytes, shorter than a NIfTI-1 header",
            bytes.len()
        )));
    }

    let order = match (
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    ) {
        (348, _) => ByteOrder::Little,
        (_, 348) => ByteOrder::Big,
        (size, _) => {
            return Err(ScanError::Header(format!("sizeof_hdr is {}, expected 348", size)));
        }
    };
    let reader = Reader { bytes, order };
    let header = parse_header(&reader)?;
    let data = decode_voxels(&reader, &header)?;
    ScanVolume::with_pixdim(header.dims, header.pixdim, data)
}

/// Encode as an uncompressed little-endian float32 NIfTI-1 image.
///
/// Fails when a dimension does not fit the header's 16-bit fields.
pub fn encode(volume: &ScanVolume) -> Result<Vec<u8>, ScanError> {
    let dims = volume.dims();
    let rank: i16 = if dims[3] > 1 { 4 } else { 3 };
    let mut out = vec![0u8; DATA_OFFSET];

    out[0..4].copy_from_slice(&(HEADER_SIZE as i32).to_le_bytes());
    out[40..42].copy_from_slice(&rank.to_le_bytes());
    for (axis, dim) in dims.iter().enumerate() {
        let at = 42 + axis * 2;
        let value = i16::try_from(*dim).map_err(|_| {
            ScanError::Header(format!(
                "dim[{}] = {} exceeds the NIfTI-1 limit of {}",
                axis + 1,
                dim,
                i16::MAX
            ))
        })?;
        out[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }
    for axis in 4..7 {
        let at = 42 + axis * 2;
        out[at..at + 2].copy_from_slice(&1i16.to_le_bytes());
    }
    out[70..72].copy_from_slice(&DT_FLOAT32.to_le_bytes());
    out[72..74].copy_from_slice(&32i16.to_le_bytes());
    out[76..80].copy_from_slice(&1.0f32.to_le_bytes());
    for (axis, size) in volume.pixdim().iter().enumerate() {
        let at = 80 + axis * 4;
        out[at..at + 4].copy_from_slice(&size.to_le_bytes());
    }
    out[108..112].copy_from_slice(&(DATA_OFFSET as f32).to_le_bytes());
    out[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    out[344..348].copy_from_slice(b"n+1\0");

    out.reserve(volume.data().len() * 4);
    for value in volume.data() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    Ok(out)
}

/// Read a NIfTI-1 image from disk
pub fn read_volume(path: &Path) -> Result<ScanVolume, ScanError> {
    let bytes = std::fs::read(path).map_err(|e| ScanError::io(path, e))?;
    decode(&bytes)
}

/// Write a volume to disk, gzip-compressed when the name ends in `.gz`
pub fn write_volume(path: &Path, volume: &ScanVolume) -> Result<(), ScanError> {
    let raw = encode(volume)?;
    let bytes = if path.extension().is_some_and(|ext| ext == "gz") {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&raw)
            .and_then(|_| encoder.finish())
            .map_err(|e| ScanError::io(path, e))?
    } else {
        raw
    };
    std::fs::write(path, bytes).map_err(|e| ScanError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume() -> ScanVolume {
        let data: Vec<f32> = (0..24).map(|v| v as f32 * 0.5).collect();
        ScanVolume::from_f32([2, 3, 2, 2], data).unwrap()
    }

    #[test]
    fn test_gzip_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.nii.gz");
        write_volume(&path, &volume()).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(&GZIP_MAGIC));
        assert_eq!(read_volume(&path).unwrap(), volume());
    }

    #[test]
    fn test_plain_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.nii");
        write_volume(&path, &volume()).unwrap();
        assert_eq!(read_volume(&path).unwrap().dims(), [2, 3, 2, 2]);
    }

    #[test]
    fn test_three_dimensional_volume_has_one_frame() {
        let vol = ScanVolume::from_f32([2, 2, 2, 1], vec![1.0; 8]).unwrap();
        let decoded = decode(&encode(&vol).unwrap()).unwrap();
        assert_eq!(decoded.len_frames(), 1);
    }

    #[test]
    fn test_big_endian_int16_with_scaling() {
        let mut bytes = vec![0u8; DATA_OFFSET];
        bytes[0..4].copy_from_slice(&348i32.to_be_bytes());
        bytes[40..42].copy_from_slice(&3i16.to_be_bytes());
        bytes[42..44].copy_from_slice(&2i16.to_be_bytes());
        bytes[44..46].copy_from_slice(&1i16.to_be_bytes());
        bytes[46..48].copy_from_slice(&1i16.to_be_bytes());
        bytes[70..72].copy_from_slice(&DT_INT16.to_be_bytes());
        bytes[108..112].copy_from_slice(&352f32.to_be_bytes());
        bytes[112..116].copy_from_slice(&2f32.to_be_bytes());
        bytes[116..120].copy_from_slice(&1f32.to_be_bytes());
        bytes[344..348].copy_from_slice(b"n+1\0");
        bytes.extend_from_slice(&(-3i16).to_be_bytes());
        bytes.extend_from_slice(&10i16.to_be_bytes());

        let vol = decode(&bytes).unwrap();
        assert_eq!(vol.data(), &[-5.0, 21.0]);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(decode(b"not an image"), Err(ScanError::Header(_))));
        let mut bytes = encode(&volume()).unwrap();
        bytes[0..4].copy_from_slice(&1234i32.to_le_bytes());
        assert!(matches!(decode(&bytes), Err(ScanError::Header(_))));
    }

    #[test]
    fn test_truncated_data_is_rejected() {
        let mut bytes = encode(&volume()).unwrap();
        bytes.truncate(bytes.len() - 8);
        assert!(matches!(decode(&bytes), Err(ScanError::Truncated { .. })));
    }

    #[test]
    fn test_unsupported_datatype() {
        let mut bytes = encode(&volume()).unwrap();
        bytes[70..72].copy_from_slice(&128i16.to_le_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(ScanError::UnsupportedDatatype(128))
        ));
    }

    #[test]
    fn test_oversized_dimensions_are_header_errors() {
        let mut bytes = encode(&volume()).unwrap();
        bytes[40..42].copy_from_slice(&7i16.to_le_bytes());
        for axis in 0..7 {
            let at = 42 + axis * 2;
            bytes[at..at + 2].copy_from_slice(&i16::MAX.to_le_bytes());
        }
        assert!(matches!(decode(&bytes), Err(ScanError::Header(_))));

        let long = ScanVolume::from_f32([1, 1, 1, 40_000], vec![0.0; 40_000]).unwrap();
        assert!(matches!(encode(&long), Err(ScanError::Header(_))));
        let dir = tempfile::tempdir().unwrap();
        assert!(write_volume(&dir.path().join("long.nii.gz"), &long).is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = read_volume(Path::new("/nonexistent/scan.nii.gz")).unwrap_err();
        assert!(matches!(err, ScanError::Io { .. }));
    }
}
