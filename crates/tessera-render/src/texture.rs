// SPDX-License-Identifier: CEPL-1.0
//! DDS loading. Only the top mip level is read; BC1-3 and 32-bit RGBA/BGRA
//! payloads are understood.

use std::path::Path;

use thiserror::Error;

const MAGIC: &[u8; 4] = b"DDS ";
const HEADER_SIZE: u32 = 124;
const DATA_OFFSET: usize = 4 + HEADER_SIZE as usize;
const DX10_HEADER_SIZE: usize = 20;

const DDPF_FOURCC: u32 = 0x4;
const DDPF_RGB: u32 = 0x40;

#[derive(Debug, Error)]
pub enum TextureError {
    #[error("failed to read texture: {0}")]
    Io(#[from] std::io::Error),
    #[error("file too short for a DDS header ({0} bytes)")]
    TooShort(usize),
    #[error("not a DDS file")]
    BadMagic,
    #[error("unsupported DDS pixel format: {0}")]
    Unsupported(String),
    #[error("DDS payload truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Bc1,
    Bc2,
    Bc3,
}

impl TextureFormat {
    pub fn is_compressed(self) -> bool {
        matches!(self, TextureFormat::Bc1 | TextureFormat::Bc2 | TextureFormat::Bc3)
    }

    /// Bytes of the top mip level, or `None` if it does not fit in `usize`.
    pub fn mip0_size(self, width: u32, height: u32) -> Option<usize> {
        let (w, h) = (width as usize, height as usize);
        let (cols, rows, unit) = match self {
            TextureFormat::Rgba8Unorm | TextureFormat::Bgra8Unorm => (w, h, 4),
            TextureFormat::Bc1 => (w.div_ceil(4).max(1), h.div_ceil(4).max(1), 8),
            TextureFormat::Bc2 | TextureFormat::Bc3 => {
                (w.div_ceil(4).max(1), h.div_ceil(4).max(1), 16)
            }
        };
        cols.checked_mul(rows)?.checked_mul(unit)
    }
}

#[derive(Clone, Debug)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub bytes: Vec<u8>,
}

fn u32_at(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

fn fourcc_name(code: u32) -> String {
    code.to_le_bytes()
        .iter()
        .map(|&c| if c.is_ascii_graphic() { c as char } else { '?' })
        .collect()
}

fn dxgi_format(code: u32) -> Result<TextureFormat, TextureError> {
    Ok(match code {
        28 | 29 => TextureFormat::Rgba8Unorm,
        87 | 91 => TextureFormat::Bgra8Unorm,
        71 | 72 => TextureFormat::Bc1,
        74 | 75 => TextureFormat::Bc2,
        77 | 78 => TextureFormat::Bc3,
        other => return Err(TextureError::Unsupported(format!("DXGI format {other}"))),
    })
}

impl TextureData {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TextureError> {
        let bytes = std::fs::read(path)?;
        Self::from_dds(&bytes)
    }

    pub fn from_dds(file: &[u8]) -> Result<Self, TextureError> {
        if file.len() < DATA_OFFSET {
            return Err(TextureError::TooShort(file.len()));
        }
        if &file[..4] != MAGIC || u32_at(file, 4) != HEADER_SIZE {
            return Err(TextureError::BadMagic);
        }
        let height = u32_at(file, 12);
        let width = u32_at(file, 16);
        let pf_flags = u32_at(file, 80);
        let fourcc = u32_at(file, 84);

        let mut data_offset = DATA_OFFSET;
        let format = if pf_flags & DDPF_FOURCC != 0 {
            match &fourcc.to_le_bytes() {
                b"DXT1" => TextureFormat::Bc1,
                b"DXT2" | b"DXT3" => TextureFormat::Bc2,
                b"DXT4" | b"DXT5" => TextureFormat::Bc3,
                b"DX10" => {
                    if file.len() < DATA_OFFSET + DX10_HEADER_SIZE {
                        return Err(TextureError::TooShort(file.len()));
                    }
                    data_offset += DX10_HEADER_SIZE;
                    dxgi_format(u32_at(file, DATA_OFFSET))?
                }
                _ => return Err(TextureError::Unsupported(fourcc_name(fourcc))),
            }
        } else if pf_flags & DDPF_RGB != 0 && u32_at(file, 88) == 32 {
            match (u32_at(file, 92), u32_at(file, 100)) {
                (0x0000_00ff, 0x00ff_0000) => TextureFormat::Rgba8Unorm,
                (0x00ff_0000, 0x0000_00ff) => TextureFormat::Bgra8Unorm,
                (r, b) => {
                    return Err(TextureError::Unsupported(format!(
                        "32-bit rgb masks r={r:#x} b={b:#x}"
                    )))
                }
            }
        } else {
            return Err(TextureError::Unsupported(format!("pixel format flags {pf_flags:#x}")));
        };

        if width == 0 || height == 0 {
            return Err(TextureError::Unsupported(format!("{width}x{height} image")));
        }
        let expected = format.mip0_size(width, height).ok_or_else(|| {
            TextureError::Unsupported(format!("{width}x{height} image is too large"))
        })?;
        let actual = file.len() - data_offset;
        if actual < expected {
            return Err(TextureError::Truncated { expected, actual });
        }
        Ok(Self {
            width,
            height,
            format,
            bytes: file[data_offset..data_offset + expected].to_vec(),
        })
    }

    /// RGBA stand-in used when a texture file is missing or unusable.
    pub fn checkerboard(size: u32) -> Self {
        let mut bytes = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let on = ((x / 8) + (y / 8)) % 2 == 0;
                bytes.extend_from_slice(if on { &[0xff, 0x00, 0xff, 0xff] } else { &[0x20, 0x20, 0x20, 0xff] });
            }
        }
        Self {
            width: size,
            height: size,
            format: TextureFormat::Rgba8Unorm,
            bytes,
        }
    }

    /// Tangent-space normal map pointing straight out of the surface.
    pub fn flat_normal() -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            bytes: vec![0x80, 0x80, 0xff, 0xff],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(width: u32, height: u32, pf_flags: u32, fourcc: &[u8; 4]) -> Vec<u8> {
        let mut h = vec![0u8; DATA_OFFSET];
        h[..4].copy_from_slice(MAGIC);
        h[4..8].copy_from_slice(&HEADER_SIZE.to_le_bytes());
        h[12..16].copy_from_slice(&height.to_le_bytes());
        h[16..20].copy_from_slice(&width.to_le_bytes());
        h[28..32].copy_from_slice(&1u32.to_le_bytes());
        h[76..80].copy_from_slice(&32u32.to_le_bytes());
        h[80..84].copy_from_slice(&pf_flags.to_le_bytes());
        h[84..88].copy_from_slice(fourcc);
        h
    }

    #[test]
    fn parses_dxt5() {
        let mut f = header(8, 4, DDPF_FOURCC, b"DXT5");
        f.extend(std::iter::repeat(7u8).take(2 * 16 + 64));
        let t = TextureData::from_dds(&f).unwrap();
        assert_eq!((t.width, t.height), (8, 4));
        assert_eq!(t.format, TextureFormat::Bc3);
        assert_eq!(t.bytes.len(), 32);
    }

    #[test]
    fn parses_dx10_bc1() {
        let mut f = header(4, 4, DDPF_FOURCC, b"DX10");
        let mut ext = [0u8; DX10_HEADER_SIZE];
        ext[..4].copy_from_slice(&71u32.to_le_bytes());
        f.extend_from_slice(&ext);
        f.extend_from_slice(&[1u8; 8]);
        let t = TextureData::from_dds(&f).unwrap();
        assert_eq!(t.format, TextureFormat::Bc1);
        assert_eq!(t.bytes, vec![1u8; 8]);
    }

    #[test]
    fn parses_uncompressed_bgra() {
        let mut f = header(2, 2, DDPF_RGB, &[0; 4]);
        f[88..92].copy_from_slice(&32u32.to_le_bytes());
        f[92..96].copy_from_slice(&0x00ff_0000u32.to_le_bytes());
        f[100..104].copy_from_slice(&0x0000_00ffu32.to_le_bytes());
        f.extend_from_slice(&[9u8; 16]);
        let t = TextureData::from_dds(&f).unwrap();
        assert_eq!(t.format, TextureFormat::Bgra8Unorm);
        assert!(!t.format.is_compressed());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(TextureData::from_dds(b"DDS "), Err(TextureError::TooShort(4))));

        let mut f = header(4, 4, DDPF_FOURCC, b"DXT1");
        f[0] = b'X';
        assert!(matches!(TextureData::from_dds(&f), Err(TextureError::BadMagic)));

        let f = header(4, 4, DDPF_FOURCC, b"ATI2");
        assert!(matches!(TextureData::from_dds(&f), Err(TextureError::Unsupported(s)) if s == "ATI2"));

        let mut f = header(8, 8, DDPF_FOURCC, b"DXT1");
        f.extend_from_slice(&[0u8; 10]);
        assert!(matches!(
            TextureData::from_dds(&f),
            Err(TextureError::Truncated { expected: 32, actual: 10 })
        ));
    }

    #[test]
    fn block_sizes_round_up() {
        assert_eq!(TextureFormat::Bc1.mip0_size(1, 1), Some(8));
        assert_eq!(TextureFormat::Bc3.mip0_size(5, 5), Some(64));
        assert_eq!(TextureFormat::Rgba8Unorm.mip0_size(3, 2), Some(24));
    }

    #[test]
    fn oversized_header_is_rejected_not_overflowed() {
        assert_eq!(TextureFormat::Rgba8Unorm.mip0_size(u32::MAX, u32::MAX), None);

        let mut f = header(u32::MAX, u32::MAX, DDPF_RGB, &[0; 4]);
        f[88..92].copy_from_slice(&32u32.to_le_bytes());
        f[92..96].copy_from_slice(&0x0000_00ffu32.to_le_bytes());
        f[100..104].copy_from_slice(&0x00ff_0000u32.to_le_bytes());
        f.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            TextureData::from_dds(&f),
            Err(TextureError::Unsupported(s)) if s.contains("too large")
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = TextureData::load("/nonexistent/tessera/bricks.dds").unwrap_err();
        assert!(matches!(err, TextureError::Io(_)));
    }

    #[test]
    fn checkerboard_alternates() {
        let t = TextureData::checkerboard(16);
        assert_eq!(t.bytes.len(), 16 * 16 * 4);
        assert_eq!(&t.bytes[..4], &[0xff, 0x00, 0xff, 0xff]);
        let second_tile = 8 * 4;
        assert_eq!(&t.bytes[second_tile..second_tile + 4], &[0x20, 0x20, 0x20, 0xff]);
    }
}
