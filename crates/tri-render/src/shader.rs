// SPDX-License-Identifier: CEPL-1.0
//! SPIR-V blob loading. Blobs are opaque to us beyond the header checks a
//! driver would otherwise fail on much later (and less clearly).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ShaderError;

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

const HEADER_WORDS: usize = 5;

pub const VERTEX_FILE: &str = "vert.spv";
pub const FRAGMENT_FILE: &str = "frag.spv";

/// Where the two shader stages come from.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ShaderSource {
    /// Blobs compiled at build time and embedded in the binary.
    #[default]
    Builtin,
    /// `vert.spv` and `frag.spv` read from this directory at startup.
    Dir(PathBuf),
}

/// A SPIR-V module that passed the header checks. Kept as raw bytes in
/// either byte order; word conversion happens where the module is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderBlob {
    bytes: Vec<u8>,
}

impl ShaderBlob {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShaderError> {
        if bytes.is_empty() {
            return Err(ShaderError::Empty);
        }
        if bytes.len() % 4 != 0 {
            return Err(ShaderError::Misaligned(bytes.len()));
        }
        if bytes.len() < HEADER_WORDS * 4 {
            return Err(ShaderError::Truncated(bytes.len()));
        }

        // `bytes` has no alignment guarantee.
        let magic: u32 = bytemuck::pod_read_unaligned(&bytes[..4]);
        if magic != SPIRV_MAGIC && magic.swap_bytes() != SPIRV_MAGIC {
            return Err(ShaderError::BadMagic(magic));
        }
        Ok(ShaderBlob {
            bytes: bytes.to_vec(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, ShaderError> {
        let bytes = fs::read(path).map_err(|source| ShaderError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let blob = Self::from_bytes(&bytes)?;
        debug!("loaded {} ({} bytes)", path.display(), bytes.len());
        Ok(blob)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the words were written in the other byte order.
    pub fn is_foreign_endian(&self) -> bool {
        bytemuck::pod_read_unaligned::<u32>(&self.bytes[..4]) != SPIRV_MAGIC
    }
}

/// Vertex + fragment stage of the one pipeline we build.
#[derive(Clone, Debug)]
pub struct ShaderPair {
    pub vertex: ShaderBlob,
    pub fragment: ShaderBlob,
}

impl ShaderPair {
    pub fn from_bytes(vertex: &[u8], fragment: &[u8]) -> Result<Self, ShaderError> {
        Ok(ShaderPair {
            vertex: ShaderBlob::from_bytes(vertex)?,
            fragment: ShaderBlob::from_bytes(fragment)?,
        })
    }

    pub fn from_dir(dir: &Path) -> Result<Self, ShaderError> {
        Ok(ShaderPair {
            vertex: ShaderBlob::load(&dir.join(VERTEX_FILE))?,
            fragment: ShaderBlob::load(&dir.join(FRAGMENT_FILE))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_words(magic: u32) -> [u32; HEADER_WORDS] {
        [magic, 0x0001_0000, 0, 8, 0]
    }

    fn to_bytes(words: [u32; HEADER_WORDS]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_ne_bytes()).collect()
    }

    fn header(magic: u32) -> Vec<u8> {
        to_bytes(header_words(magic))
    }

    #[test]
    fn accepts_native_header() {
        let blob = ShaderBlob::from_bytes(&header(SPIRV_MAGIC)).unwrap();
        assert!(!blob.is_foreign_endian());
        assert_eq!(blob.byte_len(), 20);
    }

    #[test]
    fn accepts_foreign_endianness() {
        // Every word swapped, as a big-endian toolchain would write them.
        let foreign = to_bytes(header_words(SPIRV_MAGIC).map(u32::swap_bytes));
        let blob = ShaderBlob::from_bytes(&foreign).unwrap();
        assert!(blob.is_foreign_endian());
        assert_eq!(blob.bytes(), &foreign[..]);
    }

    #[test]
    fn unaligned_input_is_accepted() {
        let mut padded = vec![0u8];
        padded.extend(header(SPIRV_MAGIC));
        assert!(ShaderBlob::from_bytes(&padded[1..]).is_ok());
    }

    #[test]
    fn rejects_empty_instead_of_continuing() {
        assert!(matches!(ShaderBlob::from_bytes(&[]), Err(ShaderError::Empty)));
    }

    #[test]
    fn rejects_misaligned_and_truncated() {
        assert!(matches!(
            ShaderBlob::from_bytes(&[1, 2, 3]),
            Err(ShaderError::Misaligned(3))
        ));
        assert!(matches!(
            ShaderBlob::from_bytes(&SPIRV_MAGIC.to_ne_bytes()),
            Err(ShaderError::Truncated(4))
        ));
    }

    #[test]
    fn rejects_wrong_magic() {
        assert!(matches!(
            ShaderBlob::from_bytes(&header(0x1234_5678)),
            Err(ShaderError::BadMagic(0x1234_5678))
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = std::env::temp_dir().join("tri-render-no-such-shader-dir");
        match ShaderPair::from_dir(&dir) {
            Err(ShaderError::Read { path, .. }) => assert!(path.ends_with(VERTEX_FILE)),
            other => panic!("expected read error, got {other:?}"),
        }
    }

    #[test]
    fn loads_pair_from_dir() {
        let dir = std::env::temp_dir().join(format!("tri-render-shaders-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(VERTEX_FILE), header(SPIRV_MAGIC)).unwrap();
        fs::write(dir.join(FRAGMENT_FILE), header(SPIRV_MAGIC)).unwrap();

        let pair = ShaderPair::from_dir(&dir).unwrap();
        assert_eq!(pair.vertex, pair.fragment);

        fs::remove_dir_all(&dir).unwrap();
    }
}
