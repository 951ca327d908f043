//! The quantised network and its weight blob.
//!
//! The blob is a concatenation of little-endian sections, each starting on a
//! 64-byte boundary, in [`MANIFEST`] order. The loader verifies the total
//! length and names the first section that does not fit.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use crate::alloc_zeroed_box;

use super::features::NUM_FEATURES;

/// Feature-transformer output width per perspective.
pub const HIDDEN: usize = 1024;

/// Width of the PSQT side head.
pub const PSQT_BUCKETS: usize = 8;

/// First and second dense layer widths.
pub const L1: usize = 16;
pub const L2: usize = 32;

/// Clipped-ReLU ceiling on transformer activations.
pub(crate) const FT_CLIP: i32 = 127 * 32;

/// Scalar element types a blob section may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl WeightType {
    pub const fn size(self) -> usize {
        match self {
            WeightType::I8 | WeightType::U8 => 1,
            WeightType::I16 | WeightType::U16 => 2,
            WeightType::I32 | WeightType::U32 | WeightType::F32 => 4,
            WeightType::I64 | WeightType::U64 | WeightType::F64 => 8,
        }
    }
}

/// One section of the blob.
#[derive(Debug, Clone, Copy)]
pub struct WeightDesc {
    pub name: &'static str,
    pub ty: WeightType,
    pub count: usize,
}

/// Blob layout, in file order.
pub const MANIFEST: [WeightDesc; 10] = [
    WeightDesc { name: "ft_weights", ty: WeightType::I16, count: NUM_FEATURES * HIDDEN },
    WeightDesc { name: "ft_biases", ty: WeightType::I16, count: HIDDEN },
    WeightDesc { name: "psqt_weights", ty: WeightType::I16, count: NUM_FEATURES * PSQT_BUCKETS },
    WeightDesc { name: "psqt_biases", ty: WeightType::I16, count: PSQT_BUCKETS },
    WeightDesc { name: "l1_weights", ty: WeightType::I16, count: L1 * 2 * HIDDEN },
    WeightDesc { name: "l1_biases", ty: WeightType::I32, count: L1 },
    WeightDesc { name: "l2_weights", ty: WeightType::I16, count: L2 * L1 },
    WeightDesc { name: "l2_biases", ty: WeightType::I32, count: L2 },
    WeightDesc { name: "out_weights", ty: WeightType::I16, count: L2 },
    WeightDesc { name: "out_bias", ty: WeightType::I32, count: 1 },
];

fn align64(offset: usize) -> usize {
    (offset + 63) & !63
}

/// Expected byte length of a well-formed blob.
pub fn blob_len() -> usize {
    let mut offset = 0;
    for desc in &MANIFEST {
        offset = align64(offset) + desc.ty.size() * desc.count;
    }
    offset
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("failed to read weight blob: {0}")]
    Io(#[from] std::io::Error),
    #[error("weight blob length mismatch: expected {expected} bytes, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("weight blob truncated in section `{layer}`: need {needed} bytes at offset {offset}")]
    Truncated {
        layer: &'static str,
        needed: usize,
        offset: usize,
    },
}

/// All weights, dequantisation-ready. ~52 MiB; always boxed.
#[derive(Debug)]
pub struct Network {
    pub(crate) ft_weights: [i16; NUM_FEATURES * HIDDEN],
    pub(crate) ft_biases: [i16; HIDDEN],
    pub(crate) psqt_weights: [i16; NUM_FEATURES * PSQT_BUCKETS],
    pub(crate) psqt_biases: [i16; PSQT_BUCKETS],
    pub(crate) l1_weights: [i16; L1 * 2 * HIDDEN],
    pub(crate) l1_biases: [i32; L1],
    pub(crate) l2_weights: [i16; L2 * L1],
    pub(crate) l2_biases: [i32; L2],
    pub(crate) out_weights: [i16; L2],
    pub(crate) out_bias: i32,
}

fn fill_i16(dst: &mut [i16], bytes: &[u8]) {
    for (value, chunk) in dst.iter_mut().zip(bytes.chunks_exact(2)) {
        *value = i16::from_le_bytes([chunk[0], chunk[1]]);
    }
}

fn fill_i32(dst: &mut [i32], bytes: &[u8]) {
    for (value, chunk) in dst.iter_mut().zip(bytes.chunks_exact(4)) {
        *value = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
}

impl Network {
    /// All-zero network. Evaluates everything to 0 but keeps the whole
    /// engine functional; the search tests run on it.
    pub fn zeroed() -> Box<Self> {
        alloc_zeroed_box()
    }

    /// Parse a blob laid out per [`MANIFEST`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Box<Self>, NetworkError> {
        let expected = blob_len();
        if bytes.len() != expected {
            return Err(NetworkError::LengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }

        let mut network = Self::zeroed();
        let mut offset = 0;
        for desc in &MANIFEST {
            offset = align64(offset);
            let needed = desc.ty.size() * desc.count;
            let Some(section) = bytes.get(offset..offset + needed) else {
                return Err(NetworkError::Truncated {
                    layer: desc.name,
                    needed,
                    offset,
                });
            };
            match desc.name {
                "ft_weights" => fill_i16(&mut network.ft_weights, section),
                "ft_biases" => fill_i16(&mut network.ft_biases, section),
                "psqt_weights" => fill_i16(&mut network.psqt_weights, section),
                "psqt_biases" => fill_i16(&mut network.psqt_biases, section),
                "l1_weights" => fill_i16(&mut network.l1_weights, section),
                "l1_biases" => fill_i32(&mut network.l1_biases, section),
                "l2_weights" => fill_i16(&mut network.l2_weights, section),
                "l2_biases" => fill_i32(&mut network.l2_biases, section),
                "out_weights" => fill_i16(&mut network.out_weights, section),
                "out_bias" => {
                    let mut scalar = [0i32; 1];
                    fill_i32(&mut scalar, section);
                    network.out_bias = scalar[0];
                }
                _ => unreachable!("unknown manifest section"),
            }
            offset += needed;
        }
        Ok(network)
    }

    pub fn load(path: &Path) -> Result<Box<Self>, NetworkError> {
        Self::from_bytes(&fs::read(path)?)
    }

    /// Deterministic small-magnitude weights for tests. Magnitudes are kept
    /// low enough that every accumulation fits in `i32`.
    #[cfg(test)]
    pub(crate) fn seeded(seed: u64) -> Box<Self> {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(seed);
        let mut network = Self::zeroed();
        for w in network.ft_weights.iter_mut() {
            *w = rng.gen_range(-8..=8);
        }
        for w in network.ft_biases.iter_mut() {
            *w = rng.gen_range(-32..=32);
        }
        for w in network.psqt_weights.iter_mut() {
            *w = rng.gen_range(-16..=16);
        }
        for w in network.psqt_biases.iter_mut() {
            *w = rng.gen_range(-64..=64);
        }
        for w in network.l1_weights.iter_mut() {
            *w = rng.gen_range(-4..=4);
        }
        for b in network.l1_biases.iter_mut() {
            *b = rng.gen_range(-1024..=1024);
        }
        for w in network.l2_weights.iter_mut() {
            *w = rng.gen_range(-4..=4);
        }
        for b in network.l2_biases.iter_mut() {
            *b = rng.gen_range(-1024..=1024);
        }
        for w in network.out_weights.iter_mut() {
            *w = rng.gen_range(-4..=4);
        }
        network.out_bias = rng.gen_range(-1024..=1024);
        network
    }
}

static INSTALLED: OnceLock<Box<Network>> = OnceLock::new();

/// Install a network process-wide. Returns false when one is already
/// installed; the first one wins, weights are search-invariant.
pub fn install(network: Box<Network>) -> bool {
    INSTALLED.set(network).is_ok()
}

/// The installed network, falling back to a zeroed one.
pub fn global() -> &'static Network {
    INSTALLED.get_or_init(|| {
        tracing::warn!("no weight blob installed; evaluating with a zeroed network");
        Network::zeroed()
    })
}
