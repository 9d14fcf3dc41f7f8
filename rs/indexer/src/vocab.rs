use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

use crate::error::{IndexerError, Result};

/// One codebook: an ordered set of fixed-dimension centroids, stored
/// flattened. Owned by the orchestrator for the process lifetime; the
/// builder reads it through shared references.
#[derive(Debug, Clone, PartialEq)]
pub struct Centroids {
    pub dimension: usize,
    pub data: Vec<f32>,
}

impl Centroids {
    pub fn num_centroids(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn centroid(&self, id: usize) -> &[f32] {
        &self.data[id * self.dimension..(id + 1) * self.dimension]
    }
}

/// Vocabulary file layout, little-endian:
/// `i32 vocab_count`, then per vocabulary `i32 num_centroids`,
/// `i32 dimension`, then `num_centroids * dimension` f32 values.
fn read_vocabs(path: &str) -> Result<Vec<Centroids>> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => IndexerError::FileNotFound {
            path: path.to_string(),
        },
        _ => IndexerError::FileFormat {
            path: path.to_string(),
            reason: e.to_string(),
        },
    })?;
    let mut reader = BufReader::new(file);

    let format_err = |reason: String| IndexerError::FileFormat {
        path: path.to_string(),
        reason,
    };

    let vocab_count = reader
        .read_i32::<LittleEndian>()
        .map_err(|_| format_err("truncated vocabulary count".to_string()))?;
    if vocab_count <= 0 {
        return Err(format_err(format!(
            "vocabulary count must be positive, got {}",
            vocab_count
        )));
    }

    let mut vocabs = Vec::with_capacity(vocab_count as usize);
    for vocab_idx in 0..vocab_count {
        let num_centroids = reader
            .read_i32::<LittleEndian>()
            .map_err(|_| format_err(format!("truncated header of vocabulary {}", vocab_idx)))?;
        let dimension = reader
            .read_i32::<LittleEndian>()
            .map_err(|_| format_err(format!("truncated header of vocabulary {}", vocab_idx)))?;
        if num_centroids <= 0 || dimension <= 0 {
            return Err(format_err(format!(
                "vocabulary {} declares {} centroids of dimension {}",
                vocab_idx, num_centroids, dimension
            )));
        }

        let len = num_centroids as usize * dimension as usize;
        let mut data = vec![0.0f32; len];
        reader
            .read_f32_into::<LittleEndian>(&mut data)
            .map_err(|_| format_err(format!("truncated centroid data in vocabulary {}", vocab_idx)))?;
        vocabs.push(Centroids {
            dimension: dimension as usize,
            data,
        });
    }

    // Trailing garbage means the file is not what we think it is.
    let mut probe = [0u8; 1];
    if reader.read(&mut probe).map_err(|e| format_err(e.to_string()))? != 0 {
        return Err(format_err("trailing bytes after last vocabulary".to_string()));
    }

    Ok(vocabs)
}

/// Reads the coarse codebooks and checks that together they span the
/// configured space dimension (each codebook quantizes a contiguous chunk of
/// `space_dim / count` coordinates).
pub fn read_coarse_vocabs(path: &str, space_dim: usize) -> Result<Vec<Centroids>> {
    let vocabs = read_vocabs(path)?;
    let total: usize = vocabs.iter().map(|v| v.dimension).sum();
    if total != space_dim {
        return Err(IndexerError::FileFormat {
            path: path.to_string(),
            reason: format!(
                "coarse vocabularies span dimension {}, configured space dimension is {}",
                total, space_dim
            ),
        });
    }
    debug!(
        "Loaded {} coarse vocabularies from {}",
        vocabs.len(),
        path
    );
    Ok(vocabs)
}

/// Reads the fine (PQ) codebooks. The caller decides the rerank variant from
/// the returned count.
pub fn read_fine_vocabs(path: &str) -> Result<Vec<Centroids>> {
    let vocabs = read_vocabs(path)?;
    debug!("Loaded {} fine vocabularies from {}", vocabs.len(), path);
    Ok(vocabs)
}

/// Writes vocabularies in the layout `read_vocabs` expects. Used by the
/// codebook-preparation tooling and by tests.
pub fn write_vocabs(path: &str, vocabs: &[Centroids]) -> Result<()> {
    let io_err = |e: std::io::Error| IndexerError::FileFormat {
        path: path.to_string(),
        reason: e.to_string(),
    };

    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    writer
        .write_i32::<LittleEndian>(vocabs.len() as i32)
        .map_err(io_err)?;
    for vocab in vocabs {
        writer
            .write_i32::<LittleEndian>(vocab.num_centroids() as i32)
            .map_err(io_err)?;
        writer
            .write_i32::<LittleEndian>(vocab.dimension as i32)
            .map_err(io_err)?;
        for &value in &vocab.data {
            writer.write_f32::<LittleEndian>(value).map_err(io_err)?;
        }
    }
    writer.flush().map_err(io_err)?;
    Ok(())
}
