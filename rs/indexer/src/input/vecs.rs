use std::fs::File;
use std::io::{BufReader, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::config::PointType;
use crate::error::{IndexerError, Result};
use crate::input::PointInput;

/// Reader for fvecs/bvecs point files. Every record is `i32 dim` followed by
/// `dim` coordinates (f32 for fvecs, u8 for bvecs), little-endian.
pub struct VecsReader {
    reader: BufReader<File>,
    path: String,
    dimension: usize,
    point_type: PointType,
    num_points: usize,
    cursor: usize,
}

impl VecsReader {
    pub fn new(
        path: &str,
        dimension: usize,
        point_type: PointType,
        points_cap: Option<usize>,
    ) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IndexerError::FileNotFound {
                path: path.to_string(),
            },
            _ => IndexerError::FileFormat {
                path: path.to_string(),
                reason: e.to_string(),
            },
        })?;

        let record_size = match point_type {
            PointType::Float => 4 + dimension * 4,
            PointType::Byte => 4 + dimension,
        };
        let file_size = file
            .metadata()
            .map_err(|e| IndexerError::FileFormat {
                path: path.to_string(),
                reason: e.to_string(),
            })?
            .len() as usize;
        if file_size % record_size != 0 {
            return Err(IndexerError::FileFormat {
                path: path.to_string(),
                reason: format!(
                    "file size {} is not a multiple of the {}-byte record size",
                    file_size, record_size
                ),
            });
        }

        let mut num_points = file_size / record_size;
        if let Some(cap) = points_cap {
            num_points = num_points.min(cap);
        }

        Ok(Self {
            reader: BufReader::new(file),
            path: path.to_string(),
            dimension,
            point_type,
            num_points,
            cursor: 0,
        })
    }

    fn format_err(&self, reason: String) -> IndexerError {
        IndexerError::FileFormat {
            path: self.path.clone(),
            reason,
        }
    }
}

impl PointInput for VecsReader {
    fn has_next(&self) -> bool {
        self.cursor < self.num_points
    }

    fn next(&mut self) -> Result<Vec<f32>> {
        let dim = self
            .reader
            .read_i32::<LittleEndian>()
            .map_err(|_| self.format_err(format!("truncated record {}", self.cursor)))?;
        if dim as usize != self.dimension {
            return Err(self.format_err(format!(
                "record {} declares dimension {}, expected {}",
                self.cursor, dim, self.dimension
            )));
        }

        let mut point = vec![0.0f32; self.dimension];
        match self.point_type {
            PointType::Float => {
                self.reader
                    .read_f32_into::<LittleEndian>(&mut point)
                    .map_err(|_| self.format_err(format!("truncated record {}", self.cursor)))?;
            }
            PointType::Byte => {
                let mut bytes = vec![0u8; self.dimension];
                self.reader
                    .read_exact(&mut bytes)
                    .map_err(|_| self.format_err(format!("truncated record {}", self.cursor)))?;
                for (slot, byte) in point.iter_mut().zip(bytes) {
                    *slot = byte as f32;
                }
            }
        }
        self.cursor += 1;
        Ok(point)
    }

    fn num_points(&self) -> usize {
        self.num_points
    }
}
