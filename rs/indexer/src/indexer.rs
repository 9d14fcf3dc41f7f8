use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

use anyhow::{anyhow, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use serde::Serialize;
use utils::l2::L2DistanceCalculator;

use crate::config::{BuildConfig, RerankMode};
use crate::input::vecs::VecsReader;
use crate::input::PointInput;
use crate::vocab::Centroids;

#[derive(Debug, Clone, PartialEq)]
pub struct BuildStats {
    pub points_indexed: usize,
}

/// Contract of the index-building collaborator. The orchestrator assembles
/// the configuration and calls `build` exactly once; the builder owns
/// everything from point reading to artifact writing.
pub trait IndexBuilder {
    fn build(
        &mut self,
        config: &BuildConfig,
        coarse_vocabs: &[Centroids],
        fine_vocabs: &[Centroids],
    ) -> Result<BuildStats>;
}

/// Summary written next to the index artifacts.
#[derive(Serialize)]
struct IndexMeta<'a> {
    config: &'a BuildConfig,
    points_indexed: usize,
}

/// Builds the two-level index: per-point coarse cell ids across the
/// multi-index codebooks plus a fixed-width fine code for reranking.
/// Artifacts land under `files_prefix`: `.cells`, `.codes`, `.metainfo`
/// and `.meta.yaml`.
pub struct MultiIndexer {
    batch_size: usize,
}

impl MultiIndexer {
    pub fn new() -> Self {
        Self { batch_size: 1024 }
    }

    pub fn with_batch_size(batch_size: usize) -> Self {
        Self { batch_size }
    }
}

impl Default for MultiIndexer {
    fn default() -> Self {
        Self::new()
    }
}

fn subspace_offsets(vocabs: &[Centroids]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(vocabs.len());
    let mut offset = 0;
    for vocab in vocabs {
        offsets.push(offset);
        offset += vocab.dimension;
    }
    offsets
}

fn nearest_centroid(vocab: &Centroids, subvector: &[f32], dist: &L2DistanceCalculator) -> usize {
    let mut min_distance = f32::MAX;
    let mut nearest = 0;
    for centroid_id in 0..vocab.num_centroids() {
        let distance = dist.calculate_squared(subvector, vocab.centroid(centroid_id));
        if distance < min_distance {
            min_distance = distance;
            nearest = centroid_id;
        }
    }
    nearest
}

fn assign_cells(
    point: &[f32],
    coarse_vocabs: &[Centroids],
    offsets: &[usize],
    dist: &L2DistanceCalculator,
) -> Vec<u32> {
    coarse_vocabs
        .iter()
        .zip(offsets)
        .map(|(vocab, &offset)| {
            nearest_centroid(vocab, &point[offset..offset + vocab.dimension], dist) as u32
        })
        .collect()
}

fn encode_fine_code(
    point: &[f32],
    cells: &[u32],
    coarse_vocabs: &[Centroids],
    coarse_offsets: &[usize],
    fine_vocabs: &[Centroids],
    fine_offsets: &[usize],
    mode: RerankMode,
    dist: &L2DistanceCalculator,
) -> Vec<u8> {
    let mut rerank_source;
    let source: &[f32] = match mode {
        RerankMode::UseInitPoints => point,
        RerankMode::UseResiduals => {
            rerank_source = point.to_vec();
            for (m, vocab) in coarse_vocabs.iter().enumerate() {
                let centroid = vocab.centroid(cells[m] as usize);
                let offset = coarse_offsets[m];
                for (j, &value) in centroid.iter().enumerate() {
                    rerank_source[offset + j] -= value;
                }
            }
            &rerank_source
        }
    };

    fine_vocabs
        .iter()
        .zip(fine_offsets)
        .map(|(vocab, &offset)| {
            nearest_centroid(vocab, &source[offset..offset + vocab.dimension], dist) as u8
        })
        .collect()
}

fn read_cached_cells(
    reader: &mut BufReader<File>,
    coarse_vocabs: &[Centroids],
    point_idx: usize,
) -> Result<Vec<u32>> {
    let mut cells = Vec::with_capacity(coarse_vocabs.len());
    for vocab in coarse_vocabs {
        let id = reader
            .read_i32::<LittleEndian>()
            .with_context(|| format!("truncated coarse quantization for point {}", point_idx))?;
        if id < 0 || id as usize >= vocab.num_centroids() {
            return Err(anyhow!(
                "coarse quantization of point {} refers to centroid {} out of {}",
                point_idx,
                id,
                vocab.num_centroids()
            ));
        }
        cells.push(id as u32);
    }
    Ok(cells)
}

impl IndexBuilder for MultiIndexer {
    fn build(
        &mut self,
        config: &BuildConfig,
        coarse_vocabs: &[Centroids],
        fine_vocabs: &[Centroids],
    ) -> Result<BuildStats> {
        let fine_dim: usize = fine_vocabs.iter().map(|v| v.dimension).sum();
        if fine_dim != config.dimension {
            return Err(anyhow!(
                "fine vocabularies span dimension {}, space dimension is {}",
                fine_dim,
                config.dimension
            ));
        }
        for (idx, vocab) in fine_vocabs.iter().enumerate() {
            if vocab.num_centroids() > 256 {
                return Err(anyhow!(
                    "fine vocabulary {} has {} centroids, rerank codes hold at most 256",
                    idx,
                    vocab.num_centroids()
                ));
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads_count)
            .build()
            .context("failed to create indexing thread pool")?;

        let mut input = VecsReader::new(
            &config.points_file,
            config.dimension,
            config.point_type,
            config.points_count,
        )?;
        info!(
            "Start indexing {} points with {} threads",
            input.num_points(),
            config.threads_count
        );

        let mut cache_reader = match (config.build_coarse, &config.coarse_quantization_file) {
            (false, Some(path)) => {
                let file = File::open(path)
                    .with_context(|| format!("failed to open coarse quantization cache {}", path))?;
                Some(BufReader::new(file))
            }
            _ => None,
        };
        let mut metainfo_reader = match &config.metainfo_file {
            Some(path) => {
                let file = File::open(path)
                    .with_context(|| format!("failed to open metainfo file {}", path))?;
                Some(BufReader::new(file))
            }
            None => None,
        };

        let prefix = &config.files_prefix;
        let mut cells_writer = BufWriter::new(
            File::create(format!("{}.cells", prefix)).context("failed to create cells file")?,
        );
        let mut codes_writer = BufWriter::new(
            File::create(format!("{}.codes", prefix)).context("failed to create codes file")?,
        );
        let mut metainfo_writer = BufWriter::new(
            File::create(format!("{}.metainfo", prefix))
                .context("failed to create metainfo file")?,
        );
        // With -b and -q together the computed quantizations are cached for
        // later runs.
        let mut cache_writer = match (config.build_coarse, &config.coarse_quantization_file) {
            (true, Some(path)) => Some(BufWriter::new(File::create(path).with_context(|| {
                format!("failed to create coarse quantization cache {}", path)
            })?)),
            _ => None,
        };

        let coarse_offsets = subspace_offsets(coarse_vocabs);
        let fine_offsets = subspace_offsets(fine_vocabs);
        let dist = L2DistanceCalculator::new();

        let mut points_indexed = 0;
        loop {
            let mut batch: Vec<Vec<f32>> = Vec::with_capacity(self.batch_size);
            while batch.len() < self.batch_size && input.has_next() {
                batch.push(input.next()?);
            }
            if batch.is_empty() {
                break;
            }

            // Cache reads stay sequential; assignment and encoding fan out
            // over the batch.
            let cached_cells: Vec<Option<Vec<u32>>> = match &mut cache_reader {
                Some(reader) => {
                    let mut cached = Vec::with_capacity(batch.len());
                    for i in 0..batch.len() {
                        cached.push(Some(read_cached_cells(
                            reader,
                            coarse_vocabs,
                            points_indexed + i,
                        )?));
                    }
                    cached
                }
                None => vec![None; batch.len()],
            };

            let encoded: Vec<(Vec<u32>, Vec<u8>)> = pool.install(|| {
                batch
                    .par_iter()
                    .zip(cached_cells.par_iter())
                    .map(|(point, cached)| {
                        let cells = match cached {
                            Some(cells) => cells.clone(),
                            None => assign_cells(point, coarse_vocabs, &coarse_offsets, &dist),
                        };
                        let code = encode_fine_code(
                            point,
                            &cells,
                            coarse_vocabs,
                            &coarse_offsets,
                            fine_vocabs,
                            &fine_offsets,
                            config.mode,
                            &dist,
                        );
                        (cells, code)
                    })
                    .collect()
            });

            for (idx, (cells, code)) in encoded.iter().enumerate() {
                for &cell in cells {
                    cells_writer
                        .write_u32::<LittleEndian>(cell)
                        .context("failed to write cell ids")?;
                    if let Some(writer) = &mut cache_writer {
                        writer
                            .write_i32::<LittleEndian>(cell as i32)
                            .context("failed to write coarse quantization cache")?;
                    }
                }
                codes_writer
                    .write_all(code)
                    .context("failed to write rerank codes")?;

                let point_id = match &mut metainfo_reader {
                    Some(reader) => reader.read_u32::<LittleEndian>().with_context(|| {
                        format!("truncated metainfo for point {}", points_indexed + idx)
                    })?,
                    None => (points_indexed + idx) as u32,
                };
                metainfo_writer
                    .write_u32::<LittleEndian>(point_id)
                    .context("failed to write metainfo")?;
            }

            points_indexed += batch.len();
            debug!("Indexed {} points", points_indexed);
        }

        cells_writer.flush().context("failed to flush cells file")?;
        codes_writer.flush().context("failed to flush codes file")?;
        metainfo_writer
            .flush()
            .context("failed to flush metainfo file")?;
        if let Some(writer) = &mut cache_writer {
            writer
                .flush()
                .context("failed to flush coarse quantization cache")?;
        }

        let meta = IndexMeta {
            config,
            points_indexed,
        };
        let meta_yaml =
            serde_yaml::to_string(&meta).context("failed to serialize build summary")?;
        std::fs::write(format!("{}.meta.yaml", prefix), meta_yaml)
            .context("failed to write build summary")?;

        info!("Finished indexing {} points", points_indexed);
        Ok(BuildStats { points_indexed })
    }
}

#[cfg(test)]
mod tests {
    use byteorder::WriteBytesExt;
    use tempdir::TempDir;

    use super::*;
    use crate::config::{PointType, RerankVariant};
    use crate::vocab::write_vocabs;

    const DIMENSION: usize = 8;

    fn write_fvecs(path: &str, points: &[Vec<f32>]) {
        let mut file = File::create(path).unwrap();
        for point in points {
            file.write_i32::<LittleEndian>(point.len() as i32).unwrap();
            for &v in point {
                file.write_f32::<LittleEndian>(v).unwrap();
            }
        }
    }

    // Two coarse codebooks over 4 coordinates each, centroids at 0 and 10.
    fn coarse_vocabs() -> Vec<Centroids> {
        let vocab = Centroids {
            dimension: 4,
            data: [vec![0.0; 4], vec![10.0; 4]].concat(),
        };
        vec![vocab.clone(), vocab]
    }

    // Eight single-coordinate fine codebooks with centroids 0, 1, 2, 3.
    fn fine_vocabs() -> Vec<Centroids> {
        let vocab = Centroids {
            dimension: 1,
            data: vec![0.0, 1.0, 2.0, 3.0],
        };
        vec![vocab; 8]
    }

    fn config(prefix: &str, points_file: &str) -> BuildConfig {
        BuildConfig {
            threads_count: 2,
            multiplicity: 2,
            dimension: DIMENSION,
            points_file: points_file.to_string(),
            metainfo_file: None,
            points_count: None,
            point_type: PointType::Float,
            mode: RerankMode::UseInitPoints,
            variant: RerankVariant::Adc8,
            build_coarse: true,
            coarse_quantization_file: None,
            files_prefix: prefix.to_string(),
        }
    }

    fn read_u32s(path: &str) -> Vec<u32> {
        let bytes = std::fs::read(path).unwrap();
        bytes
            .chunks(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_build_computes_cells_and_codes() {
        let temp_dir = TempDir::new("indexer_test").unwrap();
        let points_path = temp_dir.path().join("points.fvecs");
        let points_path = points_path.to_str().unwrap();
        let prefix = temp_dir.path().join("index");
        let prefix = prefix.to_str().unwrap();

        // First point sits on the (0, 0) cell, second on (10, 10).
        let points = vec![
            vec![0.2, 0.0, 0.0, 0.0, 1.1, 2.2, 3.0, 0.0],
            vec![9.0, 10.0, 11.0, 10.0, 9.5, 9.5, 9.5, 9.5],
        ];
        write_fvecs(points_path, &points);

        let stats = MultiIndexer::with_batch_size(1)
            .build(&config(prefix, points_path), &coarse_vocabs(), &fine_vocabs())
            .unwrap();
        assert_eq!(stats.points_indexed, 2);

        assert_eq!(read_u32s(&format!("{}.cells", prefix)), vec![0, 0, 1, 1]);

        // Raw coordinates, clamped to the nearest of centroids 0..=3.
        let codes = std::fs::read(format!("{}.codes", prefix)).unwrap();
        assert_eq!(codes.len(), 16);
        assert_eq!(&codes[..8], &[0, 0, 0, 0, 1, 2, 3, 0]);
        assert_eq!(&codes[8..], &[3; 8]);

        // Sequential ids when no metainfo file is given.
        assert_eq!(read_u32s(&format!("{}.metainfo", prefix)), vec![0, 1]);

        let meta = std::fs::read_to_string(format!("{}.meta.yaml", prefix)).unwrap();
        assert!(meta.contains("points_indexed: 2"));
    }

    #[test]
    fn test_build_with_residuals() {
        let temp_dir = TempDir::new("indexer_test").unwrap();
        let points_path = temp_dir.path().join("points.fvecs");
        let points_path = points_path.to_str().unwrap();
        let prefix = temp_dir.path().join("index");
        let prefix = prefix.to_str().unwrap();

        // Exactly the (10, 10) cell centroid plus a +2 offset on the last
        // coordinate: residual is all zeros except a trailing 2.
        let mut point = vec![10.0; DIMENSION];
        point[7] += 2.0;
        write_fvecs(points_path, &[point]);

        let mut config = config(prefix, points_path);
        config.mode = RerankMode::UseResiduals;

        MultiIndexer::new()
            .build(&config, &coarse_vocabs(), &fine_vocabs())
            .unwrap();

        assert_eq!(read_u32s(&format!("{}.cells", prefix)), vec![1, 1]);
        let codes = std::fs::read(format!("{}.codes", prefix)).unwrap();
        assert_eq!(codes, vec![0, 0, 0, 0, 0, 0, 0, 2]);
    }

    #[test]
    fn test_build_from_cache_and_cache_writing() {
        let temp_dir = TempDir::new("indexer_test").unwrap();
        let points_path = temp_dir.path().join("points.fvecs");
        let points_path = points_path.to_str().unwrap();
        let cache_path = temp_dir.path().join("cache.bin");
        let cache_path = cache_path.to_str().unwrap();
        let prefix_a = temp_dir.path().join("index_a");
        let prefix_a = prefix_a.to_str().unwrap();
        let prefix_b = temp_dir.path().join("index_b");
        let prefix_b = prefix_b.to_str().unwrap();

        let points = vec![vec![0.0; DIMENSION], vec![10.0; DIMENSION]];
        write_fvecs(points_path, &points);

        // First run computes the quantizations and fills the cache.
        let mut config_a = config(prefix_a, points_path);
        config_a.coarse_quantization_file = Some(cache_path.to_string());
        MultiIndexer::new()
            .build(&config_a, &coarse_vocabs(), &fine_vocabs())
            .unwrap();

        // Second run consumes the cache instead of assigning.
        let mut config_b = config(prefix_b, points_path);
        config_b.build_coarse = false;
        config_b.coarse_quantization_file = Some(cache_path.to_string());
        MultiIndexer::new()
            .build(&config_b, &coarse_vocabs(), &fine_vocabs())
            .unwrap();

        assert_eq!(
            read_u32s(&format!("{}.cells", prefix_a)),
            read_u32s(&format!("{}.cells", prefix_b))
        );
    }

    #[test]
    fn test_cache_with_out_of_range_centroid() {
        let temp_dir = TempDir::new("indexer_test").unwrap();
        let points_path = temp_dir.path().join("points.fvecs");
        let points_path = points_path.to_str().unwrap();
        let cache_path = temp_dir.path().join("cache.bin");
        let prefix = temp_dir.path().join("index");
        let prefix = prefix.to_str().unwrap();

        write_fvecs(points_path, &[vec![0.0; DIMENSION]]);
        let mut cache = File::create(&cache_path).unwrap();
        cache.write_i32::<LittleEndian>(7).unwrap();
        cache.write_i32::<LittleEndian>(0).unwrap();
        drop(cache);

        let mut config = config(prefix, points_path);
        config.build_coarse = false;
        config.coarse_quantization_file = Some(cache_path.to_str().unwrap().to_string());

        assert!(MultiIndexer::new()
            .build(&config, &coarse_vocabs(), &fine_vocabs())
            .is_err());
    }

    #[test]
    fn test_metainfo_passthrough_and_points_cap() {
        let temp_dir = TempDir::new("indexer_test").unwrap();
        let points_path = temp_dir.path().join("points.fvecs");
        let points_path = points_path.to_str().unwrap();
        let metainfo_path = temp_dir.path().join("ids.bin");
        let prefix = temp_dir.path().join("index");
        let prefix = prefix.to_str().unwrap();

        let points: Vec<Vec<f32>> = (0..4).map(|_| vec![0.0; DIMENSION]).collect();
        write_fvecs(points_path, &points);
        let mut ids = File::create(&metainfo_path).unwrap();
        for id in [42u32, 43, 44, 45] {
            ids.write_u32::<LittleEndian>(id).unwrap();
        }
        drop(ids);

        let mut config = config(prefix, points_path);
        config.points_count = Some(2);
        config.metainfo_file = Some(metainfo_path.to_str().unwrap().to_string());

        let stats = MultiIndexer::new()
            .build(&config, &coarse_vocabs(), &fine_vocabs())
            .unwrap();
        assert_eq!(stats.points_indexed, 2);
        assert_eq!(read_u32s(&format!("{}.metainfo", prefix)), vec![42, 43]);
    }

    #[test]
    fn test_fine_dimension_mismatch_rejected() {
        let temp_dir = TempDir::new("indexer_test").unwrap();
        let points_path = temp_dir.path().join("points.fvecs");
        let points_path = points_path.to_str().unwrap();
        let prefix = temp_dir.path().join("index");
        let prefix = prefix.to_str().unwrap();

        write_fvecs(points_path, &[vec![0.0; DIMENSION]]);

        // 8 fine vocabularies of dimension 2 span 16, not 8.
        let fine = vec![
            Centroids {
                dimension: 2,
                data: vec![0.0; 8],
            };
            8
        ];
        assert!(MultiIndexer::new()
            .build(&config(prefix, points_path), &coarse_vocabs(), &fine)
            .is_err());
    }

    #[test]
    fn test_vocab_files_roundtrip_through_builder() {
        let temp_dir = TempDir::new("indexer_test").unwrap();
        let coarse_path = temp_dir.path().join("coarse.dat");
        let coarse_path = coarse_path.to_str().unwrap();

        write_vocabs(coarse_path, &coarse_vocabs()).unwrap();
        let loaded = crate::vocab::read_coarse_vocabs(coarse_path, DIMENSION).unwrap();
        assert_eq!(loaded, coarse_vocabs());
    }
}
