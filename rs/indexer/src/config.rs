use serde::{Deserialize, Serialize};

use crate::error::{IndexerError, Result};
use crate::vocab::Centroids;

/// Whether reranking distances are computed against coarse-quantization
/// residuals or against the raw point coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RerankMode {
    UseResiduals,

    #[default]
    UseInitPoints,
}

/// On-disk encoding of point coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PointType {
    #[default]
    Float,
    Byte,
}

impl std::str::FromStr for PointType {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "FVEC" => Ok(PointType::Float),
            "BVEC" => Ok(PointType::Byte),
            other => Err(IndexerError::OptionSyntax(format!(
                "input_point_type must be FVEC or BVEC, got '{}'",
                other
            ))),
        }
    }
}

/// Reranking code width, selected at runtime from the number of fine
/// vocabularies. Only 8 and 16 sub-codebooks are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RerankVariant {
    Adc8,
    Adc16,
}

impl RerankVariant {
    pub fn from_fine_vocab_count(count: usize) -> Result<Self> {
        match count {
            8 => Ok(RerankVariant::Adc8),
            16 => Ok(RerankVariant::Adc16),
            other => Err(IndexerError::Configuration(format!(
                "unsupported fine vocabulary count {}, expected 8 or 16",
                other
            ))),
        }
    }

    /// Bytes in one per-point rerank code.
    pub fn code_width(&self) -> usize {
        match self {
            RerankVariant::Adc8 => 8,
            RerankVariant::Adc16 => 16,
        }
    }
}

/// Raw options as parsed from the command line, before any file has been
/// opened or any cross-field check has run.
#[derive(Debug, Clone, Default)]
pub struct IndexerOptions {
    pub threads_count: usize,
    pub multiplicity: usize,
    pub points_file: Option<String>,
    pub metainfo_file: Option<String>,
    pub coarse_vocabs_file: String,
    pub fine_vocabs_file: Option<String>,
    pub point_type: PointType,
    pub build_coarse: bool,
    pub use_residuals: bool,
    pub points_count: Option<usize>,
    pub coarse_quantization_file: Option<String>,
    pub space_dim: usize,
    pub files_prefix: Option<String>,
}

/// Fully validated build parameters. Assembled once after the vocabularies
/// are loaded and never mutated afterwards; the builder gets a shared
/// reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildConfig {
    pub threads_count: usize,
    pub multiplicity: usize,
    pub dimension: usize,
    pub points_file: String,
    pub metainfo_file: Option<String>,
    pub points_count: Option<usize>,
    pub point_type: PointType,
    pub mode: RerankMode,
    pub variant: RerankVariant,
    pub build_coarse: bool,
    pub coarse_quantization_file: Option<String>,
    pub files_prefix: String,
}

impl BuildConfig {
    /// Selects the rerank variant from the loaded fine vocabularies and
    /// checks cross-field consistency. Purely decisional, no I/O.
    pub fn assemble(
        opts: &IndexerOptions,
        coarse_vocabs: &[Centroids],
        fine_vocabs: &[Centroids],
    ) -> Result<BuildConfig> {
        let variant = RerankVariant::from_fine_vocab_count(fine_vocabs.len())?;

        if opts.multiplicity == 0 {
            return Err(IndexerError::Configuration(
                "multiplicity must be at least 1".to_string(),
            ));
        }
        if opts.multiplicity != coarse_vocabs.len() {
            return Err(IndexerError::Configuration(format!(
                "multiplicity is {} but {} coarse vocabularies were loaded",
                opts.multiplicity,
                coarse_vocabs.len()
            )));
        }
        if !opts.build_coarse && opts.coarse_quantization_file.is_none() {
            return Err(IndexerError::Configuration(
                "coarse quantizations are not built (-b absent), \
                 so a coarse_quantization_file (-q) is required"
                    .to_string(),
            ));
        }
        let points_file = opts.points_file.clone().ok_or_else(|| {
            IndexerError::Configuration("points_file (-p) is required for a build".to_string())
        })?;
        let files_prefix = opts.files_prefix.clone().ok_or_else(|| {
            IndexerError::Configuration("files_prefix (-_) is required for a build".to_string())
        })?;

        let mode = if opts.use_residuals {
            RerankMode::UseResiduals
        } else {
            RerankMode::UseInitPoints
        };

        Ok(BuildConfig {
            threads_count: opts.threads_count.max(1),
            multiplicity: opts.multiplicity,
            dimension: opts.space_dim,
            points_file,
            metainfo_file: opts.metainfo_file.clone(),
            points_count: opts.points_count,
            point_type: opts.point_type,
            mode,
            variant,
            build_coarse: opts.build_coarse,
            coarse_quantization_file: opts.coarse_quantization_file.clone(),
            files_prefix,
        })
    }
}
