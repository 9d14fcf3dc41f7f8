use log::info;

use crate::config::{BuildConfig, IndexerOptions};
use crate::error::{IndexerError, Result};
use crate::indexer::{BuildStats, IndexBuilder};
use crate::vocab::{read_coarse_vocabs, read_fine_vocabs};

/// Runs the whole orchestration: load vocabularies, assemble and validate the
/// build configuration, then invoke the builder exactly once. Any failure
/// skips the remaining stages; the builder's own result is propagated, never
/// swallowed.
pub fn run(opts: &IndexerOptions, builder: &mut impl IndexBuilder) -> Result<BuildStats> {
    if opts.space_dim == 0 {
        return Err(IndexerError::Configuration(
            "space_dim (-d) must be positive".to_string(),
        ));
    }
    let fine_vocabs_file = opts.fine_vocabs_file.clone().ok_or_else(|| {
        IndexerError::Configuration("fine_vocabs_file (-f) is required".to_string())
    })?;

    let coarse_vocabs = read_coarse_vocabs(&opts.coarse_vocabs_file, opts.space_dim)?;
    let fine_vocabs = read_fine_vocabs(&fine_vocabs_file)?;
    info!(
        "Vocabularies are read: {} coarse, {} fine",
        coarse_vocabs.len(),
        fine_vocabs.len()
    );

    let config = BuildConfig::assemble(opts, &coarse_vocabs, &fine_vocabs)?;
    info!(
        "Configuration validated, rerank code width is {}",
        config.variant.code_width()
    );

    builder
        .build(&config, &coarse_vocabs, &fine_vocabs)
        .map_err(IndexerError::from)
}
