use clap::error::{ContextKind, ErrorKind};
use clap::Parser;
use indexer::config::{IndexerOptions, PointType};
use indexer::error::{IndexerError, Result};
use indexer::indexer::MultiIndexer;
use indexer::launcher;
use log::info;

#[derive(Parser, Debug)]
#[command(name = "indexer_launcher", version, about = "Builds a multi-index over a point collection", long_about = None)]
struct Args {
    /// Number of threads for indexing
    #[arg(short = 't', long = "threads_count", default_value_t = 1)]
    threads_count: usize,

    /// Multiplicity of the multi-index
    #[arg(short = 'm', long = "multiplicity", default_value_t = 1)]
    multiplicity: usize,

    /// File with points to index
    #[arg(short = 'p', long = "points_file")]
    points_file: Option<String>,

    /// File with per-point metainfo (image id etc.)
    #[arg(short = 'z', long = "metainfo_file")]
    metainfo_file: Option<String>,

    /// File with vocabularies for the multi-index structure
    #[arg(short = 'c', long = "coarse_vocabs_file", required = true)]
    coarse_vocabs_file: String,

    /// File with vocabularies for reranking
    #[arg(short = 'f', long = "fine_vocabs_file")]
    fine_vocabs_file: Option<String>,

    /// Point coordinate encoding, FVEC or BVEC
    #[arg(short = 'i', long = "input_point_type", default_value = "FVEC")]
    input_point_type: String,

    /// Compute coarse quantizations instead of reading a precomputed cache
    #[arg(short = 'b', long = "build_coarse")]
    build_coarse: bool,

    /// Rerank against quantization residuals instead of raw coordinates
    #[arg(short = 'r', long = "use_residuals")]
    use_residuals: bool,

    /// Cap on the number of points to index
    #[arg(short = 'o', long = "points_count")]
    points_count: Option<usize>,

    /// File with precomputed coarse quantizations
    #[arg(short = 'q', long = "coarse_quantization_file")]
    coarse_quantization_file: Option<String>,

    /// Number of coordinates in a point
    #[arg(short = 'd', long = "space_dim", default_value_t = 0)]
    space_dim: usize,

    /// Common prefix of all index files
    #[arg(short = '_', long = "files_prefix")]
    files_prefix: Option<String>,
}

impl Args {
    fn into_options(self) -> Result<IndexerOptions> {
        let point_type: PointType = self.input_point_type.parse()?;
        Ok(IndexerOptions {
            threads_count: self.threads_count,
            multiplicity: self.multiplicity,
            points_file: self.points_file,
            metainfo_file: self.metainfo_file,
            coarse_vocabs_file: self.coarse_vocabs_file,
            fine_vocabs_file: self.fine_vocabs_file,
            point_type,
            build_coarse: self.build_coarse,
            use_residuals: self.use_residuals,
            points_count: self.points_count,
            coarse_quantization_file: self.coarse_quantization_file,
            space_dim: self.space_dim,
            files_prefix: self.files_prefix,
        })
    }
}

fn map_clap_error(err: &clap::Error) -> IndexerError {
    let offending_arg = err
        .get(ContextKind::InvalidArg)
        .map(|v| v.to_string())
        .unwrap_or_else(|| err.to_string());
    match err.kind() {
        ErrorKind::UnknownArgument => IndexerError::Usage(offending_arg),
        ErrorKind::InvalidValue => IndexerError::MissingArgument(offending_arg),
        ErrorKind::ValueValidation => IndexerError::OptionSyntax(err.to_string()),
        _ => IndexerError::Usage(err.to_string()),
    }
}

fn run_cli() -> i32 {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                let _ = err.print();
                return 0;
            }
            eprintln!("{}", map_clap_error(&err));
            return 1;
        }
    };
    let opts = match args.into_options() {
        Ok(opts) => opts,
        Err(err) => {
            eprintln!("{}", err);
            return 1;
        }
    };
    info!("Options are set");

    let mut builder = MultiIndexer::new();
    match launcher::run(&opts, &mut builder) {
        Ok(stats) => {
            info!("Index built over {} points", stats.points_indexed);
            0
        }
        Err(err) => {
            eprintln!("{}", err);
            1
        }
    }
}

fn main() {
    env_logger::init();
    std::process::exit(run_cli());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> std::result::Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("indexer_launcher").chain(argv.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["-c", "coarse.dat"]).unwrap();
        let opts = args.into_options().unwrap();
        assert_eq!(opts.threads_count, 1);
        assert_eq!(opts.multiplicity, 1);
        assert_eq!(opts.point_type, PointType::Float);
        assert!(!opts.build_coarse);
        assert!(!opts.use_residuals);
        assert_eq!(opts.points_count, None);
        assert_eq!(opts.coarse_vocabs_file, "coarse.dat");
    }

    #[test]
    fn test_all_options() {
        let args = parse(&[
            "-t", "8", "-m", "2", "-p", "points.fvecs", "-z", "ids.bin", "-c", "coarse.dat",
            "-f", "fine.dat", "-i", "BVEC", "-b", "-r", "-o", "1000", "-q", "cache.bin", "-d",
            "128", "-_", "out/index",
        ])
        .unwrap();
        let opts = args.into_options().unwrap();
        assert_eq!(opts.threads_count, 8);
        assert_eq!(opts.point_type, PointType::Byte);
        assert!(opts.build_coarse);
        assert!(opts.use_residuals);
        assert_eq!(opts.points_count, Some(1000));
        assert_eq!(opts.space_dim, 128);
        assert_eq!(opts.files_prefix.as_deref(), Some("out/index"));
    }

    #[test]
    fn test_coarse_vocabs_file_is_required() {
        let err = parse(&["-t", "8"]).unwrap_err();
        assert!(matches!(map_clap_error(&err), IndexerError::Usage(_)));
    }

    #[test]
    fn test_unknown_option() {
        let err = parse(&["-c", "coarse.dat", "--frobnicate"]).unwrap_err();
        assert!(matches!(map_clap_error(&err), IndexerError::Usage(_)));
    }

    #[test]
    fn test_option_without_value() {
        let err = parse(&["-c", "coarse.dat", "-t"]).unwrap_err();
        assert!(matches!(
            map_clap_error(&err),
            IndexerError::MissingArgument(_)
        ));
    }

    #[test]
    fn test_malformed_value() {
        let err = parse(&["-c", "coarse.dat", "-t", "lots"]).unwrap_err();
        assert!(matches!(
            map_clap_error(&err),
            IndexerError::OptionSyntax(_)
        ));
    }

    #[test]
    fn test_bad_point_type() {
        let args = parse(&["-c", "coarse.dat", "-i", "IVEC"]).unwrap();
        assert!(matches!(
            args.into_options(),
            Err(IndexerError::OptionSyntax(_))
        ));
    }
}
