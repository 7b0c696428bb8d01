use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use contig_indexer::config::ConfigLoader;
use contig_indexer::domain::{AnnotationCategory, contig_name_to_id};
use contig_indexer::error::IndexerError;
use contig_indexer::import::{ImportOutcome, import_features, reset_store};
use contig_indexer::output::{JsonOutput, LogSink, ResetResult, StatsResult, SuggestResult};
use contig_indexer::source::DefaultSourceProvider;
use contig_indexer::store::ContigStore;
use contig_indexer::typeahead::{DEFAULT_LIMIT, suggest};

#[derive(Parser)]
#[command(name = "contig-indexer")]
#[command(about = "Index bgzip/tabix GFF3 annotations into a local store and query them offline")]
#[command(version, author)]
struct Cli {
    /// Store file (default: ~/.cache/contig-indexer/contigs.sqlite)
    #[arg(long, global = true)]
    store: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Stream a feature file into the store")]
    Import(ImportArgs),
    #[command(about = "Suggest annotation values starting with a prefix")]
    Suggest(SuggestArgs),
    #[command(about = "Show contig counts, facet counts and import metadata")]
    Stats,
    #[command(about = "Remove every contig and metadata entry")]
    Reset,
    #[command(about = "Show one stored contig")]
    Show(ShowArgs),
}

#[derive(Args)]
struct ImportArgs {
    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct SuggestArgs {
    category: AnnotationCategory,

    query: String,

    #[arg(long, default_value_t = DEFAULT_LIMIT)]
    limit: usize,
}

#[derive(Args)]
struct ShowArgs {
    contig_name: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<IndexerError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &IndexerError) -> u8 {
    match error {
        IndexerError::MissingConfig
        | IndexerError::ConfigRead(_)
        | IndexerError::ConfigParse(_)
        | IndexerError::InvalidConfig(_) => 2,
        error if error.is_network() => 3,
        IndexerError::Storage(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Import(args) => run_import(args, cli.store),
        Commands::Suggest(args) => run_suggest(args, open_store(cli.store)?),
        Commands::Stats => {
            let store = open_store(cli.store)?;
            let result = StatsResult::collect(&store)?;
            JsonOutput::print_stats(&result).into_diagnostic()?;
            Ok(())
        }
        Commands::Reset => {
            let store = open_store(cli.store)?;
            let removed = store.count()?;
            reset_store(&store)?;
            JsonOutput::print_reset(&ResetResult {
                store: store.location().to_string(),
                removed,
            })
            .into_diagnostic()?;
            Ok(())
        }
        Commands::Show(args) => run_show(args, open_store(cli.store)?),
    }
}

fn open_store(path: Option<Utf8PathBuf>) -> Result<ContigStore, IndexerError> {
    let path = match path {
        Some(path) => path,
        None => ContigStore::default_path()?,
    };
    ContigStore::open(&path)
}

fn run_import(args: ImportArgs, store_path: Option<Utf8PathBuf>) -> miette::Result<()> {
    let resolved = ConfigLoader::resolve(args.config.as_deref())?;
    let store = open_store(store_path.or(resolved.store))?;
    let provider = DefaultSourceProvider::new()?;

    let job = import_features(&store, provider, resolved.import);
    match job.start(&LogSink)? {
        ImportOutcome::Completed(summary) => {
            JsonOutput::print_summary(&summary).into_diagnostic()?;
            Ok(())
        }
        ImportOutcome::Cancelled => Err(IndexerError::Cancelled.into()),
    }
}

fn run_suggest(args: SuggestArgs, store: ContigStore) -> miette::Result<()> {
    let suggestions = suggest(&store, &args.query, args.category, args.limit);
    JsonOutput::print_suggestions(&SuggestResult {
        category: args.category,
        query: args.query,
        suggestions,
    })
    .into_diagnostic()?;
    Ok(())
}

fn run_show(args: ShowArgs, store: ContigStore) -> miette::Result<()> {
    let contig_id = contig_name_to_id(&args.contig_name)?;
    let Some(contig) = store.get(contig_id)? else {
        return Err(miette::miette!("contig {} not found in store", args.contig_name));
    };
    JsonOutput::print_contig(&contig).into_diagnostic()?;
    Ok(())
}
