use std::fs;
use std::io::{self, Read};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_taxonomy::app::App;
use kira_taxonomy::config::{ConfigLoader, ResolvedConfig, default_taxid_db_path};
use kira_taxonomy::error::KiraError;
use kira_taxonomy::eutils::EntrezHttpClient;
use kira_taxonomy::output::{BuildResult, JsonOutput, LogProgress, LookupEntry};
use kira_taxonomy::resolver::TaxonomyResolver;
use kira_taxonomy::taxdb::{PopulateOptions, TaxIdDb};

#[derive(Parser)]
#[command(name = "kira-tax")]
#[command(about = "Resolve sequence accessions to NCBI taxonomy lineages")]
#[command(version, author)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Manage the local accession -> taxid database")]
    Db(DbArgs),
    #[command(about = "Resolve accessions (one per line) to taxids and lineages")]
    Resolve(ResolveArgs),
}

#[derive(Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbCommand,
}

#[derive(Subcommand)]
enum DbCommand {
    #[command(about = "Build the database from an accession2taxid file (.gz accepted)")]
    Build(BuildArgs),
    #[command(about = "Look up accessions in the database")]
    Lookup(LookupArgs),
}

#[derive(Args)]
struct BuildArgs {
    #[arg(long)]
    db: Option<Utf8PathBuf>,

    #[arg(long)]
    source: Utf8PathBuf,

    #[arg(short, long)]
    force: bool,

    #[arg(long)]
    chunk_size: Option<usize>,
}

#[derive(Args)]
struct LookupArgs {
    #[arg(long)]
    db: Option<Utf8PathBuf>,

    #[arg(required = true)]
    accessions: Vec<String>,
}

#[derive(Args)]
struct ResolveArgs {
    /// File with one accession per line, or `-` for stdin.
    input: String,

    #[arg(long)]
    db: Option<Utf8PathBuf>,

    #[arg(long, conflicts_with = "db")]
    no_db: bool,

    #[arg(long)]
    cache: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::AlreadyPopulated
        | KiraError::NotPopulated
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::InvalidConfig(_) => 2,
        KiraError::EntrezHttp(_)
        | KiraError::EntrezStatus { .. }
        | KiraError::EntrezResponse(_)
        | KiraError::ResponseMisaligned { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Db(args) => match args.command {
            DbCommand::Build(args) => run_build(args, &config),
            DbCommand::Lookup(args) => run_lookup(args, &config),
        },
        Commands::Resolve(args) => run_resolve(args, &config),
    }
}

fn taxid_db_path(
    flag: Option<Utf8PathBuf>,
    config: &ResolvedConfig,
) -> miette::Result<Utf8PathBuf> {
    match flag.or_else(|| config.taxid_db.clone()) {
        Some(path) => Ok(path),
        None => Ok(default_taxid_db_path()?),
    }
}

fn run_build(args: BuildArgs, config: &ResolvedConfig) -> miette::Result<()> {
    let path = taxid_db_path(args.db, config)?;
    // An existing store resumes or refuses via its populated flag.
    let mut db = if path.as_std_path().exists() {
        TaxIdDb::open(&path)?
    } else {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path()).into_diagnostic()?;
        }
        TaxIdDb::create(&path)?
    };

    let options = PopulateOptions {
        force: args.force,
        chunk_size: args.chunk_size.unwrap_or(config.populate_chunk_size),
    };
    tracing::info!("building taxid database at {path} from {}", args.source);
    let summary = db.populate_from_path(&args.source, &options, &LogProgress)?;
    JsonOutput::print_build(&BuildResult::new(path.as_str(), summary)).into_diagnostic()?;
    Ok(())
}

fn run_lookup(args: LookupArgs, config: &ResolvedConfig) -> miette::Result<()> {
    let path = taxid_db_path(args.db, config)?;
    let db = TaxIdDb::open(&path)?;
    let taxids = db.lookup_many(&args.accessions)?;
    let entries: Vec<LookupEntry> = args
        .accessions
        .into_iter()
        .zip(taxids)
        .map(|(accession, taxid)| LookupEntry { accession, taxid })
        .collect();
    JsonOutput::print_lookup(&entries).into_diagnostic()?;
    Ok(())
}

fn run_resolve(args: ResolveArgs, config: &ResolvedConfig) -> miette::Result<()> {
    let content = if args.input == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer).into_diagnostic()?;
        buffer
    } else {
        fs::read_to_string(&args.input)
            .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", args.input)))?
    };
    let accessions: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let taxdb = if args.no_db {
        None
    } else {
        let explicit = args.db.is_some() || config.taxid_db.is_some();
        let path = taxid_db_path(args.db, config)?;
        if explicit || path.as_std_path().exists() {
            Some(TaxIdDb::open(&path)?)
        } else {
            None
        }
    };

    let client = EntrezHttpClient::new(config.entrez.clone())?;
    let resolver = TaxonomyResolver::new(client, config.resolver);
    let cache_path = args.cache.or_else(|| config.cache.clone());
    let mut app = App::new(resolver, taxdb, cache_path);

    app.load_cache()?;
    let resolution = app.resolve(&accessions, &LogProgress)?;
    app.save_cache()?;

    if !resolution.taxdict.invalid.is_empty() {
        eprintln!(
            "{} invalid accession(s) skipped: {}",
            resolution.taxdict.invalid.len(),
            resolution.taxdict.invalid.join(", ")
        );
    }
    JsonOutput::print_resolution(&resolution).into_diagnostic()?;
    Ok(())
}
