use std::{error::Error, num::NonZeroUsize, path::PathBuf, process, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use url::Url;

use tunefetch::{
    collection::{Collection, DeleteMode},
    config::Config,
    queue::Progress,
    session::Session,
    signal,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Shortest time between two progress reports.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Link to a track, album or playlist
    #[arg(value_hint = ValueHint::Url)]
    reference: Option<String>,

    /// Configuration file
    ///
    /// Settings on the command line take precedence over the file.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    config: Option<String>,

    /// Directory to save tracks to
    ///
    /// [default: current directory]
    #[arg(short, long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    output: Option<PathBuf>,

    /// Number of tracks to download at the same time
    ///
    /// [default: 15]
    #[arg(short = 'j', long, value_name = "N")]
    concurrency: Option<NonZeroUsize>,

    /// Endpoint that resolves links into track lists
    #[arg(long, value_name = "URL", env = "TRACKS_API_URL", value_hint = ValueHint::Url)]
    tracks_api_url: Option<Url>,

    /// Endpoint that resolves tracks into audio URLs
    #[arg(long, value_name = "URL", env = "DOWNLOAD_API_URL", value_hint = ValueHint::Url)]
    download_api_url: Option<Url>,

    /// Number of times to retry failed tracks
    #[arg(short, long, value_name = "N", default_value_t = 1)]
    retries: u32,

    /// First track to download, counting from 1
    ///
    /// Tracks before it are removed from the list.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    start: Option<u64>,

    /// Last track to download, counting from 1
    ///
    /// Tracks after it are removed from the list.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    end: Option<u64>,

    /// Reuse the track list from the history instead of resolving again
    #[arg(long, default_value_t = false)]
    cached: bool,

    /// List recently resolved collections and exit
    #[arg(long, default_value_t = false, conflicts_with = "reference")]
    history: bool,

    /// Forget recently resolved collections
    #[arg(long, default_value_t = false)]
    clear_history: bool,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            // Quiet and verbose are mutually exclusive, and `verbose` is 0
            // by default. So this arm means: quiet mode.
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Builds the configuration from the file, if any, and the command line.
fn load_config(args: &Args) -> tunefetch::error::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::new(),
    };

    if let Some(url) = &args.tracks_api_url {
        config.tracks_api_url = Some(url.clone());
    }
    if let Some(url) = &args.download_api_url {
        config.download_api_url = Some(url.clone());
    }
    if let Some(dir) = &args.output {
        config.output_dir.clone_from(dir);
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }

    Ok(config)
}

/// Prints the history, most recent first.
fn print_history(session: &Session) -> tunefetch::error::Result<()> {
    let entries = session.history()?;
    if entries.is_empty() {
        info!("history is empty");
    }

    for (i, collection) in entries.iter().enumerate() {
        println!("{:>2}. {collection} ({} tracks)", i + 1, collection.len());
        println!("    {}", collection.url);
    }
    Ok(())
}

/// Narrows the active collection to tracks `start..=end`, counting from 1.
fn trim(session: &Session, start: Option<u64>, end: Option<u64>) -> Result<(), Box<dyn Error>> {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(format!("--end {end} is before --start {start}").into());
        }
    }

    let len = session.collection().as_ref().map_or(0, Collection::len);

    // Trim the tail first so that `start` still counts from the original list.
    if let Some(end) = end.and_then(|end| usize::try_from(end).ok()) {
        if end < len {
            session.delete_tracks(end, DeleteMode::Below)?;
        }
    }

    if let Some(start) = start.and_then(|start| usize::try_from(start).ok()) {
        if start > len {
            return Err(format!("--start {start} is beyond the last of {len} tracks").into());
        }
        if start > 1 {
            session.delete_tracks(start - 2, DeleteMode::Above)?;
        }
    }

    Ok(())
}

/// Logs progress counts as they change, at most every [`PROGRESS_INTERVAL`].
async fn report(mut progress: tokio::sync::watch::Receiver<Progress>) {
    while progress.changed().await.is_ok() {
        let current = *progress.borrow_and_update();
        if current.is_busy() {
            info!("{current}");
        }
        tokio::time::sleep(PROGRESS_INTERVAL).await;
    }
}

/// Downloads the active collection and retries failures up to `retries`
/// times.
///
/// Returns whether every track was downloaded.
async fn download(session: &Session, retries: u32) -> tunefetch::error::Result<bool> {
    let summary = session.download_all().await?;
    info!("{summary}");

    for round in 1..=retries {
        if session.failed().is_empty() {
            break;
        }

        info!("retrying failed tracks ({round} of {retries})");
        let summary = session.retry_failed().await?;
        info!("{summary}");
    }

    let failed = session.failed();
    if failed.is_empty() {
        return Ok(true);
    }

    if let Some(collection) = session.collection() {
        for track in collection
            .tracks
            .iter()
            .filter(|track| failed.contains(&track.id))
        {
            warn!("not downloaded: {track}");
        }
    }
    error!("{} tracks could not be downloaded", failed.len());
    Ok(false)
}

/// Main application flow.
///
/// # Returns
///
/// - `Ok(true)`: everything asked for was done.
/// - `Ok(false)`: some tracks remain failed.
/// - `Err`: the collection could not be loaded, or the user interrupted.
async fn run(args: Args) -> Result<bool, Box<dyn Error>> {
    let config = load_config(&args)?;
    let session = Session::from_config(&config)?;

    if args.clear_history {
        session.clear_history()?;
    }

    if args.history {
        print_history(&session)?;
        return Ok(true);
    }

    let Some(reference) = args.reference.as_deref() else {
        if args.clear_history {
            return Ok(true);
        }
        return Err("no link given; see --help".into());
    };

    // Register before any work starts so that early signals are not lost.
    let mut signals = signal::Handler::new()?;

    let collection = tokio::select! {
        biased;

        signal = signals.recv() => {
            return Err(format!("interrupted by {signal}").into());
        }

        result = session.load(reference, args.cached) => result?,
    };
    info!("{collection} has {} tracks", collection.len());

    trim(&session, args.start, args.end)?;
    if let Some(collection) = session.collection() {
        if collection.is_empty() {
            warn!("no tracks to download");
            return Ok(true);
        }
        debug!("downloading {} tracks", collection.len());
    }

    let reporter = tokio::spawn(report(session.queue().progress()));

    let outcome = tokio::select! {
        // Prioritize shutdown signals.
        biased;

        signal = signals.recv() => {
            // Dropping the download future stops every worker.
            Err(format!("interrupted by {signal}").into())
        }

        result = download(&session, args.retries) => result.map_err(Into::into),
    };

    reporter.abort();
    session.queue().close();
    outcome
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and runs the download.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {args:#?}");

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    match run(args).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    }
}
