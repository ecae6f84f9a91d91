//! ESGF lazy-download filesystem daemon.
//!
//! # Usage
//!
//! ```bash
//! # Mount the ESGF tree at /mnt/esgf
//! esgf-fuse mount --mount-point /mnt/esgf
//!
//! # Show where a file would be downloaded from
//! esgf-fuse resolve /CMIP5/output/MPI-M/MPI-ESM-LR/decadal2001/mon/atmos/tas/r1i1p1/tas_Amon.nc
//!
//! # List HTTP URLs, or dataset names, for a facet query
//! esgf-fuse search project=CMIP5 variable=tas --access http
//! esgf-fuse search project=CMIP5 model=MPI-ESM-LR --datasets
//!
//! # Count values of a facet, or print chosen record fields
//! esgf-fuse search project=CMIP5 --show-facet model
//! esgf-fuse search project=CMIP5 variable=tas --query title,size,timestamp
//!
//! # Remove locks left behind by crashed downloads
//! esgf-fuse clean-locks
//! ```

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use esgf_catalogue::Catalogue;
use esgf_catalogue::EsgfSearchClient;
use esgf_catalogue::SearchQuery;
use esgf_catalogue::SearchRecord;
use esgf_fuse::AliasFacetMapper;
use esgf_fuse::CacheLayout;
use esgf_fuse::Dispatcher;
use esgf_fuse::EsgfFs;
use esgf_fuse::EsgfFsConfig;
use esgf_fuse::LazyCache;
use esgf_fuse::Resolver;
use esgf_fuse::WgetDownloader;
use esgf_fuse::constants::DEFAULT_FUSE_THREADS;
use esgf_fuse::lock::sweep_locks;
use fuse_backend_rs::api::server::Server;
use fuse_backend_rs::transport::FuseChannel;
use fuse_backend_rs::transport::FuseSession;
use fuse_backend_rs::transport::Writer;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "esgf-fuse")]
#[command(about = "Mount the ESGF data tree with lazy downloads into a local cache")]
struct Args {
    /// Configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mount the filesystem and serve until Ctrl-C.
    Mount {
        /// Mount point path.
        #[arg(long)]
        mount_point: PathBuf,

        /// Number of threads for handling FUSE requests.
        #[arg(long, default_value_t = DEFAULT_FUSE_THREADS)]
        threads: usize,

        /// Filesystem name for mount.
        #[arg(long, default_value = "esgf")]
        fsname: String,

        /// Allow other users to access the mount.
        #[arg(long)]
        allow_other: bool,
    },

    /// Resolve a virtual path to its download URL and size.
    Resolve {
        /// Path such as /CMIP5/output/.../r1i1p1/tas_Amon.nc
        path: String,
    },

    /// Query the catalogue with facet constraints.
    Search {
        /// Access type of the listed file URLs.
        #[arg(long, value_enum, default_value_t = Access::Http)]
        access: Access,

        /// List sorted dataset names instead of file URLs.
        #[arg(long)]
        datasets: bool,

        /// Print value counts of a facet instead of records. Repeatable.
        #[arg(long = "show-facet")]
        show_facet: Vec<String>,

        /// Print these record fields per record, comma separated.
        #[arg(long, value_enum, value_delimiter = ',')]
        query: Vec<Field>,

        /// Maximum number of records to fetch.
        #[arg(long, default_value_t = esgf_catalogue::constants::DEFAULT_SEARCH_LIMIT)]
        limit: u32,

        /// Facet constraints as key=value.
        #[arg(value_parser = parse_constraint)]
        constraints: Vec<(String, String)>,
    },

    /// Remove lock files left by interrupted downloads.
    CleanLocks {
        /// Remove every lock, not only stale ones.
        #[arg(long)]
        all: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Access {
    Http,
    Opendap,
    Gridftp,
}

impl Access {
    fn prefix(self) -> &'static str {
        match self {
            Access::Http => "http",
            Access::Opendap => "opendap",
            Access::Gridftp => "gridftp",
        }
    }
}

/// Record fields printable with `search --query`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Field {
    Id,
    InstanceId,
    DatasetId,
    Title,
    Url,
    Size,
    Timestamp,
}

impl Field {
    /// Index field that carries the value.
    fn index_name(self) -> &'static str {
        match self {
            Field::Id | Field::InstanceId => "id",
            Field::DatasetId => "dataset_id",
            Field::Title => "title",
            Field::Url => "url",
            Field::Size => "size",
            Field::Timestamp => "timestamp",
        }
    }

    fn render(self, record: &SearchRecord) -> String {
        match self {
            Field::Id => record.id.clone().unwrap_or_default(),
            Field::InstanceId => record.instance_id().unwrap_or_default().to_string(),
            Field::DatasetId => record.dataset_id.clone().unwrap_or_default(),
            Field::Title => record.title.clone().unwrap_or_default(),
            Field::Url => record.urls.iter().map(|entry| entry.url.as_str()).collect::<Vec<_>>().join(","),
            Field::Size => record.size.map(|size| size.to_string()).unwrap_or_default(),
            Field::Timestamp => record.timestamp_raw.clone().unwrap_or_default(),
        }
    }
}

/// One tab-separated line of the chosen fields.
fn render_fields(record: &SearchRecord, fields: &[Field]) -> String {
    fields.iter().map(|field| field.render(record)).collect::<Vec<_>>().join("\t")
}

/// `facet: value count` lines, facets and values in sorted order.
fn render_facet_counts(counts: &BTreeMap<String, BTreeMap<String, u64>>) -> Vec<String> {
    counts
        .iter()
        .flat_map(|(facet, values)| values.iter().map(move |(value, count)| format!("{facet}: {value} {count}")))
        .collect()
}

fn parse_constraint(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() && !value.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = EsgfFsConfig::load_with_layers(args.config.as_deref()).context("invalid configuration")?;

    match args.command {
        Command::Mount { mount_point, threads, fsname, allow_other } => {
            run_fuse(&config, mount_point, threads, &fsname, allow_other)
        }
        Command::Resolve { path } => resolve(&config, &path),
        Command::Search { access, datasets, show_facet, query, limit, constraints } => {
            let options = SearchOptions { access, datasets, show_facet, fields: query, limit };
            search(&config, options, constraints)
        }
        Command::CleanLocks { all } => clean_locks(&config, all),
    }
}

fn catalogue(config: &EsgfFsConfig) -> Result<Arc<EsgfSearchClient>> {
    let client = EsgfSearchClient::with_timeout(&config.catalogue.search_url, config.search_timeout())
        .context("failed to create catalogue client")?;
    Ok(Arc::new(client))
}

fn resolver(config: &EsgfFsConfig) -> Result<Resolver> {
    let mapper = Arc::new(AliasFacetMapper::from_table(&config.mapping));
    Ok(Resolver::new(catalogue(config)?, mapper))
}

fn build_cache(config: &EsgfFsConfig) -> Result<LazyCache> {
    let layout = CacheLayout::new(&config.cache.root, config.cache.group);
    layout.prepare().with_context(|| format!("failed to prepare cache root {}", config.cache.root.display()))?;

    let downloader = Arc::new(WgetDownloader::new(
        &config.download.program,
        config.download.certificate.clone(),
        &config.download.secure_protocol,
    ));
    let dispatcher =
        Dispatcher::new(layout, downloader, config.download.max_concurrent, config.stale_lock_after())
            .context("failed to create download runtime")?;

    Ok(LazyCache::new(resolver(config)?, dispatcher, config.open_throttle()))
}

fn resolve(config: &EsgfFsConfig, path: &str) -> Result<()> {
    let location = resolver(config)?.resolve_str(path)?;
    println!("{}\t{}\t{}", location.url, location.size, location.timestamp.to_rfc3339());
    Ok(())
}

struct SearchOptions {
    access: Access,
    datasets: bool,
    show_facet: Vec<String>,
    fields: Vec<Field>,
    limit: u32,
}

fn search(config: &EsgfFsConfig, options: SearchOptions, constraints: Vec<(String, String)>) -> Result<()> {
    let base = if options.datasets { SearchQuery::datasets() } else { SearchQuery::files() };
    let mut query = constraints.into_iter().fold(base, |query, (key, value)| query.constraint(key, value));

    if !options.show_facet.is_empty() {
        query = options.show_facet.iter().fold(query.limit(0), |query, facet| query.facet(facet));
        let results = catalogue(config)?.search(&query)?;
        for line in render_facet_counts(&results.facet_counts) {
            println!("{line}");
        }
        return Ok(());
    }

    query = query.limit(options.limit);
    if !options.fields.is_empty() {
        query = query.fields(options.fields.iter().map(|field| field.index_name()));
    } else if !options.datasets {
        query = query.fields(["url"]);
    }

    let results = catalogue(config)?.search(&query)?;
    info!(num_found = results.num_found, returned = results.records.len(), "search complete");

    if !options.fields.is_empty() {
        for record in &results.records {
            println!("{}", render_fields(record, &options.fields));
        }
        return Ok(());
    }

    if options.datasets {
        let names: BTreeSet<&str> = results.records.iter().filter_map(|record| record.instance_id()).collect();
        for name in names {
            println!("{name}");
        }
        return Ok(());
    }

    for record in &results.records {
        for entry in record.urls.iter().filter(|entry| entry.has_access(options.access.prefix())) {
            println!("{}", entry.url);
        }
    }
    Ok(())
}

fn clean_locks(config: &EsgfFsConfig, all: bool) -> Result<()> {
    let layout = CacheLayout::new(&config.cache.root, config.cache.group);
    let stale_after = if all { None } else { config.stale_lock_after() };
    if !all && stale_after.is_none() {
        bail!("stale lock reclamation is disabled (cache.stale_lock_secs = 0); use --all");
    }

    let removed = sweep_locks(&layout.cache_dir(), stale_after)
        .with_context(|| format!("failed to sweep {}", layout.cache_dir().display()))?;
    for path in &removed {
        println!("{}", path.display());
    }
    info!(removed = removed.len(), "lock sweep complete");
    Ok(())
}

/// FUSE server wrapper for multi-threaded request handling.
struct FuseServer {
    server: Arc<Server<EsgfFs>>,
    channel: FuseChannel,
}

impl FuseServer {
    fn new(server: Arc<Server<EsgfFs>>, session: &mut FuseSession) -> Result<Self, fuse_backend_rs::transport::Error> {
        let channel = session.new_channel()?;
        Ok(Self { server, channel })
    }

    /// Process requests until the kernel shuts down the session.
    fn service_loop(&mut self) {
        loop {
            match self.channel.get_request() {
                Ok(Some((reader, fuse_writer))) => {
                    let writer = Writer::FuseDev(fuse_writer);
                    if let Err(e) = self.server.handle_message(reader, writer, None, None) {
                        if let fuse_backend_rs::Error::EncodeMessage(ref io_err) = e
                            && io_err.raw_os_error() == Some(libc::EBADF)
                        {
                            info!("FUSE session closed by kernel");
                            break;
                        }
                        warn!(error = ?e, "error handling FUSE message");
                    }
                }
                Ok(None) => {
                    info!("FUSE session ended");
                    break;
                }
                Err(e) => {
                    let is_shutdown = matches!(
                        &e,
                        fuse_backend_rs::transport::Error::SessionFailure(msg)
                            if msg.contains("closed") || msg.contains("shutdown")
                    );
                    if is_shutdown {
                        info!("FUSE session closed");
                        break;
                    }
                    warn!(error = ?e, "error getting FUSE request");
                }
            }
        }
    }
}

fn run_fuse(
    config: &EsgfFsConfig,
    mount_point: PathBuf,
    threads: usize,
    fsname: &str,
    allow_other: bool,
) -> Result<()> {
    if threads == 0 {
        bail!("--threads must be at least 1");
    }

    let cache = Arc::new(build_cache(config)?);

    // SAFETY: getuid() and getgid() have no preconditions and cannot fail.
    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };
    let server = Arc::new(Server::new(EsgfFs::new(cache, uid, gid)));

    info!(
        mount_point = %mount_point.display(),
        fsname,
        threads,
        cache_root = %config.cache.root.display(),
        max_downloads = config.download.max_concurrent,
        "starting FUSE server"
    );

    let mut session = FuseSession::new(&mount_point, fsname, "", true).context("failed to create FUSE session")?;
    session.set_allow_other(allow_other);
    session.mount().context("failed to mount filesystem")?;
    info!("filesystem mounted at {}", mount_point.display());

    let mut handles = Vec::with_capacity(threads);
    for i in 0..threads {
        let fuse_server = match FuseServer::new(server.clone(), &mut session) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, thread = i, "failed to create FUSE channel");
                continue;
            }
        };

        let handle = thread::Builder::new()
            .name(format!("fuse-worker-{i}"))
            .spawn(move || {
                let mut server = fuse_server;
                server.service_loop();
                info!(thread = i, "FUSE worker stopped");
            })
            .context("failed to spawn FUSE worker thread")?;
        handles.push(handle);
    }

    if handles.is_empty() {
        session.umount().context("failed to unmount after worker startup failure")?;
        bail!("no FUSE worker could be started");
    }

    info!(threads = handles.len(), "FUSE workers started, press Ctrl-C to unmount");

    let (tx, rx) = std::sync::mpsc::channel();
    if let Err(err) = ctrlc::set_handler(move || {
        let _ = tx.send(());
    }) {
        error!("failed to set Ctrl-C handler: {}", err);
    }
    let _ = rx.recv();

    info!("shutdown signal received, unmounting filesystem");
    if let Err(e) = session.umount() {
        error!(error = %e, "failed to unmount");
    }
    for handle in handles {
        let _ = handle.join();
    }

    info!("shutdown complete");
    Ok(())
}
