//! `propd` — launches a single node of the property service.
//!
//! This binary exists only to wire `clap` output directly into
//! [`prop::node::NodeConfig`] and start a [`Node`]; flag parsing and
//! environment glue stay out of the library crate. Daemonization
//! (double-fork) is not implemented here — `--daemon` is accepted for
//! CLI-surface parity but logs a warning and runs in the foreground.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use prop::client::DEFAULT_NAMESPACE_ROOT;
use prop::node::{CacheConfig, Node, NodeConfig, StaticStorage};
use prop::storage::file::FileStorage;
use prop::storage::null::NullStorage;
use prop::PropError;

/// `propd` — hierarchical, in-process property service daemon.
#[derive(Parser)]
#[command(name = "propd", version, about)]
struct Args {
    /// Fork into the background. Not implemented; logs a warning and
    /// stays in the foreground.
    #[arg(long)]
    daemon: bool,

    /// This node's name within its namespace directory.
    #[arg(long, default_value = "default")]
    name: String,

    /// Namespace root directory sockets are created under. Overridden by
    /// the `propd_namespace` environment variable when unset.
    #[arg(long)]
    namespace: Option<PathBuf>,

    /// Repeat for more verbose logging (info, then debug, then trace).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Enable the request cache with this `max_interval` in seconds.
    #[arg(long, value_name = "SEC")]
    enable_cache: Option<u64>,

    /// Default TTL substituted for a `set` that supplies a zero duration.
    #[arg(long, value_name = "SEC", default_value_t = 1)]
    default_duration: u64,

    /// Comma-separated keys to snapshot into the cache when this node
    /// registers as some parent's child.
    #[arg(long, value_delimiter = ',')]
    caches: Vec<String>,

    /// Comma-separated prefixes this node asks a parent to route to it.
    #[arg(long, value_delimiter = ',')]
    prefixes: Vec<String>,

    /// Comma-separated child node names to bootstrap-register from.
    #[arg(long, value_delimiter = ',')]
    children: Vec<String>,

    /// Comma-separated parent node names to bootstrap-register into.
    #[arg(long, value_delimiter = ',')]
    parents: Vec<String>,

    /// Statically register a file backend: `dir:name:prefix1,prefix2`.
    #[arg(long = "file", value_name = "DIR:NAME:PREFIXES")]
    file_backends: Vec<String>,

    /// Statically register a null backend: `name:prefix1,prefix2`.
    #[arg(long = "null", value_name = "NAME:PREFIXES")]
    null_backends: Vec<String>,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(255);
        }
    };

    init_logging(args.verbose);

    if args.daemon {
        log::warn!("--daemon is not implemented in this build; running in the foreground");
    }

    let mut static_storages = Vec::new();
    for spec in &args.file_backends {
        match parse_file_backend(spec) {
            Ok(storage) => static_storages.push(storage),
            Err(msg) => {
                log::error!("--file {spec}: {msg}");
                return ExitCode::from(255);
            }
        }
    }
    for spec in &args.null_backends {
        match parse_null_backend(spec) {
            Ok(storage) => static_storages.push(storage),
            Err(msg) => {
                log::error!("--null {spec}: {msg}");
                return ExitCode::from(255);
            }
        }
    }

    let namespace_dir = args
        .namespace
        .or_else(|| std::env::var("propd_namespace").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_NAMESPACE_ROOT));

    let cache = args.enable_cache.map(|max_interval_secs| CacheConfig {
        max_interval: Duration::from_secs(max_interval_secs),
        default_duration: Duration::from_secs(args.default_duration),
        ..CacheConfig::default()
    });

    let config = NodeConfig {
        name: args.name,
        namespace_dir,
        cache,
        static_storages,
        caches_now: args.caches,
        prefixes: args.prefixes,
        bootstrap_children: args.children,
        bootstrap_parents: args.parents,
        ..NodeConfig::default()
    };

    let mut node = match Node::start(config) {
        Ok(node) => node,
        Err(e) => {
            log::error!("failed to start node: {e}");
            return exit_code_for(PropError::from(e));
        }
    };

    if let Err(e) = node.run() {
        log::error!("node run loop failed: {e}");
        return exit_code_for(PropError::from(e));
    }
    ExitCode::SUCCESS
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

fn exit_code_for(err: PropError) -> ExitCode {
    ExitCode::from(err.code().clamp(1, 254) as u8)
}

/// Parse a `dir:name:prefix1,prefix2` static file-backend spec.
fn parse_file_backend(spec: &str) -> Result<StaticStorage, String> {
    let mut parts = spec.splitn(3, ':');
    let dir = parts.next().filter(|s| !s.is_empty()).ok_or("missing directory")?;
    let name = parts.next().filter(|s| !s.is_empty()).ok_or("missing name")?;
    let prefixes = parts.next().ok_or("missing prefixes")?;
    Ok(StaticStorage {
        name: name.to_string(),
        prefixes: prefixes.split(',').map(str::to_string).collect(),
        storage: Box::new(FileStorage::new(PathBuf::from(dir))),
    })
}

/// Parse a `name:prefix1,prefix2` static null-backend spec.
fn parse_null_backend(spec: &str) -> Result<StaticStorage, String> {
    let mut parts = spec.splitn(2, ':');
    let name = parts.next().filter(|s| !s.is_empty()).ok_or("missing name")?;
    let prefixes = parts.next().ok_or("missing prefixes")?;
    Ok(StaticStorage {
        name: name.to_string(),
        prefixes: prefixes.split(',').map(str::to_string).collect(),
        storage: Box::new(NullStorage),
    })
}
