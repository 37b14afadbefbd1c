//! `prop` — command-line client for `propd`.
//!
//! Mirrors `prop::client::{PropClient, CtrlClient}` directly: every
//! subcommand here is a thin wrapper that parses flags, makes one call,
//! and prints the result. As with `propd`, flag parsing itself is
//! outside this crate's core scope; this binary exists to exercise the
//! client library end to end.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};

use prop::client::{ctrl_socket_path, io_socket_path, CtrlClient, PropClient, DEFAULT_NAMESPACE_ROOT};
use prop::value::Value;
use prop::PropError;

/// `prop` — propd client.
#[derive(Parser)]
#[command(name = "prop", version, about)]
struct Args {
    /// Target node name within the namespace.
    #[arg(short = 't', long = "server", default_value = "default")]
    server: String,

    /// Namespace root directory the target node's sockets live under.
    #[arg(short = 'N', long = "namespace")]
    namespace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a property's value.
    Get { key: String },
    /// Store a property's value, in `<tag>:<text>` form (defaults to `cstring`).
    Set { key: String, value: String },
    /// Remove a property.
    Del { key: String },
    /// Control-channel operations (register/unregister/dump).
    Ctrl {
        #[command(subcommand)]
        action: CtrlAction,
    },
}

#[derive(Subcommand)]
enum CtrlAction {
    /// Register a child node's prefixes (and cache-now snapshot) into us.
    RegisterChild {
        name: String,
        #[arg(long, value_delimiter = ',')]
        caches: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        prefixes: Vec<String>,
    },
    /// Ask `name` to treat us as its parent.
    RegisterParent { name: String },
    /// Remove a registered child by name, or every child if omitted.
    UnregisterChild { name: Option<String> },
    /// Deregister us from a parent.
    UnregisterParent { name: String },
    /// Dump the target node's route table.
    DumpRoute,
    /// Dump the target node's cache.
    DumpCache,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(255);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let namespace_dir = args
        .namespace
        .or_else(|| std::env::var("propd_namespace").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_NAMESPACE_ROOT));

    let result = match args.command {
        Command::Get { key } => run_get(&namespace_dir, &args.server, &key),
        Command::Set { key, value } => run_set(&namespace_dir, &args.server, &key, &value),
        Command::Del { key } => run_del(&namespace_dir, &args.server, &key),
        Command::Ctrl { action } => run_ctrl(&namespace_dir, &args.server, action),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("prop: {e}");
            ExitCode::from(e.code().clamp(1, 254) as u8)
        }
    }
}

fn run_get(namespace: &PathBuf, server: &str, key: &str) -> Result<(), PropError> {
    let client = PropClient::new(io_socket_path(namespace, server));
    let (value, duration) = client.get(key)?;
    if duration == prop::cache::DURATION_INF {
        println!("{} (never expires)", value.format(true));
    } else {
        println!("{} ({} ns remaining)", value.format(true), duration.as_nanos());
    }
    Ok(())
}

fn run_set(namespace: &PathBuf, server: &str, key: &str, value_text: &str) -> Result<(), PropError> {
    let client = PropClient::new(io_socket_path(namespace, server));
    let value = Value::parse(value_text)?;
    client.set(key, &value, Duration::ZERO)
}

fn run_del(namespace: &PathBuf, server: &str, key: &str) -> Result<(), PropError> {
    let client = PropClient::new(io_socket_path(namespace, server));
    client.del(key)
}

fn run_ctrl(namespace: &PathBuf, server: &str, action: CtrlAction) -> Result<(), PropError> {
    let client = CtrlClient::new(ctrl_socket_path(namespace, server));
    match action {
        CtrlAction::RegisterChild { name, caches, prefixes } => client.register_child(&name, &caches, &prefixes),
        CtrlAction::RegisterParent { name } => client.register_parent(&name),
        CtrlAction::UnregisterChild { name } => client.unregister_child(name.as_deref()),
        CtrlAction::UnregisterParent { name } => client.unregister_parent(&name),
        CtrlAction::DumpRoute => client.dump_route().map(|dump| print_dump("route", &dump)),
        CtrlAction::DumpCache => client.dump_cache().map(|dump| print_dump("cache", &dump)),
    }
}

fn print_dump(label: &str, dump: &[u8]) {
    println!("{label} dump ({} bytes): {}", dump.len(), hex::encode(dump));
}
