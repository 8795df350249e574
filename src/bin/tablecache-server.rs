//! this binary starts the reference table server
//! to see the list of options, type: `tablecache-server --help`

use clap::{arg_enum, crate_version, value_t, App, Arg};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::exit;
use tablecache::{
    MemoryStore, Result, SharedQueueThreadPool, SledStore, TableDef, TableError, TableServer,
    TableStore, ThreadPool,
};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

arg_enum! {
    #[allow(non_camel_case_types)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    enum StoreKind {
        memory,
        sled
    }
}

const DEFAULT_ADDRESS: &str = "127.0.0.1:4000";
const DEFAULT_STORE: StoreKind = StoreKind::memory;
// the name (file stem) of the file pinning the store kind in use
const STORE_KIND_FILE: &str = "store";

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    addr: SocketAddr,
    store: StoreKind,
    threads: u32,
    dir: PathBuf,
    tables: Vec<TableDef>,
}

impl Opt {
    /// validates the `addr`, `store` and `--table` parameters
    ///
    /// # Errors
    /// returns [`TableError::Parsing`] if one of the parameters is invalid
    fn build(
        addr: &str,
        requested_store: StoreKind,
        threads: u32,
        dir: &str,
        table_specs: &[&str],
    ) -> Result<Opt> {
        let addr: SocketAddr = addr.parse().map_err(|_| {
            TableError::Parsing(format!("could not parse {} into an IP address and port", addr))
        })?;
        let dir = PathBuf::from(dir);

        // the requested store, if any, must match the store already pinned in
        // the working dir
        let store = match current_store(&dir)? {
            None => requested_store,
            Some(current) if current == requested_store => current,
            Some(current) => {
                return Err(TableError::Parsing(format!(
                    "the requested store: {} does not match the store currently in use: {}",
                    requested_store, current
                )))
            }
        };

        let mut tables = Vec::new();
        for (position, spec) in table_specs.iter().enumerate() {
            tables.push(parse_table_spec(spec, position as u32 + 1)?);
        }

        Ok(Opt {
            addr,
            store,
            threads,
            dir,
            tables,
        })
    }
}

/// parses a `NAME:COLUMNS` table definition; ids are assigned in definition
/// order starting at 1
fn parse_table_spec(spec: &str, id: u32) -> Result<TableDef> {
    let (name, columns) = spec
        .split_once(':')
        .ok_or_else(|| TableError::Parsing(format!("table spec {} is not NAME:COLUMNS", spec)))?;
    let columns: usize = columns
        .parse()
        .map_err(|_| TableError::Parsing(format!("bad column count in table spec {}", spec)))?;
    Ok(TableDef::new(id, name, columns))
}

fn main() {
    // set up a tracing subscriber to log to STDERR
    subscriber_config();

    // parse command line args
    let matches = App::new("tablecache-server")
        .version(crate_version!())
        .about("the reference server of the tablecache table RPC protocol")
        .arg(
            Arg::with_name("addr")
                .long("addr")
                .value_name("IP_ADDR:PORT")
                .help("sets the IP_ADDR:PORT that the server listens on")
                .default_value(DEFAULT_ADDRESS),
        )
        .arg(
            Arg::with_name("store")
                .long("store")
                .value_name("STORE_NAME")
                .help("sets the storage backend to use, either 'memory' or 'sled'")
                .default_value("memory"),
        )
        .arg(
            Arg::with_name("threads")
                .long("threads")
                .value_name("N")
                .help("sets the number of worker threads")
                .default_value("4"),
        )
        .arg(
            Arg::with_name("dir")
                .long("dir")
                .value_name("PATH")
                .help("sets the working directory for persisted data")
                .default_value("."),
        )
        .arg(
            Arg::with_name("table")
                .long("table")
                .value_name("NAME:COLUMNS")
                .help("defines a table; ids are assigned in order starting at 1")
                .multiple(true)
                .number_of_values(1),
        )
        .get_matches();

    let addr = matches.value_of("addr").unwrap();
    let requested_store =
        value_t!(matches, "store", StoreKind).ok().unwrap_or(DEFAULT_STORE);
    let threads = match value_t!(matches, "threads", u32) {
        Ok(threads) if threads > 0 => threads,
        _ => {
            eprintln!("--threads must be a positive integer");
            exit(1);
        }
    };
    let table_specs: Vec<&str> = matches
        .values_of("table")
        .map(|values| values.collect())
        .unwrap_or_default();

    let opt = match Opt::build(addr, requested_store, threads, matches.value_of("dir").unwrap(), &table_specs) {
        Ok(opt) => opt,
        Err(e) => {
            eprintln!("{}", e);
            exit(1);
        }
    };

    // start the server
    if let Err(e) = run(opt) {
        eprintln!("{}", e);
        exit(1);
    }
}

fn run(opt: Opt) -> Result<()> {
    info!("tablecache-server {}", env!("CARGO_PKG_VERSION"));
    info!("storage backend: {}", opt.store);
    info!("listening on {}", opt.addr);

    // pin the store kind to the working dir
    fs::create_dir_all(&opt.dir)?;
    fs::write(opt.dir.join(STORE_KIND_FILE), format!("{}", opt.store))?;

    match opt.store {
        StoreKind::memory => {
            let store = MemoryStore::new();
            define_tables(&store, &opt.tables)?;
            run_with_store(store, opt.addr, opt.threads)
        }
        StoreKind::sled => {
            let store = SledStore::open(&opt.dir.join("data"))?;
            define_tables(&store, &opt.tables)?;
            run_with_store(store, opt.addr, opt.threads)
        }
    }
}

fn define_tables<S: TableStore>(store: &S, tables: &[TableDef]) -> Result<()> {
    for def in tables {
        match store.define_table(def.clone()) {
            Ok(()) => info!("defined table {} ({}, {} columns)", def.id, def.name, def.columns),
            // a persistent store already knows tables from a previous run
            Err(TableError::TableExists(id)) => debug!("table {} already defined", id),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn run_with_store<S: TableStore>(store: S, addr: SocketAddr, threads: u32) -> Result<()> {
    let pool = SharedQueueThreadPool::new(threads)?;
    let server = TableServer::new(store, pool);
    server.run(addr)
}

/// determines if there is a store-kind file in the working dir and returns
/// its value, else None
///
/// returns `Ok(None)` if the file does not (yet) exist or holds invalid
/// contents
fn current_store(dir: &Path) -> Result<Option<StoreKind>> {
    let path = dir.join(STORE_KIND_FILE);
    if !path.exists() {
        return Ok(None);
    }

    match fs::read_to_string(path)?.trim().parse() {
        Ok(kind) => Ok(Some(kind)),
        Err(e) => {
            // file is corrupted or has invalid contents
            warn!("the content of the store file is invalid: {}", e);
            Ok(None)
        }
    }
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
