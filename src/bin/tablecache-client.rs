//! The tablecache-client executable supports the following subcommands:
//!
//! `tablecache-client tables [--addr IP-PORT]`
//!
//!     List the defined tables as `id  name  columns` lines.
//!
//! `tablecache-client rows <TABLE> [--addr IP-PORT]`
//!
//!     Fetch and print every row of a table. TABLE is a table id or name.
//!
//! `tablecache-client get <TABLE> <KEY> [--addr IP-PORT]`
//!
//!     Print the row carrying KEY in its key column, looked up through the
//!     client-side cached table.
//!
//! `tablecache-client add <TABLE> <VALUE>... [--addr IP-PORT]`
//!
//!     Append a row. Values are literals: null, true, false, integers, or
//!     (optionally quoted) text.
//!
//! `tablecache-client set <TABLE> <VALUE>... [--addr IP-PORT]`
//!
//!     Replace the row carrying the same key (the first value). A missing
//!     key is an error.
//!
//! `tablecache-client rm <TABLE> <KEY> [--addr IP-PORT]`
//!
//!     Remove the row carrying KEY. A missing key is an error.
//!
//! `tablecache-client watch [--addr IP-PORT]`
//!
//!     Subscribe to invalidate lists and print each batch as it arrives.
//!
//! --addr accepts an IP address, either v4 or v6, and a port number, with the
//! format IP:PORT. If --addr is not specified then connect on 127.0.0.1:4000.
//! Print an error and return a non-zero exit code on server error, or if
//! IP-PORT does not parse as an address.

use clap::{crate_version, App, Arg, ArgMatches, SubCommand};
use std::net::SocketAddr;
use std::process::exit;
use tablecache::{
    ColumnValue, Connector, RecordRow, Result, TableClient, TableError, TableId,
};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

const DEFAULT_ADDRESS: &str = "127.0.0.1:4000";

#[derive(Debug)]
enum Request {
    Tables,
    Rows { table: String },
    Get { table: String, key: ColumnValue },
    Add { table: String, values: Vec<ColumnValue> },
    Set { table: String, values: Vec<ColumnValue> },
    Remove { table: String, key: ColumnValue },
    Watch,
}

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    /// the server's ip:port
    addr: SocketAddr,
    req: Request,
}

impl Opt {
    /// validates the `addr` parameter is a valid IP address and PORT
    ///
    /// # Errors
    /// returns [`TableError::Parsing`] if the address is invalid
    fn build(addr: &str, req: Request) -> Result<Opt> {
        let addr: SocketAddr = addr.parse().map_err(|_| {
            TableError::Parsing(format!("could not parse {} into an IP address and port", addr))
        })?;
        Ok(Opt { addr, req })
    }
}

fn main() {
    // configure a subscriber that will log messages to STDERR
    subscriber_config();

    let matches = App::new("tablecache-client")
        .version(crate_version!())
        .about("a command line client for the tablecache table server")
        .subcommands(vec![
            SubCommand::with_name("tables").about("List the defined tables"),
            SubCommand::with_name("rows")
                .about("Fetch and print every row of a table")
                .arg(Arg::with_name("TABLE").required(true).index(1)),
            SubCommand::with_name("get")
                .about("Print the row carrying the given key")
                .arg(Arg::with_name("TABLE").required(true).index(1))
                .arg(Arg::with_name("KEY").required(true).index(2)),
            SubCommand::with_name("add")
                .about("Append a row of literal values to a table")
                .arg(Arg::with_name("TABLE").required(true).index(1))
                .arg(Arg::with_name("VALUE").required(true).multiple(true)),
            SubCommand::with_name("set")
                .about("Replace the row carrying the same key as the given row")
                .arg(Arg::with_name("TABLE").required(true).index(1))
                .arg(Arg::with_name("VALUE").required(true).multiple(true)),
            SubCommand::with_name("rm")
                .about("Remove the row carrying the given key")
                .arg(Arg::with_name("TABLE").required(true).index(1))
                .arg(Arg::with_name("KEY").required(true).index(2)),
            SubCommand::with_name("watch")
                .about("Print invalidate lists as the server pushes them"),
        ])
        .arg(
            Arg::with_name("addr")
                .long("addr")
                .value_name("IP_ADDR:PORT")
                .help("sets the IP_ADDR:PORT of the server to connect to")
                .default_value(DEFAULT_ADDRESS),
        )
        .get_matches();

    let result = match parse_options(matches) {
        Ok(opt) => run(opt),
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        eprintln!("{}", e);
        exit(1);
    }
}

/// parses the matches from the command line into an [`Opt`] struct
fn parse_options(matches: ArgMatches) -> Result<Opt> {
    let addr = matches.value_of("addr").unwrap();
    match matches.subcommand() {
        ("tables", Some(_)) => Opt::build(addr, Request::Tables),
        ("rows", Some(args)) => {
            let table = args.value_of("TABLE").map(String::from).unwrap();
            Opt::build(addr, Request::Rows { table })
        }
        ("get", Some(args)) => {
            let table = args.value_of("TABLE").map(String::from).unwrap();
            let key = ColumnValue::parse_literal(args.value_of("KEY").unwrap());
            Opt::build(addr, Request::Get { table, key })
        }
        ("add", Some(args)) => {
            let table = args.value_of("TABLE").map(String::from).unwrap();
            let values = args
                .values_of("VALUE")
                .unwrap()
                .map(ColumnValue::parse_literal)
                .collect();
            Opt::build(addr, Request::Add { table, values })
        }
        ("set", Some(args)) => {
            let table = args.value_of("TABLE").map(String::from).unwrap();
            let values = args
                .values_of("VALUE")
                .unwrap()
                .map(ColumnValue::parse_literal)
                .collect();
            Opt::build(addr, Request::Set { table, values })
        }
        ("rm", Some(args)) => {
            let table = args.value_of("TABLE").map(String::from).unwrap();
            let key = ColumnValue::parse_literal(args.value_of("KEY").unwrap());
            Opt::build(addr, Request::Remove { table, key })
        }
        ("watch", Some(_)) => Opt::build(addr, Request::Watch),
        _ => Err(TableError::Parsing(
            "no subcommand given, try --help".to_string(),
        )),
    }
}

/// runs the specified request against the server at `opt.addr`
fn run(opt: Opt) -> Result<()> {
    match opt.req {
        Request::Tables => {
            let connector = Connector::connect(opt.addr)?;
            for info in connector.list_tables()? {
                println!("{}\t{}\t{}", info.id, info.name, info.columns);
            }
        }
        Request::Rows { table } => {
            let connector = Connector::connect(opt.addr)?;
            let table_id = resolve_table(&connector, &table)?;
            for row in connector.get_table(table_id)? {
                println!("{}", format_row(&row));
            }
        }
        Request::Get { table, key } => {
            let connector = Connector::connect(opt.addr)?;
            let table_id = resolve_table(&connector, &table)?;
            let cached = connector.cached::<RecordRow>(table_id);
            match cached.get(&key)? {
                Some(row) => println!("{}", format_row(row.values())),
                None => println!("Row not found"),
            }
        }
        Request::Add { table, values } => {
            let connector = Connector::connect(opt.addr)?;
            let table_id = resolve_table(&connector, &table)?;
            connector.add_row(table_id, &values)?;
        }
        Request::Set { table, values } => {
            let connector = Connector::connect(opt.addr)?;
            let table_id = resolve_table(&connector, &table)?;
            connector.update_row(table_id, &values)?;
        }
        Request::Remove { table, key } => {
            let connector = Connector::connect(opt.addr)?;
            let table_id = resolve_table(&connector, &table)?;
            connector.remove_row(table_id, &key)?;
        }
        Request::Watch => {
            let client = TableClient::connect(opt.addr)?;
            client.listen(|ids| {
                let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
                println!("invalidated: {}", ids.join(" "));
            })?;
        }
    }
    Ok(())
}

/// resolves a TABLE argument: a numeric id is used as-is, anything else is
/// looked up by name in the server's schema
fn resolve_table(connector: &Connector, table: &str) -> Result<TableId> {
    if let Ok(id) = table.parse::<TableId>() {
        return Ok(id);
    }
    connector
        .list_tables()?
        .into_iter()
        .find(|info| info.name == table)
        .map(|info| info.id)
        .ok_or_else(|| TableError::Parsing(format!("no table named {}", table)))
}

fn format_row(row: &[ColumnValue]) -> String {
    let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
    cells.join("\t")
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
