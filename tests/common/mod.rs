//! shared fixtures: an in-process server on an ephemeral port

use std::net::{SocketAddr, TcpListener};
use std::thread;
use tablecache::{MemoryStore, SharedQueueThreadPool, TableDef, TableServer, TableStore, ThreadPool};

/// the demo schema used by the integration suites: mutations of `widgets`
/// also invalidate the derived `widget_summaries` table
pub fn demo_defs() -> Vec<TableDef> {
    vec![
        TableDef::new(1, "widgets", 3).with_dependents(vec![2]),
        TableDef::new(2, "widget_summaries", 2),
    ]
}

/// starts a memory-backed server on an ephemeral port and returns its
/// address plus a handle to the shared store
pub fn start_server() -> (SocketAddr, MemoryStore) {
    let store = MemoryStore::new();
    for def in demo_defs() {
        store.define_table(def).unwrap();
    }

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let pool = SharedQueueThreadPool::new(8).unwrap();
    let server = TableServer::new(store.clone(), pool);
    thread::spawn(move || server.run_on(listener).unwrap());

    (addr, store)
}
