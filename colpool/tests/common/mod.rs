// Copyright 2020 Joyent, Inc.

#![allow(dead_code)]

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use slog::{o, Discard, Drain, Level, LevelFilter, Logger};

use colpool::connection::Connection;
use colpool::error::Error;
use colpool::node::Node;
use colpool::topology::{TokenRange, TopologySource};

#[derive(Debug)]
pub struct FakeError;

impl fmt::Display for FakeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("fake connection error")
    }
}

impl std::error::Error for FakeError {}

#[derive(Debug)]
pub struct FakeConnection {
    pub id: usize,
    pub node: String,
    pub keyspace: Option<String>,
    open: Arc<AtomicBool>,
    connect_delay: Duration,
}

impl FakeConnection {
    /// Simulate the peer dropping the connection.
    pub fn kill(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Connection for FakeConnection {
    type Error = FakeError;

    fn connect(&mut self) -> Result<(), FakeError> {
        if self.connect_delay > Duration::from_millis(0) {
            thread::sleep(self.connect_delay);
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_keyspace(&mut self, keyspace: &str) -> Result<(), FakeError> {
        self.keyspace = Some(keyspace.to_string());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&mut self) -> Result<(), FakeError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out fake connections and remembers every one it created so tests
/// can check which are still open.
#[derive(Default)]
pub struct Tracker {
    connections: Mutex<Vec<Arc<AtomicBool>>>,
    connect_delay: Duration,
}

impl Tracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Tracker::default())
    }

    /// A tracker whose connections take `delay` to connect, like a node
    /// that has stopped answering.
    pub fn with_connect_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Tracker {
            connect_delay: delay,
            ..Tracker::default()
        })
    }

    pub fn create(&self, node: &Node) -> FakeConnection {
        let open = Arc::new(AtomicBool::new(false));
        let mut connections = self.connections.lock().unwrap();
        connections.push(open.clone());
        FakeConnection {
            id: connections.len() - 1,
            node: node.name.clone(),
            keyspace: None,
            open,
            connect_delay: self.connect_delay,
        }
    }

    pub fn created(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn is_open(&self, id: usize) -> bool {
        self.connections.lock().unwrap()[id].load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.load(Ordering::SeqCst))
            .count()
    }
}

/// A topology whose ring lists whatever addresses the test has put in it.
pub struct FakeTopology {
    endpoints: Arc<Mutex<Vec<String>>>,
}

impl FakeTopology {
    pub fn new(endpoints: &[&str]) -> (Self, Arc<Mutex<Vec<String>>>) {
        let endpoints = Arc::new(Mutex::new(
            endpoints.iter().map(|e| e.to_string()).collect(),
        ));
        (
            FakeTopology {
                endpoints: endpoints.clone(),
            },
            endpoints,
        )
    }
}

impl TopologySource for FakeTopology {
    fn describe_ring(
        &mut self,
        _known_nodes: &[Node],
    ) -> Result<Vec<TokenRange>, Error> {
        let endpoints = self.endpoints.lock().unwrap();
        Ok(endpoints
            .iter()
            .enumerate()
            .map(|(i, e)| {
                TokenRange::new(&i.to_string(), &(i + 1).to_string(), &[e])
            })
            .collect())
    }
}

pub fn quiet_logger() -> Logger {
    Logger::root(Discard, o!())
}

pub fn term_logger() -> Logger {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    let drain = Mutex::new(slog_term::FullFormat::new(plain).build()).fuse();
    Logger::root(
        LevelFilter::new(drain, Level::Warning).fuse(),
        o!("build-id" => "0.1.0"),
    )
}

/// Poll `condition` until it holds, failing the test after `timeout`.
pub fn wait_for<F>(what: &str, timeout: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        thread::sleep(Duration::from_millis(10));
    }
}
