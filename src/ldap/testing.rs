//! Scripted in-memory directory for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ldap3::{LdapError, LdapResult, SearchEntry};

use super::connection::{Connector, Directory};
use super::settings::Settings;

const INVALID_CREDENTIALS: u32 = 49;
const OPERATIONS_ERROR: u32 = 1;

/// Error returned by the directory for a rejected operation.
pub fn rejected(rc: u32, text: &str) -> LdapError {
    LdapError::LdapResult {
        result: LdapResult {
            rc,
            matched: String::new(),
            text: text.into(),
            refs: Vec::new(),
            ctrls: Vec::new(),
        },
    }
}

/// Build an entry with single or multi-valued attributes.
pub fn entry(dn: &str, attrs: &[(&str, &[&str])]) -> SearchEntry {
    SearchEntry {
        dn: dn.into(),
        attrs: attrs
            .iter()
            .map(|(name, values)| {
                (name.to_string(), values.iter().map(|v| v.to_string()).collect())
            })
            .collect(),
        bin_attrs: HashMap::new(),
    }
}

#[derive(Default)]
struct State {
    passwords: HashMap<String, String>,
    results: HashMap<(String, String), Vec<SearchEntry>>,
    failing_searches: Vec<(String, String)>,
    refuse_connections: bool,
    stall: bool,
    connects: AtomicUsize,
    closes: AtomicUsize,
    log: Mutex<Vec<String>>,
}

/// In-memory [`Connector`]. Clones share the same directory.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<State>,
}

impl MockConnector {
    fn state_mut(&mut self) -> &mut State {
        Arc::get_mut(&mut self.state).expect("directory already shared")
    }

    /// Accept binds as `dn` with `password`.
    pub fn with_account(mut self, dn: &str, password: &str) -> Self {
        self.state_mut().passwords.insert(dn.into(), password.into());
        self
    }

    /// Answer searches of `filter` under `base` with `entries`.
    pub fn with_result(mut self, base: &str, filter: &str, entries: Vec<SearchEntry>) -> Self {
        self.state_mut()
            .results
            .insert((base.into(), filter.into()), entries);
        self
    }

    /// Fail searches of `filter` under `base`.
    pub fn with_failing_search(mut self, base: &str, filter: &str) -> Self {
        self.state_mut()
            .failing_searches
            .push((base.into(), filter.into()));
        self
    }

    /// Refuse every connection attempt.
    pub fn unreachable(mut self) -> Self {
        self.state_mut().refuse_connections = true;
        self
    }

    /// Never answer any operation.
    pub fn stalled(mut self) -> Self {
        self.state_mut().stall = true;
        self
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Sessions released, by `close` or by drop.
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Operations in the order the directory saw them.
    pub fn log(&self) -> Vec<String> {
        self.state.log.lock().unwrap().clone()
    }
}

impl Connector for MockConnector {
    type Session = MockSession;

    async fn connect(&self, _settings: &Settings) -> Result<MockSession, LdapError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        if self.state.refuse_connections {
            return Err(LdapError::Io {
                source: std::io::ErrorKind::ConnectionRefused.into(),
            });
        }

        Ok(MockSession {
            state: Arc::clone(&self.state),
        })
    }
}

/// Session of a [`MockConnector`].
pub struct MockSession {
    state: Arc<State>,
}

impl MockSession {
    fn record(&self, operation: String) {
        self.state.log.lock().unwrap().push(operation);
    }

    async fn maybe_stall(&self) {
        if self.state.stall {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Directory for MockSession {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), LdapError> {
        self.record(format!("bind {dn}"));
        self.maybe_stall().await;

        match self.state.passwords.get(dn) {
            Some(expected) if expected == password => Ok(()),
            _ => Err(rejected(INVALID_CREDENTIALS, "invalid credentials")),
        }
    }

    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<SearchEntry>, LdapError> {
        self.record(format!("search {base} {filter} [{}]", attrs.join(",")));
        self.maybe_stall().await;

        let key = (base.to_string(), filter.to_string());
        if self.state.failing_searches.contains(&key) {
            return Err(rejected(OPERATIONS_ERROR, "operations error"));
        }

        Ok(self.state.results.get(&key).cloned().unwrap_or_default())
    }

    async fn close(self) {
        self.record("close".into());
    }
}
