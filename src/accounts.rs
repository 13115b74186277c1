//! Account and proxy source.
//!
//! Loads sender accounts, the mutable acceptor list, and the proxy pool
//! from plain-text files under the data directory. Resolved acceptors are
//! removed from `acceptors.txt` so that a rerun does not reprocess them;
//! removal is idempotent.
//!
//! File formats:
//! - `senders.txt`   — `Username:Password:ProxyHost:ProxyPort:ProxyLogin:ProxyPassword`
//! - `acceptors.txt` — `Username:Password`
//! - `proxies.txt`   — `Host:Port:Username:Password`
//! - `maFiles/<username>.maFile` — JSON authenticator secrets

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::types::{Account, AccountSecrets, Proxy};

const SENDERS_FILE: &str = "senders.txt";
const ACCEPTORS_FILE: &str = "acceptors.txt";
const PROXIES_FILE: &str = "proxies.txt";

/// Shape of a `.maFile` on disk.
#[derive(Deserialize)]
struct RawSecrets {
    shared_secret: String,
    identity_secret: String,
}

/// File-backed store of accounts and proxies.
#[derive(Debug, Clone)]
pub struct AccountStore {
    data_dir: PathBuf,
}

impl AccountStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn read_lines(&self, filename: &str) -> Result<Vec<String>> {
        let path = self.data_dir.join(filename);
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("File [{filename}] not found in {}", self.data_dir.display()))?;
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    fn write_lines(&self, filename: &str, lines: &[String]) -> Result<()> {
        let path = self.data_dir.join(filename);
        let mut contents = lines.join("\n");
        contents.push('\n');
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    fn load_secrets(&self, username: &str) -> Result<AccountSecrets> {
        let path = self.data_dir.join("maFiles").join(format!("{username}.maFile"));
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Secrets file [{username}.maFile] not found"))?;
        let raw: RawSecrets = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid secrets file [{username}.maFile]"))?;
        Ok(AccountSecrets {
            shared_secret: SecretString::new(raw.shared_secret),
            identity_secret: SecretString::new(raw.identity_secret),
        })
    }

    fn build_account(
        &self,
        username: &str,
        password: &str,
        proxy: Option<Proxy>,
    ) -> Result<Account> {
        Ok(Account {
            username: username.to_string(),
            password: SecretString::new(password.to_string()),
            secrets: self.load_secrets(username)?,
            proxy,
        })
    }

    /// Load all sender accounts, each with its dedicated proxy.
    pub fn load_senders(&self) -> Result<Vec<Account>> {
        debug!("Loading sender accounts from {SENDERS_FILE}");
        let mut accounts = Vec::new();

        for line in self.read_lines(SENDERS_FILE)? {
            let parts: Vec<&str> = line.split(':').collect();
            let [username, password, rest @ ..] = parts.as_slice() else {
                anyhow::bail!("Invalid sender format: {line}");
            };
            anyhow::ensure!(
                rest.len() == 4,
                "Invalid sender format: {line}\n\
                 Expected: Username:Password:ProxyHost:ProxyPort:ProxyLogin:ProxyPassword",
            );
            let proxy = Proxy::from_line(&rest.join(":"))?;
            accounts.push(self.build_account(username, password, Some(proxy))?);
        }

        debug!(count = accounts.len(), "Loaded sender accounts");
        Ok(accounts)
    }

    /// Load the pending acceptor accounts.
    pub fn load_acceptors(&self) -> Result<Vec<Account>> {
        debug!("Loading acceptor accounts from {ACCEPTORS_FILE}");
        let mut accounts = Vec::new();

        for line in self.read_lines(ACCEPTORS_FILE)? {
            let parts: Vec<&str> = line.split(':').collect();
            let [username, password] = parts.as_slice() else {
                anyhow::bail!("Invalid acceptor format: {line}\nExpected: Username:Password");
            };
            accounts.push(self.build_account(username, password, None)?);
        }

        debug!(count = accounts.len(), "Loaded acceptor accounts");
        Ok(accounts)
    }

    /// Load the initial proxy credential pool.
    pub fn load_proxies(&self) -> Result<Vec<Proxy>> {
        debug!("Loading proxy servers from {PROXIES_FILE}");
        let proxies = self
            .read_lines(PROXIES_FILE)?
            .iter()
            .map(|line| Proxy::from_line(line))
            .collect::<Result<Vec<_>>>()?;
        debug!(count = proxies.len(), "Loaded proxies");
        Ok(proxies)
    }

    /// Remove a resolved acceptor from the pending list. A missing file or
    /// an already-removed entry is a no-op, so reruns stay safe.
    pub fn remove_acceptor(&self, account: &Account) -> Result<()> {
        let Ok(lines) = self.read_lines(ACCEPTORS_FILE) else {
            return Ok(());
        };
        let entry = format!(
            "{}:{}",
            account.username,
            account.password.expose_secret(),
        );
        let remaining: Vec<String> = lines.into_iter().filter(|line| *line != entry).collect();
        self.write_lines(ACCEPTORS_FILE, &remaining)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
