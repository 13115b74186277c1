//! Results and progress tracking.
//!
//! Records each resolved acceptor: bumps the monotonic counters, appends
//! an identity record to the outcome log for its kind, removes the
//! acceptor from the pending source, and republishes a progress snapshot.
//! The append-only logs plus the idempotent pending-removal are what make
//! reruns safe after a crash.

use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info};

use super::planner::SenderPools;
use crate::accounts::AccountStore;
use crate::types::{Account, ProgressStats};

const SUCCESS_FILE: &str = "success.txt";
const ERROR_FILE: &str = "error.txt";

pub struct ResultsTracker {
    total: usize,
    success: usize,
    errors: usize,
    balance: f64,
    store: AccountStore,
    results_dir: PathBuf,
}

impl ResultsTracker {
    pub fn new(
        total: usize,
        store: AccountStore,
        results_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let results_dir = results_dir.into();
        std::fs::create_dir_all(&results_dir)
            .with_context(|| format!("Failed to create {}", results_dir.display()))?;
        Ok(Self {
            total,
            success: 0,
            errors: 0,
            balance: 0.0,
            store,
            results_dir,
        })
    }

    /// Record a successfully funded acceptor.
    pub fn record_success(&mut self, account: &Account) -> Result<()> {
        self.success += 1;
        info!(account = %account, "Trade offer processed successfully");
        self.append_outcome(SUCCESS_FILE, account)?;
        self.store.remove_acceptor(account)?;
        self.publish();
        Ok(())
    }

    /// Record an acceptor that could not be funded.
    pub fn record_error(&mut self, account: &Account, message: &str) -> Result<()> {
        self.errors += 1;
        error!(account = %account, message, "Acceptor failed");
        self.append_outcome(ERROR_FILE, account)?;
        self.store.remove_acceptor(account)?;
        self.publish();
        Ok(())
    }

    /// Recompute the aggregate pool balance and republish the snapshot.
    pub fn update_balance(&mut self, pools: &SenderPools) {
        self.balance = pools.balance();
        self.publish();
    }

    pub fn stats(&self) -> ProgressStats {
        ProgressStats {
            resolved: self.success + self.errors,
            total: self.total,
            success: self.success,
            errors: self.errors,
            balance: self.balance,
        }
    }

    fn append_outcome(&self, filename: &str, account: &Account) -> Result<()> {
        let path = self.results_dir.join(filename);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        writeln!(
            file,
            "{}:{}",
            account.username,
            account.password.expose_secret(),
        )
        .with_context(|| format!("Failed to append to {}", path.display()))
    }

    fn publish(&self) {
        info!(progress = %self.stats(), "Status");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
