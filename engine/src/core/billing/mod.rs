//! Billing Boundary
//!
//! Credits are charged once per job key, right after the first batch of a
//! job is accepted. The ledger is a trait so hosts can back it with their
//! own store; [`InMemoryLedger`] serves the CLI and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::core::{CoreError, CoreResult, JobKey};

/// Result of a charge request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChargeOutcome {
    /// Credits were deducted now
    Charged,
    /// The key was charged before; nothing deducted
    AlreadyCharged,
}

/// Idempotent credit ledger
#[async_trait]
pub trait BillingLedger: Send + Sync {
    /// Whether `key` has been charged
    async fn is_charged(&self, key: &str) -> CoreResult<bool>;

    /// Deducts `amount` for `key` unless the key was already charged
    async fn charge_once(&self, key: &str, amount: u64) -> CoreResult<ChargeOutcome>;

    /// Remaining credits
    async fn balance(&self) -> CoreResult<u64>;
}

/// A recorded charge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeRecord {
    pub key: JobKey,
    pub amount: u64,
    pub charged_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LedgerState {
    balance: u64,
    charges: HashMap<JobKey, ChargeRecord>,
}

/// Process-local ledger with a credit balance
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryLedger {
    /// Creates a ledger holding `balance` credits
    pub fn new(balance: u64) -> Self {
        Self {
            state: RwLock::new(LedgerState {
                balance,
                charges: HashMap::new(),
            }),
        }
    }

    /// Adds credits
    pub async fn top_up(&self, amount: u64) {
        let mut state = self.state.write().await;
        state.balance = state.balance.saturating_add(amount);
    }

    /// The charge recorded for `key`, if any
    pub async fn charge_for(&self, key: &str) -> Option<ChargeRecord> {
        self.state.read().await.charges.get(key).cloned()
    }

    /// Number of keys charged
    pub async fn charge_count(&self) -> usize {
        self.state.read().await.charges.len()
    }
}

#[async_trait]
impl BillingLedger for InMemoryLedger {
    async fn is_charged(&self, key: &str) -> CoreResult<bool> {
        Ok(self.state.read().await.charges.contains_key(key))
    }

    async fn charge_once(&self, key: &str, amount: u64) -> CoreResult<ChargeOutcome> {
        if key.trim().is_empty() {
            return Err(CoreError::BillingFailed("job key is empty".to_string()));
        }

        // Check and deduct under one write lock so concurrent calls for the
        // same key charge once.
        let mut state = self.state.write().await;
        if state.charges.contains_key(key) {
            info!(key = key, "Job key already charged");
            return Ok(ChargeOutcome::AlreadyCharged);
        }

        if state.balance < amount {
            warn!(key = key, required = amount, available = state.balance, "Insufficient credits");
            return Err(CoreError::InsufficientCredits {
                required: amount,
                available: state.balance,
            });
        }

        state.balance -= amount;
        state.charges.insert(
            key.to_string(),
            ChargeRecord {
                key: key.to_string(),
                amount,
                charged_at: Utc::now(),
            },
        );
        info!(key = key, amount, remaining = state.balance, "Charged job");
        Ok(ChargeOutcome::Charged)
    }

    async fn balance(&self) -> CoreResult<u64> {
        Ok(self.state.read().await.balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_charge_once_is_idempotent() {
        let ledger = InMemoryLedger::new(100);

        assert_eq!(ledger.charge_once("job-a", 30).await.unwrap(), ChargeOutcome::Charged);
        assert_eq!(
            ledger.charge_once("job-a", 30).await.unwrap(),
            ChargeOutcome::AlreadyCharged
        );

        assert_eq!(ledger.balance().await.unwrap(), 70);
        assert!(ledger.is_charged("job-a").await.unwrap());
        assert!(!ledger.is_charged("job-b").await.unwrap());
        assert_eq!(ledger.charge_for("job-a").await.unwrap().amount, 30);
    }

    #[tokio::test]
    async fn test_insufficient_credits() {
        let ledger = InMemoryLedger::new(10);

        let err = ledger.charge_once("job", 25).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::InsufficientCredits {
                required: 25,
                available: 10
            }
        ));
        assert!(!ledger.is_charged("job").await.unwrap());

        ledger.top_up(15).await;
        assert_eq!(ledger.charge_once("job", 25).await.unwrap(), ChargeOutcome::Charged);
        assert_eq!(ledger.balance().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let ledger = InMemoryLedger::new(10);
        assert!(matches!(
            ledger.charge_once("  ", 1).await,
            Err(CoreError::BillingFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_charges_deduct_once() {
        let ledger = Arc::new(InMemoryLedger::new(50));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move { ledger.charge_once("shared", 20).await }));
        }

        let mut charged = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == ChargeOutcome::Charged {
                charged += 1;
            }
        }

        assert_eq!(charged, 1);
        assert_eq!(ledger.balance().await.unwrap(), 30);
        assert_eq!(ledger.charge_count().await, 1);
    }
}
