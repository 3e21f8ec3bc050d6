/*
 * Shared fixtures for integration tests
 */

#![allow(dead_code)]

use aqyntswap::config::Config;
use aqyntswap::testing::MockLedger;
use aqyntswap::tokens::{CustomTokenStore, TokenRegistry};
use aqyntswap::DexService;
use ethers::types::Address;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub struct Harness {
    pub ledger: Arc<MockLedger>,
    pub service: DexService,
    pub config: Config,
    // Keeps the token file alive for the test.
    pub dir: TempDir,
}

impl Harness {
    pub fn tokens_path(&self) -> PathBuf {
        self.config.storage.custom_tokens_path.clone()
    }

    pub fn router(&self) -> Address {
        self.config.chain.router
    }
}

pub fn owner() -> Address {
    Address::from_low_u64_be(0xbeef)
}

pub fn harness() -> Harness {
    build(MockLedger::new().with_account(owner()))
}

pub fn harness_without_wallet() -> Harness {
    build(MockLedger::new())
}

fn build(ledger: MockLedger) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(ledger);

    let mut config = Config::default();
    config.storage.custom_tokens_path = dir.path().join("tokens.json");

    let registry = TokenRegistry::open(CustomTokenStore::new(&config.storage.custom_tokens_path)).unwrap();
    let service = DexService::with_ledger(config.clone(), ledger.clone(), registry).unwrap();

    Harness { ledger, service, config, dir }
}
