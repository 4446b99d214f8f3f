pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod io;
pub mod logging;
pub mod storage;

pub use application::{LedgerService, TransferError, TransferOrchestrator};
pub use config::EngineConfig;
pub use domain::*;
pub use storage::{LedgerStore, LedgerTx, MemoryLedger, SqliteLedger, StoreError};
