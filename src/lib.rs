pub mod application;
pub mod cli;
pub mod domain;
pub mod io;
pub mod storage;

pub use application::{HistoryReader, WalletError, WalletService};
pub use domain::*;
pub use storage::{LedgerStore, MemoryStore, SqliteStore};
