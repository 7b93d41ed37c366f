//! anacsync — a resilient mirror of a public open-data catalog to a local
//! filesystem.
//!
//! The core is five phases over a shared JSON-lines state store: the
//! Crawler discovers datasets and resources, the Inventory reconciles
//! local files against them, the Planner diffs the two into a list of
//! pending transfers, the Fetch Engine executes that plan with a
//! multi-strategy download cascade, and the Sorter relocates finished
//! files per configurable rules. Each phase is a plain async function over
//! a `Config`; the `cli` module is the only piece that knows about
//! argument parsing or process exit codes.

pub mod cli;
pub mod config;
pub mod crawler;
pub mod error;
pub mod fetch;
pub mod http;
pub mod inventory;
pub mod planner;
pub mod sorter;
pub mod state;
pub mod util;

pub use config::Config;
pub use error::{AnacsyncError, Result};
