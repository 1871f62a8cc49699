pub mod loader;

pub use loader::{HistoryLoader, HistorySource};
