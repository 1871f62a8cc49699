pub mod store;

pub use store::SessionMessageStore;
