pub mod models;
pub mod repository;

pub use repository::{
    CategorySpendUpdate, InMemoryReimbursementStore, ReimbursementStore, WalletChangeSet,
};
