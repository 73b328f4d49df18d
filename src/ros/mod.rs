pub mod catalog;
pub mod models;

pub use catalog::CategoryCatalog;
