pub mod models;
pub mod repository;
pub mod writer;

pub use repository::LedgerRepository;
pub use writer::LedgerWriter;
