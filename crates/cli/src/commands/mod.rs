pub mod ping;
pub mod reports;
