pub mod category;
pub mod job;
pub mod transaction;
