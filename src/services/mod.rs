pub mod categorize;
pub mod dates;
pub mod encryption;
pub mod extraction;
pub mod fingerprint;
pub mod json_repair;
pub mod places;
pub mod storage;
pub mod vision;
pub mod worker;
