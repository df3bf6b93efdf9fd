pub mod guardrail;
pub mod intent;
pub mod principal;
pub mod transaction;
