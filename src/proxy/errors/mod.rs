pub mod kiro_errors;
pub mod network_errors;
