pub mod check_config;
pub mod describe;
pub mod resolve;
