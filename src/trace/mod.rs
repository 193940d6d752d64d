pub mod audit;
pub mod init;
pub mod logger;
pub mod trace;
