pub mod capture;
pub mod recognition;
