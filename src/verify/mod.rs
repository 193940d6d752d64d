pub mod signature;
pub mod verifier;
