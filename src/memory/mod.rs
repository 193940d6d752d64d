pub mod cache;
pub mod playbook;
pub mod store;
