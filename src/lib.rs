pub mod config;
pub mod google_auth;
pub mod session;
pub mod sheets;
pub mod telegram;
pub mod workflow;
