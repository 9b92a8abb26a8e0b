pub mod address;
pub mod auth;

// Re-export key components for easier access
pub use address::discover_share_addresses;
pub use auth::generate_auth_code;
