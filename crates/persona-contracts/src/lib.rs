pub mod artifacts;
pub mod cache;
pub mod credentials;
pub mod events;
pub mod models;
pub mod styles;
