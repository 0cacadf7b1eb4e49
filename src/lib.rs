// Ads platform integration: OAuth, encrypted credentials, Google Ads client
pub mod ads;
pub mod oauth;
pub mod credentials;

// Cost reconciliation and metrics reads
pub mod sync;
pub mod metrics;
pub mod validation;

// Persistence
pub mod store;

// HTTP APIs and bearer sessions
pub mod api;
pub mod auth;

pub mod config;
