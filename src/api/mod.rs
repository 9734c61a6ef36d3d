//! HTTP surface: two independently-bound listeners, client-facing and
//! admin-facing, plus the middleware each one layers on.

pub mod admin;
pub mod admin_auth;
pub mod client;
pub mod client_auth;
pub mod health;
pub mod metrics;
pub mod request_id;
