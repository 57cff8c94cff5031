//! HTTP handlers for the identity service.

pub mod admin;
pub mod auth;
pub mod oauth;
pub mod tenant;

pub use oauth::{link_account, list_accounts, oauth_callback, oauth_redirect, unlink_account};
