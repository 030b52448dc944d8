//! Authenticated REST client for Atlassian Cloud APIs.
//!
//! Every request is signed with the host's bearer token. Expiry is not
//! handled here; callers obtain a fresh token before building the client.

pub mod client;
pub mod error;
pub mod pagination;

pub use {
    client::{ApiClient, Product},
    error::{ApiError, MAX_ERROR_BODY_LENGTH, truncate_body},
    pagination::{CursorPage, Page, PageLinks, cursor_from_link},
    reqwest::Method,
};
