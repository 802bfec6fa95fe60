//! Shared types for the StartupsAreEasy client and proxy.
//!
//! `models` mirrors the rows the hosted database hands back, `api` holds the
//! request/response payloads for auth and the proxy endpoints, and `events`
//! carries cross-tab storage notifications.

pub mod api;
pub mod events;
pub mod models;
