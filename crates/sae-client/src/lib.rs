//! Direct REST client for the hosted StartupsAreEasy database.
//!
//! Every call goes through one [`sae_session::Deduplicator`] per client, so
//! identical concurrent reads hit the network once and each endpoint is rate
//! limited. Writes drop cached reads of the same table.

pub mod auth;
pub mod client;
pub mod comments;
pub mod config;
pub mod error;
pub mod likes;
pub mod login;
pub mod posts;
pub mod profiles;
pub mod slug;
pub mod startups;

pub use auth::Auth;
pub use client::{RawResponse, RestClient};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use slug::slugify;
