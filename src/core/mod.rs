//! Domain helpers shared by the HTTP layer and the background monitor
//!
//! - validation: caption, post URL and sentiment label checks
//! - humanize: relative timestamps for the status view

pub mod humanize;
pub mod validation;

pub use humanize::{time_ago, time_ago_or_placeholder};
pub use validation::{validate_caption, validate_post_url, validate_sentiment, Platform, ValidationError};
