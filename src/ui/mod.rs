//! # UI Module
//!
//! Discord presentation: embeds for the panel, queue, help and ping replies
//! ([`embeds`]) and the panel / pager button rows with their custom ids
//! ([`buttons`]). Nothing here talks to Discord; it only builds payloads.

pub mod buttons;
pub mod embeds;
