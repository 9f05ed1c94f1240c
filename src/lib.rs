//! Verse-synchronized Quran recitation: fetch a reciter's chapter audio with
//! its timing table, play it, and follow along verse by verse with optional
//! verse windows and repeat loops for memorization.

pub mod api;
pub mod auth;
pub mod config;
pub mod coordinator;
pub mod download;
pub mod engine;
pub mod error;
pub mod highlight;
pub mod lookup;
pub mod models;
pub mod range;
pub mod session;
pub mod source;

#[cfg(feature = "audio")]
pub mod rodio_engine;
