//! HTTP request handlers.
//!
//! - [`uploads`]: `POST /upload` in both modes
//! - [`links`]: slug view and download, direct-mode redirects
//! - [`pages`]: landing page, docs page, health check
//! - [`static_assets`]: embedded stylesheet and script
//!
//! Handlers return [`crate::errors::Result`], whose error type renders the status code and body.

pub mod links;
pub mod pages;
pub mod static_assets;
pub mod uploads;
