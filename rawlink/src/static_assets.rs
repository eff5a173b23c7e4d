//! Stylesheet and script for the HTML pages, embedded at compile time.

use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "static/"]
pub struct Assets;
