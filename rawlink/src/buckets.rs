//! Extension-based classification of uploads into storage directories.

use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Directory an upload is filed under, chosen by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Image,
    Videos,
    Archives,
    Docs,
    Texts,
    Data,
    /// Catch-all for unlisted extensions
    Files,
}

/// Extension table. Every listed extension appears under exactly one bucket.
pub const EXTENSION_TABLE: &[(Bucket, &[&str])] = &[
    (Bucket::Image, &[".jpg", ".jpeg", ".png", ".gif", ".webp"]),
    (Bucket::Videos, &[".mp4", ".mov", ".mkv", ".webm"]),
    (Bucket::Archives, &[".zip", ".rar", ".7z"]),
    (Bucket::Docs, &[".pdf", ".docx", ".xlsx"]),
    (Bucket::Texts, &[".txt"]),
    (Bucket::Data, &[".csv", ".json"]),
];

impl Bucket {
    /// Classify a lowercase extension including its dot (`".png"`). Unlisted extensions, and the
    /// empty extension, land in [`Bucket::Files`].
    pub fn from_extension(ext: &str) -> Self {
        EXTENSION_TABLE
            .iter()
            .find(|(_, exts)| exts.contains(&ext))
            .map(|(bucket, _)| *bucket)
            .unwrap_or(Bucket::Files)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Image => "image",
            Bucket::Videos => "videos",
            Bucket::Archives => "archives",
            Bucket::Docs => "docs",
            Bucket::Texts => "texts",
            Bucket::Data => "data",
            Bucket::Files => "files",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercased extension of `filename` including the leading dot, or `""` when there is none.
///
/// Dotfiles such as `.env` have no extension.
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}
