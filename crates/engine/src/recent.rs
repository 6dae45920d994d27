//! Recently-used files registration.
//!
//! Completed recordings are appended to the freedesktop bookmark store
//! (`recently-used.xbel`) so they surface in file choosers and recent-file
//! menus. Registration is best-effort: the recording already finished, and
//! a bookmark failure must not turn a finished recording into an error.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;

/// Sink for completed-recording registrations.
pub trait RecentItems: Send {
    /// Records `path` as a recently-used item.
    fn add(&mut self, path: &Path);
}

/// Production store writing the freedesktop `recently-used.xbel` file.
pub struct RecentlyUsed {
    store: PathBuf,
    application: String,
}

const EMPTY_STORE: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<xbel version=\"1.0\"\n      \
xmlns:bookmark=\"http://www.freedesktop.org/standards/desktop-bookmarks\"\n      \
xmlns:mime=\"http://www.freedesktop.org/standards/shared-mime-info\">\n\
</xbel>\n";

impl RecentlyUsed {
    pub fn new() -> Self {
        Self::with_store(default_store_path(), "castd")
    }

    pub fn with_store(store: PathBuf, application: &str) -> Self {
        Self {
            store,
            application: application.to_string(),
        }
    }
}

impl Default for RecentlyUsed {
    fn default() -> Self {
        Self::new()
    }
}

impl RecentItems for RecentlyUsed {
    fn add(&mut self, path: &Path) {
        let stamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        if let Err(e) = append_bookmark(&self.store, path, &self.application, &stamp) {
            tracing::warn!(
                error = %e,
                path = %path.display(),
                "Failed to register recent item"
            );
        } else {
            tracing::debug!(path = %path.display(), "Registered recent item");
        }
    }
}

fn append_bookmark(store: &Path, item: &Path, application: &str, stamp: &str) -> io::Result<()> {
    let document = match std::fs::read_to_string(store) {
        Ok(document) => document,
        Err(e) if e.kind() == io::ErrorKind::NotFound => EMPTY_STORE.to_string(),
        Err(e) => return Err(e),
    };
    let Some(end) = document.rfind("</xbel>") else {
        return Err(io::Error::other("recent store is not an xbel document"));
    };

    let uri = file_uri(item);
    let bookmark = format!(
        "  <bookmark href=\"{uri}\" added=\"{stamp}\" modified=\"{stamp}\" visited=\"{stamp}\">\n\
         \x20   <info>\n\
         \x20     <metadata owner=\"http://freedesktop.org\">\n\
         \x20       <mime:mime-type type=\"video/webm\"/>\n\
         \x20       <bookmark:applications>\n\
         \x20         <bookmark:application name=\"{application}\" exec=\"&apos;{application}&apos;\" modified=\"{stamp}\" count=\"1\"/>\n\
         \x20       </bookmark:applications>\n\
         \x20     </metadata>\n\
         \x20   </info>\n\
         \x20 </bookmark>\n"
    );

    let mut updated = String::with_capacity(document.len() + bookmark.len());
    updated.push_str(&document[..end]);
    updated.push_str(&bookmark);
    updated.push_str(&document[end..]);

    if let Some(parent) = store.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(store, updated)
}

/// Percent-encodes a filesystem path into a `file://` URI.
fn file_uri(path: &Path) -> String {
    let mut uri = String::from("file://");
    for byte in path.as_os_str().as_encoded_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                uri.push(*byte as char);
            }
            other => uri.push_str(&format!("%{other:02X}")),
        }
    }
    uri
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("recently-used.xbel")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_a_fresh_store_with_one_bookmark() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("recently-used.xbel");
        let mut recent = RecentlyUsed::with_store(store.clone(), "castd");

        recent.add(Path::new("/home/user/Videos/cast.webm"));

        let document = std::fs::read_to_string(&store).unwrap();
        assert!(document.starts_with("<?xml"));
        assert!(document.contains("href=\"file:///home/user/Videos/cast.webm\""));
        assert!(document.contains("name=\"castd\""));
        assert!(document.trim_end().ends_with("</xbel>"));
    }

    #[test]
    fn appends_to_an_existing_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("recently-used.xbel");
        let mut recent = RecentlyUsed::with_store(store.clone(), "castd");

        recent.add(Path::new("/tmp/first.webm"));
        recent.add(Path::new("/tmp/second.webm"));

        let document = std::fs::read_to_string(&store).unwrap();
        assert!(document.contains("first.webm"));
        assert!(document.contains("second.webm"));
        assert_eq!(document.matches("<bookmark ").count(), 2);
    }

    #[test]
    fn uris_are_percent_encoded() {
        assert_eq!(
            file_uri(Path::new("/home/user/My Videos/cast 1.webm")),
            "file:///home/user/My%20Videos/cast%201.webm"
        );
    }
}
