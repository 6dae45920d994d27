//! Filename template expansion for recording output paths.
//!
//! Callers hand the service a template like `"cast-%d-%t.webm"`; expansion
//! substitutes the current date and time and resolves relative results under
//! the user's Videos directory. Expansion always succeeds: a template is user
//! input, and a bad escape is worth a warning, never a failed recording.

use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use chrono::{DateTime, Local};

/// Rendered by `%d`.
const DATE_FORMAT: &str = "%F";
/// Rendered by `%t`.
const TIME_FORMAT: &str = "%T";

/// Expands `template` against the current local time and resolves it to an
/// absolute output path.
pub fn generate(template: &str) -> PathBuf {
    let filename = expand(template, &Local::now());
    resolve(&filename, default_videos_dir())
}

/// Expands the escape sequences in `template`.
///
/// `%d` is the local date, `%t` the local time (path separators in the
/// rendered text are replaced so they cannot split the filename), `%%` a
/// literal percent. Unknown escapes are dropped with a warning; a trailing
/// `%` stays literal.
fn expand(template: &str, now: &DateTime<Local>) -> String {
    let mut expanded = String::with_capacity(template.len());
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            expanded.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => expanded.push('%'),
            Some('d') => {
                let date = now.format(DATE_FORMAT).to_string();
                expanded.push_str(&replace_separators(&date, '-'));
            }
            Some('t') => {
                let time = now.format(TIME_FORMAT).to_string();
                expanded.push_str(&replace_separators(&time, ':'));
            }
            Some(unknown) => {
                tracing::warn!(escape = %unknown, "Unknown escape in filename template, ignoring");
            }
            None => expanded.push('%'),
        }
    }

    expanded
}

/// Resolves a relative filename under `base`; absolute paths pass through.
fn resolve(filename: &str, base: PathBuf) -> PathBuf {
    let path = Path::new(filename);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn replace_separators(text: &str, replacement: char) -> String {
    text.chars()
        .map(|c| if c == MAIN_SEPARATOR { replacement } else { c })
        .collect()
}

fn default_videos_dir() -> PathBuf {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Videos")))
        .unwrap_or_else(|| PathBuf::from("."))
}
