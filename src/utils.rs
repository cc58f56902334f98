//! Utility functions for file naming and path manipulation

use crate::config::FileCollisionAction;
use crate::error::{Error, PlanError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Maximum length (in characters) of a sanitized filename
const MAX_FILENAME_CHARS: usize = 200;

/// Suffixes the engine uses for in-progress downloads
const FRAGMENT_SUFFIXES: &[&str] = &[".part", ".ytdl"];

// The pattern is a literal and always compiles
#[allow(clippy::unwrap_used)]
fn illegal_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap())
}

/// Make a title safe to use as a filename
///
/// Characters that are illegal on common filesystems become `_`, leading and
/// trailing spaces and dots are stripped, and the result is capped at 200
/// characters (keeping a trailing extension when there is one). An empty
/// result becomes `untitled`.
///
/// # Examples
///
/// ```
/// use media_dl::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("a/b: c?"), "a_b_ c_");
/// assert_eq!(sanitize_filename(" .. "), "untitled");
/// ```
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let replaced = illegal_chars().replace_all(name, "_");
    let trimmed = replaced.trim_matches(|c| c == ' ' || c == '.');

    let sanitized = if trimmed.chars().count() > MAX_FILENAME_CHARS {
        let (stem, ext) = split_extension(trimmed);
        match ext {
            Some(ext) => {
                let keep = MAX_FILENAME_CHARS.saturating_sub(ext.chars().count() + 1);
                let stem: String = stem.chars().take(keep).collect();
                format!("{stem}.{ext}")
            }
            None => trimmed.chars().take(MAX_FILENAME_CHARS).collect(),
        }
    } else {
        trimmed.to_string()
    };

    if sanitized.is_empty() {
        "untitled".to_string()
    } else {
        sanitized
    }
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

/// Get a unique path for a file, handling collisions according to the specified action
///
/// For Rename, returns `name (1).ext`, `name (2).ext`, ... until a free name is found.
/// For Skip, returns an error if the file already exists.
/// For Overwrite, returns the original path unchanged.
///
/// # Examples
///
/// ```
/// use media_dl::utils::get_unique_path;
/// use media_dl::config::FileCollisionAction;
/// use std::path::Path;
///
/// let path = Path::new("/tmp/clip.mp4");
/// let unique = get_unique_path(path, FileCollisionAction::Rename).unwrap();
/// // If /tmp/clip.mp4 exists, returns /tmp/clip (1).mp4
/// ```
pub fn get_unique_path(path: &Path, action: FileCollisionAction) -> Result<PathBuf> {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    match action {
        FileCollisionAction::Overwrite => Ok(path.to_path_buf()),
        FileCollisionAction::Skip => {
            if path.exists() {
                return Err(Error::Plan(PlanError::OutputPath {
                    dir: parent.to_path_buf(),
                    reason: format!("{} already exists", path.display()),
                }));
            }
            Ok(path.to_path_buf())
        }
        FileCollisionAction::Rename => {
            if !path.exists() {
                return Ok(path.to_path_buf());
            }

            let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(|| {
                Error::Plan(PlanError::OutputPath {
                    dir: parent.to_path_buf(),
                    reason: "cannot extract file stem".to_string(),
                })
            })?;
            let extension = path.extension().and_then(|e| e.to_str());

            for i in 1..=MAX_RENAME_ATTEMPTS {
                let new_name = match extension {
                    Some(ext) => format!("{} ({}).{}", stem, i, ext),
                    None => format!("{} ({})", stem, i),
                };
                let new_path = parent.join(new_name);
                if !new_path.exists() {
                    return Ok(new_path);
                }
            }

            Err(Error::Plan(PlanError::OutputPath {
                dir: parent.to_path_buf(),
                reason: format!("no free name after {MAX_RENAME_ATTEMPTS} attempts"),
            }))
        }
    }
}

/// Whether `file_name` is an in-progress fragment belonging to an output with `stem`
///
/// Matches `<stem>.part`, `<stem>.ytdl` and any `<stem>.<anything>.part|.ytdl`.
#[must_use]
pub fn is_partial_fragment(stem: &str, file_name: &str) -> bool {
    let Some(rest) = file_name.strip_prefix(stem) else {
        return false;
    };
    if !rest.starts_with('.') {
        return false;
    }
    FRAGMENT_SUFFIXES.iter().any(|suffix| rest.ends_with(suffix))
}

/// List fragments next to `output` that share its base name
pub fn partial_fragments(output: &Path) -> Vec<PathBuf> {
    let (Some(dir), Some(stem)) = (
        output.parent(),
        output.file_stem().and_then(|s| s.to_str()),
    ) else {
        return Vec::new();
    };

    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            is_partial_fragment(stem, name).then(|| entry.path())
        })
        .collect()
}

/// Whether a previous attempt left anything for the engine to continue from
#[must_use]
pub fn has_previous_output(output: &Path) -> bool {
    output.exists() || !partial_fragments(output).is_empty()
}
