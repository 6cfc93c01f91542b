//! Script store under `scripts_dir`, with canonicalization-based
//! containment checks on every path that comes in from the wire.

use hostwatch_common::error::AgentError;
use serde_json::{json, Value};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Resolve `name` inside `base`, refusing anything that would land outside
/// it. Both sides are canonicalized (symlinks resolved, `..` eliminated)
/// before the prefix check; for a not-yet-existing target the deepest
/// existing ancestor is canonicalized and the remainder re-appended.
pub fn resolve_target(base: &Path, name: &str) -> Result<PathBuf, AgentError> {
    let invalid = || AgentError::invalid("Invalid target path");

    if name.is_empty() {
        return Err(invalid());
    }
    let candidate = Path::new(name);
    if candidate.is_absolute() {
        return Err(invalid());
    }

    let base = base.canonicalize().map_err(|_| invalid())?;
    let joined = base.join(candidate);

    let mut existing = joined.clone();
    let mut tail: Vec<OsString> = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(file_name)) => {
                tail.push(file_name.to_os_string());
                existing = parent.to_path_buf();
            }
            // A path ending in ".." has no file name; nothing legitimate
            // looks like that.
            _ => return Err(invalid()),
        }
    }

    let mut resolved = existing.canonicalize().map_err(|_| invalid())?;
    for part in tail.iter().rev() {
        resolved.push(part);
    }

    if resolved.starts_with(&base) && resolved != base {
        Ok(resolved)
    } else {
        Err(invalid())
    }
}

/// Like [`resolve_target`], but the script must already exist.
pub fn resolve_existing(base: &Path, name: &str) -> Result<PathBuf, AgentError> {
    let resolved = resolve_target(base, name)?;
    if resolved.is_file() {
        Ok(resolved)
    } else {
        Err(AgentError::not_found(format!("Unknown script: {name}")))
    }
}

/// Directory listing as `{name, size}` entries; a missing directory is an
/// empty store, not an error.
pub fn list(base: &Path) -> Vec<Value> {
    let Ok(entries) = std::fs::read_dir(base) else {
        return Vec::new();
    };
    let mut scripts: Vec<Value> = entries
        .flatten()
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            if !metadata.is_file() {
                return None;
            }
            Some(json!({
                "name": entry.file_name().to_string_lossy(),
                "size": metadata.len(),
            }))
        })
        .collect();
    scripts.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
    scripts
}

#[cfg(unix)]
pub fn apply_chmod(path: &Path, mode: &Value) -> Result<(), AgentError> {
    use std::os::unix::fs::PermissionsExt;
    let mode = match mode {
        Value::String(text) => u32::from_str_radix(text, 8)
            .map_err(|_| AgentError::invalid(format!("Invalid chmod value: {text}")))?,
        Value::Number(num) => num
            .as_u64()
            .and_then(|raw| u32::try_from(raw).ok())
            .ok_or_else(|| AgentError::invalid("Invalid chmod value"))?,
        _ => return Err(AgentError::invalid("Invalid chmod value")),
    };
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(AgentError::from)
}

#[cfg(not(unix))]
pub fn apply_chmod(_path: &Path, _mode: &Value) -> Result<(), AgentError> {
    Ok(())
}
