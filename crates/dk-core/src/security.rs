use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use dk_types::{DockyardError, Result};
use regex::Regex;

/// Quote `arg` for display in a POSIX shell.
///
/// Used only for human-readable renderings; processes are always spawned from an
/// argument vector.
pub fn shell_escape(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', "'\\''"))
}

/// Render a command line for logs.
pub fn render_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(shell_escape)
        .collect::<Vec<_>>()
        .join(" ")
}

fn env_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
}

pub fn is_valid_env_name(name: &str) -> bool {
    env_name_regex().is_match(name)
}

pub fn validate_env_name(name: &str) -> Result<()> {
    if is_valid_env_name(name) {
        Ok(())
    } else {
        Err(DockyardError::User(format!(
            "Invalid environment variable name \"{name}\""
        )))
    }
}

/// Lowercase `s` and replace everything Docker rejects in names and tags with `-`.
pub fn docker_name(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
        .collect()
}

/// Sanitize a filename to prevent path traversal.
pub fn sanitize_filename(filename: &str) -> String {
    let name = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let sanitized: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' '))
        .collect();

    if sanitized.chars().count() > 255 {
        sanitized.chars().take(255).collect()
    } else {
        sanitized
    }
}

/// Check for path traversal attempts.
pub fn check_path_traversal(path: &str) -> bool {
    // Returns true if path traversal is detected
    path.contains("..") || path.contains('\0')
}

/// Resolve `path` lexically and require it to stay inside `root`.
pub fn ensure_within(root: &Path, path: &Path) -> Result<PathBuf> {
    if check_path_traversal(&path.to_string_lossy()) {
        return Err(DockyardError::Application(format!(
            "Path traversal detected in {}",
            path.display()
        )));
    }
    let resolved = normalize(&root.join(path));
    let root = normalize(root);
    if resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(DockyardError::Application(format!(
            "Path {} is outside of {}",
            resolved.display(),
            root.display()
        )))
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
