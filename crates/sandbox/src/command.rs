//! Shell command assembly for the exec protocols.
//!
//! The streaming exec protocol ships a bare argv, so working directory and
//! environment overrides have to be folded into the command text itself.
//! Everything user-controlled passes through [`shell_quote`] first.

use std::collections::BTreeMap;

/// Quote a string for POSIX `sh`. Always single-quoted; embedded single
/// quotes are spliced with the `'"'"'` sequence, so no value can terminate
/// the quoting and inject syntax.
pub fn shell_quote(raw: &str) -> String {
    if raw.contains('\'') {
        format!("'{}'", raw.replace('\'', "'\"'\"'"))
    } else {
        format!("'{raw}'")
    }
}

/// Whether a name is usable as a shell environment variable identifier.
pub fn is_valid_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Render a command plus optional working directory and environment
/// overrides into one shell-invocable string:
/// `cd <dir> && KEY='value' <command>`.
///
/// Keys are validated upstream and placed bare; values and the directory are
/// quoted. The map is ordered, so the rendering is deterministic.
pub fn shell_script(command: &str, cwd: Option<&str>, env: &BTreeMap<String, String>) -> String {
    let mut script = String::new();
    if let Some(dir) = cwd {
        script.push_str("cd ");
        script.push_str(&shell_quote(dir));
        script.push_str(" && ");
    }
    for (key, value) in env {
        script.push_str(key);
        script.push('=');
        script.push_str(&shell_quote(value));
        script.push(' ');
    }
    script.push_str(command);
    script
}

/// argv for the streaming exec protocol: an explicit `sh -c <script>` call.
/// The script rides as a single argv element, so it needs no further
/// escaping.
pub fn shell_argv(command: &str, cwd: Option<&str>, env: &BTreeMap<String, String>) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        shell_script(command, cwd, env),
    ]
}
