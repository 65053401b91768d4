//! Socket and PID file locations.
//!
//! Socket directory, first match wins:
//! 1. `BREWPILOT_SOCKET_DIR`
//! 2. `XDG_RUNTIME_DIR/brewpilot`
//! 3. `~/.brewpilot`
//! 4. `<tmp>/brewpilot`
//!
//! One daemon drives one appliance. Several appliances on one host run
//! as separate instances, selected by `BREWPILOT_INSTANCE` (default
//! "default"); each instance gets `{socket_dir}/{instance}.sock`.

use std::env;
use std::path::PathBuf;

pub fn get_instance() -> String {
    env::var("BREWPILOT_INSTANCE").unwrap_or_else(|_| "default".to_string())
}

pub fn get_socket_dir() -> PathBuf {
    if let Ok(dir) = env::var("BREWPILOT_SOCKET_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    if let Ok(runtime_dir) = env::var("XDG_RUNTIME_DIR") {
        if !runtime_dir.is_empty() {
            return PathBuf::from(runtime_dir).join("brewpilot");
        }
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".brewpilot");
    }

    env::temp_dir().join("brewpilot")
}

/// Instance names end up in file names: only ASCII alphanumerics, `-` and
/// `_`, not starting with `-`. Anything else falls back to "default".
pub(crate) fn sanitize_instance_name(name: &str) -> String {
    let is_valid = !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if is_valid {
        name.to_string()
    } else {
        tracing::warn!(
            "Invalid instance name '{}', using 'default'. Names must contain only alphanumeric, hyphen, underscore.",
            name
        );
        "default".to_string()
    }
}

fn instance_file(instance: Option<&str>, extension: &str) -> PathBuf {
    let name = instance.map(String::from).unwrap_or_else(get_instance);
    let safe = sanitize_instance_name(&name);
    get_socket_dir().join(format!("{}.{}", safe, extension))
}

pub fn get_socket_path(instance: Option<&str>) -> PathBuf {
    instance_file(instance, "sock")
}

pub fn get_pid_path(instance: Option<&str>) -> PathBuf {
    instance_file(instance, "pid")
}

/// Create the socket directory, owner-only.
pub fn ensure_socket_dir() -> std::io::Result<()> {
    let dir = get_socket_dir();
    std::fs::create_dir_all(&dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}
