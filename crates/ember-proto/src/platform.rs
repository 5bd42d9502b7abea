use std::path::{Path, PathBuf};

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/ember/ (XDG standard)
    // instead of macOS Application Support for consistency
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("ember")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ember")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("ember")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ember")
    }
}

#[cfg(unix)]
pub fn mpv_binary_name() -> &'static str {
    "mpv"
}

#[cfg(windows)]
pub fn mpv_binary_name() -> &'static str {
    "mpv.exe"
}

/// App-bundle installs that never land on PATH.
fn bundle_candidates() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(home) = dirs::home_dir() {
        out.push(home.join("Applications/mpv.app/Contents/MacOS/mpv"));
    }
    out.push(PathBuf::from("/Applications/mpv.app/Contents/MacOS/mpv"));
    out
}

fn find_beside_exe(name: &str) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let p = current_exe.parent()?.join(name);
    p.exists().then_some(p)
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}

/// Find the mpv binary for playback.
///
/// Searches in order:
/// 1. An explicit override (from `[player] binary` in config)
/// 2. macOS app bundles in ~/Applications and /Applications
/// 3. Beside the current executable
/// 4. PATH
pub fn find_mpv_binary(override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = override_path {
        if p.exists() {
            return Some(p.to_path_buf());
        }
        tracing::warn!("configured player binary {} does not exist", p.display());
    }

    if let Some(p) = bundle_candidates().into_iter().find(|p| p.exists()) {
        return Some(p);
    }

    let exe_name = mpv_binary_name();
    find_beside_exe(exe_name).or_else(|| find_on_path(exe_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("my-mpv");
        std::fs::write(&fake, b"").unwrap();
        assert_eq!(find_mpv_binary(Some(&fake)), Some(fake));
    }

    #[test]
    fn test_dirs_are_namespaced() {
        assert!(data_dir().ends_with("ember"));
        assert!(config_dir().ends_with("ember"));
    }
}
