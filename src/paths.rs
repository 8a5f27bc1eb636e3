//! User-directory resolution.
//!
//! Priority for the user-level base directory:
//!   1. `SQLDIFF_HOME` env var (if set and non-empty)
//!   2. `dirs::config_dir().map(|d| d.join("sqldiff"))` (platform default)

use std::path::PathBuf;

/// Returns the sqldiff user-level base directory, holding `config.toml`
/// and the `history` file.
pub fn user_dir() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("SQLDIFF_HOME")
        && !home.is_empty()
    {
        return Some(PathBuf::from(home));
    }
    dirs::config_dir().map(|d| d.join("sqldiff"))
}

pub fn config_path() -> Option<PathBuf> {
    user_dir().map(|d| d.join("config.toml"))
}

pub fn history_path() -> Option<PathBuf> {
    user_dir().map(|d| d.join("history"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serial_test::serial;

    use super::*;

    fn set_home(val: &str) {
        // SAFETY: test-only env mutation; #[serial] prevents races.
        unsafe { std::env::set_var("SQLDIFF_HOME", val) };
    }

    fn clear_home() {
        unsafe { std::env::remove_var("SQLDIFF_HOME") };
    }

    #[test]
    #[serial]
    fn user_dir_uses_home_when_set() {
        set_home("/custom/sqldiff");
        let result = user_dir();
        let history = history_path();
        clear_home();
        assert_eq!(result, Some(PathBuf::from("/custom/sqldiff")));
        assert_eq!(history, Some(PathBuf::from("/custom/sqldiff/history")));
    }

    #[test]
    #[serial]
    fn empty_home_falls_back_to_config_dir() {
        set_home("");
        let result = user_dir();
        clear_home();
        assert_eq!(result, dirs::config_dir().map(|d| d.join("sqldiff")));
    }

    #[test]
    #[serial]
    fn config_path_lives_in_user_dir() {
        set_home("/h");
        let result = config_path();
        clear_home();
        assert_eq!(result, Some(PathBuf::from("/h/config.toml")));
    }
}
