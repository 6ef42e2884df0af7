//! Cross-platform application paths

use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self, String> {
        let data_dir = Self::get_data_dir()?;

        fs::create_dir_all(data_dir.join("sessions"))
            .map_err(|e| format!("Failed to create data directory: {}", e))?;

        Ok(Self { data_dir })
    }

    fn get_data_dir() -> Result<PathBuf, String> {
        let base = dirs::data_dir().ok_or("Could not determine data directory")?;
        Ok(base.join("catmatch"))
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    /// `<participant>_<session>` with anything but ASCII alphanumerics and `-`
    /// replaced, so ids that collide here also share a log file.
    pub fn session_key(participant: &str, session: &str) -> String {
        let clean = |s: &str| -> String {
            s.chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
                .collect()
        };
        format!("{}_{}", clean(participant), clean(session))
    }

    /// `sessions/<session_key>.csv`.
    pub fn session_log(&self, key: &str) -> PathBuf {
        self.data_dir.join("sessions").join(format!("{key}.csv"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_log_names_are_sanitised() {
        let paths = AppPaths {
            data_dir: PathBuf::from("/data/catmatch"),
        };
        assert_eq!(
            paths.session_log(&AppPaths::session_key("p01", "../2")),
            PathBuf::from("/data/catmatch/sessions/p01____2.csv")
        );
    }

    #[test]
    fn ids_sharing_a_log_file_share_a_key() {
        assert_eq!(
            AppPaths::session_key("p.1", "s"),
            AppPaths::session_key("p_1", "s")
        );
        assert_eq!(
            AppPaths::session_key("a_b", "c"),
            AppPaths::session_key("a", "b_c")
        );
        assert_ne!(
            AppPaths::session_key("p1", "s"),
            AppPaths::session_key("p2", "s")
        );
    }
}
