use std::path::PathBuf;

const STATE_FILE_NAME: &str = "skill_state.json";
const APP_DIR: &str = "deliberate-practice";

#[derive(Debug, Clone)]
pub struct Config {
    pub state_path: PathBuf,
    pub log_level: String,
    pub file_logs: bool,
    pub log_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        let state_path = std::env::var("PRACTICE_STATE_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_state_path);

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());

        let file_logs = std::env::var("PRACTICE_FILE_LOGS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let log_dir = std::env::var("PRACTICE_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./logs"));

        Self {
            state_path,
            log_level,
            file_logs,
            log_dir,
        }
    }

    pub fn with_state_path(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.state_path = path;
        }
        self
    }
}

fn default_state_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR).join(STATE_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(STATE_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_path_ends_with_file_name() {
        assert!(default_state_path().ends_with(STATE_FILE_NAME));
    }

    #[test]
    fn test_cli_override_wins() {
        let config = Config {
            state_path: PathBuf::from("a.json"),
            log_level: "warn".into(),
            file_logs: false,
            log_dir: PathBuf::from("./logs"),
        }
        .with_state_path(Some(PathBuf::from("b.json")));
        assert_eq!(config.state_path, PathBuf::from("b.json"));
    }
}
