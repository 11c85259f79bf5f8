//! Read the `[env]` table from a `config.toml` file.

use std::collections::HashMap;
use std::path::Path;

use crate::LoadError;

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Returns the `[env]` key-value pairs from the given TOML file.
/// Missing file or absent section returns an empty map.
pub(crate) fn load_env_table(path: &Path) -> Result<HashMap<String, String>, LoadError> {
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(path).map_err(LoadError::Read)?;
    let config: ConfigFile = toml::from_str(&content)?;
    Ok(config.env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_returns_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let map = load_env_table(&dir.path().join("config.toml")).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn reads_env_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[env]
MAESTRO_FAST_MODEL = "small-1"
GLOBAL_MAX_CONCURRENT_LLM_REQUESTS = "50"
"#,
        )
        .unwrap();
        let map = load_env_table(&path).unwrap();
        assert_eq!(map.get("MAESTRO_FAST_MODEL"), Some(&"small-1".to_string()));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn table_without_env_section_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[other]\nkey = \"ignored\"\n").unwrap();
        let map = load_env_table(&path).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not toml [[[\n").unwrap();
        assert!(matches!(load_env_table(&path), Err(LoadError::Parse(_))));
    }
}
