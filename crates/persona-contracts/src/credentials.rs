use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

/// Fixed key the credential is stored under in the settings file.
const CREDENTIAL_KEY: &str = "gemini_api_key";

/// Read/write access to the user's generation-service credential.
///
/// Absence of a credential is a valid state, not an error; the workflow
/// prompts for one out-of-band when a generation is attempted without it.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Option<String> {
        let settings = read_json_object(&self.path)?;
        settings
            .get(CREDENTIAL_KEY)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    /// Saving an empty or blank credential removes the stored one.
    pub fn save(&self, credential: &str) -> anyhow::Result<()> {
        let mut settings = read_json_object(&self.path).unwrap_or_default();
        let trimmed = credential.trim();
        if trimmed.is_empty() {
            settings.remove(CREDENTIAL_KEY);
        } else {
            settings.insert(
                CREDENTIAL_KEY.to_string(),
                Value::String(trimmed.to_string()),
            );
        }
        write_json_object(&self.path, &settings)
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        self.save("")
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::CredentialStore;

    #[test]
    fn credential_round_trips() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = CredentialStore::new(temp.path().join("settings.json"));
        store.save("sk-test-credential")?;
        assert_eq!(store.load().as_deref(), Some("sk-test-credential"));
        Ok(())
    }

    #[test]
    fn missing_file_is_a_valid_absent_state() {
        let store = CredentialStore::new("/nonexistent/settings.json");
        assert_eq!(store.load(), None);
    }

    #[test]
    fn saving_blank_clears_the_credential() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = CredentialStore::new(temp.path().join("settings.json"));
        store.save("sk-test-credential")?;
        store.save("   ")?;
        assert_eq!(store.load(), None);
        Ok(())
    }

    #[test]
    fn clear_removes_the_credential() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = CredentialStore::new(temp.path().join("settings.json"));
        store.save("sk-test-credential")?;
        store.clear()?;
        assert_eq!(store.load(), None);
        Ok(())
    }

    #[test]
    fn load_trims_whitespace() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = CredentialStore::new(temp.path().join("settings.json"));
        store.save("  sk-test-credential  ")?;
        assert_eq!(store.load().as_deref(), Some("sk-test-credential"));
        Ok(())
    }
}
