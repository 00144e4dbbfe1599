use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::artifacts::ImagePayload;

/// Best-effort key/value cache of generated images, backed by one JSON file.
///
/// The file is loaded lazily on first use and the handle is reused for the
/// rest of the process. Caching is an optimization, not a correctness
/// requirement: `put` reports failure instead of propagating it, and `get`
/// answers "absent" for unknown keys or an unreadable store.
#[derive(Debug, Clone)]
pub struct ImageCache {
    path: PathBuf,
    entries: Option<Map<String, Value>>,
}

impl ImageCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: None,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<ImagePayload> {
        let entries = self.ensure_loaded();
        entries
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Returns whether the entry landed on disk.
    pub fn put(&mut self, key: &str, image: &ImagePayload) -> bool {
        self.try_put(key, image).is_ok()
    }

    fn try_put(&mut self, key: &str, image: &ImagePayload) -> anyhow::Result<()> {
        let snapshot = serde_json::to_value(image)?;
        let entries = self.ensure_loaded();
        if entries.get(key) == Some(&snapshot) {
            return Ok(());
        }
        entries.insert(key.to_string(), snapshot.clone());

        // Merge with whatever is on disk so a write never drops entries a
        // concurrent writer added since our load.
        let mut on_disk = read_json_object(&self.path).unwrap_or_default();
        on_disk.insert(key.to_string(), snapshot);
        write_json_object(&self.path, &on_disk)?;
        self.entries = Some(on_disk);
        Ok(())
    }

    fn ensure_loaded(&mut self) -> &mut Map<String, Value> {
        if self.entries.is_none() {
            self.entries = Some(read_json_object(&self.path).unwrap_or_default());
        }
        self.entries.as_mut().expect("cache entries initialized")
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
        serde_json::to_string(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::artifacts::ImagePayload;

    use super::ImageCache;

    #[test]
    fn cached_payload_round_trips_unchanged() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut cache = ImageCache::new(temp.path().join("images.json"));
        let image = ImagePayload::new("aGVhZHNob3QtYnl0ZXM=", "image/png");
        assert!(cache.put("fingerprint-a", &image));
        assert_eq!(cache.get("fingerprint-a"), Some(image));
        Ok(())
    }

    #[test]
    fn round_trip_survives_a_fresh_handle() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("images.json");
        let image = ImagePayload::new("aGVhZHNob3QtYnl0ZXM=", "image/png");

        let mut writer = ImageCache::new(&path);
        assert!(writer.put("fingerprint-a", &image));

        let mut reader = ImageCache::new(&path);
        assert_eq!(reader.get("fingerprint-a"), Some(image));
        Ok(())
    }

    #[test]
    fn unknown_key_is_absent_not_an_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut cache = ImageCache::new(temp.path().join("images.json"));
        assert_eq!(cache.get("never-written"), None);
        Ok(())
    }

    #[test]
    fn unreadable_store_is_absent_not_an_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("images.json");
        std::fs::write(&path, "not json at all")?;
        let mut cache = ImageCache::new(&path);
        assert_eq!(cache.get("fingerprint-a"), None);
        Ok(())
    }

    #[test]
    fn put_reports_failure_without_panicking() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory")?;
        // Parent path goes through a regular file, so the write cannot land.
        let mut cache = ImageCache::new(blocker.join("nested").join("images.json"));
        let image = ImagePayload::new("aGVhZHNob3QtYnl0ZXM=", "image/png");
        assert!(!cache.put("fingerprint-a", &image));
        Ok(())
    }

    #[test]
    fn put_merges_with_a_concurrent_writer() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("images.json");
        let mut cache_a = ImageCache::new(&path);
        let mut cache_b = ImageCache::new(&path);

        let first = ImagePayload::new("Zmlyc3Q=", "image/png");
        let second = ImagePayload::new("c2Vjb25k", "image/png");
        assert!(cache_a.put("a", &first));
        assert!(cache_b.put("b", &second));

        let mut reader = ImageCache::new(&path);
        assert_eq!(reader.get("a"), Some(first));
        assert_eq!(reader.get("b"), Some(second));
        Ok(())
    }
}
