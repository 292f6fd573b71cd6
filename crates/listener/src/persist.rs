//! Binding persistence: a JSON file mapping slot number to binding.
//!
//! Written on every successful registration or clear, read once at
//! startup. A missing file is an empty table, not an error.

use std::{collections::BTreeMap, fs, io::ErrorKind, path::Path};

use tracing::debug;

use crate::{Result, table::Binding};

/// Read the bindings file. Missing file yields an empty map.
pub fn load(path: &Path) -> Result<BTreeMap<u8, Binding>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no bindings file, starting empty");
            return Ok(BTreeMap::new());
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&raw)?)
}

/// Rewrite the bindings file with the current table contents.
pub fn save<'a>(path: &Path, bindings: impl Iterator<Item = (u8, &'a Binding)>) -> Result<()> {
    let map: BTreeMap<u8, &Binding> = bindings.collect();
    let raw = serde_json::to_string_pretty(&map)?;
    fs::write(path, raw)?;
    debug!(path = %path.display(), slots = map.len(), "bindings saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use ghostwriter_protocol::InputSource;

    use super::*;

    fn binding(value: &str) -> Binding {
        Binding {
            source: InputSource::Keyboard,
            value: value.into(),
            gamepad_name: None,
            suppress: false,
        }
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let map = load(&dir.path().join("absent.json")).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bindings.json");
        let b1 = binding("f9");
        let b3 = Binding {
            source: InputSource::Gamepad,
            value: "south".into(),
            gamepad_name: Some("Pad A".into()),
            suppress: true,
        };
        save(&path, [(1u8, &b1), (3u8, &b3)].into_iter()).unwrap();

        let map = load(&path).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&1], b1);
        assert_eq!(map[&3], b3);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bindings.json");
        fs::write(&path, "not json").unwrap();
        assert!(load(&path).is_err());
    }
}
