//! Saved connection profiles (`connections.json`).

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::model::ConnectionConfig;

/// Saved profiles. A missing file is an empty list; a file that cannot be
/// read or parsed is an error.
pub fn read(path: &Path) -> Result<Vec<ConnectionConfig>, CacheError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&raw)?)
}

/// Saved profiles for display, or nothing if the file is unusable.
pub fn load(path: &Path) -> Vec<ConnectionConfig> {
    read(path).unwrap_or_else(|e| {
        warn!("ignoring unreadable {}: {}", path.display(), e);
        Vec::new()
    })
}

/// Append one profile and rewrite the file. An existing file that does not
/// parse is left untouched. Passwords are never written.
pub fn append(path: &Path, config: &ConnectionConfig) -> Result<Vec<ConnectionConfig>, CacheError> {
    let mut saved = read(path)?;
    saved.push(config.clone());
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let body = serde_json::to_string_pretty(&saved)?;
    write_replace(path, body.as_bytes())?;
    info!("saved connection {}", config.name);
    Ok(saved)
}

/// Write to a sibling temp file then rename over the target, so readers see
/// either the old file or the new one.
fn write_replace(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    debug!("rewrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str) -> ConnectionConfig {
        ConnectionConfig {
            name: name.into(),
            db_type: "postgresql".into(),
            server: "localhost".into(),
            port: "5432".into(),
            username: "postgres".into(),
            password: Some("secret".into()),
            source: Some("docker".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_append_creates_file_without_passwords() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("connections.json");
        assert!(load(&path).is_empty());

        append(&path, &profile("pg-dev")).unwrap();
        let saved = append(&path, &profile("pg-copy")).unwrap();
        assert_eq!(saved.len(), 2);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("secret"));
        let loaded = load(&path);
        assert_eq!(loaded[1].name, "pg-copy");
        assert_eq!(loaded[0].password, None);
        assert!(profile("other").is_saved_in(&loaded));
    }

    #[test]
    fn test_malformed_file_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.json");
        fs::write(&path, "{not json").unwrap();
        assert!(load(&path).is_empty());

        assert!(matches!(append(&path, &profile("new")), Err(CacheError::Json(_))));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{not json");
    }

    #[test]
    fn test_entries_without_port_are_kept_on_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.json");
        fs::write(
            &path,
            r#"[{"name":"prod","db_type":"postgresql","server":"db.example"}]"#,
        )
        .unwrap();

        let saved = append(&path, &profile("new")).unwrap();
        assert_eq!(saved.len(), 2);
        let loaded = load(&path);
        assert_eq!(loaded[0].name, "prod");
        assert_eq!(loaded[0].port, "");
        assert_eq!(loaded[1].name, "new");
    }
}
