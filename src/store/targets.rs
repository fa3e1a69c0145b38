//! JSON-file-backed ordered target store.
//!
//! The sequence is the single source of truth: pinned targets form a
//! contiguous prefix, unpinned targets the remaining suffix. Every mutation
//! happens under one lock and is written back to disk before it is
//! considered committed.

use chrono::Utc;
use regex::Regex;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use thiserror::Error;

use super::models::{Direction, Target};

/// Store error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: &'static str,
    },
    #[error("target not found")]
    NotFound,
    #[error("storage error: {0}")]
    Storage(String),
}

/// Thread-safe ordered target store.
pub struct Store {
    path: PathBuf,
    targets: Mutex<Vec<Target>>,
}

impl Store {
    /// Open the store at the given path, creating an empty list if the file
    /// does not exist yet. A corrupt or unreadable file is treated as an
    /// empty list so the service stays available.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::Storage(e.to_string()))?;
        }

        let targets = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<Target>>(&raw) {
                Ok(mut list) => {
                    for t in &mut list {
                        normalize(t);
                    }
                    list
                }
                Err(e) => {
                    tracing::warn!("Target file {} is corrupt ({}), starting empty", path.display(), e);
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                persist(&path, &[])?;
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("Cannot read target file {} ({}), starting empty", path.display(), e);
                Vec::new()
            }
        };

        Ok(Self {
            path,
            targets: Mutex::new(targets),
        })
    }

    /// Create a new target and append it to the end of the unpinned group
    /// (i.e. the end of the sequence).
    pub fn create(&self, name: &str, host: &str, port: Option<i64>) -> Result<Target, StoreError> {
        let port = validate_input(name, host, port)?;

        let target = Target {
            id: new_id(),
            name: name.trim().to_string(),
            host: host.trim().to_string(),
            port,
            pinned: false,
            created_at: Utc::now(),
            updated_at: None,
        };

        let mut targets = self.targets.lock().unwrap();
        targets.push(target.clone());

        if let Err(e) = persist(&self.path, &targets) {
            targets.pop();
            return Err(e);
        }
        Ok(target)
    }

    /// Replace a target's mutable fields in place, preserving its position.
    pub fn update(
        &self,
        id: &str,
        name: &str,
        host: &str,
        port: Option<i64>,
    ) -> Result<Target, StoreError> {
        let port = validate_input(name, host, port)?;

        let mut targets = self.targets.lock().unwrap();
        let idx = targets
            .iter()
            .position(|t| t.id == id)
            .ok_or(StoreError::NotFound)?;

        let previous = targets[idx].clone();
        let t = &mut targets[idx];
        t.name = name.trim().to_string();
        t.host = host.trim().to_string();
        t.port = port;
        t.updated_at = Some(Utc::now());
        let updated = t.clone();

        if let Err(e) = persist(&self.path, &targets) {
            targets[idx] = previous;
            return Err(e);
        }
        Ok(updated)
    }

    /// Set or toggle the pinned flag. `None` toggles the current state.
    ///
    /// Pinning moves the target to the end of the pinned group; unpinning
    /// moves it to the start of the unpinned group. If the target is already
    /// in the requested state its position is untouched but `updatedAt` is
    /// still refreshed.
    pub fn set_pinned(&self, id: &str, pinned: Option<bool>) -> Result<Target, StoreError> {
        let mut targets = self.targets.lock().unwrap();
        let idx = targets
            .iter()
            .position(|t| t.id == id)
            .ok_or(StoreError::NotFound)?;

        let snapshot = targets.clone();
        let desired = pinned.unwrap_or(!targets[idx].pinned);
        let changed = targets[idx].pinned != desired;
        targets[idx].updated_at = Some(Utc::now());

        let updated = if changed {
            let mut item = targets.remove(idx);
            item.pinned = desired;
            let insert_at = if desired {
                // End of the pinned group: just before the first unpinned entry.
                targets
                    .iter()
                    .position(|t| !t.pinned)
                    .unwrap_or(targets.len())
            } else {
                // Start of the unpinned group: just after the last pinned entry.
                targets
                    .iter()
                    .rposition(|t| t.pinned)
                    .map(|i| i + 1)
                    .unwrap_or(0)
            };
            targets.insert(insert_at, item);
            targets[insert_at].clone()
        } else {
            targets[idx].clone()
        };

        if let Err(e) = persist(&self.path, &targets) {
            *targets = snapshot;
            return Err(e);
        }
        Ok(updated)
    }

    /// Swap a target with its nearest neighbor in the same pin group.
    ///
    /// Returns whether a swap happened. A target already at its group
    /// boundary stays put and reports `false`; that is not an error.
    pub fn move_target(&self, id: &str, direction: Direction) -> Result<bool, StoreError> {
        let mut targets = self.targets.lock().unwrap();
        let idx = targets
            .iter()
            .position(|t| t.id == id)
            .ok_or(StoreError::NotFound)?;

        let pinned = targets[idx].pinned;
        let neighbor = match direction {
            Direction::Up => targets[..idx].iter().rposition(|t| t.pinned == pinned),
            Direction::Down => targets[idx + 1..]
                .iter()
                .position(|t| t.pinned == pinned)
                .map(|i| idx + 1 + i),
        };

        let Some(other) = neighbor else {
            return Ok(false);
        };

        targets.swap(idx, other);
        if let Err(e) = persist(&self.path, &targets) {
            targets.swap(idx, other);
            return Err(e);
        }
        Ok(true)
    }

    /// Get the full ordered sequence.
    pub fn list(&self) -> Vec<Target> {
        self.targets.lock().unwrap().clone()
    }
}

/// Write the full sequence to disk.
fn persist(path: &Path, targets: &[Target]) -> Result<(), StoreError> {
    let json =
        serde_json::to_string_pretty(targets).map_err(|e| StoreError::Storage(e.to_string()))?;
    fs::write(path, json).map_err(|e| StoreError::Storage(e.to_string()))
}

/// Repair targets loaded from disk: regenerate missing ids. Out-of-range
/// ports are already dropped to `None` during deserialization.
fn normalize(target: &mut Target) {
    if target.id.is_empty() {
        target.id = new_id();
    }
}

/// Generate an opaque target id: unix millis plus a random suffix.
fn new_id() -> String {
    format!("{}-{:08x}", Utc::now().timestamp_millis(), rand::random::<u32>())
}

fn validate_input(name: &str, host: &str, port: Option<i64>) -> Result<Option<u16>, StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::Validation {
            field: "name",
            message: "display name is required",
        });
    }

    if !is_valid_host(host.trim()) {
        return Err(StoreError::Validation {
            field: "host",
            message: "must be an IP address or hostname",
        });
    }

    match port {
        None => Ok(None),
        Some(p) if (1..=65535).contains(&p) => Ok(Some(p as u16)),
        Some(_) => Err(StoreError::Validation {
            field: "port",
            message: "must be an integer between 1 and 65535",
        }),
    }
}

/// Accept IPv4/IPv6 literals and common hostname/FQDN forms: labels of
/// 1-63 alnum/hyphen chars, no leading/trailing hyphen, total length <= 253.
fn is_valid_host(value: &str) -> bool {
    if value.parse::<IpAddr>().is_ok() {
        return true;
    }

    static HOSTNAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = HOSTNAME_RE.get_or_init(|| {
        Regex::new(
            r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)*[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$",
        )
        .unwrap()
    });

    !value.is_empty() && value.len() <= 253 && re.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("targets.json")).unwrap();
        (dir, store)
    }

    fn assert_pin_contiguity(targets: &[Target]) {
        let first_unpinned = targets.iter().position(|t| !t.pinned);
        if let Some(boundary) = first_unpinned {
            assert!(
                targets[boundary..].iter().all(|t| !t.pinned),
                "pinned entry found after unpinned entry"
            );
        }
    }

    #[test]
    fn test_create_appends_unpinned() {
        let (_dir, store) = test_store();

        let a = store.create("A", "192.168.1.10", None).unwrap();
        let b = store.create("B", "example.com", Some(443)).unwrap();

        let targets = store.list();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].id, a.id);
        assert_eq!(targets[1].id, b.id);
        assert!(!targets[1].pinned);
        assert_eq!(targets[1].port, Some(443));
        assert!(targets[1].updated_at.is_none());
    }

    #[test]
    fn test_create_rejects_empty_name() {
        let (_dir, store) = test_store();

        let err = store.create("", "example.com", None).unwrap_err();
        assert!(matches!(err, StoreError::Validation { field: "name", .. }));
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_create_rejects_bad_host() {
        let (_dir, store) = test_store();

        let err = store.create("X", "not a host!!", None).unwrap_err();
        assert!(matches!(err, StoreError::Validation { field: "host", .. }));
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_create_rejects_bad_port() {
        let (_dir, store) = test_store();

        for bad in [0, -1, 65536, 700000] {
            let err = store.create("X", "example.com", Some(bad)).unwrap_err();
            assert!(matches!(err, StoreError::Validation { field: "port", .. }));
        }
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_host_syntax() {
        for ok in ["192.168.1.10", "::1", "example.com", "soari.mydns.jp", "a", "a-b.c0"] {
            assert!(is_valid_host(ok), "{ok} should be valid");
        }
        for bad in ["", "not a host!!", "-bad.example", "bad-.example", "a..b", "a_b.example"] {
            assert!(!is_valid_host(bad), "{bad} should be invalid");
        }
        // One label over 63 chars.
        let long_label = format!("{}.example.com", "x".repeat(64));
        assert!(!is_valid_host(&long_label));
        // Total length over 253.
        let long_name = ["abcdefgh"; 32].join(".");
        assert!(!is_valid_host(&long_name));
    }

    #[test]
    fn test_update_preserves_position() {
        let (_dir, store) = test_store();
        let _a = store.create("A", "10.0.0.1", None).unwrap();
        let b = store.create("B", "10.0.0.2", None).unwrap();
        let _c = store.create("C", "10.0.0.3", None).unwrap();

        let updated = store.update(&b.id, "B2", "10.0.0.20", Some(8080)).unwrap();
        assert_eq!(updated.name, "B2");
        assert!(updated.updated_at.is_some());

        let targets = store.list();
        assert_eq!(targets[1].id, b.id);
        assert_eq!(targets[1].host, "10.0.0.20");
        assert_eq!(targets[1].port, Some(8080));
    }

    #[test]
    fn test_update_unknown_id() {
        let (_dir, store) = test_store();
        let err = store.update("missing", "X", "example.com", None).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn test_update_validation_leaves_sequence_unchanged() {
        let (_dir, store) = test_store();
        let a = store.create("A", "10.0.0.1", None).unwrap();

        let err = store.update(&a.id, "A", "bad host", None).unwrap_err();
        assert!(matches!(err, StoreError::Validation { field: "host", .. }));

        let targets = store.list();
        assert_eq!(targets[0].host, "10.0.0.1");
        assert!(targets[0].updated_at.is_none());
    }

    #[test]
    fn test_pin_moves_to_end_of_pinned_group() {
        let (_dir, store) = test_store();
        let a = store.create("A", "10.0.0.1", None).unwrap();
        let b = store.create("B", "10.0.0.2", None).unwrap();

        // Pin B first: sequence becomes [B, A].
        store.set_pinned(&b.id, Some(true)).unwrap();
        // Then pin A: it joins the end of the pinned group, B stays ahead.
        store.set_pinned(&a.id, Some(true)).unwrap();

        let targets = store.list();
        assert_eq!(targets[0].id, b.id);
        assert_eq!(targets[1].id, a.id);
        assert!(targets[0].pinned && targets[1].pinned);
        assert_pin_contiguity(&targets);
    }

    #[test]
    fn test_unpin_moves_to_start_of_unpinned_group() {
        let (_dir, store) = test_store();
        let a = store.create("A", "10.0.0.1", None).unwrap();
        let b = store.create("B", "10.0.0.2", None).unwrap();
        let c = store.create("C", "10.0.0.3", None).unwrap();

        store.set_pinned(&a.id, Some(true)).unwrap();
        store.set_pinned(&b.id, Some(true)).unwrap();
        // [A*, B*, C] -> unpin A -> [B*, A, C]
        store.set_pinned(&a.id, Some(false)).unwrap();

        let ids: Vec<_> = store.list().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec![b.id, a.id, c.id]);
        assert_pin_contiguity(&store.list());
    }

    #[test]
    fn test_set_pinned_idempotent() {
        let (_dir, store) = test_store();
        let _a = store.create("A", "10.0.0.1", None).unwrap();
        let b = store.create("B", "10.0.0.2", None).unwrap();

        store.set_pinned(&b.id, Some(true)).unwrap();
        let first: Vec<_> = store.list().iter().map(|t| t.id.clone()).collect();
        let result = store.set_pinned(&b.id, Some(true)).unwrap();
        let second: Vec<_> = store.list().iter().map(|t| t.id.clone()).collect();

        assert_eq!(first, second);
        assert!(result.pinned);
        assert!(result.updated_at.is_some());
    }

    #[test]
    fn test_set_pinned_toggle() {
        let (_dir, store) = test_store();
        let a = store.create("A", "10.0.0.1", None).unwrap();

        assert!(store.set_pinned(&a.id, None).unwrap().pinned);
        assert!(!store.set_pinned(&a.id, None).unwrap().pinned);
    }

    #[test]
    fn test_move_swaps_within_group() {
        let (_dir, store) = test_store();
        let a = store.create("A", "10.0.0.1", None).unwrap();
        let b = store.create("B", "10.0.0.2", None).unwrap();
        let c = store.create("C", "10.0.0.3", None).unwrap();

        assert!(store.move_target(&c.id, Direction::Up).unwrap());
        let ids: Vec<_> = store.list().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec![a.id, c.id, b.id]);
    }

    #[test]
    fn test_move_boundary_is_noop() {
        let (_dir, store) = test_store();
        let a = store.create("A", "10.0.0.1", None).unwrap();
        let b = store.create("B", "10.0.0.2", None).unwrap();

        assert!(!store.move_target(&a.id, Direction::Up).unwrap());
        assert!(!store.move_target(&b.id, Direction::Down).unwrap());

        let ids: Vec<_> = store.list().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[test]
    fn test_move_never_crosses_pin_boundary() {
        let (_dir, store) = test_store();
        let a = store.create("A", "10.0.0.1", None).unwrap();
        let b = store.create("B", "10.0.0.2", None).unwrap();
        let c = store.create("C", "10.0.0.3", None).unwrap();

        store.set_pinned(&a.id, Some(true)).unwrap();
        store.set_pinned(&b.id, Some(true)).unwrap();
        // [A*, B*, C]: B is last in the pinned group, C first in the unpinned.
        assert!(!store.move_target(&b.id, Direction::Down).unwrap());
        assert!(!store.move_target(&c.id, Direction::Up).unwrap());

        let ids: Vec<_> = store.list().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
        assert_pin_contiguity(&store.list());
    }

    #[test]
    fn test_move_unknown_id() {
        let (_dir, store) = test_store();
        let err = store.move_target("missing", Direction::Up).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("targets.json");

        let ids: Vec<String> = {
            let store = Store::open(&path).unwrap();
            let a = store.create("A", "10.0.0.1", Some(22)).unwrap();
            let b = store.create("B", "example.com", None).unwrap();
            store.set_pinned(&b.id, Some(true)).unwrap();
            vec![b.id, a.id]
        };

        let reopened = Store::open(&path).unwrap();
        let loaded: Vec<_> = reopened.list().iter().map(|t| t.id.clone()).collect();
        assert_eq!(loaded, ids);
        assert!(reopened.list()[0].pinned);
        assert_eq!(reopened.list()[1].port, Some(22));
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("targets.json");
        fs::write(&path, "{ not json").unwrap();

        let store = Store::open(&path).unwrap();
        assert!(store.list().is_empty());

        // The store must still accept writes afterwards.
        store.create("A", "10.0.0.1", None).unwrap();
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_load_normalizes_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("targets.json");
        fs::write(
            &path,
            r#"[{"name":"old","host":"10.0.0.9","port":0,"pinned":true}]"#,
        )
        .unwrap();

        let store = Store::open(&path).unwrap();
        let targets = store.list();
        assert_eq!(targets.len(), 1);
        assert!(!targets[0].id.is_empty());
        assert_eq!(targets[0].port, None);
        assert!(targets[0].pinned);
    }

    #[test]
    fn test_load_keeps_list_when_port_out_of_range() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("targets.json");
        fs::write(
            &path,
            r#"[
                {"id":"a","name":"A","host":"10.0.0.1","port":22},
                {"id":"b","name":"B","host":"10.0.0.2","port":99999},
                {"id":"c","name":"C","host":"10.0.0.3","port":"8080"}
            ]"#,
        )
        .unwrap();

        // One bad port must not discard the whole list.
        let store = Store::open(&path).unwrap();
        let targets = store.list();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].port, Some(22));
        assert_eq!(targets[1].port, None);
        assert_eq!(targets[2].port, Some(8080));
    }
}
