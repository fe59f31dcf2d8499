//! # Lock Tests

use super::*;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_lock_acquire_creates_file() {
    let dir = TempDir::new().unwrap();

    let lock = DatabaseLock::acquire(dir.path()).expect("Should acquire lock");
    assert!(lock.path().exists());
    assert_eq!(lock.pid(), std::process::id());
}

#[test]
fn test_lock_contains_pid() {
    let dir = TempDir::new().unwrap();

    let lock = DatabaseLock::acquire(dir.path()).expect("Should acquire lock");
    let content = fs::read_to_string(lock.path()).unwrap();
    let stored_pid: u32 = content.trim().parse().unwrap();
    assert_eq!(stored_pid, std::process::id());
}

#[test]
fn test_double_lock_fails_and_keeps_holder_pid() {
    let dir = TempDir::new().unwrap();

    let lock1 = DatabaseLock::acquire(dir.path()).expect("First lock should succeed");
    let result = DatabaseLock::acquire_with_timeout(dir.path(), Duration::from_millis(100));

    match result {
        Err(LockError::AlreadyLocked { pid, .. }) => assert_eq!(pid, Some(lock1.pid())),
        _ => panic!("Expected AlreadyLocked"),
    }
}

#[test]
fn test_lock_released_on_drop() {
    let dir = TempDir::new().unwrap();

    {
        let _lock = DatabaseLock::acquire(dir.path()).expect("Should acquire");
    }

    let lock2 = DatabaseLock::acquire(dir.path());
    assert!(lock2.is_ok(), "Lock should be released after drop");
}

#[test]
fn test_stale_lock_from_dead_process_is_taken_over() {
    let dir = TempDir::new().unwrap();
    // PID far above any default pid_max.
    fs::write(dir.path().join("LOCK"), "4294967\n").unwrap();

    let lock = DatabaseLock::acquire(dir.path()).expect("Stale lock should be ignored");
    assert_eq!(lock.pid(), std::process::id());
}

#[test]
fn test_lock_error_converts_to_database_locked() {
    let err: crate::domain::errors::StorageError = LockError::AlreadyLocked {
        pid: Some(42),
        path: "/data/LOCK".into(),
    }
    .into();
    let msg = err.to_string();
    assert!(msg.contains("Database locked"));
    assert!(msg.contains("42"));
}
