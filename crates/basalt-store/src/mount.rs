//! Advisory locking of disk mount directories.
//!
//! Each disk manager holds an exclusive lock on its mount while running so
//! two node processes cannot manage the same disk. The lock file records the
//! owner PID; a stale lock left by a dead process is taken over.

use crate::error::StoreError;
use fs4::fs_std::FileExt;
use log::warn;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use sysinfo::{ProcessesToUpdate, System};

const LOCK_FILE_NAME: &str = ".basalt.lock";

/// An exclusive advisory lock on one mount directory. Released (and the lock
/// file removed) on drop.
#[derive(Debug)]
pub struct MountLock {
    lock_path: PathBuf,
    _file: File,
}

impl MountLock {
    /// Acquire the mount lock, creating the mount directory if needed.
    pub fn acquire(mount_path: &Path) -> Result<Self, StoreError> {
        if !mount_path.exists() {
            std::fs::create_dir_all(mount_path)
                .map_err(|e| StoreError::from_io_error(e, "Failed to create mount directory"))?;
        }

        let lock_path = mount_path.join(LOCK_FILE_NAME);
        let file = open_lock_file(&lock_path)?;

        match file.try_lock_exclusive() {
            Ok(true) => {
                write_lock_metadata(&file)?;
                Ok(Self {
                    lock_path,
                    _file: file,
                })
            }
            Ok(false) | Err(_) => take_over_if_stale(mount_path, &lock_path),
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for MountLock {
    fn drop(&mut self) {
        if self.lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.lock_path) {
                warn!("Failed to remove lock file {:?}: {e}", self.lock_path);
            }
        }
    }
}

fn open_lock_file(lock_path: &Path) -> Result<File, StoreError> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|e| StoreError::from_io_error(e, "Failed to open mount lock file"))
}

fn write_lock_metadata(file: &File) -> Result<(), StoreError> {
    let pid = std::process::id();
    let timestamp = chrono::Utc::now().to_rfc3339();
    let metadata = format!("PID: {pid}\nTimestamp: {timestamp}\n");

    let _ = file.set_len(0);
    (&*file)
        .write_all(metadata.as_bytes())
        .map_err(|e| StoreError::from_io_error(e, "Failed to write mount lock metadata"))
}

fn take_over_if_stale(mount_path: &Path, lock_path: &Path) -> Result<MountLock, StoreError> {
    let owner_pid = read_owner_pid(lock_path);

    match owner_pid {
        Some(pid) if is_process_alive(pid) => Err(StoreError::DirectoryLocked {
            context: format!(
                "Mount {} is already managed by another node process",
                mount_path.display()
            ),
            pid: Some(pid),
        }),
        Some(_) | None => {
            if std::fs::remove_file(lock_path).is_ok() {
                MountLock::acquire(mount_path)
            } else {
                Err(StoreError::DirectoryLocked {
                    context: format!(
                        "Mount {} is already managed by another node process",
                        mount_path.display()
                    ),
                    pid: None,
                })
            }
        }
    }
}

fn read_owner_pid(lock_path: &Path) -> Option<u32> {
    std::fs::read_to_string(lock_path).ok().and_then(|content| {
        content
            .lines()
            .find(|line| line.starts_with("PID:"))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|pid| pid.parse::<u32>().ok())
    })
}

fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, false);
    system
        .processes()
        .get(&sysinfo::Pid::from(pid as usize))
        .is_some()
}
