//! Running markers: one exclusive lock record per active task worker.
//!
//! Layout: `{state_dir}/markers/task-{id}.lock`, JSON
//! `{taskId, ownerPid, workerPid, host, acquiredAt}`. A marker left behind on
//! this host by an owner and worker that are both gone is stale and may be
//! reclaimed.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::paths::sanitize_title;
use crate::store::now_millis;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerRecord {
    pub task_id: String,
    pub owner_pid: u32,
    #[serde(default)]
    pub worker_pid: Option<u32>,
    pub host: String,
    pub acquired_at: i64,
}

impl MarkerRecord {
    fn for_this_process(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            owner_pid: std::process::id(),
            worker_pid: None,
            host: hostname(),
            acquired_at: now_millis(),
        }
    }

    /// Recorded on this host and neither the owner nor the worker is alive.
    pub fn is_stale(&self) -> bool {
        if self.host != hostname() {
            return false;
        }
        !pid_alive(self.owner_pid) && !self.worker_pid.is_some_and(pid_alive)
    }
}

/// Directory of running markers.
#[derive(Debug, Clone)]
pub struct MarkerDir {
    dir: PathBuf,
}

impl MarkerDir {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("markers"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("task-{}.lock", sanitize_title(task_id)))
    }

    /// Creates the marker for `task_id`. Returns `Ok(false)` when a live
    /// marker already exists; a stale one is removed and acquisition retried once.
    pub fn acquire(&self, task_id: &str) -> io::Result<bool> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(task_id);
        for _ in 0..2 {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut f) => {
                    let record = MarkerRecord::for_this_process(task_id);
                    let body = serde_json::to_vec(&record).map_err(io::Error::other)?;
                    f.write_all(&body)?;
                    f.sync_all()?;
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => match self.read(task_id) {
                    Some(existing) if !existing.is_stale() => return Ok(false),
                    _ => {
                        tracing::info!(task_id, "reclaiming stale running marker");
                        remove_if_present(&path)?;
                    }
                },
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    /// Records the spawned worker's pid in an existing marker.
    pub fn set_worker_pid(&self, task_id: &str, pid: u32) -> io::Result<()> {
        let path = self.path_for(task_id);
        let mut record = self
            .read(task_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "marker missing"))?;
        record.worker_pid = Some(pid);
        let tmp = path.with_extension("lock.tmp");
        fs::write(&tmp, serde_json::to_vec(&record).map_err(io::Error::other)?)?;
        fs::rename(&tmp, &path)
    }

    /// Removes the marker. Missing markers are not an error.
    pub fn release(&self, task_id: &str) -> io::Result<()> {
        remove_if_present(&self.path_for(task_id))
    }

    /// `None` when missing or unreadable.
    pub fn read(&self, task_id: &str) -> Option<MarkerRecord> {
        read_record(&self.path_for(task_id))
    }

    /// A marker exists and is not stale.
    pub fn is_held(&self, task_id: &str) -> bool {
        match self.read(task_id) {
            Some(r) => !r.is_stale(),
            None => self.path_for(task_id).exists(),
        }
    }

    /// Removes stale and unreadable markers; returns the task ids of the removed ones.
    pub fn reclaim_stale(&self) -> io::Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut removed = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                continue;
            }
            let (stale, id) = match read_record(&path) {
                Some(r) => (r.is_stale(), r.task_id),
                None => (true, marker_id_from_path(&path)),
            };
            if stale {
                remove_if_present(&path)?;
                removed.push(id);
            }
        }
        Ok(removed)
    }
}

fn read_record(path: &Path) -> Option<MarkerRecord> {
    let data = fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}

fn marker_id_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_prefix("task-"))
        .unwrap_or_default()
        .to_string()
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    let r = unsafe { libc::kill(pid as libc::pid_t, 0) };
    r == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(unix)]
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    let r = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if r != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(not(unix))]
pub fn hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
}
