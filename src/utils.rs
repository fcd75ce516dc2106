use std::{collections::HashMap, fs, path::Path};

use nix::{
    errno::Errno,
    sys::signal::{Signal, kill, killpg},
    unistd::{Gid, Pid, Uid, chown},
};

/// OS-level liveness test for a recorded pid.
pub fn pid_alive(pid: i32) -> bool {
    // kill(0) / kill(-n) would address process groups.
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether `pid` is running with `dir` as its working directory. Servers are
/// launched from their instance root, so a recycled pid fails this check.
pub fn pid_runs_in(pid: i32, dir: &Path) -> bool {
    let Ok(cwd) = fs::read_link(format!("/proc/{pid}/cwd")) else {
        return false;
    };
    let dir = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    cwd == dir
}

/// All descendants of `root` (not including `root`), parents before children.
pub fn process_tree(root: i32) -> Vec<i32> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };

    let mut children: HashMap<i32, Vec<i32>> = HashMap::new();
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) else {
            continue;
        };
        if let Some(ppid) = read_ppid(pid) {
            children.entry(ppid).or_default().push(pid);
        }
    }

    let mut out = Vec::new();
    let mut queue = vec![root];
    while let Some(next) = queue.pop() {
        if let Some(kids) = children.get(&next) {
            for &kid in kids {
                if kid != root && !out.contains(&kid) {
                    out.push(kid);
                    queue.push(kid);
                }
            }
        }
    }
    out
}

fn read_ppid(pid: i32) -> Option<i32> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // comm may contain spaces and parentheses; fields resume after the last ')'.
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(1)?.parse().ok()
}

/// Sends `signal` to the process group led by `pid` and every descendant.
pub fn signal_tree(pid: i32, signal: Signal) {
    if pid <= 0 {
        return;
    }
    let descendants = process_tree(pid);
    let _ = killpg(Pid::from_raw(pid), signal);
    let _ = kill(Pid::from_raw(pid), signal);
    for child in descendants {
        let _ = kill(Pid::from_raw(child), signal);
    }
}

/// Recursively chowns `path` to the instance owner. Failures are reported
/// per entry and do not stop the walk.
pub fn fix_ownership(path: &Path, uid: u32, gid: u32) -> Vec<String> {
    let mut failures = Vec::new();
    let (uid, gid) = (Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)));
    let mut stack = vec![path.to_path_buf()];

    while let Some(next) = stack.pop() {
        if let Err(e) = chown(&next, uid, gid) {
            failures.push(format!("{}: {e}", next.display()));
        }
        let is_dir = fs::symlink_metadata(&next)
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if is_dir && let Ok(entries) = fs::read_dir(&next) {
            stack.extend(entries.flatten().map(|e| e.path()));
        }
    }

    failures
}

/// Best-effort detection of container or isolated-network execution.
pub fn is_containerized() -> bool {
    if Path::new("/.dockerenv").exists() || Path::new("/run/.containerenv").exists() {
        return true;
    }
    if std::env::var_os("container").is_some() {
        return true;
    }
    fs::read_to_string("/proc/1/cgroup")
        .map(|cgroup| {
            ["docker", "kubepods", "containerd", "lxc", "podman"]
                .iter()
                .any(|marker| cgroup.contains(marker))
        })
        .unwrap_or(false)
}
