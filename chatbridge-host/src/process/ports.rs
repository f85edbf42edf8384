//! Best-effort reclamation of the server's ports
//!
//! A previous server instance (or anything else) still bound to the chat
//! ports would make the new server fail at bind time. Before starting the
//! server role, the owning processes are looked up with the platform's
//! socket listing tool and asked to terminate. Every failure here is
//! logged and ignored.

use std::io;
use std::process::Command;

use tracing::{debug, info, warn};

/// Finds and terminates processes holding a port
pub trait PortReclaimer: Send + Sync {
    /// Terminate the holders of `port`, returning the pids that were signalled
    ///
    /// Runs on the blocking pool; may shell out.
    fn reclaim(&self, port: u16) -> io::Result<Vec<u32>>;
}

/// Port reclaimer backed by `lsof` (unix) or `netstat -ano` (windows)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPortReclaimer;

impl PortReclaimer for SystemPortReclaimer {
    fn reclaim(&self, port: u16) -> io::Result<Vec<u32>> {
        let own_pid = std::process::id();
        let targets: Vec<u32> = find_port_holders(port)?
            .into_iter()
            .filter(|pid| *pid != own_pid && *pid != 0)
            .collect();

        for pid in &targets {
            if let Err(e) = terminate_pid(*pid) {
                debug!(port, pid, error = %e, "Failed to terminate port holder");
            }
        }
        Ok(targets)
    }
}

/// Reclaim every port in `ports`, logging the outcome of each
pub fn reclaim_ports(reclaimer: &dyn PortReclaimer, ports: &[u16]) {
    for port in ports {
        match reclaimer.reclaim(*port) {
            Ok(pids) if pids.is_empty() => debug!(port, "Port is free"),
            Ok(pids) => info!(port, ?pids, "Terminated processes holding port"),
            Err(e) => warn!(port, error = %e, "Port reclamation failed"),
        }
    }
}

#[cfg(unix)]
fn find_port_holders(port: u16) -> io::Result<Vec<u32>> {
    // lsof exits 1 when nothing matches, so only stdout matters
    let output = Command::new("lsof")
        .args([
            "-nP",
            &format!("-iTCP:{}", port),
            "-sTCP:LISTEN",
            &format!("-iUDP:{}", port),
            "-Fpn",
        ])
        .output()?;
    Ok(parse_lsof_pids(
        &String::from_utf8_lossy(&output.stdout),
        port,
    ))
}

#[cfg(windows)]
fn find_port_holders(port: u16) -> io::Result<Vec<u32>> {
    let output = Command::new("netstat").arg("-ano").output()?;
    Ok(parse_netstat_pids(
        &String::from_utf8_lossy(&output.stdout),
        port,
    ))
}

#[cfg(unix)]
fn terminate_pid(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

    // SAFETY: kill only reads its two integer arguments.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(windows)]
fn terminate_pid(pid: u32) -> io::Result<()> {
    let status = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .output()?
        .status;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("taskkill exited with {}", status),
        ))
    }
}

/// Parse `lsof -Fpn` output, keeping owners of sockets bound to `port`
///
/// Each process starts with a `p<pid>` record followed by one `n<name>`
/// record per file. Connected sockets are named `local->remote`; only the
/// local half is matched, so clients talking to `port` elsewhere survive.
pub fn parse_lsof_pids(output: &str, port: u16) -> Vec<u32> {
    let suffix = format!(":{}", port);
    let mut pids = Vec::new();
    let mut current: Option<u32> = None;

    for line in output.lines() {
        let line = line.trim();
        if let Some(pid) = line.strip_prefix('p') {
            current = pid.parse::<u32>().ok();
        } else if let Some(name) = line.strip_prefix('n') {
            let local = name.split("->").next().unwrap_or(name);
            let Some(pid) = current else {
                continue;
            };
            if local.ends_with(&suffix) && pid != 0 && !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }
    pids
}

/// Parse `netstat -ano` output, keeping owners of sockets bound to `port`
///
/// Columns are `Proto  Local  Foreign  [State]  PID`; UDP rows have no state.
pub fn parse_netstat_pids(output: &str, port: u16) -> Vec<u32> {
    let suffix = format!(":{}", port);
    let mut pids = Vec::new();

    for line in output.lines() {
        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.len() < 4 {
            continue;
        }
        let proto = columns[0].to_ascii_uppercase();
        if proto != "TCP" && proto != "UDP" {
            continue;
        }
        if !columns[1].ends_with(&suffix) {
            continue;
        }
        let Some(pid) = columns.last().and_then(|p| p.parse::<u32>().ok()) else {
            continue;
        };
        if pid != 0 && !pids.contains(&pid) {
            pids.push(pid);
        }
    }
    pids
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_parse_lsof_pids() {
        let output = "\
p123
f5
n*:6000
p456
f7
n[::1]:6000
f8
n*:6001
p123
f9
n127.0.0.1:6000
";
        assert_eq!(parse_lsof_pids(output, 6000), vec![123, 456]);
        assert_eq!(parse_lsof_pids(output, 6001), vec![456]);
        assert!(parse_lsof_pids(output, 600).is_empty());
        assert!(parse_lsof_pids("", 6000).is_empty());
    }

    #[test]
    fn test_parse_lsof_skips_remote_endpoints() {
        // pid 900 is only a client of port 6543
        let output = "\
p900
f31
n127.0.0.1:50025->127.0.0.1:6543
p901
f4
n127.0.0.1:6543
";
        assert_eq!(parse_lsof_pids(output, 6543), vec![901]);
        assert!(parse_lsof_pids(output, 50026).is_empty());
        assert_eq!(parse_lsof_pids(output, 50025), vec![900]);
    }

    #[test]
    fn test_parse_lsof_ignores_names_before_pid() {
        assert!(parse_lsof_pids("n*:6000\ngarbage\n", 6000).is_empty());
        assert!(parse_lsof_pids("p0\nn*:6000\n", 6000).is_empty());
    }

    #[test]
    fn test_parse_netstat_pids() {
        let output = "\
Active Connections

  Proto  Local Address          Foreign Address        State           PID
  TCP    0.0.0.0:135            0.0.0.0:0              LISTENING       912
  TCP    0.0.0.0:6000           0.0.0.0:0              LISTENING       4242
  TCP    127.0.0.1:60000        127.0.0.1:6000         ESTABLISHED     5151
  UDP    0.0.0.0:6001           *:*                                    4242
  UDP    [::]:6000              *:*                                    4343
";
        assert_eq!(parse_netstat_pids(output, 6000), vec![4242, 4343]);
        assert_eq!(parse_netstat_pids(output, 6001), vec![4242]);
        assert!(parse_netstat_pids(output, 7000).is_empty());
    }

    #[test]
    fn test_parse_netstat_ignores_pid_zero() {
        let output = "  TCP    0.0.0.0:6000   0.0.0.0:0   LISTENING   0\n";
        assert!(parse_netstat_pids(output, 6000).is_empty());
    }

    struct RecordingReclaimer {
        seen: Mutex<Vec<u16>>,
    }

    impl PortReclaimer for RecordingReclaimer {
        fn reclaim(&self, port: u16) -> io::Result<Vec<u32>> {
            self.seen.lock().unwrap().push(port);
            if port == 6001 {
                Err(io::Error::new(io::ErrorKind::NotFound, "lsof missing"))
            } else {
                Ok(vec![])
            }
        }
    }

    #[test]
    fn test_reclaim_ports_continues_past_failures() {
        let reclaimer = RecordingReclaimer {
            seen: Mutex::new(Vec::new()),
        };
        reclaim_ports(&reclaimer, &[6000, 6001, 6002]);
        assert_eq!(*reclaimer.seen.lock().unwrap(), vec![6000, 6001, 6002]);
    }
}
