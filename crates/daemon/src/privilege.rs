// crates/daemon/src/privilege.rs
#![allow(unsafe_code)]

use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

use nix::unistd::{Gid, Uid, chdir, chown, chroot, getegid, geteuid, getgid, getuid};

use crate::error::{JailError, PrivilegeError};
use crate::signals::BlockedSignals;

/// Uid and gid of `nobody`, used when the daemon would otherwise stay root.
pub const NOBODY: u32 = 65534;

/// Identity the daemon runs as after the privilege drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: Uid,
    pub gid: Gid,
}

impl Credentials {
    /// The real ids of the process, i.e. the user who started it.
    pub fn real() -> Self {
        Self {
            uid: getuid(),
            gid: getgid(),
        }
    }

    /// Apply configured overrides to the real ids; a root identity falls
    /// back to `nobody`.
    pub fn resolve(uid: Option<u32>, gid: Option<u32>) -> Self {
        let real = Self::real();
        let uid = match uid {
            Some(uid) => Uid::from_raw(uid),
            None if real.uid.is_root() => Uid::from_raw(NOBODY),
            None => real.uid,
        };
        let gid = match gid {
            Some(gid) => Gid::from_raw(gid),
            None if real.gid.as_raw() == 0 => Gid::from_raw(NOBODY),
            None => real.gid,
        };
        Self { uid, gid }
    }
}

/// Create the jail root with `mode` unless it already exists.
pub fn ensure_jail_root(path: &Path, mode: u32) -> Result<(), JailError> {
    match DirBuilder::new().mode(mode).create(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            match fs::metadata(path) {
                Ok(meta) if meta.is_dir() => Ok(()),
                Ok(_) => Err(JailError::NotADirectory(path.to_path_buf())),
                Err(source) => Err(JailError::Create {
                    path: path.to_path_buf(),
                    source,
                }),
            }
        }
        Err(source) => Err(JailError::Create {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Make `path` the root directory of the process and move into it.
pub fn enter_jail(path: &Path, mode: u32) -> Result<(), JailError> {
    ensure_jail_root(path, mode)?;
    chroot(path).map_err(|source| JailError::Chroot {
        path: path.to_path_buf(),
        source,
    })?;
    chdir("/").map_err(JailError::Chdir)?;
    Ok(())
}

/// Give the directories holding `paths` to `creds`, so the dropped
/// process can still unlink what it created there.
pub fn hand_over_parents(paths: &[&Path], creds: Credentials) -> Result<(), PrivilegeError> {
    if creds.uid.is_root() {
        return Err(PrivilegeError::StillRoot);
    }
    let mut dirs: Vec<&Path> = paths
        .iter()
        .map(|path| match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        })
        .collect();
    dirs.dedup();
    for dir in dirs {
        chown(dir, Some(creds.uid), Some(creds.gid)).map_err(|source| PrivilegeError::HandOver {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(target_os = "linux")]
const SECBIT_NOROOT: libc::c_ulong = 1 << 0;
#[cfg(target_os = "linux")]
const SECBIT_NOROOT_LOCKED: libc::c_ulong = 1 << 1;

/// Stop uid 0 from implying capabilities, for good.
#[cfg(target_os = "linux")]
pub fn lock_securebits() -> Result<(), PrivilegeError> {
    // SAFETY: PR_SET_SECUREBITS takes an integer argument only.
    let rc = unsafe {
        libc::prctl(
            libc::PR_SET_SECUREBITS,
            SECBIT_NOROOT | SECBIT_NOROOT_LOCKED,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
        )
    };
    if rc == -1 {
        return Err(PrivilegeError::Securebits(nix::Error::last()));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn lock_securebits() -> Result<(), PrivilegeError> {
    Err(PrivilegeError::SecurebitsUnsupported)
}

/// Switch every uid and gid of the process to `creds` and check that the
/// old identity cannot be regained.
pub fn drop_privileges(creds: Credentials) -> Result<(), PrivilegeError> {
    if creds.uid.is_root() {
        return Err(PrivilegeError::StillRoot);
    }
    let transition = |call: &'static str| move |source| PrivilegeError::Transition { call, source };
    {
        let _blocked = BlockedSignals::new().map_err(transition("sigprocmask"))?;
        if geteuid().is_root() {
            set_supplementary_groups(creds.gid).map_err(transition("setgroups"))?;
        }
        set_all_gids(creds.gid).map_err(transition("setgid"))?;
        set_all_uids(creds.uid).map_err(transition("setuid"))?;
    }
    verify(creds)
}

#[cfg(not(target_os = "macos"))]
fn set_supplementary_groups(gid: Gid) -> nix::Result<()> {
    nix::unistd::setgroups(&[gid])
}

#[cfg(target_os = "macos")]
fn set_supplementary_groups(gid: Gid) -> nix::Result<()> {
    let raw = [gid.as_raw()];
    // SAFETY: `raw` outlives the call.
    let rc = unsafe { libc::setgroups(1, raw.as_ptr()) };
    nix::Error::result(rc).map(drop)
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "openbsd"))]
fn set_all_gids(gid: Gid) -> nix::Result<()> {
    nix::unistd::setresgid(gid, gid, gid)
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "openbsd"))]
fn set_all_uids(uid: Uid) -> nix::Result<()> {
    nix::unistd::setresuid(uid, uid, uid)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "openbsd")))]
fn set_all_gids(gid: Gid) -> nix::Result<()> {
    nix::unistd::setegid(gid)?;
    nix::unistd::setgid(gid)
}

// setuid() while still privileged also replaces the saved uid, so it has to
// come before seteuid().
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "openbsd")))]
fn set_all_uids(uid: Uid) -> nix::Result<()> {
    nix::unistd::setuid(uid)?;
    nix::unistd::seteuid(uid)
}

fn verify(creds: Credentials) -> Result<(), PrivilegeError> {
    let (uid, euid, gid, egid) = (getuid(), geteuid(), getgid(), getegid());
    if uid != creds.uid || euid != creds.uid {
        return Err(PrivilegeError::Verify(format!(
            "uid {uid}/{euid}, expected {}",
            creds.uid
        )));
    }
    if gid != creds.gid || egid != creds.gid {
        return Err(PrivilegeError::Verify(format!(
            "gid {gid}/{egid}, expected {}",
            creds.gid
        )));
    }
    if nix::unistd::setuid(Uid::from_raw(0)).is_ok() {
        return Err(PrivilegeError::Verify("root could be regained".into()));
    }
    Ok(())
}
