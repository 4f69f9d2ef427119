//! Give up privileges once the raw socket is open.
//!
//! A prober started as root switches to the unprivileged user and group. One
//! started as an ordinary user holding `CAP_NET_RAW` cannot change identity, so it
//! clears its capability sets instead.

use crate::error::{Error, Result};
use nix::unistd::{self, Gid, Uid};
use tracing::{debug, info, instrument};

/// How the privileges of the current process are given up.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Demotion {
    /// Already running as the target identity.
    Unchanged,
    /// Root switches to the target user and group.
    SwitchIdentity,
    /// A non-root process drops whatever capabilities it was granted.
    ClearCapabilities,
}

fn demotion(euid: Uid, egid: Gid, uid: Uid, gid: Gid) -> Demotion {
    if !euid.is_root() {
        Demotion::ClearCapabilities
    } else if euid == uid && egid == gid {
        Demotion::Unchanged
    } else {
        Demotion::SwitchIdentity
    }
}

/// Permanently give up the privileges used to open the raw socket.
///
/// As root, supplementary groups are cleared first, then the group and finally
/// the user are changed to `uid`/`gid`. Otherwise every capability is cleared.
#[instrument(level = "debug")]
pub fn drop_to(uid: u32, gid: u32) -> Result<()> {
    let (uid, gid) = (Uid::from_raw(uid), Gid::from_raw(gid));
    match demotion(Uid::effective(), Gid::effective(), uid, gid) {
        Demotion::Unchanged => {
            debug!("already running as the target identity");
            Ok(())
        }
        Demotion::SwitchIdentity => switch_identity(uid, gid),
        Demotion::ClearCapabilities => clear_capabilities(),
    }
}

fn switch_identity(uid: Uid, gid: Gid) -> Result<()> {
    clear_groups()?;
    unistd::setgid(gid).map_err(|errno| Error::Privilege(errno.into(), "setgid"))?;
    unistd::setuid(uid).map_err(|errno| Error::Privilege(errno.into(), "setuid"))?;
    if !uid.is_root() && unistd::setuid(Uid::from_raw(0)).is_ok() {
        return Err(Error::Privilege(
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            "root could be regained",
        ));
    }

    info!(uid = uid.as_raw(), gid = gid.as_raw(), "dropped privileges");
    Ok(())
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
fn clear_groups() -> Result<()> {
    unistd::setgroups(&[]).map_err(|errno| Error::Privilege(errno.into(), "setgroups"))
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn clear_groups() -> Result<()> {
    if unsafe { libc::setgroups(0, std::ptr::null()) } < 0 {
        return Err(Error::Privilege(
            std::io::Error::last_os_error(),
            "setgroups",
        ));
    }
    Ok(())
}

/// Clear the effective and permitted capability sets of the calling thread.
///
/// Threads spawned afterwards inherit the empty sets.
#[cfg(target_os = "linux")]
fn clear_capabilities() -> Result<()> {
    caps::clear(None, caps::CapSet::Effective)?;
    caps::clear(None, caps::CapSet::Permitted)?;
    info!("cleared capabilities");
    Ok(())
}

/// Capabilities are Linux only; a non-root process elsewhere holds nothing to drop.
#[cfg(not(target_os = "linux"))]
fn clear_capabilities() -> Result<()> {
    debug!("not running as root, nothing to drop");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const ROOT: u32 = 0;
    const USER: u32 = 1000;
    const NOBODY: u32 = 65534;

    #[test_case(ROOT, ROOT, NOBODY, NOBODY, Demotion::SwitchIdentity; "root to nobody")]
    #[test_case(ROOT, NOBODY, NOBODY, NOBODY, Demotion::SwitchIdentity; "root user with nobody group")]
    #[test_case(ROOT, ROOT, ROOT, ROOT, Demotion::Unchanged; "root asked to stay root")]
    #[test_case(USER, USER, NOBODY, NOBODY, Demotion::ClearCapabilities; "user with capabilities")]
    #[test_case(NOBODY, NOBODY, NOBODY, NOBODY, Demotion::ClearCapabilities; "already nobody")]
    fn demotion_for_identity(euid: u32, egid: u32, uid: u32, gid: u32, expected: Demotion) {
        assert_eq!(
            demotion(
                Uid::from_raw(euid),
                Gid::from_raw(egid),
                Uid::from_raw(uid),
                Gid::from_raw(gid)
            ),
            expected
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn clearing_capabilities_empties_the_thread_sets() {
        // capability sets are per thread, keep the change away from the test harness
        let sets = std::thread::spawn(|| {
            clear_capabilities()?;
            Ok::<_, Error>((
                caps::read(None, caps::CapSet::Effective)?,
                caps::read(None, caps::CapSet::Permitted)?,
            ))
        })
        .join()
        .unwrap();

        let (effective, permitted) = sets.unwrap();
        assert!(effective.is_empty());
        assert!(permitted.is_empty());
    }
}
