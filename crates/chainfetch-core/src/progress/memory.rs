//! Resident set size of the current process.

/// Current RSS in megabytes, or 0.0 if it cannot be read.
pub fn resident_mb() -> f64 {
    resident_bytes().map(|b| b as f64 / (1024.0 * 1024.0)).unwrap_or(0.0)
}

#[cfg(target_os = "linux")]
fn resident_bytes() -> Option<u64> {
    // /proc/self/statm: size resident shared text lib data dt (in pages)
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return peak_resident_bytes();
    }
    Some(pages * page_size as u64)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn resident_bytes() -> Option<u64> {
    peak_resident_bytes()
}

#[cfg(not(unix))]
fn resident_bytes() -> Option<u64> {
    None
}

/// Peak RSS from getrusage. Kilobytes on Linux, bytes on macOS.
#[cfg(unix)]
fn peak_resident_bytes() -> Option<u64> {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    let r = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if r != 0 {
        return None;
    }
    let maxrss = unsafe { usage.assume_init() }.ru_maxrss;
    if maxrss < 0 {
        return None;
    }
    if cfg!(target_os = "macos") {
        Some(maxrss as u64)
    } else {
        Some(maxrss as u64 * 1024)
    }
}
