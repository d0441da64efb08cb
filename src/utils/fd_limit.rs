//! File descriptor limit detection for capping worker counts (Unix).

/// Estimated number of file descriptors held per worker (source file, container, destination).
pub const FDS_PER_WORKER: usize = 4;

/// Fraction of the process FD limit to use (leave headroom for SQLite and the walker).
const FD_LIMIT_FRACTION: f64 = 0.8;

/// Returns the soft limit for max open file descriptors, or `None` if unavailable (e.g. Windows).
#[cfg(unix)]
pub fn max_open_fds() -> Option<u64> {
    use std::mem::MaybeUninit;
    let mut rlim = MaybeUninit::<libc::rlimit>::uninit();
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, rlim.as_mut_ptr()) } != 0 {
        return None;
    }
    let rlim = unsafe { rlim.assume_init() };
    let cur = rlim.rlim_cur;
    // RLIM_INFINITY is typically !0 or u64::MAX; treat as "no practical limit"
    if cur == libc::RLIM_INFINITY || cur > i64::MAX as u64 {
        return None;
    }
    Some(cur)
}

#[cfg(not(unix))]
pub fn max_open_fds() -> Option<u64> {
    None
}

/// Workers that fit in ~80% of the FD limit (at least one), or `None` when there is no limit.
pub fn max_workers_by_fd_limit() -> Option<usize> {
    let usable = (max_open_fds()? as f64 * FD_LIMIT_FRACTION) as usize;
    Some((usable / FDS_PER_WORKER).max(1))
}

/// Worker count for a run: the explicit request if any (at least 1), else all rayon threads
/// capped by the FD limit.
pub fn resolve_workers(requested: Option<usize>) -> usize {
    match requested {
        Some(n) => n.max(1),
        None => {
            let avail = rayon::current_num_threads();
            max_workers_by_fd_limit()
                .map_or(avail, |cap| avail.min(cap))
                .max(1)
        }
    }
}
