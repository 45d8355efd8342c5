use crate::source::meminfo_total_bytes;

// Upper bound applied to the descriptor limit, matching common system defaults.
const SYSTEM_DEFAULT_MAX_FDS: u64 = 8192;
const FALLBACK_HANDLE_LIMIT: usize = 1024;

/// Total physical memory in MiB, if `/proc/meminfo` is readable.
pub fn physical_memory_mb() -> Option<u64> {
    meminfo_total_bytes().map(|bytes| bytes / (1024 * 1024))
}

/// Number of shareable OS handles (file descriptors) this process may hold.
pub fn handle_limit() -> usize {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit only writes into the struct we pass and reports
    // failure through its return value.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
    if rc != 0 {
        return FALLBACK_HANDLE_LIMIT;
    }
    if limit.rlim_cur == libc::RLIM_INFINITY {
        return SYSTEM_DEFAULT_MAX_FDS as usize;
    }
    (limit.rlim_cur as u64).min(SYSTEM_DEFAULT_MAX_FDS) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_limit_is_bounded() {
        let limit = handle_limit();
        assert!(limit > 0);
        assert!(limit <= SYSTEM_DEFAULT_MAX_FDS as usize);
    }
}
