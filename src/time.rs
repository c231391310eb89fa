use std::time::SystemTime;

/// Wall clock nanoseconds since the UNIX epoch, used for send and receive timestamps. A clock
///  set before 1970 yields 0 rather than an error: timestamps are informational only.
pub(crate) fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos().try_into().unwrap_or(u64::MAX))
        .unwrap_or(0)
}
