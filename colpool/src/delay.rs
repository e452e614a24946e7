// Copyright 2020 Joyent, Inc.

//! Bounded exponential backoff delays.
//!
//! Paces the pool-wide retry loop in [`ConnectionPool::acquire`][acquire]
//! while no node can supply a connection.
//!
//! [acquire]: ../connection_pool/struct.ConnectionPool.html#method.acquire

/// Return the backoff delay in milliseconds for the given attempt number.
///
/// The first attempt (and attempt zero) yields `min_delay`. Each subsequent
/// attempt doubles the delay until it reaches `max_delay`, after which the
/// delay stays at `max_delay`. If `min_delay` is greater than `max_delay` the
/// result is always `max_delay`.
pub fn backoff_delay(attempt: u32, min_delay: u64, max_delay: u64) -> u64 {
    if attempt <= 1 || min_delay >= max_delay {
        return min_delay.min(max_delay);
    }

    // Past 63 doublings any non-zero delay has long since saturated
    let shift = (attempt - 1).min(63);
    min_delay
        .checked_mul(1u64 << shift)
        .map_or(max_delay, |delay| delay.min(max_delay))
}
