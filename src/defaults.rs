//! Defaulting table applied while resolving a configuration map.

use std::time::Duration;

/// Keep-alive used when `keepaliveinmillis` is absent.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Idle connection timeout used when `idleconnectiontimeoutinmillis` is absent.
pub const DEFAULT_IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(90);

/// Breaker sleep window used when `sleepwindowinmillis` is absent.
pub const DEFAULT_SLEEP_WINDOW: Duration = Duration::from_millis(5000);

/// Attempt count used when `retrycount` is absent or zero.
pub const DEFAULT_RETRY_COUNT: u32 = 1;

/// Connect timeout is this fraction of the request timeout unless set.
pub const CONNECT_TIMEOUT_DIVISOR: u32 = 10;

/// Header carrying the correlation id on every outgoing request.
pub const REQUEST_ID_HEADER: &str = "X-requestId";

/// Context key consulted for a caller-supplied correlation id.
pub const ID_PARAM: &str = "id";

/// Available parallelism + 1; used for idle pool sizing.
pub fn max_idle_per_host() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
        + 1
}
