use std::time::Duration;

crate::config_group!({

    /// Base URL of the account authorization service.
    ///
    /// Use the environment variable `B2_CLIENT_AUTH_ENDPOINT` to set this value.
    ref auth_endpoint: String = "https://api.backblazeb2.com".to_string();

    /// Attempt a retryable request at most this many times before permanently failing.
    ///
    /// The default value is 5.
    ///
    /// Use the environment variable `B2_CLIENT_RETRY_MAX_ATTEMPTS` to set this value.
    ref retry_max_attempts: usize = 5;

    /// The first retry waits about this long; each further retry doubles it (with jitter).
    ///
    /// The default value is 1sec.
    ///
    /// Use the environment variable `B2_CLIENT_RETRY_BASE_DELAY` to set this value.
    ref retry_base_delay: Duration = Duration::from_secs(1);

    /// Upper bound on a single backoff delay.
    ///
    /// The default value is 32sec.
    ///
    /// Use the environment variable `B2_CLIENT_RETRY_MAX_DELAY` to set this value.
    ref retry_max_delay: Duration = Duration::from_secs(32);

    /// Number of parts of a large file uploaded concurrently.
    ///
    /// Use the environment variable `B2_CLIENT_UPLOAD_CONCURRENCY` to set this value.
    ref upload_concurrency: usize = 4;

    /// Files larger than this are uploaded in parts even if they are below the server's
    /// recommended part size. Unset means the recommended part size decides.
    ///
    /// Use the environment variable `B2_CLIENT_LARGE_FILE_THRESHOLD` to set this value.
    ref large_file_threshold: Option<u64> = None;

    /// Number of entries requested per listing page. The server caps this at 10000.
    ref list_page_size: u32 = 1000;

    /// Cleanup idle connections that are unused for this amount of time.
    ref idle_connection_timeout: Duration = Duration::from_secs(60);

    /// Keep no more than this many idle connections per host in the connection pool.
    ref max_idle_connections: usize = 16;

    /// Timeout for establishing a connection.
    ref connect_timeout: Duration = Duration::from_secs(30);

    /// Longest wait for the next bytes of a response. The timer restarts whenever data arrives,
    /// so slow transfers that keep moving are unaffected; a stalled one fails with a transient
    /// timeout and is retried or resumed.
    ///
    /// The default value is 120sec.
    ///
    /// Use the environment variable `B2_CLIENT_READ_TIMEOUT` to set this value.
    ref read_timeout: Duration = Duration::from_secs(120);

    /// Buffer size used when hashing and streaming local files.
    ref read_buffer_size: usize = 1024 * 1024;
});
