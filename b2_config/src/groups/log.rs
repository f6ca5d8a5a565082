crate::config_group!({

    /// The log destination. Unset logs to the console.
    ///
    /// If this path exists as a directory or ends with a `/`, a log file named after `prefix`, the
    /// timestamp and the pid is created inside it; otherwise it names the log file itself. An empty
    /// value also means the console.
    ///
    /// Use the environment variable `B2_LOG_DEST` to set this value.
    ref dest: Option<String> = None;

    /// "json" dumps log records as JSON; anything else is text. By default files get JSON and the
    /// console gets text.
    ///
    /// Use the environment variable `B2_LOG_FORMAT` to set this value.
    ref format: Option<String> = None;

    /// Base name of log files created in a log directory.
    ref prefix: String = "b2".to_string();
});
