pub const X_BZ_FILE_NAME: &str = "X-Bz-File-Name";
pub const X_BZ_FILE_ID: &str = "X-Bz-File-Id";
pub const X_BZ_CONTENT_SHA1: &str = "X-Bz-Content-Sha1";
pub const X_BZ_PART_NUMBER: &str = "X-Bz-Part-Number";
pub const X_BZ_INFO_LARGE_FILE_SHA1: &str = "X-Bz-Info-large_file_sha1";
pub const X_BZ_INFO_SRC_LAST_MODIFIED: &str = "X-Bz-Info-src_last_modified_millis";

/// File info key holding the whole-content SHA1 of a large file.
pub const LARGE_FILE_SHA1_INFO: &str = "large_file_sha1";
/// File info key holding the source file's modification time in milliseconds.
pub const SRC_LAST_MODIFIED_INFO: &str = "src_last_modified_millis";

/// Content type asking the server to pick one from the file name.
pub const AUTO_CONTENT_TYPE: &str = "b2/x-auto";
