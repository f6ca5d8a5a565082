use b2_types::{Bucket, FileAction, FileVersion};
use chrono::Local;
use colored::Colorize;
use humansize::{format_size, DECIMAL};

/// Compact decimal size, e.g. `1.5MB`.
pub fn size(bytes: u64) -> String {
    format_size(bytes, DECIMAL).replace(' ', "")
}

pub fn long_listing_header(versions: bool) -> String {
    let mut header = format!("{:>9}   {:>11}   {}", "Size".underline(), "Uploaded".underline(), "Name".underline());
    if versions {
        header.push_str(&format!("   {}", "File id".underline()));
    }
    header
}

/// One `ls -l` line: size, upload date and name (and id and action with `--versions`).
pub fn long_listing_entry(file: &FileVersion, versions: bool) -> String {
    let date = file.upload_timestamp.with_timezone(&Local).format("%e %h %Y").to_string();
    let mut line = format!("{:>9}   {:>11}   {}", size(file.content_length).green(), date.blue(), file.file_name.yellow());
    if versions {
        line.push_str(&format!("   {}", file.file_id.as_deref().unwrap_or("-").dimmed()));
        if file.action != FileAction::Upload {
            line.push_str(&format!(" ({})", file.action.as_str()));
        }
    }
    line
}

pub fn short_listing_entry(file: &FileVersion) -> String {
    match file.action {
        FileAction::Hide => format!("{} (hidden)", file.file_name),
        _ => file.file_name.clone(),
    }
}

pub fn bucket_line(bucket: &Bucket, long: bool) -> String {
    if long {
        format!("{}  {:<11}  {}", bucket.bucket_id.dimmed(), bucket.bucket_type.as_str(), bucket.bucket_name)
    } else {
        bucket.bucket_name.clone()
    }
}
