//! LIST / MLSD response parser.
//!
//! Supports three formats:
//! 1. **Unix-style** (`ls -l`): `-rwxr-xr-x 1 owner group 1234 Jan  1 12:00 file.txt`
//! 2. **Windows/IIS-style**: `01-01-26  12:00AM       1234 file.txt`
//! 3. **MLSD facts** (RFC 3659): `type=file;size=1234;modify=20260101120000; file.txt`
//!
//! MLSD is tried first (if the line contains `=` and `;`), then Unix,
//! then Windows, falling back to a raw entry.

use crate::ftp::types::{FtpEntry, FtpEntryKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    static ref UNIX_RE: Regex = Regex::new(
        r"(?x)
        ^([dlcbps-][rwxsStT-]{9})\S*\s+  # permissions (+ ACL marker)
        (\d+)\s+                         # link count
        (\S+)\s+                         # owner
        (\S+)\s+                         # group
        (\d+)\s+                         # size
        (\w{3}\s+\d{1,2}\s+[\d:]+)\s+    # date
        (.+)$                            # filename (possibly with -> target)
        ",
    )
    .expect("valid unix listing regex");
    static ref WINDOWS_RE: Regex = Regex::new(
        r"(?x)
        ^(\d{2}-\d{2}-\d{2,4})\s+        # date
        (\d{1,2}:\d{2}(?:AM|PM)?)\s+     # time
        (<DIR>|\d+)\s+                   # size or <DIR>
        (.+)$                            # filename
        ",
    )
    .expect("valid windows listing regex");
}

/// Parse a full multi-line LIST or MLSD response body.
pub fn parse_listing(raw: &str) -> Vec<FtpEntry> {
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| parse_line(line.trim_end_matches('\r')))
        .filter(|e| e.name != "." && e.name != "..")
        .collect()
}

/// Parse a listing of `dir` and fill in each entry's `full_name`.
///
/// Listings of `.` or of the current directory (empty path) yield
/// `./name`; callers are expected to normalise those.
pub fn parse_listing_at(raw: &str, dir: &str) -> Vec<FtpEntry> {
    let mut entries = parse_listing(raw);
    for e in &mut entries {
        e.full_name = join_listed(dir, &e.name);
    }
    entries
}

fn join_listed(dir: &str, name: &str) -> String {
    match dir.trim() {
        "" | "." => format!("./{}", name),
        d if d.ends_with('/') => format!("{}{}", d, name),
        d => format!("{}/{}", d, name),
    }
}

/// Parse a single line from a listing.
fn parse_line(line: &str) -> Option<FtpEntry> {
    if line.contains(';') && line.contains('=') {
        if let Some(parsed) = parse_mlsd(line) {
            return parsed;
        }
    }

    let trimmed = line.trim();
    if let Some(e) = parse_unix(trimmed) {
        return Some(e);
    }
    if let Some(e) = parse_windows(trimmed) {
        return Some(e);
    }

    // "total 42" headers carry no entry.
    if trimmed.starts_with("total ") {
        return None;
    }

    Some(FtpEntry {
        name: trimmed.to_string(),
        full_name: String::new(),
        kind: FtpEntryKind::Unknown,
        size: 0,
        modified: None,
        permissions: None,
        owner: None,
        group: None,
        link_target: None,
        raw: Some(line.to_string()),
        facts: HashMap::new(),
    })
}

// ─── MLSD parser ─────────────────────────────────────────────────────

/// Parse MLSD fact-line: `fact1=val1;fact2=val2; filename`
///
/// `None` means the line is not MLSD at all. `Some(None)` is a recognised
/// line that carries no entry (`cdir`/`pdir`).
fn parse_mlsd(line: &str) -> Option<Option<FtpEntry>> {
    // Everything after the first "; " is the name, spaces included.
    let (facts_str, name) = if let Some(pos) = line.find("; ") {
        (&line[..pos + 1], line[pos + 2..].to_string())
    } else if let Some(pos) = line.rfind(' ') {
        (&line[..pos], line[pos + 1..].to_string())
    } else {
        return None;
    };

    if name.is_empty() {
        return None;
    }

    let mut facts: HashMap<String, String> = HashMap::new();
    for segment in facts_str.split(';') {
        if let Some((k, v)) = segment.trim().split_once('=') {
            facts.insert(k.to_lowercase(), v.to_string());
        }
    }

    let kind = match facts.get("type").map(|s| s.to_lowercase()).as_deref() {
        // The listed directory itself and its parent.
        Some("cdir") | Some("pdir") => return Some(None),
        Some("dir") => FtpEntryKind::Directory,
        Some("file") => FtpEntryKind::File,
        Some("os.unix=symlink") | Some("os.unix=slink") => FtpEntryKind::Symlink,
        _ => FtpEntryKind::Unknown,
    };

    let size = facts
        .get("size")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let modified = facts.get("modify").and_then(|v| parse_mlsd_time(v));

    Some(Some(FtpEntry {
        name,
        full_name: String::new(),
        kind,
        size,
        modified,
        permissions: facts.get("unix.mode").cloned(),
        owner: facts.get("unix.owner").cloned(),
        group: facts.get("unix.group").cloned(),
        link_target: None,
        raw: Some(line.to_string()),
        facts,
    }))
}

/// Parse an RFC 3659 timestamp: `YYYYMMDDHHmmSS[.fraction]`.
///
/// Also used for MDTM replies.
pub fn parse_mlsd_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    let base = s.get(..14).unwrap_or(s);
    NaiveDateTime::parse_from_str(base, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt))
}

// ─── Unix-style parser ───────────────────────────────────────────────

/// Parse a Unix `ls -l` line:
/// ```text
/// drwxr-xr-x   2 user group  4096 Jan  1 12:00 dirname
/// -rw-r--r--   1 user group  1234 Jan  1  2025 file.txt
/// lrwxrwxrwx   1 user group    42 Jan  1 12:00 link -> target
/// ```
fn parse_unix(line: &str) -> Option<FtpEntry> {
    let caps = UNIX_RE.captures(line)?;

    let perms = caps.get(1)?.as_str();
    let size = caps.get(5)?.as_str().parse::<u64>().unwrap_or(0);
    let name_raw = caps.get(7)?.as_str();

    let kind = match perms.as_bytes().first() {
        Some(b'd') => FtpEntryKind::Directory,
        Some(b'l') => FtpEntryKind::Symlink,
        Some(b'-') => FtpEntryKind::File,
        _ => FtpEntryKind::Unknown,
    };

    let (name, link_target) = match (kind, name_raw.find(" -> ")) {
        (FtpEntryKind::Symlink, Some(pos)) => (
            name_raw[..pos].to_string(),
            Some(name_raw[pos + 4..].to_string()),
        ),
        _ => (name_raw.to_string(), None),
    };

    Some(FtpEntry {
        name,
        full_name: String::new(),
        kind,
        size,
        modified: parse_unix_date(caps.get(6)?.as_str()),
        permissions: Some(perms.to_string()),
        owner: caps.get(3).map(|m| m.as_str().to_string()),
        group: caps.get(4).map(|m| m.as_str().to_string()),
        link_target,
        raw: Some(line.to_string()),
        facts: HashMap::new(),
    })
}

/// Parse the date portion: "Jan  1 12:00" or "Jan  1  2025".
fn parse_unix_date(s: &str) -> Option<DateTime<Utc>> {
    let normalised = s.split_whitespace().collect::<Vec<_>>().join(" ");

    // "Jan 1 12:00", current year implied
    if let Ok(dt) = NaiveDateTime::parse_from_str(
        &format!("{} {}", Utc::now().format("%Y"), normalised),
        "%Y %b %d %H:%M",
    ) {
        return Some(Utc.from_utc_datetime(&dt));
    }

    // "Jan 1 2025", no time
    if let Ok(date) = NaiveDate::parse_from_str(&normalised, "%b %d %Y") {
        let dt = date.and_time(NaiveTime::from_hms_opt(0, 0, 0)?);
        return Some(Utc.from_utc_datetime(&dt));
    }

    None
}

// ─── Windows-style parser ────────────────────────────────────────────

/// Parse Windows / IIS style line:
/// ```text
/// 01-01-26  12:00AM       1234 file.txt
/// 01-01-26  12:00PM      <DIR> Directory Name
/// ```
fn parse_windows(line: &str) -> Option<FtpEntry> {
    let caps = WINDOWS_RE.captures(line)?;

    let size_or_dir = caps.get(3)?.as_str();
    let (kind, size) = if size_or_dir == "<DIR>" {
        (FtpEntryKind::Directory, 0)
    } else {
        (FtpEntryKind::File, size_or_dir.parse::<u64>().unwrap_or(0))
    };

    Some(FtpEntry {
        name: caps.get(4)?.as_str().to_string(),
        full_name: String::new(),
        kind,
        size,
        modified: parse_windows_date(caps.get(1)?.as_str(), caps.get(2)?.as_str()),
        permissions: None,
        owner: None,
        group: None,
        link_target: None,
        raw: Some(line.to_string()),
        facts: HashMap::new(),
    })
}

fn parse_windows_date(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let combined = format!("{} {}", date, time);
    ["%m-%d-%y %I:%M%p", "%m-%d-%y %H:%M", "%m-%d-%Y %I:%M%p", "%m-%d-%Y %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&combined, fmt).ok())
        .map(|dt| Utc.from_utc_datetime(&dt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_unix_file() {
        let line = "-rw-r--r--   1 user group  1234 Jan  1 12:00 readme.txt";
        let entries = parse_listing(line);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "readme.txt");
        assert_eq!(entries[0].kind, FtpEntryKind::File);
        assert_eq!(entries[0].size, 1234);
        assert_eq!(entries[0].permissions.as_deref(), Some("-rw-r--r--"));
    }

    #[test]
    fn test_unix_dir_with_year() {
        let line = "drwxr-xr-x   2 root root  4096 Mar  1  2024 subdir";
        let entries = parse_listing(line);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, FtpEntryKind::Directory);
        assert_eq!(entries[0].modified.unwrap().year(), 2024);
    }

    #[test]
    fn test_unix_symlink() {
        let line = "lrwxrwxrwx   1 root root    22 Jan  5 08:00 link -> /var/target";
        let entries = parse_listing(line);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, FtpEntryKind::Symlink);
        assert_eq!(entries[0].name, "link");
        assert_eq!(entries[0].link_target.as_deref(), Some("/var/target"));
    }

    #[test]
    fn test_unix_total_header_skipped() {
        let raw = "total 8\r\n-rw-r--r-- 1 u g 5 Jan  1 12:00 a.txt\r\n";
        let entries = parse_listing(raw);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.txt");
    }

    #[test]
    fn test_mlsd() {
        let line = "type=file;size=1024;modify=20260101120000;unix.mode=0644; example file.bin";
        let entries = parse_listing(line);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "example file.bin");
        assert_eq!(entries[0].kind, FtpEntryKind::File);
        assert_eq!(entries[0].size, 1024);
        assert_eq!(entries[0].permissions.as_deref(), Some("0644"));
        assert_eq!(entries[0].modified.unwrap().year(), 2026);
    }

    #[test]
    fn test_filters_dots() {
        let raw = "type=cdir;; .\ntype=pdir;; ..\ntype=file;size=10;; real.txt";
        let entries = parse_listing(raw);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "real.txt");
    }

    #[test]
    fn mlsd_listing_of_cwd_has_no_fact_named_entries() {
        let raw = "type=cdir;perm=el;modify=20260101120000; .\r\n\
                   type=pdir;perm=el; ..\r\n\
                   type=dir;modify=20260101120000; sub\r\n\
                   type=file;size=3;modify=20260101120000; a.txt\r\n";
        let entries = parse_listing_at(raw, ".");
        let names: Vec<&str> = entries.iter().map(|e| e.full_name.as_str()).collect();
        assert_eq!(names, vec!["./sub", "./a.txt"]);
        assert!(entries.iter().all(|e| e.kind != FtpEntryKind::Unknown));
    }

    #[test]
    fn test_windows_dir() {
        let line = "01-01-26  12:00AM      <DIR> My Documents";
        let entries = parse_listing(line);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, FtpEntryKind::Directory);
        assert_eq!(entries[0].name, "My Documents");
    }

    #[test]
    fn full_names_follow_the_listed_path() {
        let raw = "type=file;size=1; a.txt";
        assert_eq!(parse_listing_at(raw, ".")[0].full_name, "./a.txt");
        assert_eq!(parse_listing_at(raw, "")[0].full_name, "./a.txt");
        assert_eq!(parse_listing_at(raw, "/data")[0].full_name, "/data/a.txt");
        assert_eq!(parse_listing_at(raw, "/data/")[0].full_name, "/data/a.txt");
    }

    #[test]
    fn mdtm_style_timestamps() {
        let t = parse_mlsd_time("20250102030405.123").unwrap();
        assert_eq!(t.to_rfc3339(), "2025-01-02T03:04:05+00:00");
        assert!(parse_mlsd_time("garbage").is_none());
    }
}
