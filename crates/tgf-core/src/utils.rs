use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use tracing::debug;

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(1);

// ============== Staging Files ==============

pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.trim_start_matches('@').chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    let out = out.trim_start_matches('.').to_string();
    if out.is_empty() {
        "media".to_string()
    } else {
        out
    }
}

/// Unique staging path for one request.
///
/// With a usable `original_name` the file keeps it inside a per-request
/// directory, `<seq>_<target>_<msg>/<name>`, so the recipient sees the
/// sender's name. Otherwise the file itself is `<seq>_<target>_<msg>[.<ext>]`.
pub fn staging_path(
    dir: &Path,
    target: &str,
    message_id: i32,
    original_name: Option<&str>,
    ext: Option<&str>,
) -> PathBuf {
    let seq = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    let stem = format!("{seq}_{}_{message_id}", sanitize_filename(target));
    if let Some(name) = original_name
        .map(|n| n.rsplit(['/', '\\']).next().unwrap_or(n))
        .map(sanitize_filename)
        .filter(|n| n != "media")
    {
        return dir.join(stem).join(name);
    }
    let name = match ext.map(sanitize_filename).filter(|e| e != "media") {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    };
    dir.join(name)
}

/// Best-effort delete; failures are logged, never surfaced.
///
/// A per-request directory between `path` and `staging_root` goes too.
pub async fn remove_staging_file(path: &Path, staging_root: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "staging file removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "staging file cleanup failed"),
    }
    let Some(parent) = path.parent() else {
        return;
    };
    if parent == staging_root || !parent.starts_with(staging_root) {
        return;
    }
    match tokio::fs::remove_dir(parent).await {
        Ok(()) => debug!(path = %parent.display(), "staging directory removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %parent.display(), error = %e, "staging directory cleanup failed"),
    }
}

// ============== Text ==============

/// Cut `s` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out = s
        .chars()
        .take(max_chars.saturating_sub(3))
        .collect::<String>();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_targets() {
        assert_eq!(sanitize_filename("@news"), "news");
        assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_filename("-1001234"), "-1001234");
        assert_eq!(sanitize_filename("@"), "media");
    }

    #[test]
    fn staging_paths_are_unique() {
        let dir = Path::new("/tmp/staging");
        let a = staging_path(dir, "@news", 42, None, Some("jpg"));
        let b = staging_path(dir, "@news", 42, None, Some("jpg"));
        assert_ne!(a, b);
        assert_eq!(a.parent(), Some(dir));
        let name = a.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_news_42.jpg"), "{name}");

        let bare = staging_path(dir, "x", 1, None, None);
        assert!(bare.extension().is_none());
    }

    #[test]
    fn original_name_is_kept_in_its_own_directory() {
        let dir = Path::new("/tmp/staging");
        let a = staging_path(dir, "@news", 7, Some("Report 2024.PDF"), Some("pdf"));
        let b = staging_path(dir, "@news", 7, Some("Report 2024.PDF"), Some("pdf"));
        assert_eq!(a.file_name().unwrap(), "Report_2024.PDF");
        assert_ne!(a.parent(), b.parent());
        assert_eq!(a.parent().unwrap().parent(), Some(dir));

        // Path components in a sender-chosen name never escape the staging dir.
        let c = staging_path(dir, "x", 1, Some("../../etc/passwd"), None);
        assert_eq!(c.file_name().unwrap(), "passwd");
        assert_eq!(c.parent().unwrap().parent(), Some(dir));
    }

    #[tokio::test]
    async fn removing_a_missing_file_is_silent() {
        remove_staging_file(Path::new("/tmp/tgf-definitely-missing-file"), Path::new("/tmp")).await;
    }

    #[tokio::test]
    async fn removal_takes_the_request_directory_but_not_the_root() {
        let root = std::env::temp_dir().join(format!("tgf-utils-rm-{}", std::process::id()));
        let path = staging_path(&root, "chan", 3, Some("a.txt"), None);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"x").await.unwrap();

        remove_staging_file(&path, &root).await;
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
        assert!(root.exists());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("abcdefghij", 6), "abc...");
        assert_eq!(truncate_text("ééééé", 4), "é...");
    }
}
