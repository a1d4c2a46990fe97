//! Clock formatting for the now-playing panel.

/// `h:mm:ss` once past the hour, `m:ss` below it.
pub fn format_time(secs: u64) -> String {
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// `elapsed / duration`, or just `elapsed` for an open-ended stream.
/// Nothing until the song has actually started.
pub fn time_display(elapsed: Option<u64>, duration: Option<u64>) -> Option<String> {
    let elapsed = elapsed.filter(|&e| e > 0)?;
    Some(match duration {
        Some(duration) => format!("{} / {}", format_time(elapsed), format_time(duration)),
        None => format_time(elapsed),
    })
}
