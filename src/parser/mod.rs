use std::sync::LazyLock;

use regex::Regex;

static VANILLA_DONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Done \([0-9.]+s\)!").expect("static regex"));

const READY_MARKERS: &[&str] = &["Time elapsed:"];
const STOPPING_MARKERS: &[&str] = &["Stopping server"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleMarker {
    Ready,
    Stopping,
}

/// Looks for a lifecycle marker in one chunk of output. A stopping marker wins
/// when both appear.
pub fn detect_marker(chunk: &str) -> Option<LifecycleMarker> {
    if STOPPING_MARKERS.iter().any(|m| chunk.contains(m)) {
        return Some(LifecycleMarker::Stopping);
    }

    if READY_MARKERS.iter().any(|m| chunk.contains(m)) || VANILLA_DONE.is_match(chunk) {
        return Some(LifecycleMarker::Ready);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_lines() {
        assert_eq!(
            detect_marker("[12:00:01 INFO]: Time elapsed: 4182 ms\r\n"),
            Some(LifecycleMarker::Ready)
        );
        assert_eq!(
            detect_marker(
                "[12:00:01] [Server thread/INFO]: Done (6.011s)! For help, type \"help\"\r\n"
            ),
            Some(LifecycleMarker::Ready)
        );
    }

    #[test]
    fn stopping_line() {
        assert_eq!(
            detect_marker("[12:10:00] [Server thread/INFO]: Stopping server\r\n"),
            Some(LifecycleMarker::Stopping)
        );
    }

    #[test]
    fn stopping_takes_precedence() {
        assert_eq!(
            detect_marker("Time elapsed: 1 ms\r\nStopping server\r\n"),
            Some(LifecycleMarker::Stopping)
        );
    }

    #[test]
    fn ordinary_output() {
        assert_eq!(detect_marker("Preparing spawn area: 42%"), None);
        assert_eq!(detect_marker("Done (soon)!"), None);
    }
}
