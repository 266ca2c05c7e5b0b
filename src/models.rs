// src/models.rs

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Default window size for ranged fetches: 1 MiB.
pub const DEFAULT_WINDOW_SIZE: u64 = 1024 * 1024;

/// An inclusive byte range `[start, end]` of the target file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Window {
    pub start: u64,
    pub end: u64,
}

impl Window {
    /// Number of bytes covered by this window.
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the HTTP `Range` request header.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    /// Partitions `[0, total_size)` into ascending windows of `window_size` bytes.
    /// The last window holds the remainder. Windows are produced lazily.
    pub fn partition(total_size: u64, window_size: u64) -> Windows {
        Windows {
            next_start: 0,
            total_size,
            window_size: window_size.max(1),
        }
    }
}

/// Iterator returned by [`Window::partition`].
#[derive(Debug, Clone)]
pub struct Windows {
    next_start: u64,
    total_size: u64,
    window_size: u64,
}

impl Windows {
    /// Number of windows not yet yielded.
    pub fn remaining(&self) -> u64 {
        (self.total_size - self.next_start).div_ceil(self.window_size)
    }
}

impl Iterator for Windows {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.next_start >= self.total_size {
            return None;
        }
        let start = self.next_start;
        let end = start.saturating_add(self.window_size - 1).min(self.total_size - 1);
        self.next_start = end + 1;
        Some(Window { start, end })
    }
}

/// State of a single in-flight transfer. Lives only as long as the download call.
#[derive(Debug)]
pub struct DownloadSession {
    pub target_url: Url,
    pub total_size: u64,
    pub received_bytes: u64,
    /// Window payloads in request order.
    chunks: Vec<Bytes>,
    pub cancellation: CancellationToken,
}

impl DownloadSession {
    pub fn new(target_url: Url, total_size: u64, cancellation: CancellationToken) -> Self {
        Self {
            target_url,
            total_size,
            received_bytes: 0,
            chunks: Vec::new(),
            cancellation,
        }
    }

    /// Records a completed window.
    pub fn push_chunk(&mut self, chunk: Bytes) {
        self.received_bytes += chunk.len() as u64;
        self.chunks.push(chunk);
    }

    /// Download progress as a percentage in `0.0..=100.0`.
    pub fn percent(&self) -> f64 {
        if self.total_size == 0 {
            0.0
        } else {
            (self.received_bytes as f64 / self.total_size as f64 * 100.0).min(100.0)
        }
    }

    /// Concatenates every window in order and consumes the session.
    pub fn assemble(self) -> DownloadOutput {
        let mut buf = BytesMut::with_capacity(self.received_bytes as usize);
        for chunk in &self.chunks {
            buf.extend_from_slice(chunk);
        }
        DownloadOutput {
            bytes: buf.freeze(),
            total_size: self.total_size,
            cancellation: self.cancellation,
        }
    }
}

/// Result of a successful chunked download.
#[derive(Debug, Clone)]
pub struct DownloadOutput {
    pub bytes: Bytes,
    pub total_size: u64,
    pub cancellation: CancellationToken,
}

/// Progress snapshot handed to the caller after each window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DownloadProgress {
    pub percent: f64,
    pub received_bytes: u64,
    pub total_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_uneven_size() {
        let total = 2 * DEFAULT_WINDOW_SIZE + DEFAULT_WINDOW_SIZE / 2;
        let windows: Vec<_> = Window::partition(total, DEFAULT_WINDOW_SIZE).collect();
        let ranges: Vec<_> = windows.iter().map(Window::range_header).collect();
        assert_eq!(
            ranges,
            vec![
                "bytes=0-1048575",
                "bytes=1048576-2097151",
                "bytes=2097152-2621439"
            ]
        );
        assert_eq!(windows.iter().map(Window::size).sum::<u64>(), 2_621_440);
    }

    #[test]
    fn partitions_even_size() {
        let windows: Vec<_> = Window::partition(4096, 1024).collect();
        assert_eq!(windows.len(), 4);
        assert!(windows.iter().all(|w| w.size() == 1024));
        assert_eq!(windows.last().unwrap().end, 4095);
    }

    #[test]
    fn partitions_small_and_empty() {
        assert_eq!(Window::partition(10, 1024).collect::<Vec<_>>(), vec![Window { start: 0, end: 9 }]);
        assert_eq!(Window::partition(0, 1024).next(), None);
    }

    #[test]
    fn windows_cover_every_byte_once() {
        for total in [1u64, 7, 100, 1023, 1024, 1025, 5000] {
            let mut next = 0;
            for w in Window::partition(total, 256) {
                assert_eq!(w.start, next);
                next = w.end + 1;
            }
            assert_eq!(next, total);
        }
    }

    #[test]
    fn huge_sizes_are_not_materialised() {
        let mut windows = Window::partition(1_000_000_000_000_000, 1);
        assert_eq!(windows.remaining(), 1_000_000_000_000_000);
        assert_eq!(windows.next(), Some(Window { start: 0, end: 0 }));
        assert_eq!(windows.next(), Some(Window { start: 1, end: 1 }));
        assert_eq!(windows.remaining(), 999_999_999_999_998);

        let mut tail = Window::partition(u64::MAX, u64::MAX);
        assert_eq!(tail.next(), Some(Window { start: 0, end: u64::MAX - 1 }));
        assert_eq!(tail.next(), None);
    }

    #[test]
    fn assemble_preserves_order() {
        let url = Url::parse("http://localhost/file.bin").unwrap();
        let mut session = DownloadSession::new(url, 6, CancellationToken::new());
        session.push_chunk(Bytes::from_static(b"abc"));
        assert_eq!(session.percent(), 50.0);
        session.push_chunk(Bytes::from_static(b"def"));
        let out = session.assemble();
        assert_eq!(&out.bytes[..], b"abcdef");
        assert_eq!(out.total_size, 6);
    }
}
