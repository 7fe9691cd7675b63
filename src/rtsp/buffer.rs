//! Bounded request parse buffer
//!
//! Incoming protocol bytes accumulate here until a complete request header
//! (terminated by an empty line) is available. The buffer never grows past
//! its fixed capacity: if a terminator has not appeared by the time the
//! buffer would overflow, the contents are discarded and accumulation
//! resumes, leaving session state untouched.

/// Fixed-capacity accumulate/find/consume cursor over request bytes.
pub struct RequestBuffer {
    data: Vec<u8>,
    capacity: usize,
    discards: u32,
}

impl RequestBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            discards: 0,
        }
    }

    /// Append incoming bytes, discarding the whole buffer first if they
    /// would not fit. Returns false when a discard happened.
    pub fn append(&mut self, incoming: &[u8]) -> bool {
        if incoming.len() > self.capacity {
            // Larger than the buffer could ever hold: drop everything
            self.data.clear();
            self.discards += 1;
            return false;
        }
        if self.data.len() + incoming.len() > self.capacity {
            self.data.clear();
            self.discards += 1;
            self.data.extend_from_slice(incoming);
            return false;
        }
        self.data.extend_from_slice(incoming);
        true
    }

    /// Take the next complete request header off the front of the buffer,
    /// if one is present. The terminator (blank line) is consumed but not
    /// returned; any bytes of a following request stay buffered.
    pub fn take_request(&mut self) -> Option<String> {
        let (end, term_len) = find_terminator(&self.data)?;
        let header: Vec<u8> = self.data.drain(..end + term_len).collect();
        Some(String::from_utf8_lossy(&header[..end]).into_owned())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// How many times accumulation overflowed and was discarded.
    pub fn discard_count(&self) -> u32 {
        self.discards
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// Locate the first blank-line terminator. Returns (header length,
/// terminator length), accepting both CRLF and bare LF conventions.
fn find_terminator(data: &[u8]) -> Option<(usize, usize)> {
    let crlf = data.windows(4).position(|w| w == b"\r\n\r\n");
    let lf = data.windows(2).position(|w| w == b"\n\n");
    match (crlf, lf) {
        (Some(c), Some(l)) if l + 1 < c => Some((l, 2)),
        (Some(c), _) => Some((c, 4)),
        (None, Some(l)) => Some((l, 2)),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_request() {
        let mut buf = RequestBuffer::new(256);
        buf.append(b"OPTIONS rtsp://host/audio RTSP/1.0\r\nCSeq: 1\r\n\r\n");

        let req = buf.take_request().unwrap();
        assert_eq!(req, "OPTIONS rtsp://host/audio RTSP/1.0\r\nCSeq: 1");
        assert!(buf.is_empty());
        assert!(buf.take_request().is_none());
    }

    #[test]
    fn test_incremental_accumulation() {
        let mut buf = RequestBuffer::new(256);
        buf.append(b"DESCRIBE rtsp://host/audio RTSP/1.0\r\n");
        assert!(buf.take_request().is_none());

        buf.append(b"CSeq: 2\r\n\r\n");
        let req = buf.take_request().unwrap();
        assert!(req.starts_with("DESCRIBE"));
    }

    #[test]
    fn test_pipelined_requests_preserved() {
        let mut buf = RequestBuffer::new(256);
        buf.append(b"PLAY x RTSP/1.0\r\nCSeq: 4\r\n\r\nTEARDOWN x RTSP/1.0\r\nCSeq: 5");

        let first = buf.take_request().unwrap();
        assert!(first.starts_with("PLAY"));
        // The partial second request stays at the front of the buffer
        assert!(buf.take_request().is_none());
        buf.append(b"\r\n\r\n");
        let second = buf.take_request().unwrap();
        assert!(second.starts_with("TEARDOWN"));
    }

    #[test]
    fn test_overflow_discards_and_resumes() {
        let mut buf = RequestBuffer::new(32);

        // A terminator never arrives within the bound
        assert!(buf.append(&[b'x'; 30]));
        assert!(!buf.append(&[b'y'; 10]));
        assert_eq!(buf.discard_count(), 1);
        // The overflowing chunk itself was kept after the discard
        assert_eq!(buf.len(), 10);

        // Accumulation resumes normally afterwards
        buf.clear();
        buf.append(b"OPTIONS x RTSP/1.0\r\n\r\n");
        assert!(buf.take_request().is_some());
    }

    #[test]
    fn test_oversized_chunk_dropped_entirely() {
        let mut buf = RequestBuffer::new(16);
        assert!(!buf.append(&[b'z'; 64]));
        assert!(buf.is_empty());
        assert_eq!(buf.discard_count(), 1);
    }

    #[test]
    fn test_bare_lf_terminator() {
        let mut buf = RequestBuffer::new(128);
        buf.append(b"OPTIONS x RTSP/1.0\nCSeq: 9\n\nrest");
        let req = buf.take_request().unwrap();
        assert_eq!(req, "OPTIONS x RTSP/1.0\nCSeq: 9");
        assert_eq!(buf.len(), 4);
    }
}
