use std::io::{self, ErrorKind, Write};
use std::thread;
use std::time::{Duration, Instant};

use crate::models::error::CaptureError;

const MIN_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(10);

/// Extra time granted to finish a frame the consumer has only partly taken
/// when the stall ceiling is reached.
const FRAME_COMPLETION_GRACE: Duration = Duration::from_millis(100);

/// Result of a successful [`FrameSink::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub bytes: usize,
    /// Time spent waiting for the consumer to accept bytes.
    pub backpressure: Duration,
}

/// Writes frame blocks to the outbound byte channel.
///
/// Bytes go out in exactly the order they are handed in; each call returns
/// only once the whole block has been accepted (or the call failed). A
/// consumer that reports `WouldBlock` is waited on with short sleeps, but
/// never for longer than `stall_timeout` per call, since a capture thread
/// stuck here stops draining the OS buffer.
///
/// A stall is only reported on a frame boundary: if the ceiling is hit
/// after the consumer took part of a frame, the rest of that frame is still
/// offered for a short grace period before giving up.
///
/// Broken-pipe style errors mean the reader went away and are reported as
/// [`CaptureError::ConsumerClosed`].
pub struct FrameSink<W: Write> {
    writer: W,
    block_align: usize,
    stall_timeout: Duration,
    bytes_written: u64,
}

impl<W: Write> FrameSink<W> {
    pub fn new(writer: W, block_align: usize, stall_timeout: Duration) -> Self {
        Self {
            writer,
            block_align: block_align.max(1),
            stall_timeout,
            bytes_written: 0,
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<WriteOutcome, CaptureError> {
        let started = Instant::now();
        let mut backpressure = Duration::ZERO;
        let mut backoff = MIN_BACKOFF;
        let mut retries = 0u32;
        let mut offset = 0;

        while offset < bytes.len() {
            match self.writer.write(&bytes[offset..]) {
                Ok(0) => return Err(CaptureError::ConsumerClosed),
                Ok(n) => {
                    offset += n;
                    self.bytes_written += n as u64;
                    backoff = MIN_BACKOFF;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => match self.back_off(started, &mut backoff) {
                    Ok(nap) => {
                        backpressure += nap;
                        retries += 1;
                    }
                    Err(stall) => return Err(self.complete_frame(&bytes[offset..], stall)),
                },
                Err(e) => return Err(classify(e)),
            }
        }

        loop {
            match self.writer.flush() {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    backpressure += self.back_off(started, &mut backoff)?;
                    retries += 1;
                }
                Err(e) => return Err(classify(e)),
            }
        }

        if retries > 1 {
            log::debug!(
                "Consumer backpressure: {} retries, {} ms for {} bytes",
                retries,
                backpressure.as_millis(),
                bytes.len()
            );
        }

        Ok(WriteOutcome {
            bytes: bytes.len(),
            backpressure,
        })
    }

    /// Total bytes the consumer has accepted.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Sleep before the next retry, or fail once the ceiling is reached.
    fn back_off(&self, started: Instant, backoff: &mut Duration) -> Result<Duration, CaptureError> {
        let waited = started.elapsed();
        if waited >= self.stall_timeout {
            return Err(CaptureError::ConsumerStalled {
                waited_ms: waited.as_millis() as u64,
            });
        }
        let nap = (*backoff).min(self.stall_timeout - waited);
        thread::sleep(nap);
        *backoff = (*backoff * 2).min(MAX_BACKOFF);
        Ok(nap)
    }

    /// Bytes of the current frame the consumer has not taken yet.
    fn frame_remainder(&self) -> usize {
        let partial = (self.bytes_written % self.block_align as u64) as usize;
        if partial == 0 {
            0
        } else {
            self.block_align - partial
        }
    }

    /// After a stall, push out the tail of a partly written frame so the
    /// stream ends on a frame boundary. Returns the error to report.
    fn complete_frame(&mut self, rest: &[u8], stall: CaptureError) -> CaptureError {
        let missing = self.frame_remainder().min(rest.len());
        if missing == 0 {
            return stall;
        }

        let deadline = Instant::now() + self.stall_timeout.max(FRAME_COMPLETION_GRACE);
        let mut backoff = MIN_BACKOFF;
        let mut done = 0;

        while done < missing {
            match self.writer.write(&rest[done..missing]) {
                Ok(0) => return CaptureError::ConsumerClosed,
                Ok(n) => {
                    done += n;
                    self.bytes_written += n as u64;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        log::warn!(
                            "Consumer stalled mid-frame: last frame cut after {} of {} bytes",
                            self.block_align - self.frame_remainder(),
                            self.block_align
                        );
                        return stall;
                    }
                    thread::sleep(backoff.min(deadline - now));
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => return classify(e),
            }
        }

        log::debug!("Completed the last frame ({} bytes) after the stall ceiling", missing);
        if let Err(e) = self.writer.flush() {
            log::debug!("Flush after completing the last frame: {}", e);
        }
        stall
    }
}

fn classify(error: io::Error) -> CaptureError {
    match error.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::WriteZero => CaptureError::ConsumerClosed,
        _ => CaptureError::OutputFailed(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedWriter;

    #[test]
    fn writes_blocks_in_order() {
        let writer = ScriptedWriter::new();
        let mut sink = FrameSink::new(writer.clone(), 4, Duration::from_secs(1));

        sink.write(&[1, 1, 1, 1]).unwrap();
        sink.write(&[2, 2, 2, 2]).unwrap();
        sink.write(&[3, 3, 3, 3]).unwrap();

        assert_eq!(writer.data(), vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);
        assert_eq!(sink.bytes_written(), 12);
        assert_eq!(writer.flushes(), 3);
    }

    #[test]
    fn partial_writes_are_completed() {
        let writer = ScriptedWriter::new().with_max_chunk(3);
        let mut sink = FrameSink::new(writer.clone(), 4, Duration::from_secs(1));

        let block: Vec<u8> = (0..16).collect();
        let outcome = sink.write(&block).unwrap();

        assert_eq!(outcome.bytes, 16);
        assert_eq!(writer.data(), block);
    }

    #[test]
    fn transient_backpressure_is_absorbed() {
        let writer = ScriptedWriter::new().blocking(3);
        let mut sink = FrameSink::new(writer.clone(), 4, Duration::from_secs(1));

        let outcome = sink.write(&[7; 8]).unwrap();

        assert_eq!(writer.data(), vec![7; 8]);
        assert!(outcome.backpressure > Duration::ZERO);
    }

    #[test]
    fn stalled_consumer_hits_ceiling() {
        let writer = ScriptedWriter::new().stalled();
        let ceiling = Duration::from_millis(30);
        let mut sink = FrameSink::new(writer.clone(), 4, ceiling);

        let started = Instant::now();
        let err = sink.write(&[0; 4]).unwrap_err();

        assert!(matches!(err, CaptureError::ConsumerStalled { waited_ms } if waited_ms >= 30));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(writer.is_empty());
    }

    #[test]
    fn broken_pipe_is_consumer_closed() {
        let writer = ScriptedWriter::new().closing_after(6);
        let mut sink = FrameSink::new(writer.clone(), 4, Duration::from_secs(1));

        sink.write(&[1; 4]).unwrap();
        let err = sink.write(&[2; 4]).unwrap_err();

        assert_eq!(err, CaptureError::ConsumerClosed);
        assert_eq!(sink.bytes_written(), 6);
    }

    #[test]
    fn stall_mid_frame_finishes_the_frame() {
        // Takes one and a half frames, then blocks past the ceiling before draining again.
        let writer = ScriptedWriter::new().pausing_after(6, 7);
        let mut sink = FrameSink::new(writer.clone(), 4, Duration::from_millis(20));

        let err = sink.write(&[1; 16]).unwrap_err();

        assert!(matches!(err, CaptureError::ConsumerStalled { .. }));
        assert_eq!(sink.bytes_written(), 8);
        assert_eq!(writer.data(), vec![1; 8]);
    }

    #[test]
    fn stall_on_frame_boundary_writes_nothing_more() {
        let writer = ScriptedWriter::new().pausing_after(8, usize::MAX);
        let mut sink = FrameSink::new(writer.clone(), 4, Duration::from_millis(20));

        let started = Instant::now();
        let err = sink.write(&[1; 16]).unwrap_err();

        assert!(matches!(err, CaptureError::ConsumerStalled { .. }));
        assert_eq!(writer.len(), 8);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn dead_consumer_mid_frame_still_gives_up() {
        let writer = ScriptedWriter::new().pausing_after(6, usize::MAX);
        let mut sink = FrameSink::new(writer.clone(), 4, Duration::from_millis(20));

        let started = Instant::now();
        let err = sink.write(&[1; 16]).unwrap_err();

        assert!(matches!(err, CaptureError::ConsumerStalled { .. }));
        assert_eq!(writer.len(), 6);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn other_io_errors_are_output_failures() {
        let err = classify(io::Error::new(ErrorKind::PermissionDenied, "nope"));
        assert!(matches!(err, CaptureError::OutputFailed(_)));
        assert_eq!(classify(ErrorKind::BrokenPipe.into()), CaptureError::ConsumerClosed);
    }
}
