//! Chunking of terminal text into USB-sized frames.

use core::fmt;

use heapless::Vec;

/// Largest payload carried by one terminal frame.
///
/// One byte short of a full-speed bulk packet so every frame ends a transfer.
pub const FRAME_LEN: usize = 63;

/// Bytes handed to the USB task in one packet.
pub type TerminalFrame = Vec<u8, FRAME_LEN>;

/// Destination for completed frames.
pub trait FrameSink {
    /// Queues `frame`, handing it back when there is no room.
    fn try_send(&mut self, frame: TerminalFrame) -> Result<(), TerminalFrame>;
}

impl<T: FrameSink + ?Sized> FrameSink for &mut T {
    fn try_send(&mut self, frame: TerminalFrame) -> Result<(), TerminalFrame> {
        (**self).try_send(frame)
    }
}

/// `fmt::Write` adapter that packs text into frames.
///
/// Text accumulates until a frame fills up or [`FrameWriter::flush`] is
/// called. A frame the sink refuses is discarded and the write reports
/// `fmt::Error`.
pub struct FrameWriter<S> {
    sink: S,
    pending: TerminalFrame,
}

impl<S: FrameSink> FrameWriter<S> {
    pub const fn new(sink: S) -> Self {
        Self {
            sink,
            pending: Vec::new(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Sends whatever is pending as a short frame.
    pub fn flush(&mut self) -> fmt::Result {
        if self.pending.is_empty() {
            return Ok(());
        }
        let frame = core::mem::take(&mut self.pending);
        self.sink.try_send(frame).map_err(|_| fmt::Error)
    }
}

impl<S: FrameSink> fmt::Write for FrameWriter<S> {
    fn write_str(&mut self, text: &str) -> fmt::Result {
        let mut bytes = text.as_bytes();
        while !bytes.is_empty() {
            let room = FRAME_LEN - self.pending.len();
            let (head, tail) = bytes.split_at(room.min(bytes.len()));
            // `head` never exceeds the remaining room.
            let _ = self.pending.extend_from_slice(head);
            bytes = tail;
            if self.pending.is_full() {
                self.flush()?;
            }
        }
        Ok(())
    }
}
