// Licensed under the Apache-2.0 license

//! Crate-wide helpers shared by the bus drivers.
//!
//! Drivers take a [`Logger`] type parameter that defaults to [`NoOpLogger`], so
//! a build that does not care about diagnostics pays nothing for them. Boards
//! with a spare UART can plug in a [`UartLogger`] instead.

use embedded_io::Write;

/// Minimal line-oriented logging sink used by the drivers.
///
/// Messages are static strings so that logging from interrupt context never
/// needs formatting machinery.
pub trait Logger {
    fn debug(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Logger that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn debug(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}

/// Logger that writes CRLF-terminated lines to any `embedded-io` sink.
pub struct UartLogger<W: Write> {
    writer: W,
}

impl<W: Write> UartLogger<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Give the underlying writer back.
    pub fn release(self) -> W {
        self.writer
    }

    fn line(&mut self, prefix: &[u8], msg: &str) {
        // A full or broken sink must never stall the caller, which may be an ISR.
        let _ = self.writer.write_all(prefix);
        let _ = self.writer.write_all(msg.as_bytes());
        let _ = self.writer.write_all(b"\r\n");
    }
}

impl<W: Write> Logger for UartLogger<W> {
    fn debug(&mut self, msg: &str) {
        self.line(b"[DBG] ", msg);
    }

    fn error(&mut self, msg: &str) {
        self.line(b"[ERR] ", msg);
    }
}
