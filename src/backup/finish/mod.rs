//! Explicit end-of-stream for the writer layers of a container.
//!
//! Encoders must be finished (not just dropped) for trailers to be written:
//! the age stream needs its last authenticated chunk and xz its index and
//! footer. Each layer hands back the writer it wraps so a chain can be
//! unwound from the inside out.

use age::stream::StreamWriter;
use liblzma::write::XzEncoder;
use std::io::{BufWriter, Error, IntoInnerError, Write};

pub trait Finish<O> {
    fn finish(self) -> Result<O, Error>;
}

impl<W: Write> Finish<W> for StreamWriter<W> {
    fn finish(self) -> Result<W, Error> {
        self.finish()
    }
}

impl<W: Write> Finish<W> for XzEncoder<W> {
    fn finish(self) -> Result<W, Error> {
        self.finish()
    }
}

impl<W: Write> Finish<W> for BufWriter<W> {
    fn finish(self) -> Result<W, Error> {
        self.into_inner().map_err(IntoInnerError::into_error)
    }
}
