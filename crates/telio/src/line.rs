use bytes::Buf;
use bytes::Bytes;
use bytes::BytesMut;
use memchr::memchr2;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

use crate::telnet::IacParser;

/// Buffered reader over a telnet peer.
///
/// Raw reads go through an [`IacParser`]; the cleaned bytes are kept in one buffer so a
/// session can switch from cooked lines (`read_line`) to keystrokes (`read_byte`) without
/// losing anything the peer already typed ahead.
#[derive(Debug)]
pub struct TelnetReader<R> {
    inner: R,
    iac: IacParser,
    raw: BytesMut,
    data: BytesMut,
    max_line_len: usize,
    // Last cooked line ended in CR; a following LF or NUL belongs to it.
    after_cr: bool,
}

impl<R> TelnetReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            iac: IacParser::new(),
            raw: BytesMut::with_capacity(4 * 1024),
            data: BytesMut::with_capacity(4 * 1024),
            max_line_len: 8 * 1024,
            after_cr: false,
        }
    }

    pub fn max_line_len(mut self, max: usize) -> Self {
        self.max_line_len = max.max(1);
        self
    }

    /// Cleaned bytes received but not yet handed out.
    pub fn buffered(&self) -> usize {
        self.data.len()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn skip_line_tail(&mut self) {
        if self.after_cr && !self.data.is_empty() {
            if matches!(self.data[0], b'\n' | 0) {
                self.data.advance(1);
            }
            self.after_cr = false;
        }
    }
}

impl<R: AsyncRead + Unpin> TelnetReader<R> {
    /// Pull one chunk off the wire into the cleaned buffer. Returns `false` on EOF.
    async fn fill(&mut self) -> std::io::Result<bool> {
        self.raw.clear();
        let n = self.inner.read_buf(&mut self.raw).await?;
        if n == 0 {
            return Ok(false);
        }
        self.iac.parse_into(&self.raw, &mut self.data);
        Ok(true)
    }

    /// Read one line terminated by CR, LF, CRLF or CR NUL, without the terminator.
    ///
    /// Returns:
    /// - `Ok(Some(bytes))` for a line (may be empty),
    /// - `Ok(None)` on EOF; an unterminated trailing line is discarded.
    pub async fn read_line(&mut self) -> std::io::Result<Option<Bytes>> {
        loop {
            self.skip_line_tail();
            if !self.after_cr {
                if let Some(i) = memchr2(b'\n', b'\r', &self.data) {
                    let line = self.data.split_to(i).freeze();
                    let eol = self.data[0];
                    self.data.advance(1);
                    self.after_cr = eol == b'\r';
                    return Ok(Some(line));
                }

                if self.data.len() > self.max_line_len {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "line too long",
                    ));
                }
            }

            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    /// Read one cleaned byte, or `Ok(None)` on EOF.
    pub async fn read_byte(&mut self) -> std::io::Result<Option<u8>> {
        loop {
            self.skip_line_tail();
            if !self.after_cr && !self.data.is_empty() {
                return Ok(Some(self.data.get_u8()));
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }
}
