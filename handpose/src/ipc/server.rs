//! IPC server: line framing, tracing and the request loop.

use std::io::{self, BufRead, Read, Write};

use tracing::{debug, warn};

use super::dispatch::{self, IpcEngine};
use crate::pose::Clock;

/// Maximum message payload size (1 MiB).
const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Behaviour switches for the request loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerOptions {
    /// Log every request and response at debug level.
    pub trace: bool,
    /// Run an engine update after each `hand-frame` and push its events.
    pub auto_tick: bool,
}

/// Serve requests from `reader` until EOF, writing responses to `writer`.
///
/// Returns the number of messages handled. Blank lines are skipped. A
/// line longer than `MAX_MESSAGE_SIZE` is answered with an error and
/// discarded without being buffered.
pub fn serve<R, W, C>(
    engine: &mut IpcEngine<C>,
    mut reader: R,
    mut writer: W,
    opts: ServerOptions,
) -> io::Result<u64>
where
    R: BufRead,
    W: Write,
    C: Clock,
{
    let mut handled = 0;
    let mut buf = Vec::with_capacity(4096);
    while let Some(frame) = read_frame(&mut reader, &mut buf)? {
        if frame == Frame::Oversized {
            handled += 1;
            warn!(limit = MAX_MESSAGE_SIZE, "message exceeds maximum size");
            write_line(
                &mut writer,
                &dispatch::error_response(0, "message exceeds maximum size"),
            )?;
            continue;
        }

        let line = String::from_utf8_lossy(&buf);
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }
        handled += 1;
        if opts.trace {
            debug!(direction = "in", "{}", raw);
        }

        let value = match dispatch::parse_message(raw) {
            Ok(v) => v,
            Err(response) => {
                write_line(&mut writer, &response)?;
                continue;
            }
        };

        if let Some(response) = dispatch::dispatch(engine, &value) {
            if opts.trace {
                debug!(direction = "out", "{}", response);
            }
            write_line(&mut writer, &response)?;
        }

        let is_frame = dispatch::get_keyword(&value, "type").as_deref() == Some("hand-frame");
        if opts.auto_tick && is_frame {
            for event in engine.update() {
                write_line(&mut writer, &event.to_sexp())?;
            }
        }
    }
    Ok(handled)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Line,
    Oversized,
}

/// Read one newline-terminated line into `buf`, holding at most
/// `MAX_MESSAGE_SIZE + 1` bytes. `None` at EOF.
fn read_frame<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<Frame>> {
    buf.clear();
    let limit = MAX_MESSAGE_SIZE as u64 + 1;
    let n = reader.by_ref().take(limit).read_until(b'\n', buf)?;
    if n == 0 {
        return Ok(None);
    }
    if buf.len() > MAX_MESSAGE_SIZE && buf.last() != Some(&b'\n') {
        buf.clear();
        skip_line(reader)?;
        return Ok(Some(Frame::Oversized));
    }
    Ok(Some(Frame::Line))
}

/// Consume input up to and including the next newline.
fn skip_line<R: BufRead>(reader: &mut R) -> io::Result<()> {
    loop {
        let (found, used) = {
            let available = reader.fill_buf()?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => (true, i + 1),
                None => (false, available.len()),
            }
        };
        reader.consume(used);
        if found {
            return Ok(());
        }
    }
}

fn write_line<W: Write>(writer: &mut W, payload: &str) -> io::Result<()> {
    writer.write_all(payload.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{PoseConfig, PoseEngine, SteppingClock};
    use std::io::Cursor;

    fn run(input: &str, opts: ServerOptions) -> (u64, Vec<String>) {
        let mut engine = PoseEngine::with_clock(PoseConfig::default(), SteppingClock::new(0.0));
        let mut out = Vec::new();
        let handled = serve(&mut engine, Cursor::new(input), &mut out, opts).unwrap();
        let text = String::from_utf8(out).unwrap();
        (handled, text.lines().map(str::to_string).collect())
    }

    const SESSION: &str = "(:type :hand-add :id 1 :handedness :right)\n\
        \n\
        (:type :pose-define :id 2 :handedness :right :name \"flat\" :positions ((:joint \"index-tip\" :mm (0 80 0))))\n\
        (:type :hand-frame :id 3 :hand-id 1 :joints ((:joint \"wrist\" :position (0 1 0)) (:joint \"index-tip\" :position (0 1.08 0))))\n";

    #[test]
    fn test_one_response_per_line() {
        let (handled, lines) = run(SESSION, ServerOptions::default());
        assert_eq!(handled, 3);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains(":hand-id 1"));
        assert!(lines[2].contains(":id 3 :status :ok"));
    }

    #[test]
    fn test_auto_tick_pushes_events() {
        let opts = ServerOptions {
            auto_tick: true,
            ..Default::default()
        };
        let (_, lines) = run(SESSION, opts);
        assert_eq!(lines.len(), 5);
        assert!(lines[3].starts_with("(:event :pose-changed"));
        assert!(lines[4].starts_with("(:event :pose-began :hand-id 1 :name \"flat\""));
    }

    #[test]
    fn test_malformed_line_keeps_serving() {
        let (handled, lines) = run("(:type :ping\n(:type :ping :id 2)\n", ServerOptions::default());
        assert_eq!(handled, 2);
        assert!(lines[0].contains("malformed s-expression"));
        assert!(lines[1].contains(":id 2 :status :ok"));
    }

    #[test]
    fn test_oversized_message_rejected() {
        let big = format!(
            "(:type :ping :pad \"{}\")\n(:type :ping :id 5)\n",
            "x".repeat(3 * MAX_MESSAGE_SIZE)
        );
        let (handled, lines) = run(&big, ServerOptions::default());
        assert_eq!(handled, 2);
        assert!(lines[0].contains("exceeds maximum size"));
        assert!(lines[1].contains(":id 5 :status :ok"));
    }

    #[test]
    fn test_read_frame_bounds_buffer() {
        let input = format!("{}\nshort\nlast", "y".repeat(MAX_MESSAGE_SIZE + 10));
        let mut reader = Cursor::new(input);
        let mut buf = Vec::new();
        assert_eq!(read_frame(&mut reader, &mut buf).unwrap(), Some(Frame::Oversized));
        assert!(buf.len() <= MAX_MESSAGE_SIZE + 1);
        assert_eq!(read_frame(&mut reader, &mut buf).unwrap(), Some(Frame::Line));
        assert_eq!(buf, b"short\n");
        assert_eq!(read_frame(&mut reader, &mut buf).unwrap(), Some(Frame::Line));
        assert_eq!(buf, b"last");
        assert_eq!(read_frame(&mut reader, &mut buf).unwrap(), None);
    }
}
