//! Line-oriented, timeout-bound GTP channel over a subprocess's pipes.
//!
//! A background thread frames blank-line-terminated responses from stdout
//! onto a bounded queue; a second thread forwards stderr into a rotating
//! capture file. The requester only ever waits on the queue, polling in
//! short slices so that a dead stream is noticed without waiting out the
//! full deadline.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::process::{ChildStderr, ChildStdin, ChildStdout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::parse_response;
use crate::error::GtpError;

/// Slice at which the response queue is polled while waiting on a request.
const POLL_SLICE: Duration = Duration::from_millis(100);
const QUEUE_BOUND: usize = 64;

/// Shared handle to an engine's stderr capture file. The forwarding thread
/// writes through it while the supervisor rotates it between games, hence
/// the lock. `None` drops stderr into the trace log instead.
pub type StderrSink = Arc<Mutex<Option<File>>>;

pub struct GtpTransport {
    name: String,
    writer: ChildStdin,
    responses: Receiver<String>,
    stream_down: Arc<AtomicBool>,
    stdout_thread: Option<JoinHandle<()>>,
    stderr_thread: Option<JoinHandle<()>>,
    /// Echo raw GTP traffic to stderr (the `-d gtp` display mode).
    pub echo: bool,
}

impl GtpTransport {
    pub fn new(
        name: &str,
        stdin: ChildStdin,
        stdout: ChildStdout,
        stderr: ChildStderr,
        sink: StderrSink,
    ) -> GtpTransport {
        let stream_down = Arc::new(AtomicBool::new(false));
        let (tx, rx) = sync_channel(QUEUE_BOUND);

        let stdout_thread = {
            let name = name.to_string();
            let down = stream_down.clone();
            thread::spawn(move || frame_responses(&name, stdout, tx, down))
        };
        let stderr_thread = {
            let name = name.to_string();
            thread::spawn(move || forward_stderr(&name, stderr, sink))
        };

        GtpTransport {
            name: name.to_string(),
            writer: stdin,
            responses: rx,
            stream_down,
            stdout_thread: Some(stdout_thread),
            stderr_thread: Some(stderr_thread),
            echo: false,
        }
    }

    pub fn is_down(&self) -> bool {
        self.stream_down.load(Ordering::Relaxed)
    }

    /// Write a command plus newline; no response is awaited.
    pub fn send(&mut self, command: &str) -> Result<(), GtpError> {
        trace!(engine = %self.name, "send: {command}");
        if self.echo {
            eprintln!("{}< {command}", self.name);
        }
        self.writer
            .write_all(command.trim_end().as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush())
            .map_err(GtpError::Process)
    }

    /// Send a command and block until its response is dequeued or `timeout`
    /// elapses. `None` waits until the stream closes. The protocol is
    /// strictly synchronous: one outstanding request per engine; a timed-out
    /// command's late response is drained by the next call.
    pub fn request(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<String, GtpError> {
        self.send(command)?;
        self.receive(timeout)
    }

    pub fn receive(&mut self, timeout: Option<Duration>) -> Result<String, GtpError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            match self.responses.recv_timeout(POLL_SLICE) {
                Ok(text) => {
                    trace!(engine = %self.name, "recv: {text}");
                    if self.echo {
                        eprintln!("{}> {text}", self.name);
                    }
                    return parse_response(&text);
                }
                Err(RecvTimeoutError::Disconnected) => return Err(GtpError::Shutdown),
                Err(RecvTimeoutError::Timeout) => {
                    if self.is_down() {
                        // Anything framed before the stream died is still
                        // delivered; after that the channel disconnects.
                        match self.responses.try_recv() {
                            Ok(text) => return parse_response(&text),
                            Err(_) => return Err(GtpError::Shutdown),
                        }
                    }
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            return Err(GtpError::Timeout(timeout.unwrap_or_default()));
                        }
                    }
                }
            }
        }
    }

    /// Join the reader threads. Called during orderly shutdown, after the
    /// process has exited, so no thread writes to a closed capture file.
    pub fn join(&mut self) {
        if let Some(handle) = self.stdout_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Read one GTP response: skip leading blank lines, accumulate until the
/// terminating blank line, strip carriage returns, right-trim. `None` on
/// end of stream.
fn read_response<R: BufRead>(input: &mut R) -> std::io::Result<Option<String>> {
    let mut response = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if input.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&buf).replace('\r', "");
        if line.trim().is_empty() {
            if response.is_empty() {
                continue;
            }
            return Ok(Some(response.trim_end().to_string()));
        }
        response.push_str(&line);
    }
}

fn frame_responses(
    name: &str,
    stdout: ChildStdout,
    queue: SyncSender<String>,
    down: Arc<AtomicBool>,
) {
    let mut input = BufReader::new(stdout);
    loop {
        match read_response(&mut input) {
            Ok(Some(response)) => {
                if queue.send(response).is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!(engine = %name, "stdout closed");
                break;
            }
            Err(err) => {
                debug!(engine = %name, "stdout read failed: {err}");
                break;
            }
        }
    }
    down.store(true, Ordering::Relaxed);
}

fn forward_stderr(name: &str, stderr: ChildStderr, sink: StderrSink) {
    let mut input = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match input.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                if let Ok(mut guard) = sink.lock() {
                    match *guard {
                        Some(ref mut file) => {
                            let _ = file.write_all(line.as_bytes());
                        }
                        None => trace!(engine = %name, "stderr: {}", line.trim_end()),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_blank_line_terminated_responses() {
        let buf = b"\n\n= ok first\n\n? illegal move\n\n= multi\nline\n\n" as &[u8];
        let mut reader = BufReader::new(buf);

        let response = read_response(&mut reader).expect("read failed");
        assert_eq!(Some("= ok first".to_string()), response);
        let response = read_response(&mut reader).expect("read failed");
        assert_eq!(Some("? illegal move".to_string()), response);
        let response = read_response(&mut reader).expect("read failed");
        assert_eq!(Some("= multi\nline".to_string()), response);
        let response = read_response(&mut reader).expect("read failed");
        assert_eq!(None, response);
    }

    #[test]
    fn strips_carriage_returns() {
        let buf = b"= C3\r\n\r\n" as &[u8];
        let mut reader = BufReader::new(buf);
        let response = read_response(&mut reader).expect("read failed");
        assert_eq!(Some("= C3".to_string()), response);
    }
}
