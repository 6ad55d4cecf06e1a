//! Per-connection protocol state machine.
//!
//! ```text
//!            line                 rows flushed, cursor at end
//! Reading ──────────▶ (execute) ──────────▶ WritingRows ──────────▶ Reading
//!    ▲                    │
//!    │  message flushed   ▼
//!    └────────────── WritingMessage ──(QUIT)──▶ Closed
//! ```
//!
//! Every transition runs to the point where it must wait and reports what it
//! is waiting for; [`Connection::run`] does the waiting. Any socket failure,
//! peer EOF or oversized request moves to `Closed`.

use bytes::BytesMut;
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncWriteExt, Interest},
    net::TcpStream,
};
use tracing::{debug, info, warn};

use crate::{
    config::ServerConfig,
    engine::{ready, Column, Cursor, Database, Response},
    error::Error,
    sql::parse_statement,
};

enum State {
    Reading,
    WritingRows {
        cursor: Box<dyn Cursor>,
        columns: Vec<Column>,
        /// Widest line a row of `columns` can format to
        line_width: usize,
    },
    WritingMessage {
        close_after: bool,
    },
    Closed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Reading => "reading",
            State::WritingRows { .. } => "writing rows",
            State::WritingMessage { .. } => "writing message",
            State::Closed => "closed",
        }
    }
}

/// What the connection needs before its next transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    Io(Interest),
    Cursor,
    Continue,
    Done,
}

pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    db: Arc<Database>,
    state: State,
    input: BytesMut,
    /// Formatted output; bytes before `written` are already on the wire
    output: Vec<u8>,
    written: usize,
    buffer_size: usize,
    max_request: usize,
    /// First failure seen; later ones are dropped
    error: Option<io::Error>,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, db: Arc<Database>, config: &ServerConfig) -> Self {
        Self {
            stream,
            peer,
            db,
            state: State::Reading,
            input: BytesMut::with_capacity(config.buffer_size),
            output: Vec::with_capacity(config.buffer_size),
            written: 0,
            buffer_size: config.buffer_size,
            max_request: config.max_request,
            error: None,
        }
    }

    /// Drives the connection until it closes.
    pub async fn run(mut self) {
        loop {
            match self.step() {
                Wait::Continue => tokio::task::yield_now().await,
                Wait::Io(interest) => {
                    if let Err(e) = self.stream.ready(interest).await {
                        let (state, _) = self.fail(e);
                        self.state = state;
                    }
                }
                Wait::Cursor => {
                    let result = match &mut self.state {
                        State::WritingRows { cursor, .. } => ready(cursor.as_mut()).await,
                        _ => Ok(()),
                    };
                    if let Err(e) = result {
                        let (state, _) = self.cursor_failed(e);
                        self.state = state;
                    }
                }
                Wait::Done => break,
            }
        }

        let _ = self.stream.shutdown().await;
        match &self.error {
            Some(e) => warn!(peer = %self.peer, error = %e, "connection closed on error"),
            None => info!(peer = %self.peer, "client disconnected"),
        }
    }

    fn step(&mut self) -> Wait {
        let state = std::mem::replace(&mut self.state, State::Closed);
        let from = state.name();
        let (next, wait) = match state {
            State::Reading => self.on_reading(),
            State::WritingRows {
                cursor,
                columns,
                line_width,
            } => self.on_writing_rows(cursor, columns, line_width),
            State::WritingMessage { close_after } => self.on_writing_message(close_after),
            State::Closed => (State::Closed, Wait::Done),
        };
        if from != next.name() {
            debug!(peer = %self.peer, from, to = next.name(), "transition");
        }
        self.state = next;
        wait
    }

    fn on_reading(&mut self) -> (State, Wait) {
        loop {
            if let Some(newline) = self.input.iter().position(|&b| b == b'\n') {
                if newline > self.max_request {
                    return self.oversized();
                }
                let mut line = self.input.split_to(newline + 1);
                line.truncate(newline);
                if line.last() == Some(&b'\r') {
                    line.truncate(newline - 1);
                }
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return match std::str::from_utf8(&line) {
                    Ok(text) => self.execute(text),
                    Err(_) => self.message("ERROR: request is not valid UTF-8".to_string(), false),
                };
            }
            if self.input.len() > self.max_request {
                return self.oversized();
            }

            self.input.reserve(self.buffer_size);
            match self.stream.try_read_buf(&mut self.input) {
                Ok(0) => {
                    debug!(peer = %self.peer, "peer closed");
                    return (State::Closed, Wait::Done);
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return (State::Reading, Wait::Io(Interest::READABLE));
                }
                Err(e) => return self.fail(e),
            }
        }
    }

    fn execute(&mut self, request: &str) -> (State, Wait) {
        debug!(peer = %self.peer, request, "request");
        let response = parse_statement(request).and_then(|s| self.db.execute(s));
        match response {
            Ok(Response::Rows { cursor, columns }) => {
                let line_width = line_width(&columns);
                if line_width > self.buffer_size {
                    return self.message(
                        format!(
                            "ERROR: rows can be {} bytes wide, output buffer holds {}",
                            line_width, self.buffer_size
                        ),
                        false,
                    );
                }
                (
                    State::WritingRows {
                        cursor,
                        columns,
                        line_width,
                    },
                    Wait::Continue,
                )
            }
            Ok(Response::Inserted(id)) => self.message(format!("inserted at id {}", id), false),
            Ok(Response::Deleted(n)) => self.message(format!("deleted {} rows", n), false),
            Ok(Response::Quit) => self.message("bye".to_string(), true),
            Err(e) => self.message(format!("ERROR: {}", e), false),
        }
    }

    fn on_writing_rows(
        &mut self,
        mut cursor: Box<dyn Cursor>,
        columns: Vec<Column>,
        line_width: usize,
    ) -> (State, Wait) {
        self.output.drain(..self.written);
        self.written = 0;

        // fill while another widest row still fits
        let at_end = loop {
            match cursor.is_at_end() {
                Ok(true) => break true,
                Ok(false) => {}
                Err(e) => return self.cursor_failed(e),
            }
            if self.output.len() + line_width > self.buffer_size {
                break false;
            }
            match cursor.next_row() {
                Ok(Some(row)) => {
                    if let Err(e) = row.write_line(&columns, &mut self.output) {
                        return self.cursor_failed(e);
                    }
                }
                Ok(None) => break false,
                Err(e) => return self.cursor_failed(e),
            }
        };

        if self.output.is_empty() {
            return if at_end {
                (State::Reading, Wait::Continue)
            } else {
                let wait = if cursor.is_ready() {
                    Wait::Continue
                } else {
                    Wait::Cursor
                };
                (
                    State::WritingRows {
                        cursor,
                        columns,
                        line_width,
                    },
                    wait,
                )
            };
        }

        match self.flush() {
            Ok(true) if at_end => (State::Reading, Wait::Continue),
            Ok(flushed) => (
                State::WritingRows {
                    cursor,
                    columns,
                    line_width,
                },
                if flushed {
                    Wait::Continue
                } else {
                    Wait::Io(Interest::WRITABLE)
                },
            ),
            Err(e) => self.fail(e),
        }
    }

    fn on_writing_message(&mut self, close_after: bool) -> (State, Wait) {
        match self.flush() {
            Ok(true) if close_after => (State::Closed, Wait::Done),
            Ok(true) => (State::Reading, Wait::Continue),
            Ok(false) => (
                State::WritingMessage { close_after },
                Wait::Io(Interest::WRITABLE),
            ),
            Err(e) => self.fail(e),
        }
    }

    /// Queues one response line after whatever is still pending.
    fn message(&mut self, line: String, close_after: bool) -> (State, Wait) {
        self.output.extend_from_slice(line.as_bytes());
        self.output.push(b'\n');
        (State::WritingMessage { close_after }, Wait::Continue)
    }

    /// A row source failing mid-result ends the result with an error line;
    /// rows already queued are still sent.
    fn cursor_failed(&mut self, e: Error) -> (State, Wait) {
        warn!(peer = %self.peer, error = %e, "result aborted");
        self.message(format!("ERROR: {}", e), false)
    }

    fn oversized(&mut self) -> (State, Wait) {
        self.fail(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("request exceeds {} bytes", self.max_request),
        ))
    }

    fn fail(&mut self, e: io::Error) -> (State, Wait) {
        if self.error.is_none() {
            self.error = Some(e);
        }
        (State::Closed, Wait::Done)
    }

    /// Writes pending output until done or the socket would block.
    /// Returns whether everything was written.
    fn flush(&mut self) -> io::Result<bool> {
        while self.written < self.output.len() {
            match self.stream.try_write(&self.output[self.written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        self.output.clear();
        self.written = 0;
        Ok(true)
    }
}

/// Commas, newline and the widest rendering of every column.
fn line_width(columns: &[Column]) -> usize {
    columns
        .iter()
        .map(|c| c.value_type.max_text_width())
        .sum::<usize>()
        + columns.len()
}
