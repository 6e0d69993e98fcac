//! NDJSON body decoding.
//!
//! HTTP chunk boundaries do not line up with JSON lines, so bytes are
//! buffered until a newline arrives. Each complete line is parsed with
//! [`parse_chunk`] and its text, if any, becomes one fragment.

use std::fmt::Display;
use std::pin::Pin;

use futures::{Stream, StreamExt};
use immo_core::generation::{single_line, FragmentStream, GeneratorError};

use crate::messages::parse_chunk;

struct DecodeState<S> {
    body: Pin<Box<S>>,
    buf: Vec<u8>,
    eof: bool,
    finished: bool,
}

/// Turn a streamed NDJSON body into a [`FragmentStream`].
///
/// The stream ends after a chunk with `"done": true`, when the body
/// ends, or after the first error (transport failure, `"error"` line,
/// or undecodable line).
pub fn fragment_stream<S, B, E>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    let state = DecodeState {
        body: Box::pin(body),
        buf: Vec::new(),
        eof: false,
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        let item = next_fragment(&mut state).await?;
        Some((item, state))
    })
    .boxed()
}

async fn next_fragment<S, B, E>(state: &mut DecodeState<S>) -> Option<Result<String, GeneratorError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    loop {
        if state.finished {
            return None;
        }

        if let Some(pos) = state.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = state.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let mut chunk = match parse_chunk(line) {
                Ok(chunk) => chunk,
                Err(e) => {
                    state.finished = true;
                    return Some(Err(GeneratorError::Protocol(format!("{e}: {line}"))));
                }
            };

            if let Some(error) = chunk.error.take() {
                state.finished = true;
                return Some(Err(GeneratorError::Service(single_line(&error))));
            }
            if chunk.done {
                state.finished = true;
            }
            match chunk.fragment() {
                Some(text) => return Some(Ok(text.to_string())),
                None => continue,
            }
        }

        if state.eof {
            // Unterminated trailing line: treat end of body as its newline.
            if state.buf.iter().all(u8::is_ascii_whitespace) {
                return None;
            }
            state.buf.push(b'\n');
            continue;
        }

        match state.body.next().await {
            Some(Ok(bytes)) => state.buf.extend_from_slice(bytes.as_ref()),
            Some(Err(e)) => {
                state.finished = true;
                return Some(Err(GeneratorError::Transport(e.to_string())));
            }
            None => state.eof = true,
        }
    }
}
