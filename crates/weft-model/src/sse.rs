// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider-neutral Server-Sent-Events line parser.
//!
//! SSE frames can be split across TCP chunks at any byte, so the parser is
//! incremental: [`SseParser::feed`] consumes a chunk, buffers the trailing
//! partial line, and returns every frame completed by that chunk.  Payload
//! interpretation is the adapter's job; this type only implements the line
//! grammar:
//!
//! - lines are split on LF (a trailing CR is stripped)
//! - `event:` sets the frame's event name
//! - `data:` appends a data line; multi-line data is joined with LF
//! - a blank line dispatches the accumulated frame
//! - the sentinel payload `[DONE]` terminates the stream
//! - comment lines (leading `:`) and unknown fields are ignored

/// One dispatched SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, when present.
    pub event: Option<String>,
    /// All `data:` lines joined with LF.
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buf: String,
    event: Option<String>,
    data_lines: Vec<String>,
    done: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` sentinel has been seen.  After that, all further
    /// input is ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Consume a chunk of the byte stream and return completed frames.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseFrame> {
        if self.done {
            return Vec::new();
        }
        self.buf.push_str(chunk);
        let mut frames = Vec::new();
        // Process every complete line (i.e. everything before the last '\n').
        while let Some(pos) = self.buf.find('\n') {
            let line = self.buf[..pos].trim_end_matches('\r').to_string();
            self.buf.drain(..=pos);
            if self.process_line(&line, &mut frames) {
                break;
            }
        }
        frames
    }

    /// Flush the stream end: any partial line left in the buffer is processed
    /// as if terminated, and a pending frame with data is dispatched.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }
        if !self.buf.is_empty() {
            let line = std::mem::take(&mut self.buf);
            let line = line.trim_end_matches('\r').to_string();
            if self.process_line(&line, &mut frames) {
                return frames;
            }
        }
        if !self.data_lines.is_empty() {
            self.dispatch(&mut frames);
        }
        frames
    }

    /// Handle one complete line.  Returns `true` when the stream terminated.
    fn process_line(&mut self, line: &str, frames: &mut Vec<SseFrame>) -> bool {
        if line.is_empty() {
            // Blank line: dispatch boundary.
            if !self.data_lines.is_empty() || self.event.is_some() {
                if self.dispatch(frames) {
                    return true;
                }
            }
            return false;
        }
        if line.starts_with(':') {
            // Comment line, e.g. keep-alive pings.
            return false;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            // A field name with no colon has an empty value per the SSE spec.
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            // id, retry, and any future fields are ignored.
            _ => {}
        }
        false
    }

    /// Emit the pending frame.  Returns `true` on the `[DONE]` sentinel.
    fn dispatch(&mut self, frames: &mut Vec<SseFrame>) -> bool {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data_lines).join("\n");
        if data.trim() == "[DONE]" {
            self.done = true;
            return true;
        }
        frames.push(SseFrame { event, data });
        false
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn all_frames(input: &str) -> Vec<SseFrame> {
        let mut p = SseParser::new();
        let mut frames = p.feed(input);
        frames.extend(p.finish());
        frames
    }

    #[test]
    fn single_event_with_data() {
        let frames = all_frames(
            "event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n",
        );
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("content_block_delta"));
        assert!(frames[0].data.contains("\"hi\""));
    }

    #[test]
    fn data_only_frame_has_no_event() {
        let frames = all_frames("data: {\"x\":1}\n\n");
        assert_eq!(frames.len(), 1);
        assert!(frames[0].event.is_none());
    }

    #[test]
    fn multi_line_data_joined_with_lf() {
        let frames = all_frames("data: line1\ndata: line2\n\n");
        assert_eq!(frames[0].data, "line1\nline2");
    }

    #[test]
    fn blank_line_is_dispatch_boundary() {
        let frames = all_frames("data: a\n\ndata: b\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "a");
        assert_eq!(frames[1].data, "b");
    }

    #[test]
    fn done_sentinel_terminates() {
        let mut p = SseParser::new();
        let frames = p.feed("data: before\n\ndata: [DONE]\n\ndata: after\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "before");
        assert!(p.is_done());
        assert!(p.feed("data: more\n\n").is_empty(), "input after [DONE] is ignored");
    }

    #[test]
    fn comment_lines_ignored() {
        let frames = all_frames(": keep-alive\ndata: x\n: another comment\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
    }

    #[test]
    fn unknown_fields_ignored() {
        let frames = all_frames("id: 42\nretry: 1000\ndata: x\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
    }

    #[test]
    fn crlf_lines_handled() {
        let frames = all_frames("event: ping\r\ndata: {}\r\n\r\n");
        assert_eq!(frames[0].event.as_deref(), Some("ping"));
        assert_eq!(frames[0].data, "{}");
    }

    #[test]
    fn split_across_chunks() {
        let mut p = SseParser::new();
        assert!(p.feed("data: hel").is_empty());
        assert!(p.feed("lo\n").is_empty());
        let frames = p.feed("\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "hello");
    }

    #[test]
    fn partial_line_processed_at_end_of_stream() {
        let mut p = SseParser::new();
        assert!(p.feed("data: tail").is_empty());
        let frames = p.finish();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "tail");
    }

    #[test]
    fn pending_frame_without_blank_line_dispatched_on_finish() {
        let mut p = SseParser::new();
        assert!(p.feed("data: x\n").is_empty());
        let frames = p.finish();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
    }

    #[test]
    fn done_as_partial_final_line_still_terminates() {
        let mut p = SseParser::new();
        p.feed("data: [DONE]");
        let frames = p.finish();
        assert!(frames.is_empty());
        assert!(p.is_done());
    }

    #[test]
    fn data_without_space_after_colon() {
        let frames = all_frames("data:x\n\n");
        assert_eq!(frames[0].data, "x");
    }

    #[test]
    fn event_name_resets_between_frames() {
        let frames = all_frames("event: a\ndata: 1\n\ndata: 2\n\n");
        assert_eq!(frames[0].event.as_deref(), Some("a"));
        assert!(frames[1].event.is_none());
    }
}
