//! Incremental framing for an unprefixed stream of JSON values.
//!
//! The host writes JSON objects back to back with optional whitespace in
//! between and no length prefix. A frame boundary is found by parsing the
//! buffered bytes as a stream of values and taking the byte offset just past
//! the first complete one:
//!
//! ```text
//! buffer:  {"reply_id":1,"result":4}  {"reply_id":2,...
//!          ^                        ^
//!          0                        boundary (byte_offset of first value)
//! ```
//!
//! If the first value is still open when the bytes run out, the framer waits
//! for more input. Only objects and arrays may start a frame; both
//! self-delimit, so a value that parses is never a truncated prefix of a
//! longer one.

use crate::error::FramingError;
use crate::DEFAULT_MAX_FRAME_SIZE;
use bytes::{Buf, Bytes, BytesMut};
use serde_json::Value;

/// One complete JSON value extracted from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Decoded value.
    pub value: Value,
    /// Exact bytes the value was decoded from.
    pub raw: Bytes,
}

/// Accumulates stream bytes and cuts them into [`Frame`]s.
#[derive(Debug)]
pub struct JsonFramer {
    buffer: BytesMut,
    eof: bool,
    max_frame_size: usize,
}

impl JsonFramer {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            eof: false,
            max_frame_size,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Gives mutable access to the buffer so a reader can fill it in place.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Records that the transport will deliver no more bytes.
    pub fn mark_eof(&mut self) {
        self.eof = true;
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size;
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the buffered bytes without consuming them.
    pub fn peek(&self) -> &[u8] {
        &self.buffer
    }

    /// Drops buffered bytes and clears the end-of-stream flag.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.eof = false;
    }

    /// Attempts to cut the next frame from the buffer.
    ///
    /// Returns `Ok(Some(frame))` when a complete value is available,
    /// `Ok(None)` when more bytes are needed, or `Err` otherwise.
    ///
    /// On [`FramingError::FrameTooLarge`] nothing is consumed, so the call can
    /// be repeated (for example after raising the limit). On
    /// [`FramingError::IncompleteFrame`] the buffer has been emptied.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, FramingError> {
        let leading = self
            .buffer
            .iter()
            .take_while(|b| is_json_whitespace(**b))
            .count();
        self.buffer.advance(leading);

        if let Some(&first) = self.buffer.first() {
            if first != b'{' && first != b'[' {
                return Err(FramingError::UnexpectedByte(first));
            }

            if let Some((value, boundary)) = self.parse_first()? {
                if boundary > self.max_frame_size {
                    return Err(FramingError::FrameTooLarge {
                        size: boundary,
                        max: self.max_frame_size,
                    });
                }
                let raw = self.buffer.split_to(boundary).freeze();
                return Ok(Some(Frame { value, raw }));
            }
        }

        // A complete value may still arrive with the final chunk, so EOF is
        // only checked once the buffer has been inspected.
        if self.eof {
            let partial = self.buffer.split().freeze();
            return Err(FramingError::IncompleteFrame { partial });
        }

        if self.buffer.len() > self.max_frame_size {
            return Err(FramingError::FrameTooLarge {
                size: self.buffer.len(),
                max: self.max_frame_size,
            });
        }

        Ok(None)
    }

    /// Parses the first value in the buffer, returning it together with the
    /// offset of the first byte after it. `None` means the value is not
    /// finished yet.
    fn parse_first(&self) -> Result<Option<(Value, usize)>, FramingError> {
        let mut stream = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => Ok(Some((value, stream.byte_offset()))),
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(FramingError::Malformed(e)),
            None => Ok(None),
        }
    }
}

impl Default for JsonFramer {
    fn default() -> Self {
        Self::new()
    }
}

fn is_json_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn drain(framer: &mut JsonFramer) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(frame) = framer.decode_frame().unwrap() {
            out.push(frame.value);
        }
        out
    }

    #[test]
    fn test_back_to_back_objects() {
        let mut framer = JsonFramer::new();
        framer.extend(br#"{"a":1}{"b":2}"#);

        let first = framer.decode_frame().unwrap().unwrap();
        assert_eq!(first.value, json!({"a": 1}));
        assert_eq!(first.raw.as_ref(), br#"{"a":1}"#);

        let second = framer.decode_frame().unwrap().unwrap();
        assert_eq!(second.value, json!({"b": 2}));

        assert_eq!(framer.buffered(), 0);
        assert!(framer.decode_frame().unwrap().is_none());
    }

    #[test]
    fn test_whitespace_between_values() {
        let mut framer = JsonFramer::new();
        framer.extend(b"  \n{\"a\":1}\r\n\t [1,2]  ");

        assert_eq!(drain(&mut framer), vec![json!({"a": 1}), json!([1, 2])]);
        // Trailing whitespace is discarded on the next attempt.
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_partial_object_waits_for_more() {
        let mut framer = JsonFramer::new();
        framer.extend(br#"{"reply_id":3,"res"#);
        assert!(framer.decode_frame().unwrap().is_none());
        assert_eq!(framer.buffered(), 18);

        framer.extend(br#"ult":4}"#);
        let frame = framer.decode_frame().unwrap().unwrap();
        assert_eq!(frame.value, json!({"reply_id": 3, "result": 4}));
    }

    #[test]
    fn test_number_split_across_chunks() {
        let mut framer = JsonFramer::new();
        framer.extend(br#"{"a":1"#);
        assert!(framer.decode_frame().unwrap().is_none());
        framer.extend(br#"23}"#);
        assert_eq!(
            framer.decode_frame().unwrap().unwrap().value,
            json!({"a": 123})
        );
    }

    #[test]
    fn test_frame_too_large_preserves_buffer() {
        let mut framer = JsonFramer::with_max_frame_size(4);
        framer.extend(br#"{"a":1}"#);

        let err = framer.decode_frame().unwrap_err();
        assert!(matches!(
            err,
            FramingError::FrameTooLarge { size: 7, max: 4 }
        ));
        assert_eq!(framer.buffered(), 7);

        // Same state, same answer.
        assert!(matches!(
            framer.decode_frame(),
            Err(FramingError::FrameTooLarge { .. })
        ));

        framer.set_max_frame_size(64);
        let frame = framer.decode_frame().unwrap().unwrap();
        assert_eq!(frame.value, json!({"a": 1}));
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_unfinished_frame_over_limit() {
        let mut framer = JsonFramer::with_max_frame_size(8);
        framer.extend(br#"{"padding":"xxxxxxxx"#);
        assert!(matches!(
            framer.decode_frame(),
            Err(FramingError::FrameTooLarge { size: 20, max: 8 })
        ));
        assert_eq!(framer.buffered(), 20);
    }

    #[test]
    fn test_eof_mid_object() {
        let mut framer = JsonFramer::new();
        framer.extend(br#"{"a":1"#);
        assert!(framer.decode_frame().unwrap().is_none());

        framer.mark_eof();
        match framer.decode_frame() {
            Err(FramingError::IncompleteFrame { partial }) => {
                assert_eq!(partial.as_ref(), br#"{"a":1"#);
            }
            other => panic!("expected IncompleteFrame, got {:?}", other),
        }
        assert_eq!(framer.buffered(), 0);

        // A reset framer does not replay the discarded bytes.
        framer.clear();
        framer.extend(br#"{"b":2}"#);
        assert_eq!(drain(&mut framer), vec![json!({"b": 2})]);
    }

    #[test]
    fn test_eof_after_complete_object() {
        let mut framer = JsonFramer::new();
        framer.extend(br#"{"a":1} "#);
        framer.mark_eof();

        assert_eq!(
            framer.decode_frame().unwrap().unwrap().value,
            json!({"a": 1})
        );
        assert!(matches!(
            framer.decode_frame(),
            Err(FramingError::IncompleteFrame { partial }) if partial.is_empty()
        ));
    }

    #[test]
    fn test_rejects_scalar_start() {
        let mut framer = JsonFramer::new();
        framer.extend(b" 42 ");
        assert!(matches!(
            framer.decode_frame(),
            Err(FramingError::UnexpectedByte(b'4'))
        ));
    }

    #[test]
    fn test_malformed_json() {
        let mut framer = JsonFramer::new();
        framer.extend(br#"{"a" 1}"#);
        assert!(matches!(
            framer.decode_frame(),
            Err(FramingError::Malformed(_))
        ));
    }

    #[test]
    fn test_garbage_after_object_is_next_frame_problem() {
        let mut framer = JsonFramer::new();
        framer.extend(br#"{"a":1}oops"#);
        assert_eq!(
            framer.decode_frame().unwrap().unwrap().value,
            json!({"a": 1})
        );
        assert!(matches!(
            framer.decode_frame(),
            Err(FramingError::UnexpectedByte(b'o'))
        ));
    }

    #[test]
    fn test_braces_inside_strings() {
        let mut framer = JsonFramer::new();
        framer.extend(br#"{"code":"return {1, 2}]"}{"x":"}"}"#);
        assert_eq!(
            drain(&mut framer),
            vec![json!({"code": "return {1, 2}]"}), json!({"x": "}"})]
        );
    }

    #[test]
    fn test_one_byte_at_a_time() {
        let input = br#"{"reply_id":0,"result":4,"error":null,"timeout":false} {"event":"x"}"#;
        let mut framer = JsonFramer::new();
        let mut values = Vec::new();
        for byte in input.iter() {
            framer.extend(std::slice::from_ref(byte));
            values.extend(drain(&mut framer));
        }
        assert_eq!(
            values,
            vec![
                json!({"reply_id": 0, "result": 4, "error": null, "timeout": false}),
                json!({"event": "x"}),
            ]
        );
    }

    fn value_strategy() -> impl Strategy<Value = Value> {
        (any::<i32>(), "[a-z{}\\[\\] ]{0,12}", any::<bool>()).prop_map(|(n, s, flag)| {
            if flag {
                json!({"reply_id": n.unsigned_abs(), "result": s, "timeout": false})
            } else {
                json!([n, s, {"nested": {"flag": flag}}])
            }
        })
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_frames(
            values in prop::collection::vec(value_strategy(), 1..8),
            separators in prop::collection::vec(
                prop::sample::select(vec!["", " ", "\n", "\r\n", "\t  "]),
                8,
            ),
            chunk_sizes in prop::collection::vec(1usize..24, 1..16),
        ) {
            let mut stream = Vec::new();
            for (value, sep) in values.iter().zip(separators.iter()) {
                stream.extend_from_slice(sep.as_bytes());
                stream.extend_from_slice(&serde_json::to_vec(value).unwrap());
            }

            let mut whole = JsonFramer::new();
            whole.extend(&stream);
            let expected = drain(&mut whole);
            prop_assert_eq!(&expected, &values);

            let mut chunked = JsonFramer::new();
            let mut got = Vec::new();
            let mut rest = stream.as_slice();
            let mut sizes = chunk_sizes.iter().cycle();
            while !rest.is_empty() {
                let n = (*sizes.next().unwrap()).min(rest.len());
                let (chunk, tail) = rest.split_at(n);
                chunked.extend(chunk);
                got.extend(drain(&mut chunked));
                rest = tail;
            }
            prop_assert_eq!(got, expected);
        }
    }
}
