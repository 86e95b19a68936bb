//! MLLP framing for the outbound leg of the gateway.
//!
//! A frame is a Vertical-Tab start block, the raw HL7 content, then a File-Separator + CR trailer.
//! The gateway encodes every inbound HTTP body into one frame and decodes exactly one ack/nack frame back.

use bytes::buf::{Buf, BufMut};
use bytes::{Bytes, BytesMut};
use log::{debug, trace};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Largest unterminated frame we will buffer before giving up on the peer.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Encodes outbound messages and decodes acknowledgements, for use inside a
/// [`Framed`](tokio_util::codec::Framed) transport.
#[derive(Debug, Clone)]
pub struct MllpCodec {
    max_frame_length: usize,
}

impl MllpCodec {
    pub const BLOCK_HEADER: u8 = 0x0B; //Vertical-Tab char, the marker for the start of a message
    pub const BLOCK_FOOTER: [u8; 2] = [0x1C, 0x0D]; //File-Separator char + CR, the marker for the end of a message

    /// Creates a codec with the default frame length limit.
    /// ```
    /// use hl7_mllp_gateway::MllpCodec;
    /// let mllp = MllpCodec::new();
    /// ```
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    /// Creates a codec that rejects frames longer than `max_frame_length` bytes.
    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        MllpCodec { max_frame_length }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Position of the first footer at or after `from`.
    /// MLLP is synchronous, so there is at most one complete frame on the wire.
    fn get_footer_position(src: &[u8], from: usize) -> Option<usize> {
        let position = src
            .get(from..)?
            .windows(2)
            .position(|pair| pair == MllpCodec::BLOCK_FOOTER)
            .map(|i| i + from);

        match position {
            Some(index) => trace!("MLLP: Found footer at index {}", index),
            None => trace!("MLLP: Unable to find footer..."),
        }
        position
    }
}

impl Default for MllpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Bytes> for MllpCodec {
    type Error = io::Error;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(payload.len() + 3); //header + 2 byte footer
        dst.put_u8(MllpCodec::BLOCK_HEADER);
        dst.put_slice(&payload);
        dst.put_slice(&MllpCodec::BLOCK_FOOTER);

        debug!("MLLP: Encoded {} byte frame for send", dst.len());
        Ok(())
    }
}

impl Decoder for MllpCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // anything before the start block is noise and is dropped
        let start = match src.iter().position(|b| *b == MllpCodec::BLOCK_HEADER) {
            Some(start) => start,
            None => {
                if !src.is_empty() {
                    trace!("MLLP: Discarding {} bytes with no start block", src.len());
                    src.clear();
                }
                return Ok(None);
            }
        };
        src.advance(start);

        match MllpCodec::get_footer_position(src, 1) {
            Some(end) => {
                let mut frame = src.split_to(end + MllpCodec::BLOCK_FOOTER.len());
                frame.truncate(end); // drop the footer
                frame.advance(1); // and the header
                Ok(Some(frame))
            }
            None if src.len() > self.max_frame_length => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "MLLP frame exceeds {} bytes without an end block",
                    self.max_frame_length
                ),
            )),
            None => Ok(None),
        }
    }
}

//////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use super::*;

    fn wrap_for_mllp_mut(s: &str) -> BytesMut {
        BytesMut::from(format!("\x0B{}\x1C\x0D", s).as_str())
    }

    #[test]
    fn wraps_simple_data() {
        let mut m = MllpCodec::new();
        let mut output_buf = BytesMut::with_capacity(64);

        m.encode(Bytes::from_static(b"abcd"), &mut output_buf)
            .expect("encode should not fail");

        assert_eq!(&output_buf[..], b"\x0Babcd\x1C\x0D");
    }

    #[test]
    fn find_footer_location() {
        let data = wrap_for_mllp_mut("abcd"); //footer at position 5, as there's a leading byte added
        assert_eq!(MllpCodec::get_footer_position(&data, 1), Some(5));
    }

    #[test]
    fn missing_footer_detected() {
        let data = BytesMut::from("no footer");
        assert_eq!(MllpCodec::get_footer_position(&data, 0), None);
    }

    #[test]
    fn ensure_decoder_finds_simple_message() {
        let mut data = wrap_for_mllp_mut("abcd");
        let mut m = MllpCodec::new();

        match m.decode(&mut data) {
            Ok(Some(message)) => assert_eq!(&message[..], b"abcd"),
            other => panic!("Failed to find a simple message: {:?}", other),
        }
        assert!(data.is_empty(), "Decoder left data sitting in the buffer after read!");
    }

    #[test]
    fn ignores_bytes_before_start_block() {
        let mut data = BytesMut::from("junk\x0BMSA|AA\x1C\x0D");
        let mut m = MllpCodec::new();

        let message = m.decode(&mut data).unwrap().unwrap();
        assert_eq!(&message[..], b"MSA|AA");
    }

    #[test]
    fn data_after_end_stays_in_buffer() {
        let mut data = BytesMut::from("\x0BTest Data\x1C\x0DMore Data");
        let mut m = MllpCodec::new();

        let message = m.decode(&mut data).unwrap().unwrap();
        assert_eq!(&message[..], b"Test Data");
        assert_eq!(&data[..], b"More Data");
    }

    #[test]
    fn test_message_split_over_multiple_reads() {
        // a Framed transport keeps unconsumed bytes in `src` between calls
        let mut mllp = MllpCodec::new();
        let mut buf = BytesMut::from("\x0BTest");

        assert!(mllp.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b" Data");
        assert!(mllp.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b" Here\x1C");
        assert!(mllp.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\x0D");

        let message = mllp.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&message[..], b"Test Data Here");
    }

    #[test]
    fn test_real_message() {
        let mut mllp = MllpCodec::new();
        let mut data = wrap_for_mllp_mut("MSH|^~\\&|ZIS|1^AHospital|||200405141144||¶ADT^A01|20041104082400|P|2.3|||AL|NE|||8859/15|¶EVN|A01|20041104082400.0000+0100|20041104082400¶PID||\"\"|10||Vries^Danny^D.^^de||19951202|M|||Rembrandlaan^7^Leiden^^7301TH^\"\"^^P||\"\"|\"\"||\"\"|||||||\"\"|\"\"¶PV1||I|3w^301^\"\"^01|S|||100^van den Berg^^A.S.^^\"\"^dr|\"\"||9||||H||||20041104082400.0000+0100");

        let message = mllp.decode(&mut data).unwrap().unwrap();
        assert_eq!(message.len(), 338);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut mllp = MllpCodec::with_max_frame_length(8);
        let mut data = BytesMut::from("\x0B0123456789abcdef");

        let err = mllp.decode(&mut data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn noise_without_start_block_is_discarded() {
        let mut mllp = MllpCodec::new();
        let mut data = BytesMut::from("\r\n");

        assert!(mllp.decode(&mut data).unwrap().is_none());
        assert!(data.is_empty());
    }
}
