//! Request/response framing
//!
//! Frames on the wire are `[len: u32 BE][msg id: u32 BE][body]`, where `len`
//! covers the id and the body. Message ids come from two identifier enums in
//! the schema package: enum value `REQUEST_FOO` numbers message
//! `request_foo`, and likewise for responses.
//!
//! Also decodes tagged record streams, a sequence of
//! `0x78 <varint msg id> 0x72 <varint len> <body>` records.
//!
//! Nothing here touches sockets; callers feed bytes in and take frames out.

use std::io::Read;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::codec::DynamicMessage;
use crate::config::FramingConfig;
use crate::error::{Result, SchemaError};
use crate::linker::child_name;
use crate::registry::TypeRegistry;
use crate::types::{EnumType, MessageType};

const LEN_PREFIX: usize = 4;
const ID_LEN: usize = 4;

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_id: u32,
    pub body: Bytes,
}

/// Encode one frame
pub fn encode_frame(msg_id: u32, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LEN_PREFIX + ID_LEN + body.len());
    buf.put_u32((ID_LEN + body.len()) as u32);
    buf.put_u32(msg_id);
    buf.put_slice(body);
    buf
}

/// Incremental frame decoder
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_len: usize,
}

impl FrameDecoder {
    pub fn new(config: &FramingConfig) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_len: config.max_frame_len,
        }
    }

    /// Append received bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed by a frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame, or `None` until more bytes arrive
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.buf.len() < LEN_PREFIX {
            return Ok(None);
        }

        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len < ID_LEN {
            return Err(SchemaError::Framing(format!(
                "frame length {} leaves no room for a message id",
                len
            )));
        }
        if len > self.max_frame_len {
            return Err(SchemaError::Framing(format!(
                "frame length {} exceeds limit {}",
                len, self.max_frame_len
            )));
        }
        if self.buf.len() < LEN_PREFIX + len {
            return Ok(None);
        }

        self.buf.advance(LEN_PREFIX);
        let mut frame = self.buf.split_to(len);
        let msg_id = frame.get_u32();
        trace!(msg_id, len, "decoded frame");
        Ok(Some(Frame {
            msg_id,
            body: frame.freeze(),
        }))
    }

    /// Fail if a partial frame is left over at end of input
    pub fn finish(&self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let expected = if self.buf.len() < LEN_PREFIX {
            LEN_PREFIX
        } else {
            LEN_PREFIX + u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize
        };
        Err(SchemaError::Truncated {
            expected: expected - self.buf.len(),
            actual: 0,
        })
    }
}

/// Which identifier enum a message id belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// Message id dispatch for one schema package
#[derive(Debug, Clone)]
pub struct MessageIdTable<'r> {
    registry: &'r TypeRegistry,
    package: String,
    requests: &'r EnumType,
    responses: &'r EnumType,
}

impl<'r> MessageIdTable<'r> {
    /// Resolve the identifier enums of `package`
    pub fn new(registry: &'r TypeRegistry, package: &str, config: &FramingConfig) -> Result<Self> {
        let scope = if package.is_empty() {
            String::new()
        } else {
            format!(".{}", package)
        };
        let find = |name: &str| {
            let fq = child_name(&scope, name);
            registry
                .enum_by_name(&fq)
                .ok_or(SchemaError::UnresolvedReference {
                    reference: fq,
                    from: "message id table".to_string(),
                })
        };

        Ok(Self {
            registry,
            package: scope.clone(),
            requests: find(&config.request_enum)?,
            responses: find(&config.response_enum)?,
        })
    }

    fn ids(&self, direction: Direction) -> &'r EnumType {
        match direction {
            Direction::Request => self.requests,
            Direction::Response => self.responses,
        }
    }

    /// Message id of `message_type`
    pub fn id_of(&self, direction: Direction, message_type: &MessageType) -> Result<u32> {
        let ids = self.ids(direction);
        let value = ids
            .value_by_name(&message_type.name.to_uppercase())
            .ok_or_else(|| {
                SchemaError::Framing(format!(
                    "{} has no entry in {}",
                    message_type.full_name, ids.full_name
                ))
            })?;
        u32::try_from(value.number).map_err(|_| {
            SchemaError::Framing(format!("negative message id {} for {}", value.number, value.name))
        })
    }

    /// Message type numbered `msg_id`
    pub fn type_of(&self, direction: Direction, msg_id: u32) -> Result<&'r MessageType> {
        let ids = self.ids(direction);
        let value = i32::try_from(msg_id)
            .ok()
            .and_then(|n| ids.value_by_number(n))
            .ok_or_else(|| {
                SchemaError::Framing(format!("unknown message id {} in {}", msg_id, ids.full_name))
            })?;

        let name = child_name(&self.package, &value.name.to_lowercase());
        self.registry
            .message_by_name(&name)
            .ok_or(SchemaError::UnresolvedReference {
                reference: name,
                from: ids.full_name.clone(),
            })
    }

    /// Encode `message` as a frame
    pub fn encode(&self, direction: Direction, message: &DynamicMessage<'_>) -> Result<Vec<u8>> {
        let msg_id = self.id_of(direction, message.message_type())?;
        Ok(encode_frame(msg_id, &message.encode_to_vec()?))
    }

    /// Decode the record carried by `frame`
    pub fn decode(&self, direction: Direction, frame: &Frame) -> Result<DynamicMessage<'r>> {
        let message_type = self.type_of(direction, frame.msg_id)?;
        DynamicMessage::decode(self.registry, message_type, &frame.body)
    }
}

/// Append one tagged stream record
pub fn encode_stream_record(msg_id: u32, body: &[u8], buf: &mut Vec<u8>) {
    buf.put_u8(0x78);
    prost::encoding::encode_varint(u64::from(msg_id), buf);
    buf.put_u8(0x72);
    prost::encoding::encode_varint(body.len() as u64, buf);
    buf.put_slice(body);
}

/// Iterator over the records of a tagged stream
///
/// Ends cleanly only at a record boundary; anything else is an error, after
/// which the iterator is exhausted.
pub struct StreamDecoder<R> {
    reader: R,
    max_record_len: usize,
    done: bool,
}

impl<R: Read> StreamDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self::with_config(reader, &FramingConfig::default())
    }

    /// Records longer than `max_frame_len` are rejected
    pub fn with_config(reader: R, config: &FramingConfig) -> Self {
        Self {
            reader,
            max_record_len: config.max_frame_len,
            done: false,
        }
    }

    fn read_record(&mut self) -> Result<Option<(u32, Vec<u8>)>> {
        let mut tag = [0u8; 1];
        if self.reader.read(&mut tag)? == 0 {
            return Ok(None);
        }
        expect_byte(tag[0], 0x78)?;
        let msg_id = self.read_varint()?;

        self.read_exact(&mut tag)?;
        expect_byte(tag[0], 0x72)?;
        let len = self.read_varint()? as usize;
        if len > self.max_record_len {
            return Err(SchemaError::Framing(format!(
                "record length {} exceeds maximum {}",
                len, self.max_record_len
            )));
        }

        // Grows with the bytes actually read
        let mut body = Vec::new();
        self.reader.by_ref().take(len as u64).read_to_end(&mut body)?;
        if body.len() < len {
            return Err(SchemaError::Truncated {
                expected: len,
                actual: body.len(),
            });
        }
        Ok(Some((msg_id, body)))
    }

    /// Base-128 varint of at most 32 bits
    fn read_varint(&mut self) -> Result<u32> {
        let mut value = 0u32;
        let mut shift = 0;
        loop {
            let mut byte = [0u8; 1];
            self.read_exact(&mut byte)?;
            // Only four bits of the fifth byte fit
            if shift == 28 && byte[0] & 0x70 != 0 {
                return Err(SchemaError::Framing("varint overflows 32 bits".to_string()));
            }
            value |= u32::from(byte[0] & 0x7f) << shift;
            if byte[0] & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 32 {
                return Err(SchemaError::Framing("varint longer than 32 bits".to_string()));
            }
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(SchemaError::Truncated {
                        expected: buf.len(),
                        actual: filled,
                    })
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn expect_byte(actual: u8, expected: u8) -> Result<()> {
    if actual != expected {
        return Err(SchemaError::Framing(format!(
            "unexpected byte 0x{:02x}, expected 0x{:02x}",
            actual, expected
        )));
    }
    Ok(())
}

impl<R: Read> Iterator for StreamDecoder<R> {
    type Item = Result<(u32, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;
    use crate::loader::{SchemaSet, SchemaSetLoader};
    use crate::schema::{EnumSchema, FieldSchema, FieldType, MessageSchema, SchemaFile};

    fn service() -> SchemaSet {
        let file = SchemaFile::new("geoborder.proto")
            .with_package("geoborder")
            .with_enum(EnumSchema::new("request_msgid").with_value("REQUEST_LOCATE", 1))
            .with_enum(EnumSchema::new("response_msgid").with_value("RESPONSE_LOCATE", 2))
            .with_message(
                MessageSchema::new("request_locate")
                    .with_field(FieldSchema::new("lon", 1, FieldType::Double))
                    .with_field(FieldSchema::new("lat", 2, FieldType::Double)),
            )
            .with_message(
                MessageSchema::new("response_locate")
                    .with_field(FieldSchema::new("region", 1, FieldType::String)),
            );
        SchemaSetLoader::new().load(&[file]).unwrap()
    }

    #[test]
    fn test_frame_layout() {
        assert_eq!(
            encode_frame(7, b"ab"),
            vec![0, 0, 0, 6, 0, 0, 0, 7, b'a', b'b']
        );
    }

    #[test]
    fn test_frame_decoder_incremental() {
        let mut decoder = FrameDecoder::new(&FramingConfig::default());
        let mut wire = encode_frame(1, b"first");
        wire.extend(encode_frame(2, b""));

        decoder.extend(&wire[..3]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.extend(&wire[3..10]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.extend(&wire[10..]);

        let first = decoder.next_frame().unwrap().unwrap();
        assert_eq!((first.msg_id, first.body.as_ref()), (1, &b"first"[..]));
        let second = decoder.next_frame().unwrap().unwrap();
        assert_eq!((second.msg_id, second.body.len()), (2, 0));
        assert_eq!(decoder.next_frame().unwrap(), None);
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_frame_decoder_rejects_bad_lengths() {
        let config = FramingConfig {
            max_frame_len: 16,
            ..FramingConfig::default()
        };

        let mut decoder = FrameDecoder::new(&config);
        decoder.extend(&[0, 0, 0, 2, 0, 0]);
        assert!(matches!(decoder.next_frame(), Err(SchemaError::Framing(_))));

        let mut decoder = FrameDecoder::new(&config);
        decoder.extend(&[0, 0, 1, 0]);
        assert!(matches!(decoder.next_frame(), Err(SchemaError::Framing(_))));

        let mut decoder = FrameDecoder::new(&config);
        decoder.extend(&[0, 0, 0, 8, 0, 0]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        assert!(matches!(
            decoder.finish(),
            Err(SchemaError::Truncated { expected: 6, .. })
        ));
    }

    #[test]
    fn test_message_id_dispatch() {
        let set = service();
        let registry = set.registry();
        let table = MessageIdTable::new(registry, "geoborder", &FramingConfig::default()).unwrap();

        let request_type = registry.message_by_name("geoborder.request_locate").unwrap();
        let mut request = DynamicMessage::new(request_type);
        request.set("lon", Value::F64(-0.5088)).unwrap();
        request.set("lat", Value::F64(51.67577)).unwrap();

        let wire = table.encode(Direction::Request, &request).unwrap();
        assert_eq!(&wire[4..8], &[0, 0, 0, 1]);

        let mut decoder = FrameDecoder::new(&FramingConfig::default());
        decoder.extend(&wire);
        let frame = decoder.next_frame().unwrap().unwrap();
        let decoded = table.decode(Direction::Request, &frame).unwrap();
        assert_eq!(decoded, request);

        let response = table.type_of(Direction::Response, 2).unwrap();
        assert_eq!(response.full_name, "geoborder.response_locate");
        assert!(table.type_of(Direction::Response, 9).is_err());
        assert!(table.id_of(Direction::Response, request_type).is_err());
    }

    #[test]
    fn test_missing_id_enum() {
        let set = service();
        let config = FramingConfig {
            request_enum: "rpc_ids".to_string(),
            ..FramingConfig::default()
        };
        assert!(matches!(
            MessageIdTable::new(set.registry(), "geoborder", &config),
            Err(SchemaError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_stream_records() {
        let mut wire = Vec::new();
        encode_stream_record(300, b"body", &mut wire);
        encode_stream_record(1, b"", &mut wire);
        assert_eq!(&wire[..4], &[0x78, 0xac, 0x02, 0x72]);

        let records: Vec<_> = StreamDecoder::new(wire.as_slice())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records, vec![(300, b"body".to_vec()), (1, Vec::new())]);
    }

    #[test]
    fn test_stream_errors() {
        let mut decoder = StreamDecoder::new(&[0x78, 0x01, 0x72, 0x05, b'a'][..]);
        assert!(matches!(
            decoder.next(),
            Some(Err(SchemaError::Truncated { expected: 5, actual: 1 }))
        ));
        assert!(decoder.next().is_none());

        let mut decoder = StreamDecoder::new(&[0x79][..]);
        assert!(matches!(decoder.next(), Some(Err(SchemaError::Framing(_)))));

        let overlong = [0x78, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        let mut decoder = StreamDecoder::new(&overlong[..]);
        assert!(matches!(decoder.next(), Some(Err(SchemaError::Framing(_)))));
    }

    #[test]
    fn test_stream_rejects_oversized_record() {
        // Declared length 0xffffffff, followed by nothing
        let wire = [0x78, 0x01, 0x72, 0xff, 0xff, 0xff, 0xff, 0x0f];
        let mut decoder = StreamDecoder::new(&wire[..]);
        assert!(matches!(decoder.next(), Some(Err(SchemaError::Framing(_)))));
        assert!(decoder.next().is_none());

        let config = FramingConfig {
            max_frame_len: 4,
            ..FramingConfig::default()
        };
        let mut wire = Vec::new();
        encode_stream_record(1, b"abcd", &mut wire);
        encode_stream_record(2, b"abcde", &mut wire);
        let mut decoder = StreamDecoder::with_config(wire.as_slice(), &config);
        assert_eq!(decoder.next().unwrap().unwrap(), (1, b"abcd".to_vec()));
        assert!(matches!(decoder.next(), Some(Err(SchemaError::Framing(_)))));
    }

    #[test]
    fn test_stream_varint_overflow() {
        // Fifth byte 0x1f carries a bit past 32
        let wire = [0x78, 0xff, 0xff, 0xff, 0xff, 0x1f, 0x72, 0x00];
        let mut decoder = StreamDecoder::new(&wire[..]);
        assert!(matches!(decoder.next(), Some(Err(SchemaError::Framing(_)))));

        // Fifth byte 0x0f is the largest that fits
        let wire = [0x78, 0xff, 0xff, 0xff, 0xff, 0x0f, 0x72, 0x00];
        let records: Vec<_> = StreamDecoder::new(&wire[..])
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records, vec![(u32::MAX, Vec::new())]);
    }
}
