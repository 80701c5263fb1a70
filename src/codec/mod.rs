//! Byte-level codec for arbitrary object graphs with shared and cyclic
//! references.
//!
//! The wire format is a stream of one-byte markers. A node is written once
//! in full; later occurrences become back references to the byte position
//! of the first copy. Reference cells are registered *before* their
//! referent is written, which is what lets cycles decode: the decoder can
//! resolve a back reference into a cell whose referent is still being read.
//!
//! ```text
//! node      ::= nested | seen | ref | ref-seen
//! nested    ::= 0x00 prefix-bytes child* 0x01
//! seen      ::= 0x02 u64be
//! ref       ::= 0x03 ref-meta node
//! ref-meta  ::= 0x00 u32be u8* | 0x01
//! ref-seen  ::= 0x04 u64be
//! ```
//!
//! Positions are byte offsets from the start of the stream, big-endian.

use std::collections::HashMap;
use std::io::{self, BufReader, BufWriter, Read, Write};

/// Starts a nested node: prefix bytes, children, then [`NESTED_END`].
pub const NESTED_START: u8 = 0;
pub const NESTED_END: u8 = 1;
/// Back reference to an already-written non-reference node.
pub const SEEN: u8 = 2;
/// A reference cell; the referent follows.
pub const REF: u8 = 3;
/// Back reference to an already-written reference cell.
pub const REF_SEEN: u8 = 4;

/// Ref metadata sub-tag: a length-prefixed byte prefix follows.
pub const REF_METADATA: u8 = 0;
/// Ref metadata sub-tag: no prefix was recorded.
pub const REF_NO_METADATA: u8 = 1;

/// A position-counting byte sink.
pub struct ByteSink<W: Write> {
    writer: BufWriter<W>,
    position: u64,
}

impl<W: Write> ByteSink<W> {
    pub fn new(writer: W) -> Self {
        ByteSink { writer: BufWriter::new(writer), position: 0 }
    }

    /// Bytes written so far; the position the next byte lands on.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn put8(&mut self, byte: u8) -> io::Result<()> {
        self.put_bytes(&[byte])
    }

    pub fn put32(&mut self, value: u32) -> io::Result<()> {
        self.put_bytes(&value.to_be_bytes())
    }

    pub fn put64(&mut self, value: u64) -> io::Result<()> {
        self.put_bytes(&value.to_be_bytes())
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn finish(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }
}

impl<W: Write> Write for ByteSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.writer.write(buf)?;
        self.position += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// A position-counting byte source.
pub struct ByteSource<R: Read> {
    reader: BufReader<R>,
    position: u64,
}

impl<R: Read> ByteSource<R> {
    pub fn new(reader: R) -> Self {
        ByteSource { reader: BufReader::new(reader), position: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn read8(&mut self) -> io::Result<u8> {
        let mut buf = [0; 1];
        self.read_exact_bytes(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read32(&mut self) -> io::Result<u32> {
        let mut buf = [0; 4];
        self.read_exact_bytes(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn read64(&mut self) -> io::Result<u64> {
        let mut buf = [0; 8];
        self.read_exact_bytes(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    pub fn read_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0; len];
        self.read_exact_bytes(&mut buf)?;
        Ok(buf)
    }

    fn read_exact_bytes(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.reader.read_exact(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }
}

impl<R: Read> Read for ByteSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.reader.read(buf)?;
        self.position += read as u64;
        Ok(read)
    }
}

/// The capability a graph type provides to be encoded and decoded.
///
/// Each node contributes an opaque byte prefix (its header) ahead of its
/// children; prefix plus children must fully reconstitute the node.
/// Sharing detection uses [`GraphCodec::identity`], never structural
/// equality.
pub trait GraphCodec: Sized {
    type Node: Clone;

    /// Pointer identity of the node, stable for the duration of an encode.
    fn identity(&self, node: &Self::Node) -> usize;

    /// Whether the node is a reference cell.
    fn is_reference(&self, node: &Self::Node) -> bool;

    /// The referent of a reference cell. Only called when
    /// [`GraphCodec::is_reference`] holds.
    fn dereference(&self, node: &Self::Node) -> Self::Node;

    /// Write the node's header bytes.
    fn write_byte_prefix(&self, node: &Self::Node, sink: &mut dyn Write) -> io::Result<()>;

    /// The header bytes as a buffer, used for reference metadata.
    fn byte_prefix(&self, node: &Self::Node) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_byte_prefix(node, &mut buf)?;
        Ok(buf)
    }

    /// Visit the node's children in encoding order.
    fn for_each_child(
        &self,
        node: &Self::Node,
        f: &mut dyn FnMut(&Self::Node) -> io::Result<()>,
    ) -> io::Result<()>;

    /// Decode one node: read the header from `children.source()`, then pull
    /// as many children as the header calls for.
    fn decode<R: Read>(&mut self, children: &mut Children<'_, R, Self::Node>)
    -> io::Result<Self::Node>;

    /// Create a reference cell whose referent is not yet known. `prefix`
    /// carries the cell's recorded metadata when the stream includes it.
    fn make_reference(&mut self, position: u64, prefix: Option<Vec<u8>>)
    -> io::Result<Self::Node>;

    /// Install the referent into a cell produced by
    /// [`GraphCodec::make_reference`].
    fn set_reference(&mut self, reference: &Self::Node, referent: Self::Node) -> io::Result<()>;
}

/// Encode `root` into `sink`, preserving sharing and cycles.
///
/// `include_ref_metadata` controls whether reference cells record their
/// byte prefix in the stream.
pub fn encode_graph<C: GraphCodec, W: Write>(
    codec: &C,
    sink: W,
    root: &C::Node,
    include_ref_metadata: bool,
) -> io::Result<W> {
    let mut sink = ByteSink::new(sink);
    let mut seen: HashMap<usize, u64> = HashMap::new();
    encode_node(codec, &mut sink, &mut seen, root, include_ref_metadata)?;
    log::trace!(
        "encoded graph: {} distinct node(s), {} byte(s)",
        seen.len(),
        sink.position()
    );
    sink.finish()
}

fn encode_node<C: GraphCodec, W: Write>(
    codec: &C,
    sink: &mut ByteSink<W>,
    seen: &mut HashMap<usize, u64>,
    node: &C::Node,
    include_ref_metadata: bool,
) -> io::Result<()> {
    stacker::maybe_grow(64 * 1024, 16 * 1024 * 1024, || {
        if let Some(&position) = seen.get(&codec.identity(node)) {
            let marker = if codec.is_reference(node) { REF_SEEN } else { SEEN };
            sink.put8(marker)?;
            return sink.put64(position);
        }
        let position = sink.position();
        seen.insert(codec.identity(node), position);
        if codec.is_reference(node) {
            sink.put8(REF)?;
            if include_ref_metadata {
                sink.put8(REF_METADATA)?;
                let prefix = codec.byte_prefix(node)?;
                sink.put32(prefix.len() as u32)?;
                sink.put_bytes(&prefix)?;
            } else {
                sink.put8(REF_NO_METADATA)?;
            }
            let referent = codec.dereference(node);
            encode_node(codec, sink, seen, &referent, include_ref_metadata)
        } else {
            sink.put8(NESTED_START)?;
            codec.write_byte_prefix(node, sink)?;
            codec.for_each_child(node, &mut |child| {
                encode_node(codec, sink, seen, child, include_ref_metadata)
            })?;
            sink.put8(NESTED_END)
        }
    })
}

struct DecodeState<R: Read, N> {
    src: ByteSource<R>,
    seen: HashMap<u64, N>,
}

/// The child stream handed to [`GraphCodec::decode`] for one nested frame.
///
/// The consumer reads its header from [`Children::source`], then calls
/// [`Children::next`] until it has its children (or `None` arrives). Any
/// children the consumer leaves unread are drained by the framework so the
/// stream stays aligned; the frame cannot outlive the `decode` call.
pub struct Children<'a, R: Read, N> {
    state: &'a mut DecodeState<R, N>,
    reached_end: bool,
}

impl<'a, R: Read, N> Children<'a, R, N> {
    /// The underlying byte source, positioned at this node's header on
    /// entry to `decode`.
    pub fn source(&mut self) -> &mut ByteSource<R> {
        &mut self.state.src
    }

    /// Read the next child, or `None` once this frame is exhausted.
    pub fn next<C: GraphCodec<Node = N>>(&mut self, codec: &mut C) -> io::Result<Option<N>>
    where
        N: Clone,
    {
        if self.reached_end {
            return Ok(None);
        }
        let marker = self.state.src.read8()?;
        if marker == NESTED_END {
            self.reached_end = true;
            return Ok(None);
        }
        read_node(codec, self.state, marker).map(Some)
    }
}

/// Decode one graph from `source`.
pub fn decode_graph<C: GraphCodec, R: Read>(codec: &mut C, source: R) -> io::Result<C::Node> {
    let mut state = DecodeState { src: ByteSource::new(source), seen: HashMap::new() };
    let marker = state.src.read8()?;
    let root = read_node(codec, &mut state, marker)?;
    log::trace!(
        "decoded graph: {} distinct node(s), {} byte(s)",
        state.seen.len(),
        state.src.position()
    );
    Ok(root)
}

fn read_node<C: GraphCodec, R: Read>(
    codec: &mut C,
    state: &mut DecodeState<R, C::Node>,
    marker: u8,
) -> io::Result<C::Node> {
    stacker::maybe_grow(64 * 1024, 16 * 1024 * 1024, || match marker {
        NESTED_START => {
            let position = state.src.position() - 1;
            let mut children = Children { state: &mut *state, reached_end: false };
            let node = codec.decode(&mut children)?;
            while children.next(codec)?.is_some() {}
            state.seen.insert(position, node.clone());
            Ok(node)
        }
        SEEN | REF_SEEN => {
            let position = state.src.read64()?;
            state.seen.get(&position).cloned().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("back reference to unknown position {position}"),
                )
            })
        }
        REF => {
            let position = state.src.position() - 1;
            let prefix = match state.src.read8()? {
                REF_METADATA => {
                    let len = state.src.read32()? as usize;
                    Some(state.src.read_bytes(len)?)
                }
                REF_NO_METADATA => None,
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unknown reference metadata tag {other}"),
                    ));
                }
            };
            let reference = codec.make_reference(position, prefix)?;
            state.seen.insert(position, reference.clone());
            let marker = state.src.read8()?;
            let referent = read_node(codec, state, marker)?;
            codec.set_reference(&reference, referent)?;
            Ok(reference)
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown marker byte {other}"),
        )),
    })
}
