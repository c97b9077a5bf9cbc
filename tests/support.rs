#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use oncrpc_mamont::rpc::{Auth, AuthNone, Protocol, RpcError, Transport};
use oncrpc_mamont::xdr::rpc::{make_success_reply, rpc_body, rpc_msg, call_body};
use oncrpc_mamont::xdr::{
    self, deserialize, CharacterEncoding, DecodingStream, EncodingStream, Serialize, XdrBuffer,
};

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

/// A call as a server sees it: the header, and the parameters left in the
/// buffer.
pub struct ReceivedCall {
    pub xid: u32,
    pub call: call_body,
    pub params: XdrBuffer,
}

pub fn parse_call(record: Vec<u8>) -> ReceivedCall {
    let mut buf = XdrBuffer::from_bytes(record).expect("call record is not aligned");
    let msg = deserialize::<rpc_msg>(&mut buf).expect("cannot deserialize call");
    let call = match msg.body {
        rpc_body::CALL(call) => call,
        other => panic!("expected a call, got {:?}", other),
    };
    ReceivedCall { xid: msg.xid, call, params: buf }
}

/// Encodes a reply header followed by `result`.
pub fn reply<T: Serialize + ?Sized>(msg: rpc_msg, result: &T) -> Vec<u8> {
    let mut buf = XdrBuffer::new(64 * 1024);
    msg.serialize(&mut buf).expect("cannot serialize reply header");
    result.serialize(&mut buf).expect("cannot serialize result");
    buf.into_bytes()
}

pub fn success<T: Serialize + ?Sized>(xid: u32, result: &T) -> Vec<u8> {
    reply(make_success_reply(xid), result)
}

pub fn words(bytes: &[u8]) -> Vec<u32> {
    bytes.chunks(4).map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]])).collect()
}

#[derive(Clone, Debug)]
pub struct SentRecord {
    pub bytes: Vec<u8>,
    pub flushed: bool,
}

#[derive(Default)]
pub struct Wire {
    pub sent: Vec<SentRecord>,
    pub inbox: VecDeque<Vec<u8>>,
}

type Responder = Box<dyn FnMut(ReceivedCall) -> Vec<Vec<u8>>>;

/// In-memory transport: every record sent is handed to a responder, whose
/// answers become the records received next. An empty inbox behaves like a
/// receive timeout.
pub struct ScriptedTransport {
    protocol: Protocol,
    encoder: ScriptedEncoder,
    decoder: ScriptedDecoder,
    wire: Rc<RefCell<Wire>>,
}

impl ScriptedTransport {
    pub fn new(
        protocol: Protocol,
        responder: impl FnMut(ReceivedCall) -> Vec<Vec<u8>> + 'static,
    ) -> Self {
        let wire = Rc::new(RefCell::new(Wire::default()));
        Self {
            protocol,
            encoder: ScriptedEncoder {
                buffer: XdrBuffer::new(8192),
                wire: wire.clone(),
                responder: Box::new(responder),
            },
            decoder: ScriptedDecoder { buffer: XdrBuffer::new(0), wire: wire.clone() },
            wire,
        }
    }

    pub fn wire(&self) -> Rc<RefCell<Wire>> {
        self.wire.clone()
    }
}

impl Transport for ScriptedTransport {
    type Encoder = ScriptedEncoder;
    type Decoder = ScriptedDecoder;

    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn peer(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 111))
    }

    fn encoder(&mut self) -> &mut ScriptedEncoder {
        &mut self.encoder
    }

    fn decoder(&mut self) -> &mut ScriptedDecoder {
        &mut self.decoder
    }

    fn set_receive_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn set_transmission_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }
}

pub struct ScriptedEncoder {
    buffer: XdrBuffer,
    wire: Rc<RefCell<Wire>>,
    responder: Responder,
}

impl EncodingStream for ScriptedEncoder {
    fn begin_encoding(&mut self, _receiver: Option<SocketAddr>) -> xdr::Result<()> {
        self.buffer.begin_encoding(None)
    }

    fn end_encoding(&mut self, flush: bool) -> xdr::Result<()> {
        let bytes = self.buffer.as_bytes().to_vec();
        let replies = (self.responder)(parse_call(bytes.clone()));
        let mut wire = self.wire.borrow_mut();
        wire.sent.push(SentRecord { bytes, flushed: flush });
        wire.inbox.extend(replies);
        Ok(())
    }

    fn encode_i32(&mut self, value: i32) -> xdr::Result<()> {
        self.buffer.encode_i32(value)
    }

    fn character_encoding(&self) -> CharacterEncoding {
        self.buffer.character_encoding()
    }

    fn set_character_encoding(&mut self, encoding: CharacterEncoding) {
        self.buffer.set_character_encoding(encoding);
    }
}

pub struct ScriptedDecoder {
    buffer: XdrBuffer,
    wire: Rc<RefCell<Wire>>,
}

impl DecodingStream for ScriptedDecoder {
    fn begin_decoding(&mut self) -> xdr::Result<()> {
        let Some(record) = self.wire.borrow_mut().inbox.pop_front() else {
            return Err(io::Error::from(io::ErrorKind::WouldBlock).into());
        };
        let encoding = self.buffer.character_encoding();
        self.buffer = XdrBuffer::from_bytes(record)?;
        self.buffer.set_character_encoding(encoding);
        Ok(())
    }

    fn end_decoding(&mut self) -> xdr::Result<()> {
        self.buffer.end_decoding()
    }

    fn decode_i32(&mut self) -> xdr::Result<i32> {
        self.buffer.decode_i32()
    }

    fn character_encoding(&self) -> CharacterEncoding {
        self.buffer.character_encoding()
    }

    fn set_character_encoding(&mut self, encoding: CharacterEncoding) {
        self.buffer.set_character_encoding(encoding);
    }
}

/// Null credentials that claim they can be refreshed.
#[derive(Debug, Default)]
pub struct RefreshableAuth {
    pub refreshes: AtomicUsize,
}

impl RefreshableAuth {
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl Auth for RefreshableAuth {
    fn encode_cred_verf(&self, dest: &mut dyn EncodingStream) -> xdr::Result<()> {
        AuthNone.encode_cred_verf(dest)
    }

    fn decode_verf(&self, src: &mut dyn DecodingStream) -> Result<(), RpcError> {
        AuthNone.decode_verf(src)
    }

    fn can_refresh(&self) -> bool {
        true
    }

    fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Datagram server on loopback. `handler` answers each call with any number
/// of datagrams; the server stops after `max_calls` calls or one second of
/// silence and returns every call it got.
pub fn spawn_udp_server<H>(
    max_calls: usize,
    mut handler: H,
) -> (SocketAddr, JoinHandle<Vec<ReceivedCall>>)
where
    H: FnMut(usize, &mut ReceivedCall) -> Vec<Vec<u8>> + Send + 'static,
{
    let socket = UdpSocket::bind("127.0.0.1:0").expect("cannot bind UDP server");
    socket.set_read_timeout(Some(Duration::from_secs(1))).expect("cannot set read timeout");
    let addr = socket.local_addr().expect("no local address");
    let handle = thread::spawn(move || {
        let mut calls = Vec::new();
        let mut datagram = [0_u8; 65536];
        while calls.len() < max_calls {
            let Ok((n, from)) = socket.recv_from(&mut datagram) else {
                break;
            };
            let mut call = parse_call(datagram[..n].to_vec());
            for reply in handler(calls.len(), &mut call) {
                socket.send_to(&reply, from).expect("cannot send reply");
            }
            calls.push(call);
        }
        calls
    });
    (addr, handle)
}

/// Reads one record-marked record, returning it with its fragment count, or
/// `None` at end of stream.
pub fn read_record(stream: &mut TcpStream) -> Option<(Vec<u8>, usize)> {
    let mut record = Vec::new();
    let mut fragments = 0;
    loop {
        let mut header = [0_u8; 4];
        if stream.read_exact(&mut header).is_err() {
            return None;
        }
        let header = u32::from_be_bytes(header);
        let start = record.len();
        record.resize(start + (header & 0x7fff_ffff) as usize, 0);
        stream.read_exact(&mut record[start..]).expect("truncated fragment");
        fragments += 1;
        if header & 0x8000_0000 != 0 {
            return Some((record, fragments));
        }
    }
}

/// Writes `record` as fragments of at most `fragment_len` bytes.
pub fn write_record(stream: &mut TcpStream, record: &[u8], fragment_len: usize) {
    let mut chunks = record.chunks(fragment_len).peekable();
    while let Some(chunk) = chunks.next() {
        let last = if chunks.peek().is_none() { 0x8000_0000 } else { 0 };
        stream.write_all(&(chunk.len() as u32 | last).to_be_bytes()).expect("cannot write header");
        stream.write_all(chunk).expect("cannot write fragment");
    }
    stream.flush().expect("cannot flush");
}

pub struct TcpCall {
    pub call: ReceivedCall,
    pub fragments: usize,
}

/// Stream server on loopback serving a single connection until the client
/// closes it. Replies are written as single-fragment records.
pub fn spawn_tcp_server<H>(mut handler: H) -> (SocketAddr, JoinHandle<Vec<TcpCall>>)
where
    H: FnMut(&mut ReceivedCall) -> Vec<Vec<u8>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("cannot bind TCP server");
    let addr = listener.local_addr().expect("no local address");
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("cannot accept");
        let mut calls = Vec::new();
        while let Some((record, fragments)) = read_record(&mut stream) {
            let mut call = parse_call(record);
            for reply in handler(&mut call) {
                write_record(&mut stream, &reply, usize::MAX);
            }
            calls.push(TcpCall { call, fragments });
        }
        calls
    });
    (addr, handle)
}
