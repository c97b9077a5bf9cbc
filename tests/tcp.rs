use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::thread;
use std::time::Duration;

use oncrpc_mamont::rpc::{ClientConfig, RpcClient, RpcError, TcpTransport};
use oncrpc_mamont::xdr::{
    self, deserialize, EncodingStream, Serialize, Void, XdrError, MAX_RECORD_LENGTH,
};

mod support;
use support::{parse_call, read_record, spawn_tcp_server, success, write_record};

const PROGRAM: u32 = 300_456;
const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Header, call header, null credential and verifier, one word of parameters.
const SMALL_RECORD: usize = 4 + 24 + 16 + 4;

fn client(port: u16, config: &ClientConfig) -> RpcClient<TcpTransport> {
    support::init_logging();
    RpcClient::tcp(LOCALHOST, PROGRAM, 1, Some(port), None, config)
        .expect("cannot connect TCP client")
}

#[test]
fn tcp_call_round_trip() {
    let (addr, server) = spawn_tcp_server(|call| {
        let name = deserialize::<String>(&mut call.params).expect("cannot decode name");
        vec![success(call.xid, &format!("hello {name}"))]
    });
    let mut client = client(addr.port(), &ClientConfig::default());

    let mut greeting = String::new();
    client.call(1, "world", &mut greeting).expect("call failed");
    assert_eq!(greeting, "hello world");
    client.call(1, "again", &mut greeting).expect("second call failed");
    assert_eq!(greeting, "hello again");
    client.close().expect("cannot close client");

    let calls = server.join().expect("server panicked");
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.fragments == 1));
}

#[test]
fn batched_calls_wait_for_a_flush() {
    let (addr, server) = spawn_tcp_server(|call| vec![success(call.xid, &call.call.proc)]);
    let mut client = client(addr.port(), &ClientConfig::default());

    for i in 1..=3_u32 {
        client.batch_call(10 + i, &i, false).expect("batch call failed");
    }
    assert_eq!(client.pending_batch_bytes(), 3 * SMALL_RECORD);

    // Replies to the batched calls arrive first and are discarded.
    let mut procedure = u32::MAX;
    client.call(0, &0_u32, &mut procedure).expect("call failed");
    assert_eq!(procedure, 0);
    assert_eq!(client.pending_batch_bytes(), 0);
    client.close().expect("cannot close client");

    let calls = server.join().expect("server panicked");
    let procedures: Vec<u32> = calls.iter().map(|c| c.call.call.proc).collect();
    assert_eq!(procedures, vec![11, 12, 13, 0]);
}

#[test]
fn zero_timeout_client_batches_every_call() {
    let (addr, server) = spawn_tcp_server(|_| Vec::new());
    let config = ClientConfig::default().with_timeout(Duration::ZERO);
    let mut client = client(addr.port(), &config);

    client.call(1, &1_u32, &mut Void).expect("first batch call failed");
    client.call(1, &2_u32, &mut Void).expect("second batch call failed");
    assert_eq!(client.pending_batch_bytes(), 2 * SMALL_RECORD);
    client.flush_batch().expect("cannot flush");
    assert_eq!(client.pending_batch_bytes(), 0);
    client.close().expect("cannot close client");

    assert_eq!(server.join().expect("server panicked").len(), 2);
}

#[test]
fn full_batch_buffer_reports_backpressure() {
    let (addr, server) = spawn_tcp_server(|_| Vec::new());
    let config = ClientConfig::default().with_buffer_size(1024);
    let mut client = client(addr.port(), &config);
    let payload = vec![7_u8; 400];
    let record = 4 + 40 + 4 + 400;

    client.batch_call(1, &payload, false).expect("first batch call failed");
    client.batch_call(1, &payload, false).expect("second batch call failed");
    match client.batch_call(1, &payload, false) {
        Err(RpcError::Backpressure { pending, capacity }) => {
            assert_eq!(pending, 2 * record);
            assert_eq!(capacity, 1024);
        }
        other => panic!("expected backpressure, got {:?}", other),
    }
    assert_eq!(client.pending_batch_bytes(), 2 * record);

    client.flush_batch().expect("cannot flush");
    client.batch_call(1, &payload, true).expect("batch call after flush failed");
    assert_eq!(client.pending_batch_bytes(), 0);
    client.close().expect("cannot close client");

    let calls = server.join().expect("server panicked");
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.fragments == 1));
}

/// Parameters that fail halfway through their encoding.
struct Unencodable;

impl Serialize for Unencodable {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> xdr::Result<()> {
        dest.encode_i32(1)?;
        Err(XdrError::InvalidData("unencodable parameters".into()))
    }
}

#[test]
fn failed_batch_call_keeps_earlier_calls() {
    let (addr, server) = spawn_tcp_server(|_| Vec::new());
    let mut client = client(addr.port(), &ClientConfig::default());

    client.batch_call(1, &1_u32, false).expect("first batch call failed");
    assert!(client.batch_call(2, &Unencodable, false).is_err());
    assert_eq!(client.pending_batch_bytes(), SMALL_RECORD);
    client.flush_batch().expect("cannot flush after a failed call");
    assert_eq!(client.pending_batch_bytes(), 0);

    client.batch_call(3, &3_u32, true).expect("batch call after the failure failed");
    client.close().expect("cannot close client");

    let calls = server.join().expect("server panicked");
    let procedures: Vec<u32> = calls.iter().map(|c| c.call.call.proc).collect();
    assert_eq!(procedures, vec![1, 3]);
}

#[test]
fn large_call_is_sent_in_fragments() {
    let (addr, server) = spawn_tcp_server(|call| {
        let data = deserialize::<Vec<u8>>(&mut call.params).expect("cannot decode data");
        assert!(data.iter().enumerate().all(|(i, &b)| b == i as u8));
        vec![success(call.xid, &(data.len() as u32))]
    });
    let config = ClientConfig::default().with_buffer_size(1024);
    let mut client = client(addr.port(), &config);

    let data: Vec<u8> = (0..3001_u32).map(|i| i as u8).collect();
    let mut received = 0_u32;
    client.call(2, &data, &mut received).expect("call failed");
    assert_eq!(received, 3001);
    client.close().expect("cannot close client");

    let calls = server.join().expect("server panicked");
    assert!(calls[0].fragments > 1, "expected several fragments, got {}", calls[0].fragments);
}

#[test]
fn fragmented_reply_is_reassembled() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("cannot bind");
    let port = listener.local_addr().expect("no local address").port();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("cannot accept");
        let (record, _) = read_record(&mut stream).expect("no call");
        let call = parse_call(record);
        let reply = success(call.xid, &vec![5_u8; 100]);
        write_record(&mut stream, &reply, 8);
        read_record(&mut stream);
    });
    let mut client = client(port, &ClientConfig::default());

    let mut data = Vec::<u8>::new();
    client.call(0, &Void, &mut data).expect("call failed");
    assert_eq!(data, vec![5_u8; 100]);
    client.close().expect("cannot close client");
    server.join().expect("server panicked");
}

#[test]
fn rejects_oversized_rpc_record() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("cannot bind");
    let port = listener.local_addr().expect("no local address").port();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("cannot accept");
        read_record(&mut stream).expect("no call");
        let header = (MAX_RECORD_LENGTH as u32 + 4) | 0x8000_0000;
        stream.write_all(&header.to_be_bytes()).expect("cannot write header");
        read_record(&mut stream);
    });
    let mut client = client(port, &ClientConfig::default());

    match client.call(0, &Void, &mut Void) {
        Err(RpcError::InvalidData(msg)) => assert!(msg.contains("exceeds max"), "{msg}"),
        other => panic!("expected invalid data, got {:?}", other),
    }
    client.close().expect("cannot close client");
    server.join().expect("server panicked");
}

#[test]
fn silent_server_times_out() {
    let (addr, server) = spawn_tcp_server(|_| Vec::new());
    let config = ClientConfig::default().with_timeout(Duration::from_millis(300));
    let mut client = client(addr.port(), &config);

    match client.call(0, &Void, &mut Void) {
        Err(RpcError::Timeout) => {}
        other => panic!("expected timeout, got {:?}", other),
    }
    client.close().expect("cannot close client");
    assert_eq!(server.join().expect("server panicked").len(), 1);
}

#[test]
fn refused_connection_cannot_send() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("cannot bind");
        listener.local_addr().expect("no local address").port()
    };
    let config = ClientConfig::default().with_connect_timeout(Duration::from_secs(2));
    match RpcClient::tcp(LOCALHOST, PROGRAM, 1, Some(port), None, &config) {
        Err(RpcError::CannotSend(_)) => {}
        Err(other) => panic!("expected a connection failure, got {:?}", other),
        Ok(_) => panic!("connected to a closed port"),
    }
}
