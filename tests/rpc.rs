use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use oncrpc_mamont::rpc::{AnyClient, CallRejection, ClientConfig, Protocol, RpcClient, RpcError};
use oncrpc_mamont::xdr::rpc::{
    accept_body, accepted_reply, auth_error_reply_message, auth_flavor, auth_stat,
    garbage_args_reply_message, mismatch_info, opaque_auth, proc_unavail_reply_message,
    prog_mismatch_reply_message, prog_unavail_reply_message, reply_body, rpc_body, rpc_msg,
    rpc_vers_mismatch, system_err_reply_message,
};
use oncrpc_mamont::xdr::{deserialize, CharacterEncoding, Void};

mod support;
use support::{reply, success, words, RefreshableAuth, ScriptedTransport};

fn client(transport: ScriptedTransport) -> RpcClient<ScriptedTransport> {
    support::init_logging();
    RpcClient::new(transport, 100003, 1, &ClientConfig::default()).expect("cannot create client")
}

fn denied(make: fn(u32) -> rpc_msg) -> RpcError {
    let mut client = client(ScriptedTransport::new(Protocol::Tcp, move |call| {
        vec![reply(make(call.xid), &Void)]
    }));
    client.call(0, &Void, &mut Void).expect_err("call should have been denied")
}

#[test]
fn void_call_is_encoded_and_answered() {
    let transport = ScriptedTransport::new(Protocol::Tcp, |call| vec![success(call.xid, &Void)]);
    let wire = transport.wire();
    let mut client = client(transport);

    client.call(0, &Void, &mut Void).expect("void call failed");

    let wire = wire.borrow();
    assert_eq!(wire.sent.len(), 1);
    let sent = words(&wire.sent[0].bytes);
    assert_eq!(sent.len(), 10);
    assert_eq!(&sent[1..], &[0, 2, 100003, 1, 0, 0, 0, 0, 0]);
    assert!(wire.sent[0].flushed);
}

#[test]
fn parameters_and_results_follow_the_headers() {
    let mut client = client(ScriptedTransport::new(Protocol::Tcp, |mut call| {
        assert_eq!(call.call.proc, 7);
        let name = deserialize::<String>(&mut call.params).expect("cannot decode parameters");
        vec![success(call.xid, &(name.len() as u32))]
    }));

    let mut length = 0_u32;
    client.call(7, "export", &mut length).expect("call failed");
    assert_eq!(length, 6);
}

#[test]
fn every_call_takes_the_next_xid() {
    let transport = ScriptedTransport::new(Protocol::Tcp, |call| vec![success(call.xid, &Void)]);
    let wire = transport.wire();
    let mut client = client(transport);

    client.call(0, &Void, &mut Void).expect("first call failed");
    client.call(0, &Void, &mut Void).expect("second call failed");

    let wire = wire.borrow();
    let first = words(&wire.sent[0].bytes)[0];
    let second = words(&wire.sent[1].bytes)[0];
    assert_eq!(second, first.wrapping_add(1));
}

#[test]
fn orphan_replies_are_discarded() {
    let mut client = client(ScriptedTransport::new(Protocol::Tcp, |call| {
        vec![
            success(call.xid.wrapping_sub(1), &7_u32),
            success(call.xid.wrapping_add(100), &8_u32),
            success(call.xid, &42_u32),
        ]
    }));

    let mut answer = 0_u32;
    client.call(1, &Void, &mut answer).expect("call failed");
    assert_eq!(answer, 42);
}

#[test]
fn orphan_with_bad_verifier_is_not_held_against_the_call() {
    let mut client = client(ScriptedTransport::new(Protocol::Tcp, |call| {
        let forged = rpc_msg {
            xid: call.xid.wrapping_add(1),
            body: rpc_body::REPLY(reply_body::MSG_ACCEPTED(accepted_reply {
                verf: opaque_auth { flavor: auth_flavor::AUTH_UNIX, body: vec![1, 2, 3, 4] },
                reply_data: accept_body::SUCCESS,
            })),
        };
        vec![reply(forged, &Void), success(call.xid, &1_u32)]
    }));

    let mut answer = 0_u32;
    client.call(1, &Void, &mut answer).expect("call failed");
    assert_eq!(answer, 1);
}

#[test]
fn unanswered_call_times_out() {
    let mut client = client(ScriptedTransport::new(Protocol::Tcp, |_| Vec::new()));
    let err = client.call(0, &Void, &mut Void).expect_err("call should time out");
    assert!(err.is_timeout(), "expected timeout, got {:?}", err);
}

#[test]
fn accepted_errors_are_reported() {
    match denied(prog_unavail_reply_message) {
        RpcError::CallRejected(CallRejection::ProgUnavail) => {}
        other => panic!("expected PROG_UNAVAIL, got {:?}", other),
    }
    match denied(proc_unavail_reply_message) {
        RpcError::CallRejected(CallRejection::ProcUnavail) => {}
        other => panic!("expected PROC_UNAVAIL, got {:?}", other),
    }
    match denied(garbage_args_reply_message) {
        RpcError::CallRejected(CallRejection::GarbageArgs) => {}
        other => panic!("expected GARBAGE_ARGS, got {:?}", other),
    }
    match denied(system_err_reply_message) {
        RpcError::CallRejected(CallRejection::SystemErr) => {}
        other => panic!("expected SYSTEM_ERR, got {:?}", other),
    }
    match denied(|xid| prog_mismatch_reply_message(xid, 3)) {
        RpcError::CallRejected(CallRejection::ProgMismatch(info)) => {
            assert_eq!(info, mismatch_info { low: 3, high: 3 });
        }
        other => panic!("expected PROG_MISMATCH, got {:?}", other),
    }
}

#[test]
fn denied_calls_are_reported() {
    match denied(rpc_vers_mismatch) {
        RpcError::RpcMismatch(info) => assert_eq!(info, mismatch_info { low: 2, high: 2 }),
        other => panic!("expected RPC_MISMATCH, got {:?}", other),
    }
    match denied(|xid| auth_error_reply_message(xid, auth_stat::AUTH_TOOWEAK)) {
        RpcError::AuthRejected(auth_stat::AUTH_TOOWEAK) => {}
        other => panic!("expected AUTH_TOOWEAK, got {:?}", other),
    }
}

#[test]
fn bad_reply_verifier_fails_the_call() {
    let mut client = client(ScriptedTransport::new(Protocol::Tcp, |call| {
        let msg = rpc_msg {
            xid: call.xid,
            body: rpc_body::REPLY(reply_body::MSG_ACCEPTED(accepted_reply {
                verf: opaque_auth { flavor: auth_flavor::AUTH_SHORT, body: vec![0; 8] },
                reply_data: accept_body::SUCCESS,
            })),
        };
        vec![reply(msg, &Void)]
    }));

    match client.call(0, &Void, &mut Void) {
        Err(RpcError::AuthFailed(auth_stat::AUTH_FAILED)) => {}
        other => panic!("expected AuthFailed, got {:?}", other),
    }
}

#[test]
fn rejected_credentials_are_refreshed_once() {
    let transport = ScriptedTransport::new(Protocol::Tcp, |call| {
        vec![reply(auth_error_reply_message(call.xid, auth_stat::AUTH_REJECTEDCRED), &Void)]
    });
    let wire = transport.wire();
    let mut client = client(transport);
    let auth = Arc::new(RefreshableAuth::default());
    client.set_auth(auth.clone());

    match client.call(0, &Void, &mut Void) {
        Err(RpcError::AuthRejected(auth_stat::AUTH_REJECTEDCRED)) => {}
        other => panic!("expected AUTH_REJECTEDCRED, got {:?}", other),
    }
    assert_eq!(wire.borrow().sent.len(), 2);
    assert_eq!(auth.refresh_count(), 1);

    let wire = wire.borrow();
    assert_ne!(words(&wire.sent[0].bytes)[0], words(&wire.sent[1].bytes)[0]);
}

#[test]
fn refreshed_credentials_can_succeed() {
    let attempts = Rc::new(Cell::new(0));
    let seen = attempts.clone();
    let mut client = client(ScriptedTransport::new(Protocol::Tcp, move |call| {
        seen.set(seen.get() + 1);
        if seen.get() == 1 {
            vec![reply(auth_error_reply_message(call.xid, auth_stat::AUTH_REJECTEDCRED), &Void)]
        } else {
            vec![success(call.xid, &5_u32)]
        }
    }));
    let auth = Arc::new(RefreshableAuth::default());
    client.set_auth(auth.clone());

    let mut answer = 0_u32;
    client.call(0, &Void, &mut answer).expect("retried call failed");
    assert_eq!(answer, 5);
    assert_eq!(attempts.get(), 2);
    assert_eq!(auth.refresh_count(), 1);
}

#[test]
fn null_credentials_are_not_retried() {
    let transport = ScriptedTransport::new(Protocol::Tcp, |call| {
        vec![reply(auth_error_reply_message(call.xid, auth_stat::AUTH_BADCRED), &Void)]
    });
    let wire = transport.wire();
    let mut client = client(transport);

    match client.call(0, &Void, &mut Void) {
        Err(RpcError::AuthRejected(auth_stat::AUTH_BADCRED)) => {}
        other => panic!("expected AUTH_BADCRED, got {:?}", other),
    }
    assert_eq!(wire.borrow().sent.len(), 1);
}

#[test]
fn short_results_underflow_and_the_next_call_starts_clean() {
    let answers = Rc::new(Cell::new(0));
    let count = answers.clone();
    let mut client = client(ScriptedTransport::new(Protocol::Tcp, move |call| {
        count.set(count.get() + 1);
        if count.get() == 1 {
            vec![success(call.xid, &Void)]
        } else {
            vec![success(call.xid, &9_u64)]
        }
    }));

    let mut value = 0_u64;
    match client.call(0, &Void, &mut value) {
        Err(RpcError::BufferUnderflow) => {}
        other => panic!("expected underflow, got {:?}", other),
    }
    client.call(0, &Void, &mut value).expect("second call failed");
    assert_eq!(value, 9);
}

#[test]
fn call_messages_fail_a_stream_call() {
    let mut client = client(ScriptedTransport::new(Protocol::Tcp, |call| {
        vec![reply(rpc_msg { xid: call.xid, body: rpc_body::CALL(call.call) }, &Void)]
    }));

    match client.call(0, &Void, &mut Void) {
        Err(RpcError::WrongMessage(0)) => {}
        other => panic!("expected wrong message, got {:?}", other),
    }
}

#[test]
fn call_messages_are_skipped_on_datagrams() {
    let mut client = client(ScriptedTransport::new(Protocol::Udp, |call| {
        let xid = call.xid;
        vec![
            reply(rpc_msg { xid, body: rpc_body::CALL(call.call) }, &Void),
            success(xid, &3_u32),
        ]
    }));

    let mut answer = 0_u32;
    client.call(0, &Void, &mut answer).expect("call failed");
    assert_eq!(answer, 3);
}

#[test]
fn zero_timeout_sends_without_waiting() {
    let transport = ScriptedTransport::new(Protocol::Tcp, |_| Vec::new());
    let wire = transport.wire();
    let mut client = client(transport);
    client.set_timeout(Duration::ZERO).expect("cannot set timeout");

    let mut untouched = 77_u32;
    client.call(4, &1_u32, &mut untouched).expect("batch call failed");

    assert_eq!(untouched, 77);
    let wire = wire.borrow();
    assert_eq!(wire.sent.len(), 1);
    assert!(!wire.sent[0].flushed);
}

#[test]
fn explicit_version_overrides_the_client_version() {
    let transport = ScriptedTransport::new(Protocol::Tcp, |call| {
        assert_eq!(call.call.vers, 3);
        vec![success(call.xid, &Void)]
    });
    let mut client = client(transport);
    client.call_version(0, 3, &Void, &mut Void).expect("call failed");
    assert_eq!(client.version(), 1);
}

#[test]
fn strings_use_the_client_encoding() {
    let transport = ScriptedTransport::new(Protocol::Tcp, |mut call| {
        let raw = deserialize::<Vec<u8>>(&mut call.params).expect("cannot decode parameters");
        assert_eq!(raw, vec![0xe9]);
        vec![success(call.xid, &vec![0xe8_u8])]
    });
    let mut client = client(transport);
    client.set_character_encoding(CharacterEncoding::Latin1);

    let mut answer = String::new();
    client.call(0, "é", &mut answer).expect("call failed");
    assert_eq!(answer, "è");
    assert_eq!(client.character_encoding(), CharacterEncoding::Latin1);
}

#[test]
fn zero_transmission_timeouts_are_rejected() {
    let config = ClientConfig::default().with_transmission_timeout(Duration::ZERO);
    let transport = ScriptedTransport::new(Protocol::Tcp, |_| Vec::new());
    match RpcClient::new(transport, 1, 1, &config) {
        Err(RpcError::InvalidArgument(_)) => {}
        Err(other) => panic!("expected invalid argument, got {:?}", other),
        Ok(_) => panic!("expected invalid argument"),
    }

    let mut client = client(ScriptedTransport::new(Protocol::Tcp, |_| Vec::new()));
    assert!(matches!(
        client.set_retransmission_timeout(Duration::ZERO),
        Err(RpcError::InvalidArgument(_))
    ));
    assert_eq!(client.retransmission_timeout(), oncrpc_mamont::rpc::DEFAULT_TIMEOUT);
}

#[test]
fn unknown_protocols_are_rejected() {
    let host = "127.0.0.1".parse().expect("bad address");
    match AnyClient::connect(host, 100003, 3, Some(2049), 99, None, &ClientConfig::default()) {
        Err(RpcError::UnknownProtocol(99)) => {}
        Err(other) => panic!("expected unknown protocol, got {:?}", other),
        Ok(_) => panic!("expected unknown protocol"),
    }
    assert_eq!(Protocol::try_from(17).expect("udp"), Protocol::Udp);
    assert_eq!(Protocol::try_from(6).expect("tcp"), Protocol::Tcp);
}
