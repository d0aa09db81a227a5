mod common;

use std::time::Duration;

use serde_json::{Value, json};
use uuid::Uuid;

use common::{ScriptedLink, other_id, reply_chunks};
use wallbox_ble_controller::{Error, Reply, Session, SessionConfig};
use wallbox_proto::Call;
use wallbox_proto::ble::{ProfileRegistry, WB_UART_V1, WB_UART_V2, WriteMode};

fn short_timeout() -> SessionConfig {
    SessionConfig {
        response_timeout: Duration::from_millis(200),
    }
}

#[tokio::test]
async fn set_hotspot_reply_returned_unchanged() {
    let creds = json!({"ssid": "WB-1234", "pass": "secret", "ip": "192.168.4.1", "port": "80"});
    let expected = creds.clone();
    let link = ScriptedLink::new(vec![WB_UART_V2.service], move |call| reply_chunks(call.id, creds.clone(), 20));

    let mut session = Session::connect(link.clone(), &ProfileRegistry::builtin(), SessionConfig::default())
        .await
        .unwrap();
    assert_eq!(session.profile().name, "wb-uart-v2");
    assert_eq!(link.pair_calls(), 1);

    let reply = session.call(Call::new("s_hup", 42)).await.unwrap();
    assert_eq!(reply, Reply::Answered(expected));

    let writes = link.writes();
    assert!(writes.len() > 1);
    assert!(writes.iter().all(|(uuid, chunk, mode)| {
        *uuid == WB_UART_V2.write && chunk.len() <= 20 && *mode == WriteMode::Unacknowledged
    }));

    let frame: Vec<u8> = writes.into_iter().flat_map(|(_, chunk, _)| chunk).collect();
    assert!(frame.starts_with(b"EaE\x22{\"met\":\"s_hup\",\"par\":null,\"id\":42}"));
    assert_eq!(frame.last(), Some(&177));
}

#[tokio::test]
async fn acknowledged_profile_sends_one_write_without_pairing() {
    let link = ScriptedLink::new(vec![WB_UART_V1.service], |call| reply_chunks(call.id, json!({"st": "recv"}), 7));

    let mut session = Session::connect(link.clone(), &ProfileRegistry::builtin(), short_timeout())
        .await
        .unwrap();
    let reply = session.execute("r_hup", None).await.unwrap();

    assert_eq!(reply.status(), Some("recv"));
    assert_eq!(link.pair_calls(), 0);

    let writes = link.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, WB_UART_V1.write);
    assert_eq!(writes[0].2, WriteMode::Acknowledged);
}

#[tokio::test]
async fn only_the_matching_reply_is_returned() {
    let link = ScriptedLink::new(vec![WB_UART_V2.service], |call| {
        let mut chunks = reply_chunks(other_id(call.id), json!("someone else"), 9);
        chunks.extend(reply_chunks(other_id(other_id(call.id)), json!({"st": "proc"}), 5));
        chunks.extend(reply_chunks(call.id, json!({"st": "done"}), 11));
        chunks
    });

    let mut session = Session::connect(link, &ProfileRegistry::builtin(), short_timeout())
        .await
        .unwrap();

    for _ in 0..5 {
        let reply = session.execute("r_hup", None).await.unwrap();
        assert_eq!(reply.status(), Some("done"));
    }
}

#[tokio::test]
async fn replies_packed_into_one_chunk_are_separated() {
    let link = ScriptedLink::new(vec![WB_UART_V2.service], |call| {
        let other = format!(r#"{{"id":{},"r":1}}"#, other_id(call.id));
        let mine = format!(r#"{{"id":{},"r":2}}"#, call.id);
        vec![format!("{other}{mine}").into_bytes()]
    });

    let mut session = Session::connect(link, &ProfileRegistry::builtin(), short_timeout())
        .await
        .unwrap();
    assert_eq!(session.execute("x", None).await.unwrap(), Reply::Answered(json!(2)));
}

#[tokio::test]
async fn silence_resolves_to_no_response() {
    let link = ScriptedLink::new(vec![WB_UART_V2.service], |_| Vec::new());
    let mut session = Session::connect(link, &ProfileRegistry::builtin(), short_timeout())
        .await
        .unwrap();

    let reply = session.execute("r_hup", None).await.unwrap();
    assert_eq!(reply, Reply::NoResponse);
    assert_eq!(reply.status(), None);
}

#[tokio::test]
async fn only_mismatched_replies_resolve_to_no_response() {
    let link = ScriptedLink::new(vec![WB_UART_V2.service], |call| {
        reply_chunks(other_id(call.id), json!({"st": "done"}), 20)
    });
    let mut session = Session::connect(link, &ProfileRegistry::builtin(), short_timeout())
        .await
        .unwrap();

    assert_eq!(session.execute("r_hup", None).await.unwrap(), Reply::NoResponse);
}

#[tokio::test]
async fn matching_reply_without_result_is_null() {
    let link = ScriptedLink::new(vec![WB_UART_V2.service], |call| {
        vec![format!(r#"{{"id":{}}}"#, call.id).into_bytes()]
    });
    let mut session = Session::connect(link, &ProfileRegistry::builtin(), short_timeout())
        .await
        .unwrap();

    assert_eq!(session.execute("s_deb", Some(json!({"deb": "a"}))).await.unwrap(), Reply::Answered(Value::Null));
}

#[tokio::test]
async fn stale_notifications_are_discarded_before_a_call() {
    let link = ScriptedLink::new(vec![WB_UART_V2.service], |call| reply_chunks(call.id, json!("fresh"), 20));
    let mut session = Session::connect(link.clone(), &ProfileRegistry::builtin(), short_timeout())
        .await
        .unwrap();

    // half a reply nobody is waiting for
    link.notify(br#"{"id":1,"r":"#);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(session.execute("r_hup", None).await.unwrap(), Reply::Answered(json!("fresh")));
}

#[tokio::test]
async fn params_reach_the_peer() {
    let link = ScriptedLink::new(vec![WB_UART_V1.service], |call| reply_chunks(call.id, Value::Null, 64));
    let mut session = Session::connect(link.clone(), &ProfileRegistry::builtin(), short_timeout())
        .await
        .unwrap();

    let params = json!({"deb": "software.tar.gz", "md5": "6cea0fbe6ebc2b618218676d7d7567c4", "size": "4096"});
    session.execute("s_deb", Some(params.clone())).await.unwrap();

    let calls = link.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "s_deb");
    assert_eq!(calls[0].params, params);
    assert!((1..=999).contains(&calls[0].id));
}

#[tokio::test]
async fn oversized_call_is_an_encoding_error() {
    let link = ScriptedLink::new(vec![WB_UART_V1.service], |_| Vec::new());
    let mut session = Session::connect(link.clone(), &ProfileRegistry::builtin(), short_timeout())
        .await
        .unwrap();

    let err = session
        .execute("s_deb", Some(Value::String("x".repeat(400))))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Frame(wallbox_proto::FrameError::PayloadTooLarge { .. })));
    assert!(link.writes().is_empty());
}

#[tokio::test]
async fn unknown_peer_is_rejected() {
    let stranger = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
    let link = ScriptedLink::new(vec![stranger], |_| Vec::new());

    let result = Session::connect(link, &ProfileRegistry::builtin(), short_timeout()).await;
    match result {
        Err(Error::NoMatchingProfile(e)) => assert_eq!(e.services, vec![stranger]),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("stranger should not match a profile"),
    }
}
