mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{FakeNet, Reply, body, call, submit};
use mtlink_client::{DcState, InvocationError, ResponseHandler, SendOptions, TransportKind};
use mtlink_wire::Serializable;
use mtlink_wire::schema::auth::{ExportAuthorization, ExportedAuthorization};

#[tokio::test(start_paused = true)]
async fn answer_reaches_the_caller() {
    let net = FakeNet::echo();
    let instance = net.instance();

    assert_eq!(call(&instance, body(1)).await.unwrap(), body(1));
    assert_eq!(instance.dcstate(0), DcState::Connected);
    assert_eq!(instance.dctransport(0), Some(TransportKind::Tcp));
    assert_eq!(instance.pending(), 0);

    let calls = net.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].dc, 2);
    assert!(calls[0].layer, "first call on a connection carries initConnection");
}

#[tokio::test(start_paused = true)]
async fn invoke_decodes_the_typed_answer() {
    let net = FakeNet::new(|_| {
        Reply::Result(ExportedAuthorization { id: 77, bytes: vec![1, 2, 3] }.to_bytes())
    });
    let instance = net.instance();

    let exported = instance.invoke(&ExportAuthorization { dc_id: 4 }).await.unwrap();
    assert_eq!(exported, ExportedAuthorization { id: 77, bytes: vec![1, 2, 3] });

    let on_four = instance.invoke_on(4, &ExportAuthorization { dc_id: 2 }).await.unwrap();
    assert_eq!(on_four.id, 77);
    assert_eq!(net.calls()[1].dc, 4);
}

#[tokio::test(start_paused = true)]
async fn invoke_reports_an_undecodable_answer() {
    let net = FakeNet::echo();
    let instance = net.instance();

    let err = instance.invoke(&ExportAuthorization { dc_id: 4 }).await.unwrap_err();
    assert!(matches!(err, InvocationError::Deserialize(_)), "got {err}");
}

#[tokio::test(start_paused = true)]
async fn flood_wait_holds_the_resend() {
    let net = FakeNet::new(|call| match call.attempt {
        0 => Reply::error(420, "FLOOD_WAIT_5"),
        _ => Reply::Result(call.body.clone()),
    });
    let instance = net.instance();

    assert_eq!(call(&instance, body(1)).await.unwrap(), body(1));

    let calls = net.calls_with(&body(1));
    assert_eq!(calls.len(), 2);
    let gap = calls[1].at - calls[0].at;
    assert!(gap >= Duration::from_secs(5), "resent after {gap:?}");
    assert!(gap < Duration::from_secs(6), "resent after {gap:?}");
}

#[tokio::test(start_paused = true)]
async fn delayed_resends_follow_their_deadlines() {
    let net = FakeNet::new(|call| {
        if call.attempt > 0 {
            return Reply::Result(call.body.clone());
        }
        if call.body == body(1) {
            Reply::error(420, "FLOOD_WAIT_1")
        } else if call.body == body(2) {
            Reply::error(420, "FLOOD_WAIT_3")
        } else {
            Reply::error(420, "FLOOD_WAIT_2")
        }
    });
    let instance = net.instance();

    let (_, a) = submit(&instance, body(1), SendOptions::default());
    let (_, b) = submit(&instance, body(2), SendOptions::default());
    let (_, c) = submit(&instance, body(3), SendOptions::default());
    for rx in [a, b, c] {
        assert!(rx.await.unwrap().is_ok());
    }

    let resent: Vec<Vec<u8>> =
        net.calls().into_iter().filter(|c| c.attempt == 1).map(|c| c.body).collect();
    assert_eq!(resent, vec![body(1), body(3), body(2)]);
}

#[tokio::test(start_paused = true)]
async fn server_errors_back_off_exponentially() {
    let net = FakeNet::new(|call| match call.attempt {
        0..=2 => Reply::error(500, "INTERNAL"),
        _ => Reply::Result(call.body.clone()),
    });
    let instance = net.instance();

    assert!(call(&instance, body(1)).await.is_ok());

    let calls = net.calls_with(&body(1));
    assert_eq!(calls.len(), 4);
    for (pair, expected) in calls.windows(2).zip([1, 2, 4]) {
        let gap = pair[1].at - pair[0].at;
        let expected = Duration::from_secs(expected);
        assert!(gap >= expected && gap < expected + Duration::from_millis(500), "gap {gap:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn unclassified_error_goes_straight_to_the_caller() {
    let net = FakeNet::new(|_| Reply::error(400, "PEER_ID_INVALID"));
    let instance = net.instance();

    let err = call(&instance, body(1)).await.unwrap_err();
    assert!(err.is("PEER_ID_INVALID"));
    assert!(matches!(err, InvocationError::Rpc(ref e) if e.code == 400));
    assert_eq!(net.calls().len(), 1);
    assert_eq!(instance.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn answer_is_delivered_once_across_a_reconnect() {
    let net = FakeNet::new(|call| match call.attempt {
        0 => Reply::Disconnect,
        _ => Reply::Result(call.body.clone()),
    });
    let instance = net.instance();

    let done = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let (d, f) = (done.clone(), failed.clone());
    instance.send(
        body(1),
        ResponseHandler::new(
            move |_| {
                d.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            },
        ),
        SendOptions::default(),
    );

    net.wait_until(|_| done.load(Ordering::SeqCst) > 0).await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert_eq!(failed.load(Ordering::SeqCst), 0);
    assert_eq!(net.connects(), vec![2, 2]);
    let calls = net.calls_with(&body(1));
    assert_eq!(calls.len(), 2);
    assert!(calls[1].layer, "a new connection is initialised again");
}

#[tokio::test(start_paused = true)]
async fn cancel_asks_the_server_to_drop_the_answer() {
    let net = FakeNet::new(|_| Reply::Silent);
    let instance = net.instance();

    let (id, rx) = submit(&instance, body(1), SendOptions::default());
    net.wait_until(|n| !n.calls().is_empty()).await;
    instance.cancel(id);
    net.wait_until(|n| !n.drops().is_empty()).await;

    assert_eq!(net.drops(), vec![(2, net.calls()[0].msg_id)]);
    assert!(rx.await.is_err(), "no continuation runs for a cancelled request");
    assert_eq!(instance.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_fails_everything_pending() {
    let net = FakeNet::new(|_| Reply::Silent);
    let instance = net.instance();

    let (_, rx) = submit(&instance, body(1), SendOptions::default());
    net.wait_until(|n| !n.calls().is_empty()).await;
    instance.shutdown();

    assert!(matches!(rx.await.unwrap(), Err(InvocationError::Dropped)));
    assert_eq!(instance.dcstate(0), DcState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn stopped_session_reconnects_on_next_send() {
    let net = FakeNet::echo();
    let instance = net.instance();

    assert!(call(&instance, body(1)).await.is_ok());
    instance.stop_session(0);
    net.wait_until(|_| instance.dcstate(0) == DcState::Disconnected).await;

    assert!(call(&instance, body(2)).await.is_ok());
    assert_eq!(net.connects(), vec![2, 2]);
}
