mod common;

use std::time::Duration;

use common::{FakeNet, Reply, body, call, on_dc, submit};
use mtlink_client::{DcState, Instance, SendOptions};
use mtlink_wire::schema::auth::{ExportAuthorization, ExportedAuthorization, ImportAuthorization};
use mtlink_wire::{Deserializable, Identifiable, Serializable};

/// Answers authorization transfers: exports on the main DC (2), imports
/// anywhere else.
fn transfer(call: &common::Call) -> Option<Reply> {
    match call.constructor()? {
        ExportAuthorization::CONSTRUCTOR_ID => {
            let exported = ExportedAuthorization { id: 77, bytes: vec![1, 2, 3] };
            Some(Reply::Result(exported.to_bytes()))
        }
        ImportAuthorization::CONSTRUCTOR_ID => Some(Reply::Result(body(999))),
        _ => None,
    }
}

fn authorized(net: &FakeNet) -> Instance {
    let mut config = net.config();
    config.authorized = true;
    Instance::new(config)
}

#[tokio::test(start_paused = true)]
async fn migrate_on_main_switches_the_main_dc() {
    let net = FakeNet::new(|call| match call.dc {
        2 => Reply::error(303, "PHONE_MIGRATE_4"),
        _ => Reply::Result(call.body.clone()),
    });
    let instance = net.instance();

    assert_eq!(call(&instance, body(1)).await.unwrap(), body(1));
    assert_eq!(instance.main_dc_id(), 4);

    let dcs: Vec<i32> = net.calls_with(&body(1)).iter().map(|c| c.dc).collect();
    assert_eq!(dcs, vec![2, 4]);
    assert_eq!(instance.dcstate(2), DcState::Disconnected);
    assert_eq!(instance.dcstate(0), DcState::Connected);
}

#[tokio::test(start_paused = true)]
async fn concurrent_migrations_share_one_export() {
    let net = FakeNet::new(|call| {
        if let Some(reply) = transfer(call) {
            return reply;
        }
        match call.dc {
            1 => Reply::error(303, "FILE_MIGRATE_4"),
            _ => Reply::Result(call.body.clone()),
        }
    });
    let instance = authorized(&net);

    let pending: Vec<_> =
        (1..=3).map(|n| submit(&instance, body(n), on_dc(1)).1).collect();
    for (n, rx) in (1..=3).zip(pending) {
        assert_eq!(rx.await.unwrap().unwrap(), body(n));
    }

    let exports = net.calls_to(ExportAuthorization::CONSTRUCTOR_ID);
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0].dc, 2);
    assert_eq!(ExportAuthorization::from_bytes(&exports[0].body).unwrap().dc_id, 4);

    let imports = net.calls_to(ImportAuthorization::CONSTRUCTOR_ID);
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].dc, 4);
    assert_eq!(ImportAuthorization::from_bytes(&imports[0].body).unwrap().id, 77);

    let calls = net.calls();
    let import_at = calls.iter().position(|c| c.body == imports[0].body).unwrap();
    for n in 1..=3 {
        let resent = calls.iter().rposition(|c| c.body == body(n)).unwrap();
        assert_eq!(calls[resent].dc, 4);
        assert!(resent > import_at, "request {n} resent before the import finished");
    }
}

#[tokio::test(start_paused = true)]
async fn migrate_without_authorization_just_resends() {
    let net = FakeNet::new(|call| match call.dc {
        1 => Reply::error(303, "FILE_MIGRATE_4"),
        _ => Reply::Result(call.body.clone()),
    });
    let instance = net.instance();

    assert!(call_on(&instance, 1, body(1)).await.is_ok());
    assert!(net.calls_to(ExportAuthorization::CONSTRUCTOR_ID).is_empty());
    assert_eq!(instance.main_dc_id(), 2);
}

#[tokio::test(start_paused = true)]
async fn unauthorized_on_other_dc_transfers_authorization() {
    let net = FakeNet::new(|call| {
        if let Some(reply) = transfer(call) {
            return reply;
        }
        match (call.dc, call.attempt) {
            (1, 0) => Reply::error(401, "AUTH_KEY_UNREGISTERED"),
            _ => Reply::Result(call.body.clone()),
        }
    });
    let instance = authorized(&net);

    assert!(call_on(&instance, 1, body(1)).await.is_ok());
    assert_eq!(net.calls_to(ExportAuthorization::CONSTRUCTOR_ID).len(), 1);
    let imports = net.calls_to(ImportAuthorization::CONSTRUCTOR_ID);
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].dc, 1);
}

#[tokio::test(start_paused = true)]
async fn unauthorized_on_main_is_terminal() {
    let net = FakeNet::new(|_| Reply::error(401, "AUTH_KEY_UNREGISTERED"));
    let instance = authorized(&net);

    let err = call(&instance, body(1)).await.unwrap_err();
    assert!(err.is("AUTH_KEY_UNREGISTERED"));
    assert_eq!(net.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_transfer_fails_the_waiters() {
    let net = FakeNet::new(|call| match call.constructor() {
        Some(ExportAuthorization::CONSTRUCTOR_ID) => Reply::error(400, "DC_ID_INVALID"),
        _ => Reply::error(303, "FILE_MIGRATE_4"),
    });
    let instance = authorized(&net);

    let err = call_on(&instance, 1, body(1)).await.unwrap_err();
    assert!(err.is("FILE_MIGRATE"), "waiter fails with its own error, got {err}");
    assert_eq!(instance.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn bad_guest_dc_transfers_authorization() {
    let net = FakeNet::new(|call| {
        if let Some(reply) = transfer(call) {
            return reply;
        }
        match (call.dc, call.attempt) {
            (1, 0) => Reply::error(400, "FILE_ID_INVALID"),
            _ => Reply::Result(call.body.clone()),
        }
    });
    let instance = authorized(&net);

    assert_eq!(call_on(&instance, 1, body(1)).await.unwrap(), body(1));
    assert_eq!(net.calls_to(ExportAuthorization::CONSTRUCTOR_ID).len(), 1);
    assert_eq!(net.calls_to(ImportAuthorization::CONSTRUCTOR_ID)[0].dc, 1);
    assert_eq!(net.calls_with(&body(1)).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn bad_guest_dc_twice_is_terminal() {
    let net = FakeNet::new(|call| match (transfer(call), call.dc) {
        (Some(reply), _) => reply,
        (None, 1) => Reply::error(400, "FILE_ID_INVALID"),
        (None, _) => Reply::Result(call.body.clone()),
    });
    let instance = authorized(&net);

    let err = call_on(&instance, 1, body(1)).await.unwrap_err();
    assert!(err.is("FILE_ID_INVALID"));
    assert_eq!(net.calls_to(ExportAuthorization::CONSTRUCTOR_ID).len(), 1);
    assert_eq!(net.calls_with(&body(1)).len(), 2);
    assert_eq!(instance.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_while_waiting_for_authorization() {
    let net = FakeNet::new(|call| match call.constructor() {
        Some(ExportAuthorization::CONSTRUCTOR_ID) => {
            let exported = ExportedAuthorization { id: 77, bytes: vec![1, 2, 3] };
            Reply::later(Duration::from_secs(2), Reply::Result(exported.to_bytes()))
        }
        Some(ImportAuthorization::CONSTRUCTOR_ID) => Reply::Result(body(999)),
        _ => Reply::error(400, "FILE_ID_INVALID"),
    });
    let instance = authorized(&net);

    let (id, rx) = submit(&instance, body(1), on_dc(1));
    net.wait_until(|n| !n.calls_to(ExportAuthorization::CONSTRUCTOR_ID).is_empty()).await;
    instance.cancel(id);
    net.wait_until(|n| !n.calls_to(ImportAuthorization::CONSTRUCTOR_ID).is_empty()).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(rx.await.is_err(), "no continuation runs for a cancelled request");
    assert_eq!(net.calls_with(&body(1)).len(), 1, "cancelled waiter was resent");
    assert_eq!(instance.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelling_a_parked_request_releases_its_dependents() {
    let net = FakeNet::new(|call| {
        if call.body == body(1) {
            Reply::later(Duration::from_secs(3), Reply::Result(call.body.clone()))
        } else if call.attempt == 0 {
            Reply::error(400, "MSG_WAIT_FAILED")
        } else {
            Reply::Result(call.body.clone())
        }
    });
    let instance = net.instance();

    let (a_id, a) = submit(&instance, body(1), SendOptions::default());
    let (b_id, b) = submit(&instance, body(2), SendOptions { after: Some(a_id), ..SendOptions::default() });
    net.wait_until(|n| !n.calls_with(&body(2)).is_empty()).await;
    let (_, c) = submit(&instance, body(3), SendOptions { after: Some(b_id), ..SendOptions::default() });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let start = tokio::time::Instant::now();
    instance.cancel(b_id);
    assert_eq!(c.await.unwrap().unwrap(), body(3));
    assert!(start.elapsed() < Duration::from_secs(1), "released only after its grandparent");

    assert!(b.await.is_err());
    assert!(a.await.unwrap().is_ok());
    assert_eq!(net.calls_with(&body(2)).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn layer_is_renegotiated() {
    let net = FakeNet::new(|call| {
        if call.body == body(2) && call.attempt == 0 {
            Reply::error(400, "CONNECTION_NOT_INITED")
        } else {
            Reply::Result(call.body.clone())
        }
    });
    let instance = net.instance();

    assert!(call(&instance, body(1)).await.is_ok());
    assert!(call(&instance, body(2)).await.is_ok());

    let layers: Vec<bool> = net.calls_with(&body(2)).iter().map(|c| c.layer).collect();
    assert_eq!(layers, vec![false, true]);
}

#[tokio::test(start_paused = true)]
async fn dependent_request_waits_for_its_dependency() {
    let net = FakeNet::new(|call| {
        if call.body == body(1) {
            Reply::later(Duration::from_secs(3), Reply::Result(call.body.clone()))
        } else if call.attempt == 0 {
            Reply::error(400, "MSG_WAIT_FAILED")
        } else {
            Reply::Result(call.body.clone())
        }
    });
    let instance = net.instance();

    let (first, a) = submit(&instance, body(1), SendOptions::default());
    let (_, b) = submit(&instance, body(2), SendOptions { after: Some(first), ..SendOptions::default() });
    assert!(b.await.unwrap().is_ok());
    assert!(a.await.unwrap().is_ok());

    let a_call = &net.calls_with(&body(1))[0];
    let b_calls = net.calls_with(&body(2));
    assert_eq!(b_calls.len(), 2);
    assert_eq!(b_calls[0].after, Some(a_call.msg_id));
    assert!(b_calls[1].at - a_call.at >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn dependency_wait_without_dependency_is_terminal() {
    let net = FakeNet::new(|_| Reply::error(400, "MSG_WAIT_FAILED"));
    let instance = net.instance();

    assert!(call(&instance, body(1)).await.unwrap_err().is("MSG_WAIT_FAILED"));
}

#[tokio::test(start_paused = true)]
async fn killed_session_hands_requests_to_the_new_main() {
    let net = FakeNet::new(|call| match call.dc {
        2 => Reply::Silent,
        _ => Reply::Result(call.body.clone()),
    });
    let instance = net.instance();

    let (_, rx) = submit(&instance, body(1), SendOptions::default());
    net.wait_until(|n| !n.calls().is_empty()).await;
    instance.set_main_dc_id(4);

    assert!(rx.await.unwrap().is_ok());
    let dcs: Vec<i32> = net.calls_with(&body(1)).iter().map(|c| c.dc).collect();
    assert_eq!(dcs, vec![2, 4]);
}

async fn call_on(
    instance: &Instance,
    dc: i32,
    body: Vec<u8>,
) -> Result<Vec<u8>, mtlink_client::InvocationError> {
    let (_, rx) = submit(instance, body, on_dc(dc));
    rx.await.unwrap()
}
