use hivewire::{
    action_handler, ActionDefinition, ActionInfo, BrokerError, BrokerOptions, CallOptions,
    ChannelHub, ChannelTransporter, JsonSerializer, ManualClock, Packet, PacketPayload,
    Serializer, ServiceBroker, ServiceDefinition, ServiceInfo, Transporter, PROTOCOL_VERSION,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn options(node_id: &str) -> BrokerOptions {
    BrokerOptions {
        node_id: node_id.to_string(),
        // keep periodic traffic out of the way unless a test wants it
        heartbeat_interval: Duration::from_secs(60),
        heartbeat_timeout: Duration::from_secs(300),
        ..Default::default()
    }
}

fn broker_on(hub: &Arc<ChannelHub>, node_id: &str) -> Arc<ServiceBroker> {
    ServiceBroker::builder(options(node_id))
        .transporter(Arc::new(ChannelTransporter::new(hub.clone())))
        .build()
}

/// INFO frame a fake node would broadcast.
fn synthetic_info(sender: &str, actions: &[&str]) -> Packet {
    Packet::new(
        sender,
        PacketPayload::Info {
            services: vec![ServiceInfo {
                name: actions
                    .first()
                    .and_then(|a| a.split('.').next())
                    .unwrap_or("svc")
                    .to_string(),
                version: None,
                settings: json!({}),
                actions: actions
                    .iter()
                    .map(|a| ActionInfo { name: a.to_string(), cache: false })
                    .collect(),
                events: vec![],
            }],
            ip_list: vec![],
            uptime_secs: 1,
        },
    )
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn call_is_routed_to_the_remote_node_and_back() {
    let hub = ChannelHub::new();
    let a = broker_on(&hub, "server-1");
    let b = broker_on(&hub, "server-2");

    let served = Arc::new(AtomicUsize::new(0));
    let served_in_handler = served.clone();
    b.add_service(ServiceDefinition::new("user").action(ActionDefinition::new(
        "create",
        action_handler(move |ctx| {
            let served = served_in_handler.clone();
            async move {
                served.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "params": ctx.params, "servedBy": "server-2" }))
            }
        }),
    )))
    .await
    .unwrap();

    a.start().await.unwrap();
    b.start().await.unwrap();
    settle().await;

    let result = a
        .call("user.create", json!({ "x": 1 }), CallOptions::new())
        .await
        .unwrap();

    assert_eq!(result["params"], json!({ "x": 1 }));
    assert_eq!(result["servedBy"], "server-2");
    assert_eq!(served.load(Ordering::SeqCst), 1);
    assert_eq!(a.transit().unwrap().pending_count(), 0);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn request_frame_goes_out_on_the_target_topic_and_a_response_resolves_it() {
    let hub = ChannelHub::new();
    let serializer = JsonSerializer;

    let spy = ChannelTransporter::new(hub.clone());
    spy.connect().await.unwrap();
    let mut requests = spy.subscribe("MOL.REQ.server-2").await.unwrap();

    let a = broker_on(&hub, "server-1");
    a.start().await.unwrap();

    // a fake server-2 announces user.create
    spy.publish(
        "MOL.INFO",
        serializer.serialize(&synthetic_info("server-2", &["user.create"])).unwrap(),
    )
    .await
    .unwrap();
    settle().await;
    assert!(a.registry().has_action("user.create"));

    let caller = {
        let a = a.clone();
        tokio::spawn(async move { a.call("user.create", json!({ "x": 1 }), CallOptions::new()).await })
    };

    let frame = serializer.deserialize(&requests.recv().await.unwrap()).unwrap();
    assert_eq!(frame.ver, PROTOCOL_VERSION);
    assert_eq!(frame.sender, "server-1");
    let request_id = match frame.payload {
        PacketPayload::Request { id, action, params, level, .. } => {
            assert_eq!(action, "user.create");
            assert_eq!(params, json!({ "x": 1 }));
            assert_eq!(level, 1);
            id
        }
        other => panic!("expected REQUEST, got {:?}", other),
    };

    // synthetic RESPONSE with the same id resolves the caller's promise
    spy.publish(
        "MOL.RES.server-1",
        serializer
            .serialize(&Packet::new(
                "server-2",
                PacketPayload::Response {
                    id: request_id,
                    success: true,
                    data: Some(json!({ "id": 123 })),
                    error: None,
                },
            ))
            .unwrap(),
    )
    .await
    .unwrap();

    let result = caller.await.unwrap().unwrap();
    assert_eq!(result, json!({ "id": 123 }));
    assert_eq!(a.transit().unwrap().pending_count(), 0);

    a.stop().await;
}

#[tokio::test]
async fn error_responses_rebuild_the_typed_error() {
    let hub = ChannelHub::new();
    let serializer = JsonSerializer;
    let spy = ChannelTransporter::new(hub.clone());
    spy.connect().await.unwrap();
    let mut requests = spy.subscribe("MOL.REQ.server-2").await.unwrap();

    let a = broker_on(&hub, "server-1");
    a.start().await.unwrap();
    spy.publish(
        "MOL.INFO",
        serializer.serialize(&synthetic_info("server-2", &["user.remove"])).unwrap(),
    )
    .await
    .unwrap();
    settle().await;

    let caller = {
        let a = a.clone();
        tokio::spawn(async move { a.call("user.remove", json!({}), CallOptions::new()).await })
    };

    let frame = serializer.deserialize(&requests.recv().await.unwrap()).unwrap();
    let id = match frame.payload {
        PacketPayload::Request { id, .. } => id,
        other => panic!("expected REQUEST, got {:?}", other),
    };
    spy.publish(
        "MOL.RES.server-1",
        serializer
            .serialize(&Packet::new(
                "server-2",
                PacketPayload::Response {
                    id,
                    success: false,
                    data: None,
                    error: Some(
                        BrokerError::validation("Parameters validation error!", None)
                            .to_wire("server-2"),
                    ),
                },
            ))
            .unwrap(),
    )
    .await
    .unwrap();

    let err = caller.await.unwrap().unwrap_err();
    assert_eq!(err.code(), 422);
    assert!(matches!(err, BrokerError::Validation { .. }));

    a.stop().await;
}

#[tokio::test]
async fn heartbeat_silence_deregisters_the_node() {
    let hub = ChannelHub::new();
    let serializer = JsonSerializer;
    let clock = ManualClock::new();
    let a = ServiceBroker::builder(BrokerOptions {
        node_id: "server-1".into(),
        heartbeat_interval: Duration::from_millis(50),
        heartbeat_timeout: Duration::from_secs(30),
        ..Default::default()
    })
    .transporter(Arc::new(ChannelTransporter::new(hub.clone())))
    .clock(Arc::new(clock.clone()))
    .build();

    let disconnects = Arc::new(std::sync::Mutex::new(Vec::<Value>::new()));
    let sink = disconnects.clone();
    a.on(
        "node.disconnected",
        Arc::new(move |_, payload| sink.lock().unwrap().push(payload.clone())),
    );

    a.start().await.unwrap();

    let spy = ChannelTransporter::new(hub.clone());
    spy.connect().await.unwrap();
    spy.publish(
        "MOL.INFO",
        serializer.serialize(&synthetic_info("server-2", &["user.create"])).unwrap(),
    )
    .await
    .unwrap();
    settle().await;
    assert!(a.registry().has_action("user.create"));

    // no heartbeat arrives while the catalog clock crosses the timeout
    clock.advance(31_000);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!a.registry().has_action("user.create"));
    let err = a.call("user.create", json!({}), CallOptions::new()).await.unwrap_err();
    assert!(matches!(err, BrokerError::ServiceNotFound { .. }));

    let events = disconnects.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["nodeID"], "server-2");
    assert_eq!(events[0]["unexpected"], true);
    drop(events);

    a.stop().await;
}

#[tokio::test]
async fn disconnect_frame_rejects_in_flight_requests() {
    let hub = ChannelHub::new();
    let serializer = JsonSerializer;
    let spy = ChannelTransporter::new(hub.clone());
    spy.connect().await.unwrap();
    let mut requests = spy.subscribe("MOL.REQ.server-2").await.unwrap();

    let a = broker_on(&hub, "server-1");
    a.start().await.unwrap();
    spy.publish(
        "MOL.INFO",
        serializer.serialize(&synthetic_info("server-2", &["user.slow"])).unwrap(),
    )
    .await
    .unwrap();
    settle().await;

    let caller = {
        let a = a.clone();
        tokio::spawn(async move { a.call("user.slow", json!({}), CallOptions::new()).await })
    };

    // wait until the request is in flight, then the node goes away
    let _ = requests.recv().await.unwrap();
    assert_eq!(a.transit().unwrap().pending_count(), 1);
    spy.publish(
        "MOL.DISCONNECT",
        serializer.serialize(&Packet::new("server-2", PacketPayload::Disconnect)).unwrap(),
    )
    .await
    .unwrap();

    let err = caller.await.unwrap().unwrap_err();
    assert_eq!(
        err.to_string(),
        "Action 'user.slow' is not available on node 'server-2'!"
    );
    assert_eq!(a.transit().unwrap().pending_count(), 0);
    assert!(!a.registry().has_action("user.slow"));

    a.stop().await;
}

#[tokio::test]
async fn events_are_bridged_across_nodes() {
    let hub = ChannelHub::new();
    let a = broker_on(&hub, "server-1");
    let b = broker_on(&hub, "server-2");

    let received = Arc::new(std::sync::Mutex::new(Vec::<(String, Value)>::new()));
    let sink = received.clone();
    b.on(
        "user.*",
        Arc::new(move |name, payload| {
            sink.lock().unwrap().push((name.to_string(), payload.clone()))
        }),
    );

    a.start().await.unwrap();
    b.start().await.unwrap();
    settle().await;

    let local_deliveries = a.emit("user.created", &json!({ "id": 7 }));
    assert_eq!(local_deliveries, 0);
    settle().await;

    let events = received.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "user.created");
    assert_eq!(events[0].1, json!({ "id": 7 }));
    drop(events);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn remote_unknown_action_replies_service_not_found() {
    let hub = ChannelHub::new();
    let serializer = JsonSerializer;
    let spy = ChannelTransporter::new(hub.clone());
    spy.connect().await.unwrap();
    let mut responses = spy.subscribe("MOL.RES.server-9").await.unwrap();

    let a = broker_on(&hub, "server-1");
    a.start().await.unwrap();

    // a request for an action this node does not host
    spy.publish(
        "MOL.REQ.server-1",
        serializer
            .serialize(&Packet::new(
                "server-9",
                PacketPayload::Request {
                    id: Uuid::new_v4(),
                    action: "ghost.op".into(),
                    params: json!({}),
                    meta: json!({}),
                    timeout_ms: 0,
                    level: 1,
                    parent_id: None,
                    request_id: None,
                    metrics: false,
                },
            ))
            .unwrap(),
    )
    .await
    .unwrap();

    let frame = serializer.deserialize(&responses.recv().await.unwrap()).unwrap();
    match frame.payload {
        PacketPayload::Response { success, error, .. } => {
            assert!(!success);
            let err = error.unwrap();
            assert_eq!(err.code, 404);
            assert_eq!(err.name, "ServiceNotFoundError");
        }
        other => panic!("expected RESPONSE, got {:?}", other),
    }

    a.stop().await;
}
