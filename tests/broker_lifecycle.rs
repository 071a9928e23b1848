use hivewire::{
    action_handler, lifecycle_hook, ActionDefinition, BrokerOptions, CallOptions, MemoryCacher,
    ServiceBroker, ServiceDefinition,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn recording_service(name: &str, log: Arc<Mutex<Vec<String>>>) -> ServiceDefinition {
    let on_started = log.clone();
    let on_stopped = log.clone();
    let started_tag = format!("{}.started", name);
    let stopped_tag = format!("{}.stopped", name);
    ServiceDefinition::new(name)
        .action(ActionDefinition::new(
            "ping",
            action_handler(|_ctx| async { Ok(json!("pong")) }),
        ))
        .on_started(lifecycle_hook(move || {
            let log = on_started.clone();
            let tag = started_tag.clone();
            async move {
                log.lock().unwrap().push(tag);
                Ok(())
            }
        }))
        .on_stopped(lifecycle_hook(move || {
            let log = on_stopped.clone();
            let tag = stopped_tag.clone();
            async move {
                log.lock().unwrap().push(tag);
                Ok(())
            }
        }))
}

#[tokio::test]
async fn hooks_run_in_order_and_reverse_on_stop() {
    let broker = ServiceBroker::new(BrokerOptions::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    broker.add_service(recording_service("alpha", log.clone())).await.unwrap();
    broker.add_service(recording_service("beta", log.clone())).await.unwrap();

    broker.start().await.unwrap();
    broker.stop().await;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["alpha.started", "beta.started", "beta.stopped", "alpha.stopped"]
    );
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let broker = ServiceBroker::new(BrokerOptions::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    broker.add_service(recording_service("svc", log.clone())).await.unwrap();

    broker.start().await.unwrap();
    broker.start().await.unwrap();
    broker.stop().await;
    broker.stop().await;

    assert_eq!(*log.lock().unwrap(), vec!["svc.started", "svc.stopped"]);
}

#[tokio::test]
async fn services_added_after_start_run_their_started_hook() {
    let broker = ServiceBroker::new(BrokerOptions::default());
    broker.start().await.unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    broker.add_service(recording_service("late", log.clone())).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["late.started"]);

    let pong = broker.call("late.ping", json!({}), CallOptions::new()).await.unwrap();
    assert_eq!(pong, json!("pong"));
}

#[tokio::test]
async fn duplicate_service_registration_is_rejected() {
    let broker = ServiceBroker::new(BrokerOptions::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    broker.add_service(recording_service("posts", log.clone())).await.unwrap();
    let err = broker
        .add_service(recording_service("posts", log))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already registered"));
}

#[tokio::test]
async fn middleware_applies_only_to_services_registered_afterwards() {
    let broker = ServiceBroker::new(BrokerOptions::default());
    let wrapped_calls = Arc::new(AtomicUsize::new(0));

    let early = ServiceDefinition::new("early").action(ActionDefinition::new(
        "op",
        action_handler(|_ctx| async { Ok(json!("early")) }),
    ));
    broker.add_service(early).await.unwrap();

    let counter = wrapped_calls.clone();
    broker.use_middleware(Arc::new(move |inner, _action| {
        let counter = counter.clone();
        Arc::new(move |ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            inner(ctx)
        })
    }));

    let late = ServiceDefinition::new("late").action(ActionDefinition::new(
        "op",
        action_handler(|_ctx| async { Ok(json!("late")) }),
    ));
    broker.add_service(late).await.unwrap();

    broker.call("early.op", json!({}), CallOptions::new()).await.unwrap();
    assert_eq!(wrapped_calls.load(Ordering::SeqCst), 0);

    broker.call("late.op", json!({}), CallOptions::new()).await.unwrap();
    assert_eq!(wrapped_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cacheable_actions_short_circuit_on_the_second_call() {
    let broker = ServiceBroker::builder(BrokerOptions::default())
        .cacher(Arc::new(MemoryCacher::new()))
        .build();

    let handler_runs = Arc::new(AtomicUsize::new(0));
    let runs = handler_runs.clone();
    broker
        .add_service(
            ServiceDefinition::new("posts").action(
                ActionDefinition::new(
                    "find",
                    action_handler(move |ctx| {
                        let runs = runs.clone();
                        async move {
                            runs.fetch_add(1, Ordering::SeqCst);
                            Ok(json!({ "echo": ctx.params }))
                        }
                    }),
                )
                .cached(),
            ),
        )
        .await
        .unwrap();

    let first = broker
        .call("posts.find", json!({ "limit": 5 }), CallOptions::new())
        .await
        .unwrap();
    let second = broker
        .call("posts.find", json!({ "limit": 5 }), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(handler_runs.load(Ordering::SeqCst), 1);

    // different params miss the cache
    broker
        .call("posts.find", json!({ "limit": 6 }), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(handler_runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn node_list_and_actions_are_exposed_as_internal_actions() {
    let broker = ServiceBroker::new(BrokerOptions {
        node_id: "local-1".into(),
        ..Default::default()
    });
    let log = Arc::new(Mutex::new(Vec::new()));
    broker.add_service(recording_service("posts", log)).await.unwrap();

    let nodes = broker.call("$node.list", json!({}), CallOptions::new()).await.unwrap();
    let nodes = nodes.as_array().unwrap();
    assert!(nodes.iter().any(|n| n["nodeID"] == "local-1" && n["local"] == true));

    let actions = broker
        .call("$node.actions", json!({ "skipInternal": true }), CallOptions::new())
        .await
        .unwrap();
    let actions = actions.as_array().unwrap();
    assert!(actions.iter().any(|a| a["name"] == "posts.ping"));
    assert!(!actions.iter().any(|a| a["name"].as_str().unwrap().starts_with("$node")));

    let services = broker.call("$node.services", json!({}), CallOptions::new()).await.unwrap();
    assert!(services.as_array().unwrap().iter().any(|s| s["name"] == "posts"));

    let health = broker.call("$node.health", json!({}), CallOptions::new()).await.unwrap();
    assert_eq!(health["nodeID"], "local-1");
    assert!(health["process"]["pid"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn statistics_are_collected_when_enabled() {
    let broker = ServiceBroker::new(BrokerOptions {
        statistics: true,
        ..Default::default()
    });
    broker
        .add_service(ServiceDefinition::new("math").action(ActionDefinition::new(
            "add",
            action_handler(|_ctx| async { Ok(json!(4)) }),
        )))
        .await
        .unwrap();

    for _ in 0..3 {
        broker.call("math.add", json!({}), CallOptions::new()).await.unwrap();
    }
    let _ = broker.call("math.nope", json!({}), CallOptions::new()).await;

    let stats = broker.call("$node.stats", json!({}), CallOptions::new()).await.unwrap();
    assert_eq!(stats["requests"]["actions"]["math.add"]["count"], 3);
    assert!(stats["requests"]["total"]["count"].as_u64().unwrap() >= 3);
}

#[tokio::test]
async fn registration_events_fire_for_local_actions() {
    let broker = ServiceBroker::new(BrokerOptions::default());
    let seen = Arc::new(Mutex::new(Vec::<(String, Value)>::new()));
    let sink = seen.clone();
    broker.on(
        "register.action.**",
        Arc::new(move |name, payload| {
            sink.lock().unwrap().push((name.to_string(), payload.clone()))
        }),
    );

    let log = Arc::new(Mutex::new(Vec::new()));
    broker.add_service(recording_service("posts", log)).await.unwrap();

    let events = seen.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "register.action.posts.ping");
    assert_eq!(events[0].1["nodeID"], Value::Null);
}
