//! The `$node` introspection service.
//!
//! Registered on every broker unless `internal_actions` is disabled:
//! `$node.list`, `$node.services`, `$node.actions`, `$node.health`, and
//! `$node.stats` when statistics collection is on.

use crate::broker::ServiceBroker;
use crate::error::BrokerError;
use crate::registry::ListFilter;
use crate::service::{action_handler, ActionDefinition, ServiceDefinition};
use serde_json::{json, Value};
use std::sync::Weak;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn node_service(broker: Weak<ServiceBroker>, with_stats: bool) -> ServiceDefinition {
    let mut service = ServiceDefinition::new("$node")
        .action(ActionDefinition::new("list", {
            let broker = broker.clone();
            action_handler(move |_ctx| {
                let broker = broker.clone();
                async move {
                    let broker = upgrade(&broker)?;
                    let mut nodes: Vec<Value> = broker
                        .nodes()
                        .list()
                        .into_iter()
                        .map(|node| {
                            json!({
                                "nodeID": node.node_id,
                                "available": node.available,
                                "uptime": node.uptime_secs,
                                "cpu": node.cpu,
                                "ipList": node.ip_list,
                                "lastHeartbeatTime": node.last_heartbeat_ms,
                            })
                        })
                        .collect();
                    nodes.push(json!({
                        "nodeID": broker.node_id(),
                        "available": true,
                        "local": true,
                    }));
                    Ok(json!(nodes))
                }
            })
        }))
        .action(ActionDefinition::new("services", {
            let broker = broker.clone();
            action_handler(move |_ctx| {
                let broker = broker.clone();
                async move {
                    let broker = upgrade(&broker)?;
                    let mut services: Vec<Value> = broker
                        .local_service_info()
                        .into_iter()
                        .map(|svc| {
                            json!({
                                "name": svc.name,
                                "version": svc.version,
                                "nodeID": broker.node_id(),
                                "actions": svc.actions.iter().map(|a| &a.name).collect::<Vec<_>>(),
                            })
                        })
                        .collect();
                    for node in broker.nodes().list() {
                        if !node.available {
                            continue;
                        }
                        for svc in node.services {
                            services.push(json!({
                                "name": svc.name,
                                "version": svc.version,
                                "nodeID": node.node_id.clone(),
                                "actions": svc.actions.iter().map(|a| &a.name).collect::<Vec<_>>(),
                            }));
                        }
                    }
                    Ok(json!(services))
                }
            })
        }))
        .action(ActionDefinition::new("actions", {
            let broker = broker.clone();
            action_handler(move |ctx| {
                let broker = broker.clone();
                async move {
                    let broker = upgrade(&broker)?;
                    let filter = ListFilter {
                        only_local: ctx.params["onlyLocal"].as_bool().unwrap_or(false),
                        only_available: ctx.params["onlyAvailable"].as_bool().unwrap_or(false),
                        skip_internal: ctx.params["skipInternal"].as_bool().unwrap_or(false),
                    };
                    let rows: Vec<Value> = broker
                        .registry()
                        .list(filter)
                        .into_iter()
                        .map(|row| {
                            json!({
                                "name": row.action,
                                "nodeID": row.node_id,
                                "local": row.local,
                                "state": format!("{:?}", row.state),
                            })
                        })
                        .collect();
                    Ok(json!(rows))
                }
            })
        }))
        .action(ActionDefinition::new("health", {
            let broker = broker.clone();
            action_handler(move |_ctx| {
                let broker = broker.clone();
                async move {
                    let broker = upgrade(&broker)?;
                    let mut system = sysinfo::System::new();
                    system.refresh_memory();
                    system.refresh_cpu_usage();
                    Ok(json!({
                        "nodeID": broker.node_id(),
                        "uptime": broker.uptime_secs(),
                        "process": { "pid": std::process::id() },
                        "mem": {
                            "total": system.total_memory(),
                            "used": system.used_memory(),
                        },
                        "cpu": system.global_cpu_info().cpu_usage(),
                        "timestamp": SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .map(|d| d.as_millis() as u64)
                            .unwrap_or_default(),
                    }))
                }
            })
        }));

    if with_stats {
        service = service.action(ActionDefinition::new("stats", {
            let broker = broker.clone();
            action_handler(move |_ctx| {
                let broker = broker.clone();
                async move {
                    let broker = upgrade(&broker)?;
                    Ok(broker.statistics_snapshot())
                }
            })
        }));
    }

    service
}

fn upgrade(broker: &Weak<ServiceBroker>) -> Result<std::sync::Arc<ServiceBroker>, BrokerError> {
    broker
        .upgrade()
        .ok_or_else(|| BrokerError::custom("Broker is shutting down", 500))
}
