//! End-to-end lifecycle of a single chain driven through the public API.

pub mod common;

use bytes::Bytes;
use common::harness::{SimulatedCluster, TrackedFactory, connect_switch, init_tracing, wait_for_state};
use context_chain::{
    ChainConfig, ChainEvent, ChainLifecycleService, ConnectionState, ContextChain,
    ContextChainState, Error, LifecycleService, SubsystemFactory, SubsystemKind,
};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_master_drives_switch_until_replaced() {
    init_tracing();
    let (first, mut first_rx) = connect_switch(42);
    let chain = ContextChain::spawn_with_connection(
        first.clone(),
        ChainConfig::with_required([SubsystemKind::Device]),
    )
    .unwrap();
    let device = TrackedFactory::new(SubsystemKind::Device);
    chain
        .add_context(device.create(chain.device(), &first))
        .await
        .unwrap();

    chain.start_chain().await.unwrap();
    assert!(device.is_running(chain.device()));

    let primary = chain.primary_connection().await.unwrap();
    primary.send(Bytes::from_static(b"flow-mod")).await.unwrap();
    assert_eq!(first_rx.recv().await.unwrap(), Bytes::from_static(b"flow-mod"));

    // The switch reconnects; the newest connection takes over.
    let (second, mut second_rx) = connect_switch(42);
    chain.change_primary_connection(second.clone()).await.unwrap();
    assert!(first_rx.recv().await.is_none());
    assert!(matches!(
        first.send(Bytes::from_static(b"late")).await,
        Err(Error::NotConnected)
    ));

    let primary = chain.primary_connection().await.unwrap();
    primary.send(Bytes::from_static(b"barrier")).await.unwrap();
    assert_eq!(second_rx.recv().await.unwrap(), Bytes::from_static(b"barrier"));
    assert_eq!(chain.state(), ContextChainState::WorkingMaster);

    chain.close().await.unwrap();
    assert_eq!(second.state(), ConnectionState::Closed);
    assert!(!device.is_running(chain.device()));
}

#[tokio::test]
async fn test_lifecycle_service_follows_cluster() {
    init_tracing();
    let cluster = SimulatedCluster::new();
    let (conn, _rx) = connect_switch(7);
    let chain =
        ContextChain::spawn_with_connection(conn.clone(), ChainConfig::with_required([SubsystemKind::Rpc]))
            .unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    chain
        .register_event_listener(Box::new(move |event| sink.lock().unwrap().push(event.clone())))
        .await
        .unwrap();

    let rpc = TrackedFactory::new(SubsystemKind::Rpc);
    chain.add_context(rpc.create(chain.device(), &conn)).await.unwrap();
    chain
        .add_lifecycle_service(Arc::new(ChainLifecycleService::new(&chain)))
        .await
        .unwrap();
    assert_eq!(chain.register_services(cluster.node("solo")).await.unwrap(), 1);

    wait_for_state(&chain, ContextChainState::WorkingMaster).await;
    assert!(rpc.is_running(chain.device()));

    chain.close().await.unwrap();
    assert_eq!(cluster.master_of(chain.device()), None);

    let events = events.lock().unwrap();
    assert_eq!(
        events.first(),
        Some(&ChainEvent::ContextAdded(SubsystemKind::Rpc))
    );
    assert!(events.iter().any(|e| matches!(e, ChainEvent::ServiceRegistered { .. })));
    assert!(events.contains(&ChainEvent::StateTransition {
        from: ContextChainState::Initialization,
        to: ContextChainState::WorkingMaster,
    }));
    assert_eq!(events.last(), Some(&ChainEvent::Closed));
}

#[tokio::test]
async fn test_released_chain_ignores_late_revocation() {
    init_tracing();
    let (conn, _rx) = connect_switch(8);
    let chain = ContextChain::spawn_with_connection(conn, ChainConfig::default()).unwrap();
    let service = ChainLifecycleService::new(&chain);
    let weak = chain.downgrade();
    assert!(weak.upgrade().is_some());

    chain.close().await.unwrap();
    drop(chain);
    assert!(weak.upgrade().is_none());

    assert!(service.close_service_instance().await.is_ok());
    assert!(service.instantiate_service_instance().await.is_err());
}
