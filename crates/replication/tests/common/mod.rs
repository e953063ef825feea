//! Shared fixtures for replication integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use sf_core::{StatTable, TagId, TagRegistry, World};
use sf_replication::{ClientSession, ReplicationConfig, ReplicationServer, link};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Tags {
    pub registry: Arc<TagRegistry>,
    pub boots: TagId,
    pub gun: TagId,
    pub gem: TagId,
    pub speed: TagId,
    pub power: TagId,
}

pub fn tags() -> Tags {
    let registry = Arc::new(TagRegistry::new());
    Tags {
        boots: registry.register("Slotable.Gear.Boots").unwrap(),
        gun: registry.register("Slotable.Gear.Gun").unwrap(),
        gem: registry.register("Slotable.Gem").unwrap(),
        speed: registry.register("Stat.Speed").unwrap(),
        power: registry.register("Stat.Power").unwrap(),
        registry,
    }
}

pub fn server(tags: &Tags, config: ReplicationConfig) -> ReplicationServer {
    let world = World::new(Arc::clone(&tags.registry), StatTable::default());
    ReplicationServer::new(world, config)
}

pub fn join(
    server: &mut ReplicationServer,
    tags: &Tags,
    owner: sf_core::OwnerId,
    config: ReplicationConfig,
) -> ClientSession {
    let (server_end, client_end) = link();
    server.connect(server_end);
    ClientSession::connect(
        owner,
        client_end,
        &tags.registry,
        StatTable::default(),
        config,
    )
    .unwrap()
}

/// One server tick followed by every client draining its queue.
pub fn pump(server: &mut ReplicationServer, clients: &mut [&mut ClientSession]) {
    server.tick();
    for client in clients.iter_mut() {
        client.poll().unwrap();
    }
}
