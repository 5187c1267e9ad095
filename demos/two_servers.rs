//! Two servers sharing one document over an in-memory broker.
//!
//! This demo creates two nodes on a shared broker and shows:
//! - Patches from a participant on server 1 reaching participants on both servers
//! - The sender never receiving its own patch back
//! - Acks staying on the server that produced them
//!
//! Run with: RUST_LOG=diffsync_cluster=debug cargo run --example two_servers

use diffsync_cluster::{
    Ack, BoxError, ClusterConfig, Edit, EntityRef, MemoryBroker, OriginId, Patch, SyncEngine,
    SyncNode,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Engine that prints what it applies and keeps a naive text buffer.
struct PrintingEngine {
    name: &'static str,
    text: Mutex<String>,
}

impl PrintingEngine {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            text: Mutex::new(String::new()),
        })
    }
}

impl SyncEngine for PrintingEngine {
    fn apply_remote_patch(
        &self,
        entity: &EntityRef,
        edits: &[Edit],
        _origin: OriginId,
    ) -> Result<(), BoxError> {
        let mut text = self.text.lock();
        for edit in edits {
            let insert = edit.diff.as_str().ok_or("diff is not a string")?;
            text.push_str(insert);
        }
        println!("[{}] {} patched -> {:?}", self.name, entity, *text);
        Ok(())
    }

    fn apply_remote_ack(
        &self,
        entity: &EntityRef,
        _origin: OriginId,
        ack: &Ack,
    ) -> Result<(), BoxError> {
        println!("[{}] {} ack {:?}", self.name, entity, ack);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let broker = MemoryBroker::new();
    let (server1, runner1) = SyncNode::new(broker.clone(), ClusterConfig::default());
    let (server2, runner2) = SyncNode::new(broker.clone(), ClusterConfig::default());
    tokio::spawn(runner1.run());
    tokio::spawn(runner2.run());

    let doc = EntityRef::new("document", "doc-1")?;

    let alice_engine = PrintingEngine::new("alice@server1");
    let alice = server1.attach(doc.clone(), alice_engine.clone()).await?;
    server1
        .attach(doc.clone(), PrintingEngine::new("bob@server1"))
        .await?;
    server2
        .attach(doc.clone(), PrintingEngine::new("carol@server2"))
        .await?;

    println!("\n=== alice types \"hello\" ===");
    let patch = Patch::new(vec![Edit {
        client_version: 0,
        server_version: 0,
        diff: json!("hello"),
    }]);
    let receivers = alice.publish(patch).outcome().await?;
    println!("delivered to {} server subscriptions", receivers);
    println!("alice's own buffer is untouched: {:?}", *alice_engine.text.lock());

    println!("\n=== alice acks (not forwarded across servers) ===");
    alice
        .publish(Ack {
            client_version: 1,
            server_version: 0,
        })
        .outcome()
        .await?;

    if let Some(stats) = server2.subscription_stats(&doc).await {
        println!("\nserver2 subscription: {:?}", stats);
    }

    server1.shutdown().await;
    server2.shutdown().await;
    Ok(())
}
