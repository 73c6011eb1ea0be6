/// Integration tests: several storages gossiping through an in-memory mesh.
///
/// Each node re-broadcasts what it accepts, skipping the peer it came
/// from; duplicates die on the sequence-number check.
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tom_storage::{
    ApplicationPayload, Broadcaster, MailboxPayload, PeerAddress, ProtectedMailboxRecord,
    ProtectedRecord, ProtectedStorage, StorageConfig, StorageEvent, StorageKeyPair,
    StorageMessage,
};

fn keypair(seed: u64) -> StorageKeyPair {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    StorageKeyPair::from_seed(rng.random())
}

type PeerList = Arc<Mutex<Vec<(PeerAddress, Weak<ProtectedStorage>)>>>;

/// Delivers encoded messages to every other node of the mesh.
struct MeshLink {
    me: PeerAddress,
    peers: PeerList,
}

#[async_trait]
impl Broadcaster for MeshLink {
    async fn broadcast(
        &self,
        message: StorageMessage,
        exclude: Option<PeerAddress>,
    ) -> Result<(), String> {
        let bytes = message.to_bytes().map_err(|e| e.to_string())?;
        let peers = self.peers.lock().unwrap().clone();
        for (addr, node) in peers {
            if addr == self.me || exclude.as_ref() == Some(&addr) {
                continue;
            }
            if let Some(node) = node.upgrade() {
                node.handle_message(&bytes, Some(&self.me));
            }
        }
        Ok(())
    }
}

fn mesh(n: usize) -> Vec<Arc<ProtectedStorage>> {
    let peers: PeerList = Arc::new(Mutex::new(Vec::new()));
    let nodes: Vec<(PeerAddress, Arc<ProtectedStorage>)> = (0..n)
        .map(|i| {
            let me = PeerAddress::new(format!("node-{i}:900{i}"));
            let link = MeshLink {
                me: me.clone(),
                peers: peers.clone(),
            };
            let storage = ProtectedStorage::new(StorageConfig::default(), Arc::new(link)).unwrap();
            (me, Arc::new(storage))
        })
        .collect();

    *peers.lock().unwrap() = nodes
        .iter()
        .map(|(addr, node)| (addr.clone(), Arc::downgrade(node)))
        .collect();
    nodes.into_iter().map(|(_, node)| node).collect()
}

/// Poll until every node holds `expected` entries.
async fn wait_for_len(nodes: &[Arc<ProtectedStorage>], expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while nodes.iter().any(|n| n.len() != expected) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "mesh did not converge to {expected} entries: {:?}",
            nodes.iter().map(|n| n.len()).collect::<Vec<_>>()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn add_and_remove_propagate() {
    let nodes = mesh(3);
    let kp = keypair(1);
    let payload = ApplicationPayload::new("offer", b"offer-1".to_vec(), kp.public_key(), 60_000);

    let record = nodes[0].signed_record(payload.clone(), &kp).unwrap();
    let key = record.storage_key().unwrap();
    assert!(nodes[0].add(record, None));
    wait_for_len(&nodes, 1).await;
    for node in &nodes {
        assert_eq!(node.highest_sequence_number(&key), Some(0));
    }

    let remove = ProtectedRecord::new_signed(payload, 1, &kp).unwrap();
    assert!(nodes[2].remove(remove, None));
    wait_for_len(&nodes, 0).await;
    for node in &nodes {
        assert_eq!(node.highest_sequence_number(&key), Some(1));
    }

    // each node accepted the add exactly once; echoes were refused
    for node in &nodes {
        let m = node.metrics().snapshot();
        assert_eq!(m.adds_accepted, 1);
        assert_eq!(m.removes_accepted, 1);
    }
}

#[tokio::test]
async fn stale_update_does_not_spread() {
    let nodes = mesh(2);
    let kp = keypair(2);
    let payload = ApplicationPayload::new("offer", b"offer-2".to_vec(), kp.public_key(), 60_000);

    assert!(nodes[0].add(ProtectedRecord::new_signed(payload.clone(), 5, &kp).unwrap(), None));
    wait_for_len(&nodes, 1).await;

    let mut events = nodes[1].subscribe();
    assert!(!nodes[0].add(ProtectedRecord::new_signed(payload, 4, &kp).unwrap(), None));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn mailbox_round_trip_across_nodes() {
    let nodes = mesh(3);
    let sender = keypair(10);
    let receiver = keypair(11);
    let payload = MailboxPayload::new(
        b"sealed for receiver".to_vec(),
        sender.public_key(),
        receiver.public_key(),
    );

    let deposit = nodes[0]
        .signed_mailbox_record(payload.clone(), &sender, receiver.public_key())
        .unwrap();
    assert!(nodes[0].add(deposit, None));
    wait_for_len(&nodes, 1).await;

    let mut events = nodes[0].subscribe();
    let next = nodes[2]
        .next_sequence_number(&payload.clone().into())
        .unwrap();
    let removal =
        ProtectedMailboxRecord::new_signed(payload, next, &receiver, receiver.public_key()).unwrap();
    assert!(nodes[2].remove_mailbox(removal, None));
    wait_for_len(&nodes, 0).await;

    match events.recv().await.unwrap() {
        StorageEvent::Removed(entry) => assert!(entry.is_mailbox()),
        other => panic!("expected Removed, got {other:?}"),
    }
}

#[tokio::test]
async fn snapshot_restores_on_fresh_node() {
    let nodes = mesh(1);
    let kp = keypair(3);
    let kept = ApplicationPayload::new("offer", b"kept".to_vec(), kp.public_key(), 60_000);
    let gone = ApplicationPayload::new("offer", b"gone".to_vec(), kp.public_key(), 60_000);

    assert!(nodes[0].add(ProtectedRecord::new_signed(kept.clone(), 0, &kp).unwrap(), None));
    assert!(nodes[0].add(ProtectedRecord::new_signed(gone.clone(), 0, &kp).unwrap(), None));
    assert!(nodes[0].remove(ProtectedRecord::new_signed(gone.clone(), 1, &kp).unwrap(), None));

    let bytes = nodes[0].snapshot().to_bytes().unwrap();
    let snapshot = tom_storage::StorageSnapshot::from_bytes(&bytes).unwrap();

    let fresh = ProtectedStorage::local(StorageConfig::default()).unwrap();
    assert_eq!(fresh.restore(snapshot).unwrap(), 1);
    assert_eq!(fresh.len(), 1);

    // the removed key's ledger came along: the old add cannot come back
    assert!(!fresh.add(ProtectedRecord::new_signed(gone.clone(), 0, &kp).unwrap(), None));
    assert!(!fresh.add(ProtectedRecord::new_signed(gone, 1, &kp).unwrap(), None));
    assert!(!fresh.add(ProtectedRecord::new_signed(kept.clone(), 0, &kp).unwrap(), None));
    assert!(fresh.add(ProtectedRecord::new_signed(kept, 1, &kp).unwrap(), None));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_admit_one_per_sequence() {
    let storage = Arc::new(ProtectedStorage::local(StorageConfig::default()).unwrap());
    let kp = keypair(4);
    let payload = ApplicationPayload::new("offer", b"race".to_vec(), kp.public_key(), 60_000);
    let record = ProtectedRecord::new_signed(payload, 7, &kp).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let storage = storage.clone();
            let record = record.clone();
            std::thread::spawn(move || storage.add(record, None))
        })
        .collect();
    let accepted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(accepted, 1);
    assert_eq!(storage.len(), 1);
    assert_eq!(storage.metrics().snapshot().rejected_sequence, 15);
}
