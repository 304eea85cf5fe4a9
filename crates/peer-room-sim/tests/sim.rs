//! End-to-end tests for the simulator: convergence, churn and snapshots.

use std::time::Duration;

use peer_room::RoomConfig;
use peer_room_sim::settings::save_room_config;
use peer_room_sim::{MembershipSnapshot, SimSettings, Simulation};
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

fn settings(peers: usize) -> SimSettings {
    SimSettings {
        peers,
        room: RoomConfig::new("sim-tests")
            .with_heartbeat_interval(Duration::from_millis(10))
            .with_heartbeat_expiration(Duration::from_millis(200)),
        ..Default::default()
    }
}

async fn wait_until_converged(sim: &Simulation) {
    timeout(Duration::from_secs(5), async {
        while !sim.converged() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Simulation did not converge");
}

#[tokio::test(start_paused = true)]
async fn test_all_peers_converge() {
    let sim = Simulation::start(&settings(4)).await.unwrap();

    wait_until_converged(&sim).await;

    for node in sim.nodes() {
        assert_eq!(node.room.connected_peers().len(), 3);
    }
    sim.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_churned_peer_expires_everywhere() {
    let sim = Simulation::start(&settings(3)).await.unwrap();
    wait_until_converged(&sim).await;

    let leaving = sim.churn().unwrap();
    sleep(Duration::from_millis(300)).await;

    assert!(sim.converged());
    assert_eq!(sim.active_peers().len(), 2);
    for node in sim.nodes() {
        assert!(!node.room.connected_peers().contains(&leaving));
    }

    // Churning again takes the next peer
    let next = sim.churn().unwrap();
    assert_ne!(next, leaving);
    sim.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_snapshots_serialize() {
    let sim = Simulation::start(&settings(2)).await.unwrap();
    wait_until_converged(&sim).await;

    let snapshots = sim.snapshots();
    let json = serde_json::to_string(&snapshots).unwrap();
    let parsed: Vec<MembershipSnapshot> = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed, snapshots);
    assert_eq!(parsed[0].connected, vec![parsed[1].peer_id.clone()]);
    assert!(parsed.iter().all(|s| s.heartbeat_enabled));
    assert!(json.contains("\"peerId\""));
    sim.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_encrypted_simulation_converges() {
    let settings = SimSettings {
        password: Some("swordfish".into()),
        ..settings(2)
    };
    let sim = Simulation::start(&settings).await.unwrap();

    wait_until_converged(&sim).await;
    sim.shutdown();
}

#[tokio::test]
async fn test_zero_peers_is_rejected() {
    assert!(Simulation::start(&settings(0)).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_saved_config_drives_a_new_simulation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("room.json");
    let original = settings(2);
    save_room_config(&path, &original.room).unwrap();

    let loaded = SimSettings {
        peers: 2,
        ..SimSettings::load(Some(&path)).unwrap()
    };
    assert_eq!(loaded.room, original.room);

    let sim = Simulation::start(&loaded).await.unwrap();
    wait_until_converged(&sim).await;
    assert!(sim.nodes().iter().all(|n| n.room.topic() == "sim-tests"));
    sim.shutdown();
}
