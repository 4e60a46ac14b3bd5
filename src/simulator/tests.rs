use super::*;
use crate::broker::Broker;
use crate::transport::codec::read_packet;
use crate::transport::packet::{Subscribe, encode_publish as frame_publish};
use std::sync::Arc;
use tempfile::tempdir;

fn seeded(config: SimulatorConfig) -> BeaconSimulator {
    BeaconSimulator::new(SimulatorConfig {
        seed: Some(42),
        ..config
    })
    .unwrap()
}

#[test]
fn test_rssi_noise_matches_configured_spread() {
    let mut sim = seeded(SimulatorConfig {
        start: Some(Location::new(2.0, 2.0, 1.0)),
        stationary: true,
        noise_std: 2.0,
        ..SimulatorConfig::default()
    });
    let model = PathLossModel::default();
    let tag = sim.tag_position();

    let mut errors = Vec::new();
    for _ in 0..2_000 {
        for reading in sim.readings(Utc::now()) {
            let expected = model.rssi_at(reading.beacon_location.distance_to(&tag));
            errors.push(f64::from(reading.rssi) - expected);
        }
    }
    let mean = errors.iter().sum::<f64>() / errors.len() as f64;
    let var = errors.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / errors.len() as f64;
    // Rounding to whole dBm adds about 1/12 to the variance.
    assert!(mean.abs() < 0.1, "mean {mean}");
    assert!((var - 4.0).abs() < 0.3, "variance {var}");
}

#[test]
fn test_negative_spread_is_rejected() {
    let err = BeaconSimulator::new(SimulatorConfig {
        noise_std: -1.0,
        ..SimulatorConfig::default()
    })
    .unwrap_err();
    assert!(matches!(err, SimulatorError::Distribution(_)));

    let err = BeaconSimulator::new(SimulatorConfig {
        tag_step: f64::NAN,
        ..SimulatorConfig::default()
    })
    .unwrap_err();
    assert!(matches!(err, SimulatorError::Distribution(_)));
}

#[test]
fn test_default_layout_covers_three_floors() {
    let house = House {
        width: 12.0,
        depth: 8.0,
        height: 9.0,
    };
    let layout = house.default_layout();
    assert_eq!(layout.len(), 12);
    assert_eq!(layout[0], SimBeacon { id: "sim-beacon-1".to_string(), x: 0.0, y: 0.0, z: 1.5 });
    assert_eq!(layout[3].x, 12.0);
    assert_eq!(layout[3].y, 8.0);
    assert_eq!(layout[11].id, "sim-beacon-12");
    assert_eq!(layout[11].z, 7.5);
}

#[test]
fn test_house_clamp() {
    let house = House {
        width: 10.0,
        depth: 5.0,
        height: 3.0,
    };
    let p = house.clamp(Location::new(-1.0, 7.0, 1.0));
    assert_eq!(p, Location::new(0.0, 5.0, 1.0));
}

#[test]
fn test_noise_free_readings_follow_model() {
    let mut sim = seeded(SimulatorConfig {
        start: Some(Location::new(1.0, 1.0, 1.5)),
        noise_std: 0.0,
        stationary: true,
        ..SimulatorConfig::default()
    });
    let now = Utc::now();
    let readings = sim.readings(now);
    assert_eq!(readings.len(), 12);

    let model = PathLossModel::default();
    for reading in &readings {
        let d = reading.beacon_location.distance_to(&sim.tag_position());
        assert_eq!(reading.rssi, model.rssi_at(d).round() as i32);
        assert_eq!(reading.tag_id, "cat-collar-1");
        assert_eq!(reading.timestamp, now);
        assert_eq!(reading.metadata["source"], "simulator");
        assert_eq!(reading.metadata["tag_x"], "1.00");
    }

    sim.step();
    assert_eq!(sim.tag_position(), Location::new(1.0, 1.0, 1.5));
}

#[test]
fn test_random_walk_stays_inside_and_is_reproducible() {
    let config = SimulatorConfig {
        tag_step: 3.0,
        ..SimulatorConfig::default()
    };
    let mut a = seeded(config.clone());
    let mut b = seeded(config.clone());
    let house = config.house;
    for _ in 0..500 {
        a.step();
        b.step();
        let p = a.tag_position();
        assert!((0.0..=house.width).contains(&p.x));
        assert!((0.0..=house.depth).contains(&p.y));
        assert!((0.0..=house.height).contains(&p.z));
    }
    assert_eq!(a.tag_position(), b.tag_position());
}

#[test]
fn test_load_layout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("beacons.json");
    std::fs::write(&path, r#"[{"id":"hall","x":1,"y":2,"z":0.5}]"#).unwrap();
    let layout = load_layout(&path).unwrap();
    assert_eq!(layout, vec![SimBeacon { id: "hall".to_string(), x: 1.0, y: 2.0, z: 0.5 }]);

    assert!(matches!(
        load_layout(&dir.path().join("missing.json")),
        Err(SimulatorError::Layout(_))
    ));
}

#[tokio::test]
async fn test_client_publishes_through_broker() {
    let broker = Arc::new(Broker::default());
    let (addr, _fatal) = broker.start("127.0.0.1:0").await.unwrap();

    let mut watcher = TcpStream::connect(addr).await.unwrap();
    watcher
        .write_all(&Connect::new("watcher").encode().unwrap())
        .await
        .unwrap();
    read_packet(&mut watcher, MAX_REMAINING_LENGTH).await.unwrap().unwrap();
    let subscribe = Subscribe {
        packet_id: 1,
        topics: vec!["beacons/sim-beacon-1/readings".to_string()],
    };
    watcher.write_all(&subscribe.encode().unwrap()).await.unwrap();
    read_packet(&mut watcher, MAX_REMAINING_LENGTH).await.unwrap().unwrap();

    let mut sim = seeded(SimulatorConfig::default());
    let reading = sim.readings(Utc::now()).remove(0);
    let mut client = SimulatorClient::connect(&addr.to_string(), "sim").await.unwrap();
    client.publish_reading(&reading).await.unwrap();

    let packet = tokio::time::timeout(
        Duration::from_secs(2),
        read_packet(&mut watcher, MAX_REMAINING_LENGTH),
    )
    .await
    .unwrap()
    .unwrap()
    .unwrap();
    let expected = frame_publish(
        "beacons/sim-beacon-1/readings",
        &serde_json::to_vec(&reading).unwrap(),
    )
    .unwrap();
    assert_eq!(packet.encode().unwrap(), expected);

    client.disconnect().await.unwrap();
    broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_client_connect_refused_address() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let err = SimulatorClient::connect(&addr.to_string(), "sim")
        .await
        .unwrap_err();
    assert!(matches!(err, SimulatorError::Connect { .. }));
}
