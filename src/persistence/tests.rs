use super::{DEFAULT_RECENT_LIMIT, SledStore, Store};
use crate::model::{
    BeaconReading, IngestionError, Location, RoomDefinition, StoredBeaconReading, TrainingAction,
    TrainingCommand,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use tempfile::{TempDir, tempdir};

fn create_test_store(max_readings: Option<usize>) -> (SledStore, TempDir) {
    let dir = tempdir().unwrap();
    let store = SledStore::open(dir.path().join("db"), max_readings).unwrap();
    (store, dir)
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
}

fn stored(beacon: &str, tag: &str, rssi: i32, secs: i64) -> StoredBeaconReading {
    StoredBeaconReading {
        reading: BeaconReading {
            beacon_id: beacon.to_string(),
            tag_id: tag.to_string(),
            rssi,
            timestamp: at(secs),
            beacon_location: Location::new(1.0, 2.0, 3.0),
            metadata: BTreeMap::new(),
        },
        received_at: at(secs),
    }
}

fn ingestion_error(n: usize) -> IngestionError {
    IngestionError {
        beacon_id: String::new(),
        payload: format!("payload-{n}"),
        error: "decode payload: eof".to_string(),
        recorded_at: at(n as i64),
    }
}

#[test]
fn test_insert_and_recent_readings() {
    let (store, _dir) = create_test_store(None);
    store.insert_reading(&stored("a", "cat", -60, 1)).unwrap();
    store.insert_reading(&stored("b", "cat", -70, 2)).unwrap();

    let recent = store.recent_readings(10).unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].reading.beacon_id, "b");
    assert_eq!(recent[1].reading.beacon_id, "a");
    assert_eq!(recent[1].reading.rssi, -60);
}

#[test]
fn test_latest_readings_per_beacon_and_tag() {
    let (store, _dir) = create_test_store(None);
    store.insert_reading(&stored("a", "cat", -60, 10)).unwrap();
    store.insert_reading(&stored("a", "cat", -65, 20)).unwrap();
    store.insert_reading(&stored("a", "dog", -50, 30)).unwrap();
    store.insert_reading(&stored("b", "cat", -70, 5)).unwrap();

    let cat = store.latest_readings(Some("cat")).unwrap();
    let summary: Vec<_> = cat
        .iter()
        .map(|s| (s.reading.beacon_id.as_str(), s.reading.rssi))
        .collect();
    assert_eq!(summary, vec![("a", -65), ("b", -70)]);

    // Without a tag the newest reading per beacon wins, whatever its tag.
    let any = store.latest_readings(None).unwrap();
    assert_eq!(any.len(), 2);
    assert_eq!(any[0].reading.tag_id, "dog");
    assert_eq!(any[0].reading.rssi, -50);

    assert!(store.latest_readings(Some("ferret")).unwrap().is_empty());
}

#[test]
fn test_latest_ignores_out_of_order_delivery() {
    let (store, _dir) = create_test_store(None);
    store.insert_reading(&stored("a", "cat", -60, 20)).unwrap();
    store.insert_reading(&stored("a", "cat", -90, 10)).unwrap();

    let latest = store.latest_readings(Some("cat")).unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].reading.rssi, -60);
    // The late reading is still part of the history.
    assert_eq!(store.recent_readings(0).unwrap().len(), 2);
}

#[test]
fn test_max_readings_limit() {
    let (store, _dir) = create_test_store(Some(3));
    for i in 0..5 {
        store.insert_reading(&stored(&format!("b{i}"), "cat", -60, i)).unwrap();
    }

    let recent = store.recent_readings(10).unwrap();
    let beacons: Vec<_> = recent.iter().map(|s| s.reading.beacon_id.clone()).collect();
    assert_eq!(beacons, vec!["b4", "b3", "b2"]);
    // Retention only applies to the history, not the latest view.
    assert_eq!(store.latest_readings(None).unwrap().len(), 5);
}

#[test]
fn test_recent_limit_defaults_when_zero() {
    let (store, _dir) = create_test_store(None);
    for n in 0..DEFAULT_RECENT_LIMIT + 5 {
        store.insert_ingestion_error(&ingestion_error(n)).unwrap();
    }
    let errors = store.recent_ingestion_errors(0).unwrap();
    assert_eq!(errors.len(), DEFAULT_RECENT_LIMIT);
    assert_eq!(errors[0].payload, format!("payload-{}", DEFAULT_RECENT_LIMIT + 4));
    assert_eq!(store.recent_ingestion_errors(2).unwrap().len(), 2);
}

#[test]
fn test_training_commands_newest_first() {
    let (store, _dir) = create_test_store(None);
    for (i, action) in [TrainingAction::Start, TrainingAction::Stop].into_iter().enumerate() {
        store
            .insert_training_command(&TrainingCommand {
                room: "Kitchen".to_string(),
                command: action,
                timestamp: at(i as i64),
                source: "app".to_string(),
                received_at: at(i as i64),
            })
            .unwrap();
    }
    let commands = store.recent_training_commands(0).unwrap();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0].command, TrainingAction::Stop);
    assert_eq!(commands[1].command, TrainingAction::Start);
}

#[test]
fn test_room_definitions_round_trip() {
    let (store, _dir) = create_test_store(None);
    assert!(store.room_definitions().unwrap().is_empty());

    let rooms = vec![
        RoomDefinition {
            name: "Kitchen".to_string(),
            center: Location::new(2.0, 3.0, 1.0),
            radius: 2.0,
        },
        RoomDefinition {
            name: "Loft".to_string(),
            center: Location::new(6.0, 3.0, 6.5),
            radius: 3.0,
        },
    ];
    store.save_room_definitions(&rooms).unwrap();
    assert_eq!(store.room_definitions().unwrap(), rooms);

    store.save_room_definitions(&rooms[..1]).unwrap();
    assert_eq!(store.room_definitions().unwrap().len(), 1);
}

#[test]
fn test_wipe_keeps_room_definitions() {
    let (store, _dir) = create_test_store(Some(10));
    store.insert_reading(&stored("a", "cat", -60, 1)).unwrap();
    store.insert_ingestion_error(&ingestion_error(1)).unwrap();
    store
        .save_room_definitions(&[RoomDefinition {
            name: "Office".to_string(),
            center: Location::default(),
            radius: 1.0,
        }])
        .unwrap();

    store.wipe().unwrap();

    assert!(store.recent_readings(0).unwrap().is_empty());
    assert!(store.latest_readings(None).unwrap().is_empty());
    assert!(store.recent_ingestion_errors(0).unwrap().is_empty());
    assert_eq!(store.room_definitions().unwrap().len(), 1);
}

#[test]
fn test_open_store_is_exclusive() {
    let (store, dir) = create_test_store(None);
    store.save_room_definitions(&[]).unwrap();

    let second = SledStore::open(dir.path().join("db"), None);
    assert!(second.is_err(), "a second handle on a held store must fail");
}
