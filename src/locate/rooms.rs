use serde::{Deserialize, Serialize};

use crate::model::{Location, RoomDefinition};

/// Distance from an estimate to one configured room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMatch {
    pub name: String,
    pub distance: f64,
    pub radius: f64,
    pub within_radius: bool,
}

/// Rooms ordered nearest first. The sort is stable, so equidistant rooms keep
/// their configured order.
pub fn rank_rooms(location: &Location, rooms: &[RoomDefinition]) -> Vec<RoomMatch> {
    let mut matches: Vec<RoomMatch> = rooms
        .iter()
        .map(|room| {
            let distance = location.distance_to(&room.center);
            RoomMatch {
                name: room.name.clone(),
                distance,
                radius: room.radius,
                within_radius: distance <= room.radius,
            }
        })
        .collect();
    matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    matches
}
