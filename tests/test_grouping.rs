mod common;

use chrono::NaiveDate;
use common::{init_logging, scene_id};
use s1ard::core::dispatch::WorkUnit;
use s1ard::core::grouping::{Grouper, UnitInputs, ANCHOR_TOLERANCE};
use s1ard::types::{ArdError, Burst, OrbitDirection, Scene, Subswath};
use std::path::Path;

fn burst(scene: &str, date: &str, subswath: Subswath, anchor: i64) -> Burst {
    Burst {
        scene_id: scene.to_string(),
        track: 117,
        direction: OrbitDirection::Ascending,
        date: NaiveDate::parse_from_str(date, "%Y%m%d").unwrap(),
        subswath,
        anchor,
        burst_nr: 1,
        footprint: None,
        bid: String::new(),
    }
}

#[test]
fn test_slices_of_one_pass_form_one_unit() {
    init_logging();
    let later_slice = Scene::parse("S1A_IW_GRDH_1SDV_20200103T170840_20200103T170907_030639_0382D5_1F2E").unwrap();
    let scenes = vec![
        later_slice.clone(),
        Scene::parse(&scene_id("20200103", 30639)).unwrap(),
        Scene::parse(&scene_id("20200115", 30639)).unwrap(),
        Scene::parse(&scene_id("20200104", 30640)).unwrap(),
    ];

    let groups = Grouper::group_scenes(&scenes).unwrap();
    assert_eq!(groups.keys().copied().collect::<Vec<_>>(), vec![117, 118]);

    let track = &groups[&117];
    assert_eq!(track.len(), 2);
    assert_eq!(track[0].scenes.len(), 2);
    // Slices sorted by start time
    assert_eq!(track[0].scenes[1], later_slice);

    let units = Grouper::scene_units(&groups, "/p");
    println!("Units: {:?}", units.iter().map(|u| u.key()).collect::<Vec<_>>());
    assert_eq!(units.len(), 3);
    assert_eq!(units[0].key(), "117/20200103");
    assert_eq!(units[0].out_dir, Path::new("/p/117/20200103"));
    assert_eq!(units[0].prefix(), "20200103");
    assert!(matches!(&units[0].inputs, UnitInputs::Scenes(parts) if parts.len() == 2));
    assert_eq!(units[2].group(), "118");
}

#[test]
fn test_empty_inventory_is_rejected() {
    assert!(matches!(Grouper::group_scenes(&[]), Err(ArdError::EmptyInventory(_))));
    assert!(matches!(Grouper::group_bursts(&[]), Err(ArdError::EmptyInventory(_))));
}

#[test]
fn test_jittered_anchors_share_a_burst_id() {
    init_logging();
    let mut bursts = vec![
        burst("a", "20200103", Subswath::IW1, 764),
        burst("b", "20200115", Subswath::IW1, 763),
        burst("c", "20200127", Subswath::IW1, 765),
        burst("d", "20200103", Subswath::IW1, 767),
        burst("e", "20200103", Subswath::IW2, 764),
    ];
    Grouper::assign_burst_ids(&mut bursts, ANCHOR_TOLERANCE);

    let bids: Vec<&str> = bursts.iter().map(|b| b.bid.as_str()).collect();
    println!("Burst ids: {:?}", bids);
    assert_eq!(bids[0], "A117_IW1_763");
    assert_eq!(bids[1], "A117_IW1_763");
    assert_eq!(bids[2], "A117_IW1_763");
    // Two seconds from the run: a different burst
    assert_eq!(bids[3], "A117_IW1_767");
    // Other subswath is another strip
    assert_eq!(bids[4], "A117_IW2_764");
}

#[test]
fn test_burst_groups_are_chronological() {
    init_logging();
    let mut bursts = vec![
        burst("late", "20200127", Subswath::IW1, 764),
        burst("early", "20200103", Subswath::IW1, 763),
        burst("dup", "20200103", Subswath::IW1, 764),
    ];
    Grouper::assign_burst_ids(&mut bursts, ANCHOR_TOLERANCE);

    let groups = Grouper::group_bursts(&bursts).unwrap();
    let dated = &groups["A117_IW1_763"];
    assert_eq!(dated.len(), 2);
    assert_eq!(dated[0].1.scene_id, "early");
    assert_eq!(dated[1].1.scene_id, "late");

    let units = Grouper::burst_units(&groups, "/p");
    assert_eq!(units[0].out_dir, Path::new("/p/A117_IW1_763/20200103"));
    assert_eq!(units[0].prefix(), "20200103_A117_IW1_763");
}

#[test]
fn test_burst_without_id_is_rejected() {
    let bursts = vec![burst("a", "20200103", Subswath::IW1, 764)];
    assert!(matches!(Grouper::group_bursts(&bursts), Err(ArdError::Inventory(_))));
}
