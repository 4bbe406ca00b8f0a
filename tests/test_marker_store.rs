use s1ard::io::marker::MarkerStore;
use s1ard::types::ArdError;
use tempfile::TempDir;

#[test]
fn test_markers_are_listed_per_unit() {
    let dir = TempDir::new().unwrap();
    let processing = dir.path().join("processing");
    for date in ["20200103", "20200115"] {
        let unit = processing.join("117").join(date);
        std::fs::create_dir_all(&unit).unwrap();
        let dim = unit.join(format!("{}.BS.dim", date));
        std::fs::write(&dim, b"dim").unwrap();
        MarkerStore::mark_complete(&unit, None, &[dim]).unwrap();
    }
    let ts = processing.join("117").join("Timeseries");
    std::fs::create_dir_all(&ts).unwrap();
    let layer = ts.join("1.20200103.BS.VV.tif");
    std::fs::write(&layer, b"tif").unwrap();
    MarkerStore::mark_complete(&ts, Some("BS.VV"), &[layer]).unwrap();

    let markers = MarkerStore::list_markers(&processing);
    println!("Markers: {:?}", markers);
    assert_eq!(markers.len(), 3);
    assert!(markers.contains(&ts.join(".BS.VV.processed")));
    assert!(MarkerStore::is_complete(&ts, Some("BS.VV")));
    assert!(!MarkerStore::is_complete(&ts, Some("BS.VH")));
    assert!(!MarkerStore::is_complete(&ts, None));
}

#[test]
fn test_empty_data_directory_is_not_complete() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("20200103.BS.data");
    std::fs::create_dir_all(&data).unwrap();

    match MarkerStore::mark_complete(dir.path(), None, &[data.clone()]) {
        Err(ArdError::ArtifactValidation { path, reason }) => {
            assert_eq!(path, data);
            assert_eq!(reason, "empty directory");
        }
        other => panic!("Expected ArtifactValidation, got {:?}", other),
    }
    assert!(!MarkerStore::is_complete(dir.path(), None));
}

#[test]
fn test_marker_replaces_atomically() {
    let dir = TempDir::new().unwrap();
    let marker = MarkerStore::marker_path(dir.path(), None);
    std::fs::write(&marker, b"stale").unwrap();
    MarkerStore::write_marker(&marker, "passed all tests").unwrap();

    assert_eq!(std::fs::read_to_string(&marker).unwrap(), "passed all tests\n");
    // No temporary files left behind
    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
}
