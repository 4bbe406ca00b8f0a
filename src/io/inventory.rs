//! Scene and burst inventories.
//!
//! On disk an inventory is a JSON attribute table
//! `{"columns": [...], "rows": [[...], ...]}`. Writers of the table may
//! truncate column names, so readers re-impose the canonical names by
//! position and refuse tables with a different column count. Geometries
//! are kept as opaque WKT strings.

use crate::core::grouping::{Grouper, ANCHOR_TOLERANCE};
use crate::types::{ArdError, ArdResult, Burst, OrbitDirection, Scene, Subswath};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const SCENE_COLUMNS: [&str; 21] = [
    "id",
    "identifier",
    "polarisationmode",
    "orbitdirection",
    "acquisitiondate",
    "relativeorbit",
    "orbitnumber",
    "product_type",
    "slicenumber",
    "size",
    "beginposition",
    "endposition",
    "lastrelativeorbitnumber",
    "lastorbitnumber",
    "uuid",
    "platformidentifier",
    "missiondatatakeid",
    "swathidentifier",
    "ingestiondate",
    "sensoroperationalmode",
    "geometry",
];

pub const BURST_COLUMNS: [&str; 9] = [
    "SceneID", "Track", "Direction", "Date", "SwathID", "AnxTime", "BurstNr", "geometry", "bid",
];

/// Raw attribute table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl InventoryTable {
    pub fn read<P: AsRef<Path>>(path: P) -> ArdResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let table: InventoryTable = serde_json::from_str(&content)?;
        Ok(table)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> ArdResult<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path.as_ref(), serde_json::to_string(self)?)?;
        Ok(())
    }

    /// Rename columns positionally to `canonical`
    pub fn with_canonical_columns(mut self, canonical: &[&str]) -> ArdResult<Self> {
        if self.columns.len() != canonical.len() {
            return Err(ArdError::Inventory(format!(
                "expected {} columns, found {}",
                canonical.len(),
                self.columns.len()
            )));
        }
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != canonical.len() {
                return Err(ArdError::Inventory(format!(
                    "row {} has {} values, expected {}",
                    i,
                    row.len(),
                    canonical.len()
                )));
            }
        }
        for (column, name) in self.columns.iter_mut().zip(canonical) {
            if column != name {
                log::debug!("Restoring column name {} -> {}", column, name);
                *column = name.to_string();
            }
        }
        Ok(self)
    }

    pub fn records(&self) -> impl Iterator<Item = BTreeMap<&str, &Value>> + '_ {
        self.rows.iter().map(move |row| {
            self.columns
                .iter()
                .map(String::as_str)
                .zip(row.iter())
                .collect()
        })
    }
}

fn text(value: Option<&&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn number(value: Option<&&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Ordered collection of scenes; only ever shrinks by filtering
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    scenes: Vec<Scene>,
}

impl Inventory {
    pub fn new(scenes: Vec<Scene>) -> Self {
        Self { scenes }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> ArdResult<Self> {
        log::info!("Reading inventory {}", path.as_ref().display());
        let table = InventoryTable::read(path)?.with_canonical_columns(&SCENE_COLUMNS)?;
        Ok(Self::from_table(&table))
    }

    /// Build from a canonical table. Rows with an unparsable identifier
    /// are logged and dropped.
    pub fn from_table(table: &InventoryTable) -> Self {
        let mut scenes = Vec::new();
        for record in table.records() {
            let identifier = match text(record.get("identifier")) {
                Some(id) => id,
                None => {
                    log::warn!("Inventory row without identifier skipped");
                    continue;
                }
            };
            let mut scene = match Scene::parse(&identifier) {
                Ok(scene) => scene,
                Err(e) => {
                    log::warn!("Skipping inventory row: {}", e);
                    continue;
                }
            };
            scene.orbit_direction = text(record.get("orbitdirection")).and_then(|d| OrbitDirection::parse(&d));
            scene.uuid = text(record.get("uuid"));
            scene.size = text(record.get("size"));
            scene.footprint = text(record.get("geometry"));
            scenes.push(scene);
        }
        Self { scenes }
    }

    pub fn to_table(&self) -> InventoryTable {
        let rows = self
            .scenes
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let opt = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);
                let pol_mode = match s.polarizations.as_slice() {
                    [single] => format!("{}", single),
                    [a, b] => format!("{} {}", a, b),
                    _ => String::new(),
                };
                vec![
                    Value::from(i),
                    Value::from(s.identifier.clone()),
                    Value::from(pol_mode),
                    s.orbit_direction.map(|d| Value::from(d.as_str())).unwrap_or(Value::Null),
                    Value::from(s.date_label()),
                    Value::from(s.relative_orbit()),
                    Value::from(s.absolute_orbit),
                    Value::from(s.product_type.as_str()),
                    Value::Null,
                    opt(&s.size),
                    Value::from(s.start_time.format("%Y-%m-%dT%H:%M:%S").to_string()),
                    Value::from(s.stop_time.format("%Y-%m-%dT%H:%M:%S").to_string()),
                    Value::from(s.relative_orbit()),
                    Value::from(s.absolute_orbit),
                    opt(&s.uuid),
                    Value::from(format!("Sentinel-1{}", &s.identifier[2..3])),
                    Value::from(s.datatake_id.clone()),
                    Value::Null,
                    Value::Null,
                    Value::from(format!("{:?}", s.mode)),
                    opt(&s.footprint),
                ]
            })
            .collect();
        InventoryTable {
            columns: SCENE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> ArdResult<()> {
        self.to_table().write(path)
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn tracks(&self) -> BTreeSet<u32> {
        self.scenes.iter().map(|s| s.relative_orbit()).collect()
    }

    /// Drop scenes by identifier, returning how many were removed
    pub fn remove(&mut self, identifiers: &[String]) -> usize {
        let before = self.scenes.len();
        self.scenes.retain(|s| !identifiers.contains(&s.identifier));
        before - self.scenes.len()
    }

    /// Attach the local path of every scene present under `download_dir`
    /// (with its `.downloaded` marker) or on the read-only data mount
    pub fn check_availability<P: AsRef<Path>>(&mut self, download_dir: P, data_mount: Option<&Path>) -> usize {
        let mut available = 0;
        for scene in &mut self.scenes {
            scene.local_path = locate_scene(scene, download_dir.as_ref(), data_mount);
            if scene.local_path.is_some() {
                available += 1;
            }
        }
        log::info!("{} of {} scene(s) available locally", available, self.scenes.len());
        available
    }

    /// Sum of the `size` column, e.g. `"1.6 GB"` or `"870 MB"`
    pub fn download_size_gb(&self) -> f64 {
        self.scenes
            .iter()
            .filter_map(|s| s.size.as_deref())
            .filter_map(parse_size_gb)
            .sum()
    }
}

fn parse_size_gb(size: &str) -> Option<f64> {
    let mut parts = size.split_whitespace();
    let value: f64 = parts.next()?.parse().ok()?;
    match parts.next().map(|u| u.to_uppercase()) {
        Some(unit) if unit == "GB" => Some(value),
        Some(unit) if unit == "MB" => Some(value / 1024.0),
        Some(unit) if unit == "KB" => Some(value / (1024.0 * 1024.0)),
        None => Some(value),
        _ => None,
    }
}

/// Downloaded archive, then a SAFE directory or zip on the data mount
pub fn locate_scene(scene: &Scene, download_dir: &Path, data_mount: Option<&Path>) -> Option<PathBuf> {
    let downloaded = scene.download_path(download_dir);
    if crate::io::marker::MarkerStore::is_downloaded(&downloaded) {
        return Some(downloaded);
    }
    let mount = data_mount?;
    let base = mount
        .join("Sentinel-1")
        .join("SAR")
        .join(scene.product_type.as_str())
        .join(scene.start_time.format("%Y").to_string())
        .join(scene.start_time.format("%m").to_string())
        .join(scene.start_time.format("%d").to_string());
    [
        base.join(format!("{}.SAFE", scene.identifier)),
        base.join(format!("{}.zip", scene.identifier)),
    ]
    .into_iter()
    .find(|p| p.exists())
}

/// Bursts with stable burst ids
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BurstInventory {
    bursts: Vec<Burst>,
}

impl BurstInventory {
    /// Coalesce anchors and assign burst ids
    pub fn from_bursts(mut bursts: Vec<Burst>) -> ArdResult<Self> {
        if bursts.is_empty() {
            return Err(ArdError::EmptyInventory("no bursts".to_string()));
        }
        Grouper::assign_burst_ids(&mut bursts, ANCHOR_TOLERANCE);
        bursts.sort_by(|a, b| (&a.bid, a.date, &a.scene_id).cmp(&(&b.bid, b.date, &b.scene_id)));
        Ok(Self { bursts })
    }

    pub fn read<P: AsRef<Path>>(path: P) -> ArdResult<Self> {
        let table = InventoryTable::read(path)?.with_canonical_columns(&BURST_COLUMNS)?;
        let mut bursts = Vec::new();
        for (i, record) in table.records().enumerate() {
            let scene_id = text(record.get("SceneID")).ok_or_else(|| row_error(i, "SceneID"))?;
            let track = number(record.get("Track")).ok_or_else(|| row_error(i, "Track"))? as u32;
            let direction = text(record.get("Direction"))
                .and_then(|d| OrbitDirection::parse(&d))
                .ok_or_else(|| row_error(i, "Direction"))?;
            let date = text(record.get("Date"))
                .and_then(|d| NaiveDate::parse_from_str(&d, "%Y%m%d").ok())
                .ok_or_else(|| row_error(i, "Date"))?;
            let subswath = text(record.get("SwathID"))
                .and_then(|s| Subswath::parse(&s))
                .ok_or_else(|| row_error(i, "SwathID"))?;
            let anchor = number(record.get("AnxTime")).ok_or_else(|| row_error(i, "AnxTime"))?.round() as i64;
            let burst_nr = number(record.get("BurstNr")).ok_or_else(|| row_error(i, "BurstNr"))? as u32;
            bursts.push(Burst {
                scene_id,
                track,
                direction,
                date,
                subswath,
                anchor,
                burst_nr,
                footprint: text(record.get("geometry")),
                bid: text(record.get("bid")).unwrap_or_default(),
            });
        }
        if bursts.iter().any(|b| b.bid.is_empty()) {
            return Self::from_bursts(bursts);
        }
        Ok(Self { bursts })
    }

    /// Write with every scalar stringified
    pub fn write<P: AsRef<Path>>(&self, path: P) -> ArdResult<()> {
        let rows = self
            .bursts
            .iter()
            .map(|b| {
                vec![
                    Value::from(b.scene_id.clone()),
                    Value::from(b.track.to_string()),
                    Value::from(b.direction.as_str()),
                    Value::from(b.date_label()),
                    Value::from(b.subswath.to_string()),
                    Value::from(b.anchor.to_string()),
                    Value::from(b.burst_nr.to_string()),
                    b.footprint.clone().map(Value::String).unwrap_or(Value::Null),
                    Value::from(b.bid.clone()),
                ]
            })
            .collect();
        InventoryTable {
            columns: BURST_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows,
        }
        .write(path)
    }

    pub fn bursts(&self) -> &[Burst] {
        &self.bursts
    }

    pub fn len(&self) -> usize {
        self.bursts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bursts.is_empty()
    }

    pub fn bids(&self) -> BTreeSet<String> {
        self.bursts.iter().map(|b| b.bid.clone()).collect()
    }

    /// Scene identifiers referenced by the bursts
    pub fn scene_ids(&self) -> BTreeSet<String> {
        self.bursts.iter().map(|b| b.scene_id.clone()).collect()
    }
}

fn row_error(row: usize, column: &str) -> ArdError {
    ArdError::Inventory(format!("row {}: missing or invalid {}", row, column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truncated_columns_are_restored() {
        let mut columns: Vec<String> = SCENE_COLUMNS.iter().map(|c| c.chars().take(10).collect()).collect();
        columns[0] = "id".into();
        let mut row = vec![Value::Null; 21];
        row[1] = json!("S1A_IW_GRDH_1SDV_20200103T170815_20200103T170842_030639_0382D5_DADE");
        row[3] = json!("ASCENDING");
        row[9] = json!("1.6 GB");
        let table = InventoryTable { columns, rows: vec![row] }
            .with_canonical_columns(&SCENE_COLUMNS)
            .unwrap();
        assert_eq!(table.columns[12], "lastrelativeorbitnumber");

        let inventory = Inventory::from_table(&table);
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory.scenes()[0].orbit_direction, Some(OrbitDirection::Ascending));
        assert!((inventory.download_size_gb() - 1.6).abs() < 1e-9);
    }

    #[test]
    fn column_count_mismatch_is_rejected() {
        let table = InventoryTable {
            columns: vec!["identifier".into()],
            rows: vec![],
        };
        assert!(matches!(table.with_canonical_columns(&SCENE_COLUMNS), Err(ArdError::Inventory(_))));
    }

    #[test]
    fn size_units() {
        assert_eq!(parse_size_gb("2 GB"), Some(2.0));
        assert_eq!(parse_size_gb("512 MB"), Some(0.5));
        assert_eq!(parse_size_gb("big"), None);
    }
}
