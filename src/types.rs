use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl Polarization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarization::VV => "VV",
            Polarization::VH => "VH",
            Polarization::HV => "HV",
            Polarization::HH => "HH",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_uppercase().as_str() {
            "VV" => Some(Polarization::VV),
            "VH" => Some(Polarization::VH),
            "HV" => Some(Polarization::HV),
            "HH" => Some(Polarization::HH),
            _ => None,
        }
    }

    /// Co-polarized channels carry the burst annotation used for inventories
    pub fn is_co_pol(&self) -> bool {
        matches!(self, Polarization::VV | Polarization::HH)
    }
}

impl fmt::Display for Polarization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sentinel-1 platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mission {
    S1A,
    S1B,
}

impl Mission {
    /// Platform code used by the ASF datapool
    pub fn datapool_code(&self) -> &'static str {
        match self {
            Mission::S1A => "SA",
            Mission::S1B => "SB",
        }
    }

    /// Offset between absolute and relative orbit numbering
    fn orbit_offset(&self) -> i64 {
        match self {
            Mission::S1A => 73,
            Mission::S1B => 27,
        }
    }
}

/// Sentinel-1 acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionMode {
    IW, // Interferometric Wide swath
    EW, // Extra Wide swath
    SM, // StripMap
    WV, // Wave
}

/// Sentinel-1 product type as encoded in the scene identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductType {
    Grd,
    Slc,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Grd => "GRD",
            ProductType::Slc => "SLC",
        }
    }
}

/// Which pipeline a batch runs: scene-based GRD or burst-based SLC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductKind {
    Grd,
    Slc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OrbitDirection {
    Ascending,
    Descending,
}

impl OrbitDirection {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "ASCENDING" | "A" => Some(OrbitDirection::Ascending),
            "DESCENDING" | "D" => Some(OrbitDirection::Descending),
            _ => None,
        }
    }

    /// Leading character of a burst id
    pub fn initial(&self) -> char {
        match self {
            OrbitDirection::Ascending => 'A',
            OrbitDirection::Descending => 'D',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrbitDirection::Ascending => "ASCENDING",
            OrbitDirection::Descending => "DESCENDING",
        }
    }
}

/// IW sub-swath
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Subswath {
    IW1,
    IW2,
    IW3,
}

impl Subswath {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "IW1" | "1" => Some(Subswath::IW1),
            "IW2" | "2" => Some(Subswath::IW2),
            "IW3" | "3" => Some(Subswath::IW3),
            _ => None,
        }
    }
}

impl fmt::Display for Subswath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subswath::IW1 => write!(f, "IW1"),
            Subswath::IW2 => write!(f, "IW2"),
            Subswath::IW3 => write!(f, "IW3"),
        }
    }
}

/// A Sentinel-1 scene parsed from its product identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub identifier: String,
    pub mission: Mission,
    pub mode: AcquisitionMode,
    pub product_type: ProductType,
    /// Resolution class of GRD products (H, M, F)
    pub resolution: Option<char>,
    pub polarizations: Vec<Polarization>,
    pub start_time: NaiveDateTime,
    pub stop_time: NaiveDateTime,
    pub absolute_orbit: u32,
    pub datatake_id: String,
    pub unique_id: String,

    // Inventory attributes
    pub orbit_direction: Option<OrbitDirection>,
    pub uuid: Option<String>,
    pub size: Option<String>,
    pub footprint: Option<String>,
    pub local_path: Option<PathBuf>,
}

fn scene_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(S1[AB])_(IW|EW|SM|WV)_(GRD|SLC)([HMF_])_\d[SA](SH|SV|DH|DV)_(\d{8}T\d{6})_(\d{8}T\d{6})_(\d{6})_([0-9A-F]{6})_([0-9A-F]{4})$",
        )
        .expect("scene id pattern is valid")
    })
}

impl Scene {
    /// Parse a scene identifier like
    /// `S1A_IW_GRDH_1SDV_20200103T170815_20200103T170842_030639_0382D5_DADE`
    pub fn parse(identifier: &str) -> ArdResult<Self> {
        let id = identifier
            .trim()
            .trim_end_matches(".zip")
            .trim_end_matches(".SAFE");

        let caps = scene_id_pattern()
            .captures(id)
            .ok_or_else(|| ArdError::InvalidSceneId(identifier.to_string()))?;

        let mission = match &caps[1] {
            "S1A" => Mission::S1A,
            _ => Mission::S1B,
        };
        let mode = match &caps[2] {
            "IW" => AcquisitionMode::IW,
            "EW" => AcquisitionMode::EW,
            "SM" => AcquisitionMode::SM,
            _ => AcquisitionMode::WV,
        };
        let product_type = match &caps[3] {
            "GRD" => ProductType::Grd,
            _ => ProductType::Slc,
        };
        let resolution = caps[4].chars().next().filter(|c| *c != '_');
        let polarizations = match &caps[5] {
            "SV" => vec![Polarization::VV],
            "SH" => vec![Polarization::HH],
            "DV" => vec![Polarization::VV, Polarization::VH],
            _ => vec![Polarization::HH, Polarization::HV],
        };

        let parse_time = |value: &str| {
            NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
                .map_err(|_| ArdError::InvalidSceneId(identifier.to_string()))
        };

        let absolute_orbit = caps[8]
            .parse::<u32>()
            .map_err(|_| ArdError::InvalidSceneId(identifier.to_string()))?;

        Ok(Scene {
            identifier: id.to_string(),
            mission,
            mode,
            product_type,
            resolution,
            polarizations,
            start_time: parse_time(&caps[6])?,
            stop_time: parse_time(&caps[7])?,
            absolute_orbit,
            datatake_id: caps[9].to_string(),
            unique_id: caps[10].to_string(),
            orbit_direction: None,
            uuid: None,
            size: None,
            footprint: None,
            local_path: None,
        })
    }

    /// Relative orbit (track) derived from the absolute orbit
    pub fn relative_orbit(&self) -> u32 {
        let relative = (self.absolute_orbit as i64 - self.mission.orbit_offset()).rem_euclid(175) + 1;
        relative as u32
    }

    pub fn acquisition_date(&self) -> NaiveDate {
        self.start_time.date()
    }

    /// Acquisition date as `YYYYMMDD`
    pub fn date_label(&self) -> String {
        self.start_time.format("%Y%m%d").to_string()
    }

    /// Archive location below a download directory:
    /// `<dir>/SAR/<type>/<YYYY>/<MM>/<DD>/<id>.zip`
    pub fn download_path<P: AsRef<Path>>(&self, download_dir: P) -> PathBuf {
        download_dir
            .as_ref()
            .join("SAR")
            .join(self.product_type.as_str())
            .join(self.start_time.format("%Y").to_string())
            .join(self.start_time.format("%m").to_string())
            .join(self.start_time.format("%d").to_string())
            .join(format!("{}.zip", self.identifier))
    }

    /// ASF datapool product directory (GRD_HD, GRD_MD, SLC)
    pub fn datapool_product(&self) -> String {
        match (self.product_type, self.resolution) {
            (ProductType::Slc, _) => "SLC".to_string(),
            (ProductType::Grd, Some(res)) => format!("GRD_{}D", res),
            (ProductType::Grd, None) => "GRD_HD".to_string(),
        }
    }

    pub fn asf_url(&self) -> String {
        format!(
            "https://datapool.asf.alaska.edu/{}/{}/{}.zip",
            self.datapool_product(),
            self.mission.datapool_code(),
            self.identifier
        )
    }
}

impl fmt::Display for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier)
    }
}

/// One IW burst as listed in a burst inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Burst {
    pub scene_id: String,
    pub track: u32,
    pub direction: OrbitDirection,
    pub date: NaiveDate,
    pub subswath: Subswath,
    /// Seconds since ascending node crossing, rounded
    pub anchor: i64,
    pub burst_nr: u32,
    pub footprint: Option<String>,
    /// Stable burst id, assigned once anchors are coalesced
    pub bid: String,
}

impl Burst {
    /// `<direction><track>_<subswath>_<anchor>`, e.g. `A117_IW1_764`
    pub fn burst_id(direction: OrbitDirection, track: u32, subswath: Subswath, anchor: i64) -> String {
        format!("{}{}_{}_{}", direction.initial(), track, subswath, anchor)
    }

    pub fn date_label(&self) -> String {
        self.date.format("%Y%m%d").to_string()
    }

    /// Output prefix of this burst's ARD, `<date>_<bid>`
    pub fn ard_prefix(&self) -> String {
        format!("{}_{}", self.date_label(), self.bid)
    }
}

/// How a failure is treated by the batch driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureClass {
    /// Will be tried again on the next pass
    Retryable,
    /// Excluded from later passes and reported
    Permanent,
}

/// Error types for batch processing
#[derive(Debug, thiserror::Error)]
pub enum ArdError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Empty inventory: {0}")]
    EmptyInventory(String),

    #[error("Invalid scene identifier: {0}")]
    InvalidSceneId(String),

    #[error("Inventory error: {0}")]
    Inventory(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Authentication failed for {0}")]
    Authentication(String),

    #[error("HTTP error {status}: {url}")]
    Http { status: u16, url: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Scene not in archive: {0}")]
    MissingFromArchive(String),

    #[error("Scene not downloaded: {0}")]
    SceneNotDownloaded(String),

    #[error("Integrity check failed for {} after {attempts} attempts", .path.display())]
    IntegrityCheckFailed { path: PathBuf, attempts: u32 },

    #[error("External job `{program}` exited with code {exit_code}, see {}", .log_path.display())]
    ExternalJobFailed {
        program: String,
        exit_code: i32,
        log_path: PathBuf,
    },

    #[error("Artifact validation failed for {}: {reason}", .path.display())]
    ArtifactValidation { path: PathBuf, reason: String },

    #[error("Batch partially incomplete at stage {stage}: {} unit(s) unresolved", .unresolved.len())]
    BatchPartiallyIncomplete { stage: String, unresolved: Vec<String> },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl ArdError {
    /// Permanent errors are never worth another pass
    pub fn failure_class(&self) -> FailureClass {
        match self {
            ArdError::MissingFromArchive(_)
            | ArdError::SceneNotDownloaded(_)
            | ArdError::InvalidSceneId(_)
            | ArdError::InvalidConfiguration(_)
            | ArdError::Authentication(_)
            // The re-download budget is spent inside `invoke_download`
            | ArdError::IntegrityCheckFailed { .. } => FailureClass::Permanent,
            _ => FailureClass::Retryable,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.failure_class() == FailureClass::Permanent
    }
}

impl From<zip::result::ZipError> for ArdError {
    fn from(e: zip::result::ZipError) -> Self {
        ArdError::Archive(e.to_string())
    }
}

/// Result type for batch operations
pub type ArdResult<T> = Result<T, ArdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grd_identifier() {
        let scene = Scene::parse("S1A_IW_GRDH_1SDV_20200103T170815_20200103T170842_030639_0382D5_DADE").unwrap();
        assert_eq!(scene.mission, Mission::S1A);
        assert_eq!(scene.product_type, ProductType::Grd);
        assert_eq!(scene.resolution, Some('H'));
        assert_eq!(scene.polarizations, vec![Polarization::VV, Polarization::VH]);
        assert_eq!(scene.absolute_orbit, 30639);
        assert_eq!(scene.relative_orbit(), (30639 - 73) % 175 + 1);
        assert_eq!(scene.date_label(), "20200103");
        assert_eq!(scene.datapool_product(), "GRD_HD");
    }

    #[test]
    fn parses_slc_identifier_with_double_underscore() {
        let scene = Scene::parse("S1B_IW_SLC__1SDH_20191216T051212_20191216T051239_019383_0249C6_1F41").unwrap();
        assert_eq!(scene.mission, Mission::S1B);
        assert_eq!(scene.product_type, ProductType::Slc);
        assert_eq!(scene.resolution, None);
        assert_eq!(scene.polarizations, vec![Polarization::HH, Polarization::HV]);
        assert_eq!(scene.relative_orbit(), (19383 - 27) % 175 + 1);
        assert_eq!(
            scene.asf_url(),
            "https://datapool.asf.alaska.edu/SLC/SB/S1B_IW_SLC__1SDH_20191216T051212_20191216T051239_019383_0249C6_1F41.zip"
        );
    }

    #[test]
    fn download_path_is_date_partitioned() {
        let scene = Scene::parse("S1A_IW_GRDH_1SDV_20200103T170815_20200103T170842_030639_0382D5_DADE").unwrap();
        let path = scene.download_path("/data");
        assert_eq!(
            path,
            PathBuf::from("/data/SAR/GRD/2020/01/03/S1A_IW_GRDH_1SDV_20200103T170815_20200103T170842_030639_0382D5_DADE.zip")
        );
    }

    #[test]
    fn rejects_malformed_identifier() {
        assert!(matches!(Scene::parse("S1A_IW_GRDH_garbage"), Err(ArdError::InvalidSceneId(_))));
        // The compiled pattern is shared, rejection stays per input
        assert!(Scene::parse("S1A_IW_GRDH_1SDV_20200103T170815_20200103T170842_030639_0382D5_DADE").is_ok());
        assert!(matches!(Scene::parse(""), Err(ArdError::InvalidSceneId(_))));
    }

    #[test]
    fn parses_from_many_threads() {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                std::thread::spawn(move || {
                    Scene::parse(&format!(
                        "S1A_IW_GRDH_1SDV_20200103T170815_20200103T170842_{:06}_0382D5_DADE",
                        30639 + i
                    ))
                    .map(|s| s.absolute_orbit)
                })
            })
            .collect();
        let orbits: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();
        assert_eq!(orbits, (30639..30647).collect::<Vec<u32>>());
    }

    #[test]
    fn small_orbit_numbers_wrap() {
        let scene = Scene::parse("S1A_IW_GRDH_1SDV_20140403T170815_20140403T170842_000010_0382D5_DADE").unwrap();
        assert_eq!(scene.relative_orbit(), ((10 - 73_i64).rem_euclid(175) + 1) as u32);
    }

    #[test]
    fn failure_classes() {
        assert!(ArdError::MissingFromArchive("x".into()).is_permanent());
        assert!(!ArdError::Transport("reset".into()).is_permanent());
        assert_eq!(
            ArdError::IntegrityCheckFailed { path: PathBuf::from("a.zip"), attempts: 10 }.failure_class(),
            FailureClass::Permanent
        );
        assert_eq!(
            ArdError::ExternalJobFailed { program: "gpt".into(), exit_code: 1, log_path: PathBuf::from("a.err_log") }
                .failure_class(),
            FailureClass::Retryable
        );
    }

    #[test]
    fn burst_id_format() {
        assert_eq!(Burst::burst_id(OrbitDirection::Ascending, 117, Subswath::IW1, 764), "A117_IW1_764");
    }
}
