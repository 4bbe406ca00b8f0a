use crate::types::{ArdError, ArdResult, Burst, OrbitDirection, Polarization, Scene, Subswath};
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

/// The parts of a Sentinel-1 IW annotation file needed for a burst inventory.
/// This represents the root <product> element directly
#[derive(Debug, Deserialize)]
pub struct AnnotationRoot {
    #[serde(rename = "adsHeader")]
    pub ads_header: AdsHeader,
    #[serde(rename = "swathTiming")]
    pub swath_timing: SwathTiming,
    #[serde(rename = "geolocationGrid", default)]
    pub geolocation_grid: Option<GeolocationGrid>,
}

#[derive(Debug, Deserialize)]
pub struct AdsHeader {
    pub swath: String,
    pub polarisation: String,
}

#[derive(Debug, Deserialize)]
pub struct SwathTiming {
    #[serde(rename = "linesPerBurst", default)]
    pub lines_per_burst: Option<u32>,
    #[serde(rename = "burstList")]
    pub burst_list: BurstList,
}

#[derive(Debug, Deserialize)]
pub struct BurstList {
    #[serde(rename = "burst", default)]
    pub bursts: Vec<BurstEntry>,
}

#[derive(Debug, Deserialize)]
pub struct BurstEntry {
    #[serde(rename = "azimuthTime")]
    pub azimuth_time: String,
    #[serde(rename = "azimuthAnxTime")]
    pub azimuth_anx_time: f64,
}

#[derive(Debug, Deserialize)]
pub struct GeolocationGrid {
    #[serde(rename = "geolocationGridPointList")]
    pub point_list: GeolocationGridPointList,
}

#[derive(Debug, Deserialize)]
pub struct GeolocationGridPointList {
    #[serde(rename = "geolocationGridPoint", default)]
    pub points: Vec<GeolocationGridPoint>,
}

#[derive(Debug, Deserialize)]
pub struct GeolocationGridPoint {
    pub line: u32,
    pub pixel: u32,
    pub latitude: f64,
    pub longitude: f64,
}

/// Burst records from SLC annotation files
pub struct AnnotationReader;

impl AnnotationReader {
    pub fn parse_annotation(xml_content: &str) -> ArdResult<AnnotationRoot> {
        from_str(xml_content)
            .map_err(|e| ArdError::XmlParsing(format!("Failed to parse annotation XML: {}", e)))
    }

    /// One burst per co-polarised IW annotation entry in the archive
    pub fn burst_records_from_archive<P: AsRef<Path>>(
        zip_path: P,
        scene: &Scene,
        direction: OrbitDirection,
    ) -> ArdResult<Vec<Burst>> {
        let zip_path = zip_path.as_ref();
        log::debug!("Reading burst annotations from {}", zip_path.display());

        let file = std::fs::File::open(zip_path)?;
        let mut archive = zip::ZipArchive::new(file)?;

        static ANNOTATION: OnceLock<Regex> = OnceLock::new();
        let pattern = ANNOTATION.get_or_init(|| {
            Regex::new(r"^[^/]+/annotation/s1[ab]-iw[1-3]-slc-(vv|hh)-[^/]+\.xml$").expect("annotation pattern is valid")
        });

        let mut names: Vec<String> = archive
            .file_names()
            .filter(|name| pattern.is_match(name))
            .map(str::to_string)
            .collect();
        names.sort();

        if names.is_empty() {
            return Err(ArdError::Archive(format!(
                "No IW annotation found in {}",
                zip_path.display()
            )));
        }

        let mut bursts = Vec::new();
        for name in names {
            let mut content = String::new();
            archive.by_name(&name)?.read_to_string(&mut content)?;
            bursts.extend(Self::burst_records_from_xml(&content, scene, direction)?);
        }

        log::info!("Found {} bursts in {}", bursts.len(), scene.identifier);
        Ok(bursts)
    }

    /// Bursts of a single annotation document, numbered from 1. Cross-pol
    /// annotations yield nothing.
    pub fn burst_records_from_xml(
        xml_content: &str,
        scene: &Scene,
        direction: OrbitDirection,
    ) -> ArdResult<Vec<Burst>> {
        let annotation = Self::parse_annotation(xml_content)?;

        let co_pol = Polarization::parse(&annotation.ads_header.polarisation)
            .map(|p| p.is_co_pol())
            .unwrap_or(false);
        if !co_pol {
            return Ok(Vec::new());
        }

        let subswath = Subswath::parse(&annotation.ads_header.swath).ok_or_else(|| {
            ArdError::XmlParsing(format!("Unexpected swath {}", annotation.ads_header.swath))
        })?;

        let track = scene.relative_orbit();
        let lines_per_burst = annotation.swath_timing.lines_per_burst;
        let grid = annotation
            .geolocation_grid
            .as_ref()
            .map(|g| g.point_list.points.as_slice())
            .unwrap_or(&[]);

        let bursts = annotation
            .swath_timing
            .burst_list
            .bursts
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let footprint = lines_per_burst.and_then(|lines| {
                    let first = i as u32 * lines;
                    burst_footprint(grid, first, first + lines)
                });
                Burst {
                    scene_id: scene.identifier.clone(),
                    track,
                    direction,
                    date: scene.acquisition_date(),
                    subswath,
                    anchor: entry.azimuth_anx_time.round() as i64,
                    burst_nr: i as u32 + 1,
                    footprint,
                    bid: String::new(),
                }
            })
            .collect();
        Ok(bursts)
    }
}

/// WKT polygon spanned by the grid rows closest to the first and last line
/// of a burst
fn burst_footprint(grid: &[GeolocationGridPoint], first_line: u32, last_line: u32) -> Option<String> {
    let nearest_row = |target: u32| -> Option<Vec<&GeolocationGridPoint>> {
        let line = grid
            .iter()
            .map(|p| p.line)
            .min_by_key(|l| (*l as i64 - target as i64).abs())?;
        let mut row: Vec<&GeolocationGridPoint> = grid.iter().filter(|p| p.line == line).collect();
        row.sort_by_key(|p| p.pixel);
        Some(row)
    };

    let top = nearest_row(first_line)?;
    let bottom = nearest_row(last_line)?;
    if top.first()?.line == bottom.first()?.line {
        return None;
    }

    let corners = [top.first()?, top.last()?, bottom.last()?, bottom.first()?, top.first()?];
    let coords: Vec<String> = corners
        .iter()
        .map(|p| format!("{} {}", p.longitude, p.latitude))
        .collect();
    Some(format!("POLYGON(({}))", coords.join(", ")))
}
