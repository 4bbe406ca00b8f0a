//! Scene downloads from the Sentinel-1 mirrors.
//!
//! A download is resumable only in the all-or-nothing sense: a local file
//! with exactly the remote size is kept, any other partial file is deleted
//! and fetched again. Every archive passes an open-and-read test before its
//! `.downloaded` marker is written.

use crate::config::{Credentials, ProjectConfig};
use crate::core::dispatch::{DispatchOptions, ExecutionStrategy, WorkUnit};
use crate::core::driver::{BatchDriver, Stage, StageReport};
use crate::io::inventory::Inventory;
use crate::io::marker::MarkerStore;
use crate::types::{ArdError, ArdResult, Scene};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

const ASF_PROBE_URL: &str = "https://datapool.asf.alaska.edu/SLC/SA/S1A_IW_SLC__1SSV_20160801T234454_20160801T234520_012413_0135F9_B926.zip";
const ASF_MAX_CONCURRENCY: usize = 10;

/// Supported archives, numbered as operators know them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirror {
    /// Copernicus hub, rolling archive
    Scihub = 1,
    /// Alaska Satellite Facility, full archive
    Asf = 2,
    /// CNES PEPS, rolling archive
    Peps = 3,
}

impl Mirror {
    pub fn from_index(index: u8) -> ArdResult<Self> {
        match index {
            1 => Ok(Mirror::Scihub),
            2 => Ok(Mirror::Asf),
            3 => Ok(Mirror::Peps),
            other => Err(ArdError::InvalidConfiguration(format!(
                "Unknown mirror {}, expected 1 (Scihub), 2 (ASF) or 3 (PEPS)",
                other
            ))),
        }
    }

    /// URL of `scene` on this mirror. The hubs address products by uuid.
    pub fn url_for(&self, scene: &Scene) -> ArdResult<String> {
        let uuid = || {
            scene.uuid.as_deref().ok_or_else(|| {
                ArdError::Inventory(format!("Scene {} has no uuid for {:?}", scene.identifier, self))
            })
        };
        match self {
            Mirror::Scihub => Ok(format!(
                "https://apihub.copernicus.eu/apihub/odata/v1/Products('{}')/$value",
                uuid()?
            )),
            Mirror::Asf => Ok(scene.asf_url()),
            Mirror::Peps => Ok(format!("https://peps.cnes.fr/resto/collections/S1/{}/download", uuid()?)),
        }
    }

    /// Authenticated URL used to check a login
    pub fn probe_url(&self) -> &'static str {
        match self {
            Mirror::Scihub => "https://apihub.copernicus.eu/apihub/odata/v1/Products?$top=1",
            Mirror::Asf => ASF_PROBE_URL,
            Mirror::Peps => "https://peps.cnes.fr/resto/api/collections/S1/search.json?maxRecords=1",
        }
    }

    pub fn max_concurrency(&self, requested: usize) -> usize {
        match self {
            Mirror::Asf if requested > ASF_MAX_CONCURRENCY => {
                log::info!(
                    "Earthdata allows at most {} parallel downloads, using {}",
                    ASF_MAX_CONCURRENCY,
                    ASF_MAX_CONCURRENCY
                );
                ASF_MAX_CONCURRENCY
            }
            _ => requested.max(1),
        }
    }
}

/// An opened remote file
pub struct RemoteObject {
    pub content_length: Option<u64>,
    pub reader: Box<dyn Read + Send>,
}

/// The HTTP seam. A missing product is [`ArdError::MissingFromArchive`].
pub trait Transport: Send + Sync {
    fn open(&self, url: &str) -> ArdResult<RemoteObject>;
    /// Status code of a request without consuming the body
    fn status(&self, url: &str) -> ArdResult<u16>;
}

/// reqwest client with basic authentication
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    credentials: Option<Credentials>,
}

impl HttpTransport {
    pub fn new(credentials: Option<Credentials>) -> ArdResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(60))
            .user_agent(concat!("s1ard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ArdError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, credentials })
    }

    fn get(&self, url: &str) -> ArdResult<reqwest::blocking::Response> {
        let mut request = self.client.get(url);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }
        request
            .send()
            .map_err(|e| ArdError::Transport(format!("HTTP request failed: {}", e)))
    }
}

impl Transport for HttpTransport {
    fn open(&self, url: &str) -> ArdResult<RemoteObject> {
        let response = self.get(url)?;
        let status = response.status().as_u16();
        match status {
            404 => return Err(ArdError::MissingFromArchive(url.to_string())),
            401 => return Err(ArdError::Authentication(url.to_string())),
            _ if !response.status().is_success() => {
                return Err(ArdError::Http {
                    status,
                    url: url.to_string(),
                })
            }
            _ => {}
        }
        Ok(RemoteObject {
            content_length: response.content_length(),
            reader: Box::new(response),
        })
    }

    fn status(&self, url: &str) -> ArdResult<u16> {
        Ok(self.get(url)?.status().as_u16())
    }
}

/// Open every entry of a zip archive and read it to the end, which checks
/// each entry's CRC
pub fn check_zipfile<P: AsRef<Path>>(path: P) -> ArdResult<()> {
    let file = std::fs::File::open(path.as_ref())?;
    let mut archive = zip::ZipArchive::new(file)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        std::io::copy(&mut entry, &mut std::io::sink()).map_err(|e| {
            ArdError::Archive(format!("{} in {}: {}", entry.name(), path.as_ref().display(), e))
        })?;
    }
    Ok(())
}

fn transfer(reader: &mut dyn Read, dest: &Path) -> ArdResult<u64> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(std::fs::File::create(dest)?);
    let bytes = std::io::copy(reader, &mut writer)
        .map_err(|e| ArdError::Transport(format!("Transfer to {} interrupted: {}", dest.display(), e)))?;
    writer.flush()?;
    Ok(bytes)
}

/// Download `url` to `dest` and write its `.downloaded` marker once the
/// archive passes [`check_zipfile`]
pub fn invoke_download(transport: &dyn Transport, url: &str, dest: &Path, attempts: u32) -> ArdResult<PathBuf> {
    if MarkerStore::is_downloaded(dest) {
        log::debug!("{} is already downloaded", dest.display());
        return Ok(MarkerStore::download_marker_path(dest));
    }

    let remote = transport.open(url)?;
    let existing = std::fs::metadata(dest).map(|m| m.len()).unwrap_or(0);
    let mut pending = Some(remote.reader);

    let mut need_transfer = match remote.content_length {
        Some(total) if existing == total && existing > 0 => {
            log::info!("{} already has the full size, checking it", dest.display());
            false
        }
        _ if existing > 0 => {
            log::info!("Removing partial download {}", dest.display());
            std::fs::remove_file(dest)?;
            true
        }
        _ => true,
    };

    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        if need_transfer {
            let mut reader = match pending.take() {
                Some(reader) => reader,
                None => transport.open(url)?.reader,
            };
            log::info!("Downloading {} (attempt {}/{})", url, attempt, attempts);
            let bytes = transfer(reader.as_mut(), dest)?;
            log::debug!("Transferred {} bytes to {}", bytes, dest.display());
        }

        match check_zipfile(dest) {
            Ok(()) => {
                log::debug!("{} passed the zip test", dest.display());
                return MarkerStore::mark_downloaded(dest);
            }
            Err(e) => {
                log::warn!("{} did not pass the zip test ({}), downloading again", dest.display(), e);
                if dest.exists() {
                    std::fs::remove_file(dest)?;
                }
                need_transfer = true;
            }
        }
    }

    Err(ArdError::IntegrityCheckFailed {
        path: dest.to_path_buf(),
        attempts,
    })
}

/// Verify the login before a batch. Returns the concurrency to use.
pub fn check_pre_download(mirror: Mirror, transport: &dyn Transport, concurrency: usize) -> ArdResult<usize> {
    let url = mirror.probe_url();
    let status = transport.status(url)?;
    match status {
        200 => Ok(mirror.max_concurrency(concurrency)),
        401 => Err(ArdError::Authentication(format!("{:?}: username/password are incorrect", mirror))),
        other => Err(ArdError::Http {
            status: other,
            url: url.to_string(),
        }),
    }
}

/// A scene waiting for download
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadUnit {
    pub scene: Scene,
    pub url: String,
    pub path: PathBuf,
}

impl WorkUnit for DownloadUnit {
    fn key(&self) -> String {
        self.scene.identifier.clone()
    }

    fn group(&self) -> String {
        self.scene.relative_orbit().to_string()
    }

    fn is_complete(&self) -> bool {
        MarkerStore::is_downloaded(&self.path)
    }
}

/// One unit per inventory scene. A scene that is already downloaded keeps
/// its unit, with an empty URL when the mirror cannot address it.
fn download_units(inventory: &Inventory, download_dir: &Path, mirror: Mirror) -> ArdResult<Vec<DownloadUnit>> {
    let mut units = Vec::new();
    for scene in inventory.scenes() {
        let path = scene.download_path(download_dir);
        let url = match mirror.url_for(scene) {
            Ok(url) => url,
            Err(_) if MarkerStore::is_downloaded(&path) => String::new(),
            Err(e) => return Err(e),
        };
        units.push(DownloadUnit {
            url,
            scene: scene.clone(),
            path,
        });
    }
    Ok(units)
}

/// Units for every scene without a `.downloaded` marker
pub fn prepare_scenes_to_download<P: AsRef<Path>>(
    inventory: &Inventory,
    download_dir: P,
    mirror: Mirror,
) -> ArdResult<Vec<DownloadUnit>> {
    let units = download_units(inventory, download_dir.as_ref(), mirror)?;
    Ok(units
        .into_iter()
        .filter(|unit| {
            let done = unit.is_complete();
            if done {
                log::debug!("{} is already downloaded", unit.scene.identifier);
            }
            !done
        })
        .collect())
}

#[derive(Debug)]
pub struct DownloadReport {
    /// Every scene with a `.downloaded` marker after the run, including
    /// those marked before it started
    pub downloaded: Vec<String>,
    /// Scenes the mirror does not have or that never passed the zip test,
    /// removed from the inventory
    pub missing: Vec<String>,
    pub stage: StageReport,
}

/// Download all scenes of `inventory` not yet present. Scenes missing from
/// the archive, or corrupt after every re-download, are removed from the
/// inventory.
pub fn batch_download(
    inventory: &mut Inventory,
    config: &ProjectConfig,
    mirror: Mirror,
    transport: &dyn Transport,
) -> ArdResult<DownloadReport> {
    let units = download_units(inventory, &config.download_dir, mirror)?;
    let pending = units.iter().filter(|u| !u.is_complete()).count();
    log::info!(
        "{} of {} scene(s) to download from {:?}",
        pending,
        units.len(),
        mirror
    );

    let options = DispatchOptions::new(
        ExecutionStrategy::IoBound,
        mirror.max_concurrency(config.download_concurrency),
        config.unit_retry,
    );
    let driver = BatchDriver::new(config.max_passes, options);

    let missing = Mutex::new(Vec::new());
    let stage = driver.run_stage(Stage::Download, units, |unit: &DownloadUnit| {
        match invoke_download(transport, &unit.url, &unit.path, config.download_attempts) {
            Err(e @ ArdError::MissingFromArchive(_)) | Err(e @ ArdError::IntegrityCheckFailed { .. }) => {
                log::info!("Giving up on {}: {}", unit.scene.identifier, e);
                if let Ok(mut missing) = missing.lock() {
                    missing.push(unit.scene.identifier.clone());
                }
                Err(e)
            }
            other => other,
        }
    })?;

    let mut missing = missing.into_inner().unwrap_or_default();
    missing.sort();
    missing.dedup();
    if !missing.is_empty() {
        let removed = inventory.remove(&missing);
        log::warn!("{} missing or corrupt scene(s) removed from the inventory", removed);
    }

    Ok(DownloadReport {
        downloaded: stage.completed.clone(),
        missing,
        stage,
    })
}

/// Move loose `*.zip` archives from `input_dir` into the download layout.
/// Archives failing the zip test stay where they are.
pub fn restore_download_dir<P: AsRef<Path>, Q: AsRef<Path>>(input_dir: P, download_dir: Q) -> ArdResult<Vec<PathBuf>> {
    let mut restored = Vec::new();
    let mut archives: Vec<PathBuf> = std::fs::read_dir(input_dir.as_ref())?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == "zip"))
        .collect();
    archives.sort();

    for archive in archives {
        let stem = archive
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let scene = match Scene::parse(&stem) {
            Ok(scene) => scene,
            Err(e) => {
                log::warn!("Skipping {}: {}", archive.display(), e);
                continue;
            }
        };

        log::debug!("Checking zip file {} for inconsistency", archive.display());
        if let Err(e) = check_zipfile(&archive) {
            log::warn!("{} is corrupted and will not be moved: {}", archive.display(), e);
            continue;
        }

        let target = scene.download_path(download_dir.as_ref());
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if std::fs::rename(&archive, &target).is_err() {
            // Different filesystems
            std::fs::copy(&archive, &target)?;
            std::fs::remove_file(&archive)?;
        }
        MarkerStore::mark_downloaded(&target)?;
        restored.push(target);
    }

    log::info!("Restored {} archive(s) into {}", restored.len(), download_dir.as_ref().display());
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_indices() {
        assert_eq!(Mirror::from_index(2).unwrap(), Mirror::Asf);
        assert!(matches!(Mirror::from_index(4), Err(ArdError::InvalidConfiguration(_))));
    }

    #[test]
    fn asf_concurrency_is_capped() {
        assert_eq!(Mirror::Asf.max_concurrency(16), 10);
        assert_eq!(Mirror::Asf.max_concurrency(4), 4);
        assert_eq!(Mirror::Peps.max_concurrency(16), 16);
    }

    #[test]
    fn hub_urls_need_uuid() {
        let mut scene =
            Scene::parse("S1A_IW_GRDH_1SDV_20200103T170815_20200103T170842_030639_0382D5_DADE").unwrap();
        assert!(Mirror::Scihub.url_for(&scene).is_err());
        scene.uuid = Some("abc".to_string());
        assert!(Mirror::Scihub.url_for(&scene).unwrap().contains("Products('abc')"));
        assert!(Mirror::Asf.url_for(&scene).unwrap().ends_with(".zip"));
    }
}
