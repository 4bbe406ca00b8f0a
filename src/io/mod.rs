//! Filesystem and network I/O: markers, inventories, annotations, downloads

pub mod annotation;
pub mod download;
pub mod inventory;
pub mod marker;

pub use annotation::AnnotationReader;
pub use download::{
    batch_download, check_pre_download, check_zipfile, invoke_download, restore_download_dir, DownloadReport,
    HttpTransport, Mirror, Transport,
};
pub use inventory::{BurstInventory, Inventory, InventoryTable};
pub use marker::MarkerStore;
