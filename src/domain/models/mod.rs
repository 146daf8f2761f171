pub mod comparator;
pub mod config;
pub mod ledger;
pub mod object;
pub mod session;
pub mod snapshot;

pub use comparator::{compare, Mismatch, ObjectMismatch};
pub use config::{
    HarnessConfig, LoggingConfig, MetadataChangeConfig, ScriptsConfig, Variant,
};
pub use ledger::{ObjectLedger, UploadedObjectsExport};
pub use object::{attributes, AttributeValue, Attributes, ObjectKey, ObjectRecord};
pub use session::SessionState;
pub use snapshot::{CatalogEntry, CatalogSnapshot, Watermark};
