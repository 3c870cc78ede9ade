//! Pre-built module bundles embedded in design documents as base64 text.

use std::fmt;
use std::rc::Rc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::compiler::ExportTable;
use crate::errors::QueryServerError;

const BUNDLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bundle");

/// Prefix of a base64-encoded zip archive.
pub const BUNDLE_SIGNATURE: &str = "UEsDBBQAAAAIA";

/// Whether `source` starts like a base64-encoded zip archive.
#[must_use]
pub fn looks_like_bundle(source: &str) -> bool {
    source.starts_with(BUNDLE_SIGNATURE)
}

/// Unpacks a decoded bundle into the names it exports.
#[cfg_attr(test, mockall::automock)]
pub trait BundleImporter {
    /// Imports `archive`, unpacking into `cache_dir` if it needs disk space.
    ///
    /// # Errors
    ///
    /// Returns an error for archives the importer cannot load.
    fn import(&self, archive: &[u8], cache_dir: &Utf8Path)
    -> Result<ExportTable, QueryServerError>;
}

/// Directory bundles unpack into when no cache is configured.
#[must_use]
pub fn default_cache_dir() -> Utf8PathBuf {
    let base = Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
    base.join(".sofa-bundles")
}

/// Bundle settings for one worker.
#[derive(Clone)]
pub struct Bundles {
    enabled: bool,
    cache_dir: Utf8PathBuf,
    importer: Option<Rc<dyn BundleImporter>>,
}

impl Bundles {
    /// Bundle support switched off; bundle-looking leaves compile as source.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(false, None)
    }

    /// Bundle support as configured at startup.
    #[must_use]
    pub fn new(enabled: bool, cache_dir: Option<Utf8PathBuf>) -> Self {
        Self {
            enabled,
            cache_dir: cache_dir.unwrap_or_else(default_cache_dir),
            importer: None,
        }
    }

    /// Installs the importer used for bundle leaves.
    #[must_use]
    pub fn with_importer(mut self, importer: Rc<dyn BundleImporter>) -> Self {
        self.importer = Some(importer);
        self
    }

    /// Whether `source` should be imported instead of compiled.
    #[must_use]
    pub fn applies_to(&self, source: &str) -> bool {
        self.enabled && looks_like_bundle(source)
    }

    /// Decodes and imports a bundle leaf.
    ///
    /// # Errors
    ///
    /// Returns `bundle_error` for invalid base64, a missing importer, or an
    /// archive that exports nothing; importer failures propagate unchanged.
    pub fn import(&self, source: &str) -> Result<ExportTable, QueryServerError> {
        let encoded: String = source.split_whitespace().collect();
        let archive = STANDARD.decode(encoded).map_err(|error| {
            QueryServerError::error("bundle_error", format!("bundle is not valid base64: {error}"))
        })?;
        let Some(importer) = self.importer.as_ref() else {
            warn!(target: BUNDLE_TARGET, "bundle import requested without an importer");
            return Err(QueryServerError::error(
                "bundle_error",
                "bundle import is enabled but no importer is installed",
            ));
        };
        debug!(
            target: BUNDLE_TARGET,
            bytes = archive.len(),
            cache_dir = %self.cache_dir,
            "importing bundle"
        );
        let exports = importer.import(&archive, &self.cache_dir)?;
        if exports.is_empty() {
            return Err(QueryServerError::error("bundle_error", "Nothing to export"));
        }
        Ok(exports)
    }
}

impl fmt::Debug for Bundles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundles")
            .field("enabled", &self.enabled)
            .field("cache_dir", &self.cache_dir)
            .field("importer", &self.importer.is_some())
            .finish()
    }
}
