//! Turns catalog rows into queryable sources.

use std::path::Path;
use std::sync::Arc;

use overlay_report_catalog_models::{DatasetDescriptor, SourceKind};
use overlay_report_geometry::{Crs, Layer};

use crate::adapter::SpatialSourceAdapter;
use crate::file::FileAdapter;
use crate::loaders::{LoadRequest, LoadedSource, LocationShape, SourceLoader, default_loaders};
use crate::remote::{ConnectionManager, RemoteTableAdapter};
use crate::{RemoteError, ResolutionError};

/// A resolved dataset.
pub enum SourceHandle {
    /// A remote table; existence and access are checked by the caller.
    Remote(RemoteTableAdapter),
    /// A vector layer loaded from disk.
    File(FileAdapter),
    /// A raster input, recognised but not evaluated.
    Raster { path: std::path::PathBuf },
}

impl SourceHandle {
    /// The queryable adapter, or `None` for rasters.
    #[must_use]
    pub fn adapter(&self) -> Option<&dyn SpatialSourceAdapter> {
        match self {
            Self::Remote(adapter) => Some(adapter),
            Self::File(adapter) => Some(adapter),
            Self::Raster { .. } => None,
        }
    }

    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

/// Resolves [`DatasetDescriptor`]s through the loader registry or the
/// shared remote connection.
pub struct DataSourceResolver {
    loaders: Vec<Box<dyn SourceLoader>>,
    connections: Option<Arc<ConnectionManager>>,
    working_crs: Crs,
}

impl DataSourceResolver {
    /// Creates a resolver with the default loaders.
    #[must_use]
    pub fn new(connections: Option<Arc<ConnectionManager>>, working_crs: Crs) -> Self {
        Self::with_loaders(default_loaders(), connections, working_crs)
    }

    #[must_use]
    pub fn with_loaders(
        loaders: Vec<Box<dyn SourceLoader>>,
        connections: Option<Arc<ConnectionManager>>,
        working_crs: Crs,
    ) -> Self {
        Self {
            loaders,
            connections,
            working_crs,
        }
    }

    /// Resolves one dataset. Never opens a remote connection itself.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError`] if the location is missing, has no
    /// loader, cannot be loaded, or fails validation (including a file
    /// filter that does not parse or names a missing field).
    pub fn resolve(&self, descriptor: &DatasetDescriptor) -> Result<SourceHandle, ResolutionError> {
        match descriptor.source_kind {
            SourceKind::RemoteTable => self.resolve_remote(descriptor),
            SourceKind::FilePath => self.resolve_file(descriptor),
        }
    }

    fn resolve_remote(
        &self,
        descriptor: &DatasetDescriptor,
    ) -> Result<SourceHandle, ResolutionError> {
        let Some(connections) = &self.connections else {
            return Err(ResolutionError::RemoteNotConfigured);
        };
        let table = descriptor.table.as_deref().unwrap_or_default();

        let adapter = RemoteTableAdapter::new(connections.clone(), table, self.working_crs)
            .map_err(|e: RemoteError| ResolutionError::InvalidHandle {
                message: e.to_string(),
            })?;

        Ok(SourceHandle::Remote(adapter))
    }

    fn resolve_file(&self, descriptor: &DatasetDescriptor) -> Result<SourceHandle, ResolutionError> {
        let location = descriptor.location.as_deref().unwrap_or_default().trim();
        let request = LoadRequest {
            title: descriptor.title.clone(),
            layer_name: descriptor.table.clone(),
            fallback_crs: self.working_crs,
        };

        match self.load(Path::new(location), &request)? {
            LoadedSource::Raster { path } => Ok(SourceHandle::Raster { path }),
            LoadedSource::Vector(layer) => {
                let adapter = FileAdapter::new(layer);
                if let Some(filter) = descriptor.filter.as_deref() {
                    adapter.validate_filter(filter).map_err(|e| {
                        ResolutionError::InvalidHandle {
                            message: e.to_string(),
                        }
                    })?;
                }
                Ok(SourceHandle::File(adapter))
            }
        }
    }

    /// Loads a vector layer from `path`, for inputs that are not catalog
    /// rows (the AOI).
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError`] if the path cannot be loaded as vector
    /// data.
    pub fn load_vector(
        &self,
        path: &Path,
        layer_name: Option<&str>,
        title: &str,
    ) -> Result<Layer, ResolutionError> {
        let request = LoadRequest {
            title: title.to_string(),
            layer_name: layer_name.map(str::to_string),
            fallback_crs: self.working_crs,
        };

        match self.load(path, &request)? {
            LoadedSource::Vector(layer) => Ok(layer),
            LoadedSource::Raster { path } => Err(ResolutionError::InvalidHandle {
                message: format!("{} is raster data", path.display()),
            }),
        }
    }

    fn load(&self, path: &Path, request: &LoadRequest) -> Result<LoadedSource, ResolutionError> {
        let shape = LocationShape::inspect(path)?;

        let Some(loader) = self.loaders.iter().find(|loader| loader.accepts(&shape)) else {
            return Err(ResolutionError::NoLoader {
                path: path.to_path_buf(),
            });
        };

        log::debug!(
            "{}: loading {} with the {} loader",
            request.title,
            path.display(),
            loader.name()
        );

        let loaded = loader.load(&shape, request)?;
        if let LoadedSource::Vector(layer) = &loaded {
            loader.validate(layer)?;
        }
        Ok(loaded)
    }
}
