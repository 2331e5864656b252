//! Combines a dataset's per-feature fragments into one layer.

use overlay_report_geometry::{Crs, GeometryEngine, Layer};

use crate::clipper::ClippedFragment;
use crate::failure::FailureReason;

/// Source-schema fields that never reach the report.
pub const DISALLOWED_FIELDS: &[&str] = &["SE_ANNO_CAD_DATA"];

pub struct ResultAggregator<'a> {
    engine: &'a dyn GeometryEngine,
    working_crs: Crs,
}

impl<'a> ResultAggregator<'a> {
    #[must_use]
    pub const fn new(engine: &'a dyn GeometryEngine, working_crs: Crs) -> Self {
        Self {
            engine,
            working_crs,
        }
    }

    /// Merges `fragments` into a single layer named `name` in the working
    /// CRS. Returns `None` when there are no fragments.
    ///
    /// # Errors
    ///
    /// Returns [`FailureReason::MergeFailure`] if a fragment cannot be
    /// reprojected or the merge fails.
    pub fn aggregate(
        &self,
        fragments: Vec<ClippedFragment>,
        name: &str,
    ) -> Result<Option<Layer>, FailureReason> {
        if fragments.is_empty() {
            return Ok(None);
        }

        let layers = fragments
            .into_iter()
            .map(|fragment| self.to_working_crs(fragment.layer))
            .collect::<Result<Vec<_>, _>>()?;

        let mut layer = if layers.len() == 1 {
            let mut layers = layers;
            let mut layer = layers.remove(0);
            layer.name = name.to_string();
            layer
        } else {
            self.engine
                .merge(&layers, name)
                .map_err(|e| merge_failure(name, &e))?
        };

        if layer.crs != self.working_crs {
            log::warn!("{name}: merged layer drifted to {}, reprojecting", layer.crs);
            layer = self.to_working_crs(layer)?;
        }

        strip_disallowed_fields(&mut layer);

        Ok(Some(layer))
    }

    fn to_working_crs(&self, layer: Layer) -> Result<Layer, FailureReason> {
        if layer.crs == self.working_crs {
            return Ok(layer);
        }

        log::warn!(
            "{}: fragment in {} instead of {}, reprojecting before merge",
            layer.name,
            layer.crs,
            self.working_crs
        );
        self.engine
            .reproject(&layer, self.working_crs)
            .map_err(|e| merge_failure(&layer.name, &e))
    }
}

fn merge_failure(name: &str, error: &impl std::fmt::Display) -> FailureReason {
    log::error!("{name}: could not merge: {error}");
    FailureReason::MergeFailure {
        detail: error.to_string(),
    }
}

/// Removes [`DISALLOWED_FIELDS`] (case-insensitively). Returns whether
/// anything was removed; calling it again is a no-op.
pub fn strip_disallowed_fields(layer: &mut Layer) -> bool {
    let matching: Vec<String> = layer
        .fields
        .iter()
        .filter(|field| {
            DISALLOWED_FIELDS
                .iter()
                .any(|disallowed| field.name.eq_ignore_ascii_case(disallowed))
        })
        .map(|field| field.name.clone())
        .collect();

    for name in &matching {
        layer.remove_field(name);
    }

    !matching.is_empty()
}
