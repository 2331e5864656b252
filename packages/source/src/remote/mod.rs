//! Remote `PostGIS` tables as spatial sources.
//!
//! Table metadata (real schema/table spelling, geometry column, key
//! column) is discovered once per adapter from `information_schema` and
//! `geometry_columns`. Feature queries use a bounding-box `&&` prefilter on
//! the server; exact clipping happens client-side.

pub mod connection;
pub mod postgis;

use std::sync::Arc;

use async_trait::async_trait;
use geo::Rect;
use overlay_report_geometry::geojson_io::layer_from_rows;
use overlay_report_geometry::{Crs, GeometryKind, Layer};
use switchy_database::DatabaseValue;
use tokio::sync::OnceCell;

use crate::adapter::SpatialSourceAdapter;
use crate::{RemoteError, SourceError};

pub use connection::{ConnectionManager, Connector, SpatialConnection, TextRow};
pub use postgis::PostgisConnector;

/// Number of rows inspected when probing geometry types.
const SAMPLE_ROWS: usize = 10;

#[derive(Debug, Clone)]
struct TableIdentity {
    schema: String,
    table: String,
    geometry_column: Option<String>,
    key_column: Option<String>,
}

/// A `schema.table` in the remote database.
pub struct RemoteTableAdapter {
    connections: Arc<ConnectionManager>,
    name: String,
    schema: String,
    table: String,
    working_crs: Crs,
    identity: OnceCell<Option<TableIdentity>>,
}

impl RemoteTableAdapter {
    /// Creates an adapter for `name`, which must be `schema.table`.
    ///
    /// Features are returned in `working_crs`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidTableName`] if `name` is not a two-part
    /// identifier.
    pub fn new(
        connections: Arc<ConnectionManager>,
        name: &str,
        working_crs: Crs,
    ) -> Result<Self, RemoteError> {
        let (schema, table) = split_table_name(name)?;
        Ok(Self {
            connections,
            name: name.trim().to_string(),
            schema,
            table,
            working_crs,
            identity: OnceCell::new(),
        })
    }

    async fn identity(&self) -> Result<Option<&TableIdentity>, RemoteError> {
        let identity = self
            .identity
            .get_or_try_init(|| self.discover_identity())
            .await?;
        Ok(identity.as_ref())
    }

    async fn discover_identity(&self) -> Result<Option<TableIdentity>, RemoteError> {
        let rows = self
            .connections
            .query_text(
                "SELECT table_schema::text AS table_schema, table_name::text AS table_name FROM (
                     SELECT table_schema, table_name FROM information_schema.views
                     UNION
                     SELECT table_schema, table_name FROM information_schema.tables
                 ) AS candidates
                 WHERE upper(table_schema) = upper($1) AND upper(table_name) = upper($2)
                 LIMIT 1",
                &[
                    DatabaseValue::String(self.schema.clone()),
                    DatabaseValue::String(self.table.clone()),
                ],
                &["table_schema", "table_name"],
            )
            .await?;

        let Some(row) = rows.first() else {
            log::debug!("{}: not found in views or tables", self.name);
            return Ok(None);
        };
        let schema = row
            .get("table_schema")
            .cloned()
            .flatten()
            .unwrap_or_else(|| self.schema.clone());
        let table = row
            .get("table_name")
            .cloned()
            .flatten()
            .unwrap_or_else(|| self.table.clone());
        let params = [
            DatabaseValue::String(schema.clone()),
            DatabaseValue::String(table.clone()),
        ];

        let geometry_column = self
            .connections
            .query_text(
                "SELECT f_geometry_column::text AS column_name FROM geometry_columns
                 WHERE f_table_schema = $1 AND f_table_name = $2
                 LIMIT 1",
                &params,
                &["column_name"],
            )
            .await?
            .into_iter()
            .find_map(|row| row.get("column_name").cloned().flatten());

        let columns: Vec<String> = self
            .connections
            .query_text(
                "SELECT column_name::text AS column_name FROM information_schema.columns
                 WHERE table_schema = $1 AND table_name = $2
                 ORDER BY ordinal_position",
                &params,
                &["column_name"],
            )
            .await?
            .into_iter()
            .filter_map(|row| row.get("column_name").cloned().flatten())
            .collect();

        let key_column = pick_key_column(&columns);

        log::debug!(
            "{}: geometry column {geometry_column:?}, key column {key_column:?}",
            self.name
        );

        Ok(Some(TableIdentity {
            schema,
            table,
            geometry_column,
            key_column,
        }))
    }

    /// Geometry type names of up to [`SAMPLE_ROWS`] rows with a geometry.
    async fn sample_geometry_types(
        &self,
        identity: &TableIdentity,
        geometry_column: &str,
    ) -> Result<Vec<Option<String>>, RemoteError> {
        let geom = quote_ident(geometry_column);
        let sql = format!(
            "SELECT GeometryType({geom})::text AS geometry_type FROM {} WHERE {geom} IS NOT NULL LIMIT {SAMPLE_ROWS}",
            qualified(identity),
        );
        let rows = self
            .connections
            .query_text(&sql, &[], &["geometry_type"])
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.get("geometry_type").cloned().flatten())
            .collect())
    }

    fn no_geometry(&self) -> SourceError {
        SourceError::Remote(RemoteError::NoGeometryColumn {
            table: self.name.clone(),
        })
    }
}

#[async_trait]
impl SpatialSourceAdapter for RemoteTableAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn crs(&self) -> Crs {
        self.working_crs
    }

    async fn exists(&self) -> Result<bool, SourceError> {
        Ok(self.identity().await?.is_some())
    }

    async fn has_spatial_rows(&self) -> Result<bool, SourceError> {
        let Some(identity) = self.identity().await? else {
            return Ok(false);
        };
        let Some(geometry_column) = identity.geometry_column.as_deref() else {
            return Ok(false);
        };

        let types = self.sample_geometry_types(identity, geometry_column).await?;
        Ok(types.iter().any(Option::is_some))
    }

    async fn geometry_kind(&self) -> Result<Option<GeometryKind>, SourceError> {
        let Some(identity) = self.identity().await? else {
            return Ok(None);
        };
        let Some(geometry_column) = identity.geometry_column.as_deref() else {
            return Ok(None);
        };

        let mut kind = None;
        for name in self.sample_geometry_types(identity, geometry_column).await? {
            let found = name.as_deref().and_then(GeometryKind::from_type_name);
            let Some(found) = found else {
                return Err(SourceError::UnexpectedGeometryType {
                    source_name: self.name.clone(),
                    geometry_type: name.unwrap_or_else(|| "NULL".to_string()),
                });
            };
            kind = kind.max(Some(found));
        }
        Ok(kind)
    }

    async fn query_bbox(
        &self,
        bbox: Rect<f64>,
        filter: Option<&str>,
    ) -> Result<Layer, SourceError> {
        let Some(identity) = self.identity().await? else {
            return Err(SourceError::Remote(RemoteError::Query {
                message: format!("table {} does not exist", self.name),
            }));
        };
        let Some(geometry_column) = identity.geometry_column.as_deref() else {
            return Err(self.no_geometry());
        };

        let sql = build_interact_query(
            identity,
            geometry_column,
            self.working_crs.epsg(),
            filter.map(str::trim).filter(|f| !f.is_empty()),
        );

        let rows = self
            .connections
            .query_text(
                &sql,
                &[
                    DatabaseValue::Real64(bbox.min().x),
                    DatabaseValue::Real64(bbox.min().y),
                    DatabaseValue::Real64(bbox.max().x),
                    DatabaseValue::Real64(bbox.max().y),
                ],
                &["geometry", "properties"],
            )
            .await?;

        log::debug!("{}: {} rows intersect the AOI envelope", self.name, rows.len());

        let layer = layer_from_rows(
            &self.name,
            self.working_crs,
            rows.into_iter().map(|mut row| {
                (
                    row.remove("geometry").flatten(),
                    row.remove("properties").flatten(),
                )
            }),
        )?;

        Ok(layer)
    }
}

/// Splits `schema.table`, rejecting anything else.
fn split_table_name(name: &str) -> Result<(String, String), RemoteError> {
    let invalid = || RemoteError::InvalidTableName {
        name: name.to_string(),
    };
    let (schema, table) = name.trim().split_once('.').ok_or_else(invalid)?;
    if schema.is_empty() || table.is_empty() || table.contains('.') {
        return Err(invalid());
    }
    Ok((schema.to_string(), table.to_string()))
}

/// Prefers a column named `OBJECTID` (any case), otherwise the first column.
///
/// The result is not guaranteed to be unique per row.
fn pick_key_column(columns: &[String]) -> Option<String> {
    columns
        .iter()
        .find(|c| c.eq_ignore_ascii_case("objectid"))
        .or_else(|| columns.first())
        .cloned()
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn qualified(identity: &TableIdentity) -> String {
    format!(
        "{}.{}",
        quote_ident(&identity.schema),
        quote_ident(&identity.table)
    )
}

/// Builds the bbox-interact query. The envelope is bound as `$1..$4` in
/// `srid` coordinates and geometries come back transformed to `srid`.
fn build_interact_query(
    identity: &TableIdentity,
    geometry_column: &str,
    srid: u32,
    filter: Option<&str>,
) -> String {
    let geom = format!("t.{}", quote_ident(geometry_column));
    let mut sql = format!(
        "SELECT (to_jsonb(t) - {column})::text AS properties, \
         ST_AsGeoJSON(ST_Transform({geom}, {srid}))::text AS geometry \
         FROM {table} AS t \
         WHERE {geom} && ST_Transform(ST_MakeEnvelope($1, $2, $3, $4, {srid}), Find_SRID({schema}, {name}, {column}))",
        column = quote_literal(geometry_column),
        table = qualified(identity),
        schema = quote_literal(&identity.schema),
        name = quote_literal(&identity.table),
    );

    if let Some(filter) = filter {
        sql.push_str(" AND (");
        sql.push_str(filter);
        sql.push(')');
    }

    if let Some(key) = &identity.key_column {
        sql.push_str(" ORDER BY t.");
        sql.push_str(&quote_ident(key));
    }

    sql
}

#[cfg(test)]
mod tests {
    use geo::coord;

    use super::connection::testing::{ScriptedConnector, row};
    use super::*;

    fn identity_script() -> Vec<(&'static str, Result<Vec<TextRow>, &'static str>)> {
        vec![
            (
                "information_schema.views",
                Ok(vec![row(&[
                    ("table_schema", Some("whse_parks")),
                    ("table_name", Some("park_boundaries")),
                ])]),
            ),
            (
                "geometry_columns",
                Ok(vec![row(&[("column_name", Some("shape"))])]),
            ),
            (
                "information_schema.columns",
                Ok(vec![
                    row(&[("column_name", Some("park_name"))]),
                    row(&[("column_name", Some("OBJECTID"))]),
                    row(&[("column_name", Some("shape"))]),
                ]),
            ),
        ]
    }

    fn adapter_with(
        extra: Vec<(&'static str, Result<Vec<TextRow>, &'static str>)>,
    ) -> (RemoteTableAdapter, Arc<tokio::sync::Mutex<Vec<String>>>) {
        let mut script = extra;
        script.extend(identity_script());
        let connector = ScriptedConnector::new(vec![script]);
        let queries = connector.queries.clone();
        let manager = Arc::new(ConnectionManager::new(Box::new(connector)));
        let adapter =
            RemoteTableAdapter::new(manager, "WHSE_PARKS.PARK_BOUNDARIES", Crs::BC_ALBERS)
                .unwrap();
        (adapter, queries)
    }

    #[test]
    fn table_names_must_have_two_parts() {
        assert_eq!(
            split_table_name(" WHSE.PARKS ").unwrap(),
            ("WHSE".to_string(), "PARKS".to_string())
        );
        assert!(split_table_name("PARKS").is_err());
        assert!(split_table_name("A.B.C").is_err());
        assert!(split_table_name(".PARKS").is_err());
    }

    #[test]
    fn key_column_prefers_objectid_then_first_column() {
        let columns = vec!["NAME".to_string(), "ObjectId".to_string()];
        assert_eq!(pick_key_column(&columns).as_deref(), Some("ObjectId"));

        let columns = vec!["FEATURE_ID".to_string(), "NAME".to_string()];
        assert_eq!(pick_key_column(&columns).as_deref(), Some("FEATURE_ID"));

        assert_eq!(pick_key_column(&[]), None);
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
    }

    #[test]
    fn interact_query_conjoins_filter_and_orders_by_key() {
        let identity = TableIdentity {
            schema: "whse".to_string(),
            table: "parks".to_string(),
            geometry_column: Some("geom".to_string()),
            key_column: Some("objectid".to_string()),
        };
        let sql = build_interact_query(&identity, "geom", 3005, Some("CLASS = 'A'"));

        assert!(sql.contains("FROM \"whse\".\"parks\" AS t"));
        assert!(sql.contains("t.\"geom\" && ST_Transform(ST_MakeEnvelope($1, $2, $3, $4, 3005)"));
        assert!(sql.contains("Find_SRID('whse', 'parks', 'geom')"));
        assert!(sql.contains(" AND (CLASS = 'A')"));
        assert!(sql.ends_with("ORDER BY t.\"objectid\""));
    }

    #[tokio::test]
    async fn missing_table_does_not_exist() {
        let connector = ScriptedConnector::new(vec![vec![]]);
        let manager = Arc::new(ConnectionManager::new(Box::new(connector)));
        let adapter = RemoteTableAdapter::new(manager, "WHSE.NOPE", Crs::BC_ALBERS).unwrap();

        assert!(!adapter.exists().await.unwrap());
        assert!(!adapter.has_spatial_rows().await.unwrap());
    }

    #[tokio::test]
    async fn geometry_kind_is_the_maximum_sampled_type() {
        let (adapter, queries) = adapter_with(vec![(
            "GeometryType",
            Ok(vec![
                row(&[("geometry_type", Some("POLYGON"))]),
                row(&[("geometry_type", Some("MULTIPOLYGON"))]),
            ]),
        )]);

        assert!(adapter.exists().await.unwrap());
        assert!(adapter.has_spatial_rows().await.unwrap());
        assert_eq!(
            adapter.geometry_kind().await.unwrap(),
            Some(GeometryKind::MultiPolygon)
        );

        let queries = queries.lock().await;
        assert_eq!(
            queries
                .iter()
                .filter(|q| q.contains("information_schema.views"))
                .count(),
            1
        );
        assert!(queries.iter().any(|q| q.contains("GeometryType(\"shape\")")));
    }

    #[tokio::test]
    async fn unexpected_geometry_type_is_an_error() {
        let (adapter, _) = adapter_with(vec![(
            "GeometryType",
            Ok(vec![row(&[("geometry_type", Some("GEOMETRYCOLLECTION"))])]),
        )]);

        assert!(matches!(
            adapter.geometry_kind().await,
            Err(SourceError::UnexpectedGeometryType { .. })
        ));
    }

    #[tokio::test]
    async fn empty_table_has_no_spatial_rows() {
        let (adapter, _) = adapter_with(vec![("GeometryType", Ok(vec![]))]);
        assert!(adapter.exists().await.unwrap());
        assert!(!adapter.has_spatial_rows().await.unwrap());
    }

    #[tokio::test]
    async fn query_bbox_builds_a_layer_in_the_working_crs() {
        let (adapter, queries) = adapter_with(vec![(
            "ST_AsGeoJSON",
            Ok(vec![row(&[
                (
                    "geometry",
                    Some(r#"{"type":"Point","coordinates":[1000050.0,50.0]}"#),
                ),
                ("properties", Some(r#"{"OBJECTID": 1, "park_name": "Goldstream"}"#)),
            ])]),
        )]);

        let bbox = Rect::new(coord! { x: 1_000_000.0, y: 0.0 }, coord! { x: 1_000_100.0, y: 100.0 });
        let layer = adapter.query_bbox(bbox, Some("park_name LIKE 'G%'")).await.unwrap();

        assert_eq!(layer.crs, Crs::BC_ALBERS);
        assert_eq!(layer.feature_count(), 1);
        assert!(layer.has_field("park_name"));

        let queries = queries.lock().await;
        let main = queries.iter().find(|q| q.contains("ST_AsGeoJSON")).unwrap();
        assert!(main.contains("FROM \"whse_parks\".\"park_boundaries\" AS t"));
        assert!(main.contains("AND (park_name LIKE 'G%')"));
        assert!(main.contains("ORDER BY t.\"OBJECTID\""));
    }
}
