//! 地理谓词
//!
//! 校验 `georel`/`geometry`/`coordinates` 三元组并生成几何谓词描述。

use geo::{Centroid, Distance, Haversine, Relate};
use serde_json::{Value, json};
use std::str::FromStr;

use crate::context::ResolvedContext;
use crate::error::{AppError, Result};
use crate::models::attribute::GeometryKind;

/// 几何关系
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeoRelation {
    /// 距离约束，二者恰好一个有值（单位：米）
    Near {
        max_distance: Option<f64>,
        min_distance: Option<f64>,
    },
    Equals,
    Disjoint,
    Intersects,
    Within,
    Contains,
    Overlaps,
}

impl GeoRelation {
    pub fn name(&self) -> &'static str {
        match self {
            GeoRelation::Near { .. } => "near",
            GeoRelation::Equals => "equals",
            GeoRelation::Disjoint => "disjoint",
            GeoRelation::Intersects => "intersects",
            GeoRelation::Within => "within",
            GeoRelation::Contains => "contains",
            GeoRelation::Overlaps => "overlaps",
        }
    }
}

impl FromStr for GeoRelation {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(';');
        let name = parts.next().unwrap_or_default();
        let relation = match name {
            "near" => {
                let mut max_distance = None;
                let mut min_distance = None;
                for modifier in parts.by_ref() {
                    let (key, value) = modifier.split_once("==").ok_or_else(|| {
                        AppError::InvalidQuery(format!("invalid near modifier '{modifier}'"))
                    })?;
                    let distance = value
                        .parse::<f64>()
                        .ok()
                        .filter(|d| d.is_finite() && *d >= 0.0)
                        .ok_or_else(|| {
                            AppError::InvalidQuery(format!("invalid distance '{value}'"))
                        })?;
                    match key {
                        "maxDistance" => max_distance = Some(distance),
                        "minDistance" => min_distance = Some(distance),
                        other => {
                            return Err(AppError::InvalidQuery(format!(
                                "unknown near modifier '{other}'"
                            )));
                        }
                    }
                }
                if max_distance.is_some() == min_distance.is_some() {
                    return Err(AppError::InvalidQuery(
                        "near requires exactly one of maxDistance or minDistance".to_string(),
                    ));
                }
                GeoRelation::Near {
                    max_distance,
                    min_distance,
                }
            }
            "equals" => GeoRelation::Equals,
            "disjoint" => GeoRelation::Disjoint,
            "intersects" => GeoRelation::Intersects,
            "within" => GeoRelation::Within,
            "contains" => GeoRelation::Contains,
            "overlaps" => GeoRelation::Overlaps,
            other => {
                return Err(AppError::InvalidQuery(format!(
                    "unsupported georel '{other}'"
                )));
            }
        };
        if parts.next().is_some() {
            return Err(AppError::InvalidQuery(format!(
                "georel '{s}' takes no modifiers"
            )));
        }
        Ok(relation)
    }
}

/// 地理谓词描述
#[derive(Debug, Clone, PartialEq)]
pub struct GeoQuery {
    pub relation: GeoRelation,
    pub geometry: geojson::Geometry,
    /// 展开后的地理属性 ID
    pub geoproperty: String,
}

impl GeoQuery {
    pub fn new(
        georel: &str,
        geometry: &str,
        coordinates: &str,
        geoproperty: Option<&str>,
        context: &ResolvedContext,
    ) -> Result<Self> {
        let relation = georel.parse::<GeoRelation>()?;
        let coordinates: Value = serde_json::from_str(coordinates).map_err(|e| {
            AppError::InvalidQuery(format!("coordinates are not valid JSON: {e}"))
        })?;
        let geometry: geojson::Geometry =
            serde_json::from_value(json!({ "type": geometry, "coordinates": coordinates }))
                .map_err(|e| AppError::InvalidQuery(format!("invalid {geometry} geometry: {e}")))?;
        if GeometryKind::of(&geometry.value).is_none() {
            return Err(AppError::InvalidQuery(
                "geometry must be a Point, LineString, Polygon, MultiLineString or MultiPolygon"
                    .to_string(),
            ));
        }
        let geoproperty = context.expand(geoproperty.unwrap_or("location"))?;
        Ok(Self {
            relation,
            geometry,
            geoproperty,
        })
    }

    /// 作为语句参数的 GeoJSON 文本
    pub fn geometry_json(&self) -> String {
        serde_json::to_string(&self.geometry).unwrap_or_default()
    }

    /// 内存中判断存储的几何是否满足关系
    pub fn matches(&self, stored: &geojson::Geometry) -> bool {
        let (Ok(stored), Ok(reference)) = (
            geo::Geometry::<f64>::try_from(stored.clone()),
            geo::Geometry::<f64>::try_from(self.geometry.clone()),
        ) else {
            return false;
        };

        match self.relation {
            GeoRelation::Near {
                max_distance,
                min_distance,
            } => {
                let (Some(a), Some(b)) = (stored.centroid(), reference.centroid()) else {
                    return false;
                };
                let distance = Haversine.distance(a, b);
                match (max_distance, min_distance) {
                    (Some(max), _) => distance <= max,
                    (None, Some(min)) => distance > min,
                    (None, None) => false,
                }
            }
            relation => {
                let matrix = stored.relate(&reference);
                match relation {
                    GeoRelation::Equals => matrix.is_equal_topo(),
                    GeoRelation::Disjoint => matrix.is_disjoint(),
                    GeoRelation::Intersects => matrix.is_intersects(),
                    GeoRelation::Within => matrix.is_within(),
                    GeoRelation::Contains => matrix.is_contains(),
                    GeoRelation::Overlaps => matrix.is_overlaps(),
                    GeoRelation::Near { .. } => false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn point(lon: f64, lat: f64) -> geojson::Geometry {
        geojson::Geometry::new(geojson::Value::Point(vec![lon, lat]))
    }

    #[rstest]
    #[case("near;maxDistance==2000", true)]
    #[case("near;minDistance==10", true)]
    #[case("near", false)]
    #[case("near;maxDistance==1;minDistance==2", false)]
    #[case("near;maxDistance==-5", false)]
    #[case("near;radius==5", false)]
    #[case("within", true)]
    #[case("within;maxDistance==5", false)]
    #[case("touches", false)]
    fn test_relation_parsing(#[case] georel: &str, #[case] ok: bool) {
        assert_eq!(georel.parse::<GeoRelation>().is_ok(), ok);
    }

    #[test]
    fn test_builds_geometry_from_coordinates() {
        let context = ResolvedContext::default();
        let query = GeoQuery::new("intersects", "Point", "[2.35, 48.85]", None, &context).unwrap();
        assert_eq!(query.geoproperty, "https://uri.etsi.org/ngsi-ld/location");
        assert_eq!(query.geometry, point(2.35, 48.85));
        assert!(query.geometry_json().contains("\"Point\""));

        assert!(GeoQuery::new("within", "Polygon", "[1, 2]", None, &context).is_err());
        assert!(GeoQuery::new("within", "MultiPoint", "[[1, 2]]", None, &context).is_err());
        assert!(GeoQuery::new("within", "Point", "not json", None, &context).is_err());
    }

    #[test]
    fn test_near_uses_great_circle_distance() {
        let context = ResolvedContext::default();
        let paris = "[2.3522, 48.8566]";
        let within = GeoQuery::new("near;maxDistance==2000", "Point", paris, None, &context).unwrap();
        let beyond = GeoQuery::new("near;minDistance==2000", "Point", paris, None, &context).unwrap();

        let louvre = point(2.3376, 48.8606);
        let versailles = point(2.1204, 48.8049);
        assert!(within.matches(&louvre));
        assert!(!within.matches(&versailles));
        assert!(beyond.matches(&versailles));
        assert!(!beyond.matches(&louvre));
    }

    #[test]
    fn test_topological_relations() {
        let context = ResolvedContext::default();
        let square = "[[[0,0],[10,0],[10,10],[0,10],[0,0]]]";
        let within = GeoQuery::new("within", "Polygon", square, None, &context).unwrap();
        let disjoint = GeoQuery::new("disjoint", "Polygon", square, None, &context).unwrap();

        assert!(within.matches(&point(5.0, 5.0)));
        assert!(!within.matches(&point(20.0, 5.0)));
        assert!(disjoint.matches(&point(20.0, 5.0)));
    }
}
