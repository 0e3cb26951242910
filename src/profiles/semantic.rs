use std::any::Any;
use std::collections::BTreeSet;
use std::mem::size_of;
use std::sync::Arc;

use regex::Regex;

use crate::data::feature::SourceFeature;
use crate::data::osm::Relation;
use crate::errors::Result;
use crate::profile::{Profile, RelationInfo};
use crate::render::FeatureCollector;

pub const PROFILE_NAME: &str = "semantic";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationType {
    Underground,
    Overground,
    Dlr,
    ElizabethLine,
}

impl StationType {
    fn from_network(feature: &SourceFeature) -> Option<StationType> {
        if has_value(feature, "network", "London Underground") {
            Some(StationType::Underground)
        } else if has_value(feature, "network", "Docklands Light Railway") {
            Some(StationType::Dlr)
        } else if has_value(feature, "network", "London Overground") {
            Some(StationType::Overground)
        } else if has_value(feature, "network", "Elizabeth Line") {
            Some(StationType::ElizabethLine)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StationType::Underground => "underground",
            StationType::Overground => "overground",
            StationType::Dlr => "dlr",
            StationType::ElizabethLine => "elizabeth",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkType {
    Lgbtq,
    LgbtqMen,
    CocktailBar,
}

impl LandmarkType {
    fn of(feature: &SourceFeature) -> Option<LandmarkType> {
        if has_value(feature, "lgbtq:men", "only") || has_value(feature, "lgbtq:men", "primary") {
            Some(LandmarkType::LgbtqMen)
        } else if has_value(feature, "lgbtq", "primary") {
            Some(LandmarkType::Lgbtq)
        } else if has_value(feature, "bar", "cocktail")
            || has_value(feature, "cocktails", "yes")
            || has_value(feature, "drink:cocktail", "served")
        {
            Some(LandmarkType::CocktailBar)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LandmarkType::Lgbtq => "lgbtq",
            LandmarkType::LgbtqMen => "lgbtq_men",
            LandmarkType::CocktailBar => "cocktail_bar",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TubeLine {
    Bakerloo,
    Central,
    Circle,
    District,
    Dlr,
    Elizabeth,
    HammersmithAndCity,
    Jubilee,
    Metropolitan,
    Northern,
    Overground,
    Piccadilly,
    Victoria,
    WaterlooAndCity,
}

impl TubeLine {
    /// Matched against a route's name or ref, so "Jubilee Line: Stanmore => Stratford"
    /// resolves to [`TubeLine::Jubilee`].
    pub fn from_name(name: &str) -> Option<TubeLine> {
        let name = name.to_lowercase();
        let line = if name.contains("waterloo & city") || name.contains("waterloo and city") {
            TubeLine::WaterlooAndCity
        } else if name.contains("hammersmith") {
            TubeLine::HammersmithAndCity
        } else if name.contains("bakerloo") {
            TubeLine::Bakerloo
        } else if name.contains("central") {
            TubeLine::Central
        } else if name.contains("circle") {
            TubeLine::Circle
        } else if name.contains("district") {
            TubeLine::District
        } else if name.contains("docklands") || name.contains("dlr") {
            TubeLine::Dlr
        } else if name.contains("elizabeth") {
            TubeLine::Elizabeth
        } else if name.contains("jubilee") {
            TubeLine::Jubilee
        } else if name.contains("metropolitan") {
            TubeLine::Metropolitan
        } else if name.contains("northern") {
            TubeLine::Northern
        } else if name.contains("overground") {
            TubeLine::Overground
        } else if name.contains("piccadilly") {
            TubeLine::Piccadilly
        } else if name.contains("victoria") {
            TubeLine::Victoria
        } else {
            return None;
        };
        Some(line)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TubeLine::Bakerloo => "bakerloo",
            TubeLine::Central => "central",
            TubeLine::Circle => "circle",
            TubeLine::District => "district",
            TubeLine::Dlr => "dlr",
            TubeLine::Elizabeth => "elizabeth",
            TubeLine::HammersmithAndCity => "hammersmith_and_city",
            TubeLine::Jubilee => "jubilee",
            TubeLine::Metropolitan => "metropolitan",
            TubeLine::Northern => "northern",
            TubeLine::Overground => "overground",
            TubeLine::Piccadilly => "piccadilly",
            TubeLine::Victoria => "victoria",
            TubeLine::WaterlooAndCity => "waterloo_and_city",
        }
    }
}

/// Kept from a rail route relation in pass 1 and attached to its member ways.
#[derive(Debug, Clone, PartialEq)]
pub struct TubeRoute {
    pub line: TubeLine,
    pub name: String,
}

impl RelationInfo for TubeRoute {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn estimate_memory_usage_bytes(&self) -> u64 {
        (size_of::<TubeRoute>() + self.name.len()) as u64
    }
}

/// Tag values may hold several entries separated by `;`.
fn has_value(feature: &SourceFeature, key: &str, value: &str) -> bool {
    feature
        .tags
        .get_string(key)
        .is_some_and(|values| values.split(';').any(|entry| entry.trim() == value))
}

fn road_min_zoom(highway: &str) -> u8 {
    match highway {
        "motorway" | "trunk" => 5,
        "primary" => 7,
        "secondary" => 9,
        "tertiary" => 11,
        _ => 13,
    }
}

/// London-flavoured map: tube and rail stations, rail lines with the tube lines that run
/// on them, roads, parks, water and a few landmark kinds.
pub struct SemanticProfile {
    station_name: Regex,
}

impl SemanticProfile {
    pub fn new() -> Result<Self> {
        Ok(SemanticProfile {
            // "Edgware Road (Bakerloo line)" labels as "Edgware Road".
            station_name: Regex::new(r"(?<base_name>[^(]*)(\(.*\))?")?,
        })
    }

    fn base_name<'a>(&self, name: &'a str) -> &'a str {
        self.station_name
            .captures(name)
            .and_then(|captures| captures.name("base_name"))
            .map_or(name, |base| base.as_str())
            .trim()
    }

    fn process_point(&self, source: &SourceFeature, features: &mut FeatureCollector) {
        if has_value(source, "railway", "station") {
            if let (Some(name), Some(station_type)) = (source.tags.get_string("name"), StationType::from_network(source))
            {
                features
                    .point("stations")
                    .set_attr("name", self.base_name(name))
                    .set_attr("network", station_type.as_str())
                    .set_min_zoom(10);
            }
        }
        if let Some(landmark) = LandmarkType::of(source) {
            features
                .point("landmarks")
                .set_attr("kind", landmark.as_str())
                .copy_attrs(&source.tags, &["name"])
                .set_min_zoom(12);
        }
    }

    fn process_line(&self, source: &SourceFeature, features: &mut FeatureCollector) {
        let lines: BTreeSet<TubeLine> = source
            .relation_info::<TubeRoute>()
            .iter()
            .map(|(_, route)| route.line)
            .collect();
        if !lines.is_empty() {
            let names: Vec<&str> = lines.iter().map(TubeLine::as_str).collect();
            features
                .line("tube_rails")
                .set_attr("lines", names.join(","))
                .set_min_zoom(8);
        } else if has_value(source, "railway", "rail") {
            features.line("rails").set_min_zoom(9);
        }
        if let Some(highway) = source.tags.get_string("highway") {
            features
                .line("roads")
                .set_attr("highway", highway)
                .copy_attrs(&source.tags, &["name", "ref"])
                .set_min_zoom(road_min_zoom(highway));
        }
    }

    fn process_area(&self, source: &SourceFeature, features: &mut FeatureCollector) {
        let kind = if has_value(source, "leisure", "park") {
            Some("park")
        } else if source.tags.contains_key("water") || has_value(source, "natural", "water") {
            Some("water")
        } else {
            None
        };
        if let Some(kind) = kind {
            features
                .polygon("areas")
                .set_attr("kind", kind)
                .copy_attrs(&source.tags, &["name"])
                .set_sort_key(if kind == "water" { 1 } else { 0 })
                .set_min_pixel_size(2.0);
        }
    }
}

impl Profile for SemanticProfile {
    fn name(&self) -> &str {
        PROFILE_NAME
    }

    fn preprocess_osm_relation(&self, relation: &Relation) -> Option<Vec<Arc<dyn RelationInfo>>> {
        let is_rail_route = relation.has_tag("type", "route")
            && ["subway", "train", "light_rail", "railway"]
                .iter()
                .any(|route| relation.has_tag("route", route));
        if !is_rail_route {
            return None;
        }
        let name = relation
            .tags
            .get_string("name")
            .or_else(|| relation.tags.get_string("ref"))?;
        let line = TubeLine::from_name(name)?;
        Some(vec![Arc::new(TubeRoute {
            line,
            name: name.to_string(),
        }) as Arc<dyn RelationInfo>])
    }

    fn process_feature(&self, source: &SourceFeature, features: &mut FeatureCollector) -> Result<()> {
        if source.is_point() {
            self.process_point(source, features);
            return Ok(());
        }
        if source.can_be_line() {
            self.process_line(source, features);
        }
        if source.can_be_polygon() {
            self.process_area(source, features);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use geo::{polygon, LineString, MultiPolygon, Point};

    use super::*;
    use crate::data::attributes::Attributes;
    use crate::data::feature::{RelationMembership, SourceGeometry};
    use crate::data::osm::{ElementType, Member};

    fn feature(tags: &[(&str, &str)], geometry: SourceGeometry) -> SourceFeature {
        SourceFeature::new("osm", 1, Attributes::from_tags(tags.iter().copied()), geometry)
    }

    fn collect(source: &SourceFeature) -> Vec<(String, Attributes)> {
        let profile = SemanticProfile::new().unwrap();
        let mut features = FeatureCollector::new(source);
        profile.process_feature(source, &mut features).unwrap();
        features
            .features()
            .iter()
            .map(|feature| (feature.layer().to_string(), feature.attrs().clone()))
            .collect()
    }

    #[test]
    fn station_names_lose_the_line_suffix() {
        let station = feature(
            &[
                ("railway", "station"),
                ("name", "Edgware Road (Bakerloo line)"),
                ("network", "London Underground;National Rail"),
            ],
            SourceGeometry::Point(Point::new(-0.17, 51.52)),
        );
        let features = collect(&station);
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].0, "stations");
        assert_eq!(features[0].1.get_string("name"), Some("Edgware Road"));
        assert_eq!(features[0].1.get_string("network"), Some("underground"));
    }

    #[test]
    fn stations_outside_known_networks_are_ignored() {
        let station = feature(
            &[("railway", "station"), ("name", "Reading"), ("network", "National Rail")],
            SourceGeometry::Point(Point::new(-0.97, 51.46)),
        );
        assert!(collect(&station).is_empty());
    }

    #[test]
    fn landmarks_are_points() {
        let bar = feature(
            &[("amenity", "bar"), ("bar", "cocktail"), ("name", "Nightjar")],
            SourceGeometry::Point(Point::new(-0.09, 51.52)),
        );
        let features = collect(&bar);
        assert_eq!(features[0].0, "landmarks");
        assert_eq!(features[0].1.get_string("kind"), Some("cocktail_bar"));
        assert_eq!(features[0].1.get_string("name"), Some("Nightjar"));
    }

    #[test]
    fn route_relations_become_tube_lines() {
        let profile = SemanticProfile::new().unwrap();
        let relation = Relation {
            id: 7,
            members: vec![Member {
                member_type: ElementType::Way,
                reference: 1,
                role: String::new(),
            }],
            tags: Attributes::from_tags([
                ("type", "route"),
                ("route", "subway"),
                ("name", "Jubilee Line: Stanmore => Stratford"),
            ]),
        };
        let infos = profile.preprocess_osm_relation(&relation).unwrap();
        let route = infos[0].as_any().downcast_ref::<TubeRoute>().unwrap();
        assert_eq!(route.line, TubeLine::Jubilee);

        let bus = Relation {
            tags: Attributes::from_tags([("type", "route"), ("route", "bus"), ("name", "Jubilee")]),
            ..relation.clone()
        };
        assert!(profile.preprocess_osm_relation(&bus).is_none());

        let mut track = feature(
            &[("railway", "subway")],
            SourceGeometry::line(LineString::from(vec![(0.0, 0.0), (0.1, 0.1)])),
        );
        for line in [TubeLine::Metropolitan, TubeLine::Jubilee, TubeLine::Jubilee] {
            track.relations.push(RelationMembership {
                relation_id: 7,
                role: String::new(),
                info: Arc::new(TubeRoute {
                    line,
                    name: line.as_str().to_string(),
                }),
            });
        }
        let features = collect(&track);
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].0, "tube_rails");
        assert_eq!(features[0].1.get_string("lines"), Some("jubilee,metropolitan"));
    }

    #[test]
    fn tube_line_names() {
        assert_eq!(TubeLine::from_name("Hammersmith & City"), Some(TubeLine::HammersmithAndCity));
        assert_eq!(TubeLine::from_name("Waterloo & City line"), Some(TubeLine::WaterlooAndCity));
        assert_eq!(TubeLine::from_name("DLR: Bank => Lewisham"), Some(TubeLine::Dlr));
        assert_eq!(TubeLine::from_name("Thameslink"), None);
    }

    #[test]
    fn closed_park_way_is_an_area_and_roads_keep_their_class() {
        let ring = LineString::from(vec![(0.0, 0.0), (0.01, 0.0), (0.01, 0.01), (0.0, 0.0)]);
        let park = feature(&[("leisure", "park"), ("name", "Hyde Park")], SourceGeometry::line(ring));
        let features = collect(&park);
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].0, "areas");
        assert_eq!(features[0].1.get_string("kind"), Some("park"));

        let road = feature(
            &[("highway", "primary"), ("ref", "A40")],
            SourceGeometry::line(LineString::from(vec![(0.0, 0.0), (0.1, 0.0)])),
        );
        let features = collect(&road);
        assert_eq!(features[0].0, "roads");
        assert_eq!(features[0].1.get_string("highway"), Some("primary"));
        assert_eq!(features[0].1.get_string("ref"), Some("A40"));
    }

    #[test]
    fn water_relation_is_an_area() {
        let square = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
        let lake = feature(
            &[("type", "multipolygon"), ("natural", "water")],
            SourceGeometry::Polygon(MultiPolygon::new(vec![square])),
        );
        let profile = SemanticProfile::new().unwrap();
        let mut features = FeatureCollector::new(&lake);
        profile.process_feature(&lake, &mut features).unwrap();
        let area = &features.features()[0];
        assert_eq!(area.sort_key(), 1);
        assert_eq!(area.layer(), "areas");
        assert_eq!(area.attrs().get_string("kind"), Some("water"));
    }
}
