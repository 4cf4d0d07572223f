//! Geospatial values.

/// A single coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Ordered sequence of points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineString(pub Vec<Point>);

/// Exterior ring followed by any interior rings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Polygon(pub Vec<LineString>);

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Point),
    Line(LineString),
    Polygon(Polygon),
    MultiPoint(Vec<Point>),
    MultiLine(Vec<LineString>),
    MultiPolygon(Vec<Polygon>),
    Collection(Vec<Geometry>),
}

impl Geometry {
    /// Every coordinate inside this geometry.
    pub fn points(&self) -> Box<dyn Iterator<Item = &Point> + '_> {
        match self {
            Geometry::Point(p) => Box::new(std::iter::once(p)),
            Geometry::Line(line) => Box::new(line.0.iter()),
            Geometry::Polygon(polygon) => Box::new(polygon.0.iter().flat_map(|l| l.0.iter())),
            Geometry::MultiPoint(points) => Box::new(points.iter()),
            Geometry::MultiLine(lines) => Box::new(lines.iter().flat_map(|l| l.0.iter())),
            Geometry::MultiPolygon(polygons) => Box::new(
                polygons
                    .iter()
                    .flat_map(|p| p.0.iter().flat_map(|l| l.0.iter())),
            ),
            Geometry::Collection(items) => Box::new(items.iter().flat_map(Geometry::points)),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::Line(_) => "LineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::MultiLine(_) => "MultiLineString",
            Geometry::MultiPolygon(_) => "MultiPolygon",
            Geometry::Collection(_) => "GeometryCollection",
        }
    }
}
