use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// SlideRunner annotation kinds, stored as integer codes in `Annotations.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnnotationType {
    Spot,
    Area,
    Polygon,
    SpecialSpot,
    Circle,
    Unknown,
}

impl AnnotationType {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Spot,
            2 => Self::Area,
            3 => Self::Polygon,
            4 => Self::SpecialSpot,
            5 => Self::Circle,
            _ => Self::Unknown,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Spot => 1,
            Self::Area => 2,
            Self::Polygon => 3,
            Self::SpecialSpot => 4,
            Self::Circle => 5,
            Self::Unknown => 255,
        }
    }
}

/// A row of the `Slides` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SlideRecord {
    pub uid: i64,
    pub filename: String,
}

/// A row of the `Classes` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClassRecord {
    pub uid: i64,
    pub name: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct AnnotationRow {
    pub uid: i64,
    pub slide: i64,
    #[sqlx(rename = "type")]
    pub annotation_type: Option<i64>,
    #[sqlx(rename = "agreedClass")]
    pub agreed_class: Option<i64>,
    pub deleted: Option<i64>,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct CoordinateRow {
    #[sqlx(rename = "annoId")]
    pub anno_id: i64,
    #[sqlx(rename = "coordinateX")]
    pub x: i64,
    #[sqlx(rename = "coordinateY")]
    pub y: i64,
}

/// An annotation together with its ordered coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub uid: i64,
    pub slide: i64,
    pub annotation_type: AnnotationType,
    pub agreed_class: Option<i64>,
    pub deleted: bool,
    pub coordinates: Vec<(i64, i64)>,
}

impl AnnotationRecord {
    /// First coordinate; the location of a spot annotation.
    pub fn position(&self) -> Option<(i64, i64)> {
        self.coordinates.first().copied()
    }

    pub fn is_live_spot(&self) -> bool {
        !self.deleted && self.annotation_type == AnnotationType::Spot
    }
}

/// Payload used when inserting a new annotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationCreate {
    pub slide: i64,
    pub annotation_type: AnnotationType,
    pub agreed_class: Option<i64>,
    pub deleted: bool,
    pub coordinates: Vec<(i64, i64)>,
}

impl AnnotationCreate {
    pub fn spot(slide: i64, class: i64, x: i64, y: i64) -> Self {
        Self {
            slide,
            annotation_type: AnnotationType::Spot,
            agreed_class: Some(class),
            deleted: false,
            coordinates: vec![(x, y)],
        }
    }
}
