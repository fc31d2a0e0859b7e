// Query helpers over a SlideRunner annotation database.

use crate::db::schema::*;
use anyhow::Result;
use std::collections::HashMap;

use super::Db;

pub struct QueryBuilder;

impl QueryBuilder {
    pub async fn list_slides(db: &Db) -> Result<Vec<SlideRecord>> {
        let slides = sqlx::query_as::<_, SlideRecord>(
            "SELECT uid, filename FROM Slides ORDER BY uid",
        )
        .fetch_all(db)
        .await?;

        Ok(slides)
    }

    pub async fn list_classes(db: &Db) -> Result<Vec<ClassRecord>> {
        let classes = sqlx::query_as::<_, ClassRecord>(
            "SELECT uid, name, color FROM Classes ORDER BY uid",
        )
        .fetch_all(db)
        .await?;

        Ok(classes)
    }

    /// Load every annotation of one slide with its coordinates in drawing
    /// order.
    pub async fn load_annotations(db: &Db, slide: i64) -> Result<Vec<AnnotationRecord>> {
        let rows = sqlx::query_as::<_, AnnotationRow>(
            r#"
            SELECT uid, slide, type, agreedClass, deleted
            FROM Annotations
            WHERE slide = ?
            ORDER BY uid
            "#,
        )
        .bind(slide)
        .fetch_all(db)
        .await?;

        let coordinate_rows = sqlx::query_as::<_, CoordinateRow>(
            r#"
            SELECT c.annoId, c.coordinateX, c.coordinateY
            FROM Annotations_coordinates c
            JOIN Annotations a ON a.uid = c.annoId
            WHERE a.slide = ?
            ORDER BY c.annoId, c.orderIdx
            "#,
        )
        .bind(slide)
        .fetch_all(db)
        .await?;

        let mut coordinates: HashMap<i64, Vec<(i64, i64)>> = HashMap::new();
        for row in coordinate_rows {
            coordinates.entry(row.anno_id).or_default().push((row.x, row.y));
        }

        let annotations = rows
            .into_iter()
            .map(|row| AnnotationRecord {
                uid: row.uid,
                slide: row.slide,
                annotation_type: row
                    .annotation_type
                    .map(AnnotationType::from_code)
                    .unwrap_or(AnnotationType::Unknown),
                agreed_class: row.agreed_class,
                deleted: row.deleted.unwrap_or(0) != 0,
                coordinates: coordinates.remove(&row.uid).unwrap_or_default(),
            })
            .collect();

        Ok(annotations)
    }

    pub async fn insert_slide(db: &Db, filename: &str) -> Result<i64> {
        let res = sqlx::query("INSERT INTO Slides (filename) VALUES (?)")
            .bind(filename)
            .execute(db)
            .await?;

        Ok(res.last_insert_rowid())
    }

    pub async fn insert_class(db: &Db, name: &str, color: Option<&str>) -> Result<i64> {
        let res = sqlx::query("INSERT INTO Classes (name, color) VALUES (?, ?)")
            .bind(name)
            .bind(color)
            .execute(db)
            .await?;

        Ok(res.last_insert_rowid())
    }

    /// Insert an annotation and its coordinates in one transaction.
    pub async fn insert_annotation(db: &Db, data: &AnnotationCreate) -> Result<i64> {
        let mut tx = db.begin().await?;

        let res = sqlx::query(
            r#"
            INSERT INTO Annotations (guid, lastModified, deleted, slide, type, agreedClass)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(chrono::Utc::now().timestamp() as f64)
        .bind(data.deleted as i64)
        .bind(data.slide)
        .bind(data.annotation_type.code())
        .bind(data.agreed_class)
        .execute(&mut *tx)
        .await?;
        let annotation_id = res.last_insert_rowid();

        for (order, (x, y)) in data.coordinates.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO Annotations_coordinates (coordinateX, coordinateY, slide, annoId, orderIdx)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(*x)
            .bind(*y)
            .bind(data.slide)
            .bind(annotation_id)
            .bind(order as i64 + 1)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(annotation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DatabaseConfig, create_connection, ensure_schema};

    async fn memory_db() -> Db {
        let db = create_connection(DatabaseConfig::with_url("sqlite::memory:"))
            .await
            .unwrap();
        ensure_schema(&db).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_list_slides_in_uid_order() {
        let db = memory_db().await;
        let a = QueryBuilder::insert_slide(&db, "a.svs").await.unwrap();
        let b = QueryBuilder::insert_slide(&db, "b.svs").await.unwrap();

        let slides = QueryBuilder::list_slides(&db).await.unwrap();
        assert_eq!(slides.len(), 2);
        assert_eq!((slides[0].uid, slides[0].filename.as_str()), (a, "a.svs"));
        assert_eq!((slides[1].uid, slides[1].filename.as_str()), (b, "b.svs"));
    }

    #[tokio::test]
    async fn test_load_annotations_groups_coordinates_per_slide() {
        let db = memory_db().await;
        let first = QueryBuilder::insert_slide(&db, "a.svs").await.unwrap();
        let second = QueryBuilder::insert_slide(&db, "b.svs").await.unwrap();

        let spot = QueryBuilder::insert_annotation(&db, &AnnotationCreate::spot(first, 2, 100, 200))
            .await
            .unwrap();
        let polygon = QueryBuilder::insert_annotation(
            &db,
            &AnnotationCreate {
                slide: first,
                annotation_type: AnnotationType::Polygon,
                agreed_class: Some(7),
                deleted: true,
                coordinates: vec![(1, 1), (2, 2), (3, 3)],
            },
        )
        .await
        .unwrap();
        QueryBuilder::insert_annotation(&db, &AnnotationCreate::spot(second, 2, 5, 5))
            .await
            .unwrap();

        let annotations = QueryBuilder::load_annotations(&db, first).await.unwrap();
        assert_eq!(annotations.len(), 2);

        assert_eq!(annotations[0].uid, spot);
        assert_eq!(annotations[0].annotation_type, AnnotationType::Spot);
        assert_eq!(annotations[0].agreed_class, Some(2));
        assert!(!annotations[0].deleted);
        assert_eq!(annotations[0].coordinates, vec![(100, 200)]);

        assert_eq!(annotations[1].uid, polygon);
        assert!(annotations[1].deleted);
        assert_eq!(annotations[1].coordinates, vec![(1, 1), (2, 2), (3, 3)]);
    }

    #[tokio::test]
    async fn test_annotation_without_coordinates() {
        let db = memory_db().await;
        let slide = QueryBuilder::insert_slide(&db, "a.svs").await.unwrap();
        QueryBuilder::insert_annotation(
            &db,
            &AnnotationCreate {
                coordinates: vec![],
                ..AnnotationCreate::spot(slide, 2, 0, 0)
            },
        )
        .await
        .unwrap();

        let annotations = QueryBuilder::load_annotations(&db, slide).await.unwrap();
        assert_eq!(annotations[0].position(), None);
    }

    #[tokio::test]
    async fn test_list_classes() {
        let db = memory_db().await;
        QueryBuilder::insert_class(&db, "Mitotic figure", Some("#00ff00"))
            .await
            .unwrap();
        QueryBuilder::insert_class(&db, "Hard negative", None)
            .await
            .unwrap();

        let classes = QueryBuilder::list_classes(&db).await.unwrap();
        assert_eq!(classes.len(), 2);
        assert_eq!(classes[0].name.as_deref(), Some("Mitotic figure"));
        assert_eq!(classes[1].color, None);
    }
}
