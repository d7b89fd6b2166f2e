use anyhow::{Context, Result};

use crate::models::{Course, CourseSummary};

use super::CourseRepository;

impl CourseRepository {
    pub async fn create_course(&self, name: &str) -> Result<i64> {
        let result = sqlx::query("INSERT INTO courses (name, created_at) VALUES (?, unixepoch())")
            .bind(name)
            .execute(&self.pool)
            .await
            .context("Failed to insert course")?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_course(&self, id: i64) -> Result<Option<Course>> {
        let course =
            sqlx::query_as::<_, Course>("SELECT id, name, created_at FROM courses WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(course)
    }

    /// All courses, newest first.
    pub async fn list_courses(&self) -> Result<Vec<CourseSummary>> {
        let courses = sqlx::query_as::<_, CourseSummary>(
            r#"
            SELECT c.id, c.name, COUNT(m.id) AS message_count
            FROM courses c
            LEFT JOIN messages m ON m.course_id = c.id
            GROUP BY c.id
            ORDER BY c.id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(courses)
    }
}
