use anyhow::{Context, Result};

use crate::models::Message;

use super::CourseRepository;

impl CourseRepository {
    pub async fn add_message(&self, course_id: i64, author: &str, body: &str) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO messages (course_id, author, body, created_at) VALUES (?, ?, ?, unixepoch())",
        )
        .bind(course_id)
        .bind(author)
        .bind(body)
        .execute(&self.pool)
        .await
        .context("Failed to insert message")?;
        Ok(result.last_insert_rowid())
    }

    /// Messages of a course, oldest first.
    pub async fn list_messages(&self, course_id: i64) -> Result<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, course_id, author, body, created_at
            FROM messages
            WHERE course_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }
}
