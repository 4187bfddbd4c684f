use std::collections::HashMap;

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::db::DatabaseProxy;
use crate::models::{Course, Lesson, Module};
use crate::services::decode::decode_stored_content;

/// Upserts every module and then its lessons, in order. Not transactional:
/// a failure part-way leaves earlier rows written and later rows stale.
pub async fn save_full_course(proxy: &DatabaseProxy, course: &Course) -> Result<(), sqlx::Error> {
    for (index, module) in course.modules.iter().enumerate() {
        save_module(proxy, &course.profile_id, index, module).await?;
    }
    tracing::debug!(
        profile_id = %course.profile_id,
        modules = course.modules.len(),
        "course saved"
    );
    Ok(())
}

/// Upserts one module row at `order_index` followed by each of its lessons.
pub async fn save_module(
    proxy: &DatabaseProxy,
    profile_id: &str,
    order_index: usize,
    module: &Module,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO "modules" (
            "id", "profileId", "orderIndex", "title", "description",
            "generated", "completed", "updatedAt"
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT ("id") DO UPDATE SET
            "orderIndex" = excluded."orderIndex",
            "title" = excluded."title",
            "description" = excluded."description",
            "generated" = excluded."generated",
            "completed" = excluded."completed",
            "updatedAt" = excluded."updatedAt"
        "#,
    )
    .bind(&module.id)
    .bind(profile_id)
    .bind(order_index as i64)
    .bind(&module.title)
    .bind(&module.description)
    .bind(module.generated)
    .bind(module.completed)
    .bind(now)
    .execute(proxy.pool())
    .await?;

    for (index, lesson) in module.lessons.iter().enumerate() {
        save_lesson(proxy, &module.id, index, lesson).await?;
    }
    Ok(())
}

pub async fn save_lesson(
    proxy: &DatabaseProxy,
    module_id: &str,
    order_index: usize,
    lesson: &Lesson,
) -> Result<(), sqlx::Error> {
    let content = lesson
        .content
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    sqlx::query(
        r#"
        INSERT INTO "lessons" (
            "id", "moduleId", "orderIndex", "title", "description",
            "completed", "score", "content", "updatedAt"
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT ("id") DO UPDATE SET
            "orderIndex" = excluded."orderIndex",
            "title" = excluded."title",
            "description" = excluded."description",
            "completed" = excluded."completed",
            "score" = excluded."score",
            "content" = excluded."content",
            "updatedAt" = excluded."updatedAt"
        "#,
    )
    .bind(&lesson.id)
    .bind(module_id)
    .bind(order_index as i64)
    .bind(&lesson.title)
    .bind(&lesson.description)
    .bind(lesson.completed)
    .bind(lesson.score.map(i64::from))
    .bind(content)
    .bind(Utc::now())
    .execute(proxy.pool())
    .await?;
    Ok(())
}

/// Writes only the lesson's completion flag and score; content is left as is.
pub async fn update_lesson_result(proxy: &DatabaseProxy, lesson: &Lesson) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE "lessons" SET "completed" = ?, "score" = ?, "updatedAt" = ? WHERE "id" = ?"#,
    )
    .bind(lesson.completed)
    .bind(lesson.score.map(i64::from))
    .bind(Utc::now())
    .bind(&lesson.id)
    .execute(proxy.pool())
    .await?;
    Ok(())
}

/// Writes the module row's flags without touching its lessons.
pub async fn update_module_status(proxy: &DatabaseProxy, module: &Module) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE "modules" SET "generated" = ?, "completed" = ?, "updatedAt" = ? WHERE "id" = ?"#,
    )
    .bind(module.generated)
    .bind(module.completed)
    .bind(Utc::now())
    .bind(&module.id)
    .execute(proxy.pool())
    .await?;
    Ok(())
}

/// Rebuilds the course for `profile_id`. `None` means no module rows exist.
pub async fn get_full_course(
    proxy: &DatabaseProxy,
    profile_id: &str,
) -> Result<Option<Course>, sqlx::Error> {
    let module_rows = sqlx::query(
        r#"SELECT * FROM "modules" WHERE "profileId" = ? ORDER BY "orderIndex" ASC"#,
    )
    .bind(profile_id)
    .fetch_all(proxy.pool())
    .await?;

    if module_rows.is_empty() {
        return Ok(None);
    }

    let lesson_rows = sqlx::query(
        r#"
        SELECT l.* FROM "lessons" l
        JOIN "modules" m ON m."id" = l."moduleId"
        WHERE m."profileId" = ?
        "#,
    )
    .bind(profile_id)
    .fetch_all(proxy.pool())
    .await?;

    let mut lessons_by_module: HashMap<String, Vec<(i64, Lesson)>> = HashMap::new();
    for row in &lesson_rows {
        let module_id: String = row.try_get("moduleId")?;
        let order: i64 = row.try_get("orderIndex")?;
        lessons_by_module
            .entry(module_id)
            .or_default()
            .push((order, map_lesson(row)?));
    }

    let mut modules = Vec::with_capacity(module_rows.len());
    for row in &module_rows {
        let mut module = map_module(row)?;
        if let Some(mut lessons) = lessons_by_module.remove(&module.id) {
            lessons.sort_by_key(|(order, _)| *order);
            module.lessons = lessons.into_iter().map(|(_, lesson)| lesson).collect();
        }
        modules.push(module);
    }

    Ok(Some(Course {
        profile_id: profile_id.to_string(),
        modules,
    }))
}

fn map_module(row: &SqliteRow) -> Result<Module, sqlx::Error> {
    Ok(Module {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        generated: row.try_get("generated")?,
        completed: row.try_get("completed")?,
        lessons: Vec::new(),
    })
}

fn map_lesson(row: &SqliteRow) -> Result<Lesson, sqlx::Error> {
    let id: String = row.try_get("id")?;
    let raw_content: Option<String> = row.try_get("content")?;
    let content = raw_content.and_then(|raw| match decode_stored_content(&raw) {
        Ok(content) => Some(content),
        Err(err) => {
            tracing::warn!(lesson_id = %id, error = %err, "discarding invalid lesson content");
            None
        }
    });
    let score: Option<i64> = row.try_get("score")?;

    Ok(Lesson {
        id,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        completed: row.try_get("completed")?,
        score: score.map(|s| s.clamp(0, 100) as u8),
        content,
    })
}
