use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::db::DatabaseProxy;
use crate::models::{CefrLevel, Profile, ProfileDraft};

/// Inserts or updates the profile keyed by `username`, reusing the existing
/// row id when one exists. Gamification fields are left untouched on update.
pub async fn upsert_profile(
    proxy: &DatabaseProxy,
    draft: &ProfileDraft,
) -> Result<Profile, sqlx::Error> {
    let now = Utc::now();
    let interests = serde_json::to_string(&draft.interests)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    let existing: Option<String> =
        sqlx::query_scalar(r#"SELECT "id" FROM "profiles" WHERE "username" = ?"#)
            .bind(&draft.username)
            .fetch_optional(proxy.pool())
            .await?;

    let id = match existing {
        Some(id) => {
            sqlx::query(
                r#"
                UPDATE "profiles"
                SET "displayName" = ?, "currentLevel" = ?, "targetLevel" = ?,
                    "interests" = ?, "updatedAt" = ?
                WHERE "id" = ?
                "#,
            )
            .bind(&draft.display_name)
            .bind(draft.current_level.as_str())
            .bind(draft.target_level.as_str())
            .bind(&interests)
            .bind(now)
            .bind(&id)
            .execute(proxy.pool())
            .await?;
            id
        }
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO "profiles" (
                    "id", "username", "displayName", "currentLevel", "targetLevel",
                    "level", "xp", "totalXp", "streak", "longestStreak",
                    "interests", "lastPracticeOn", "createdAt", "updatedAt"
                ) VALUES (?, ?, ?, ?, ?, 1, 0, 0, 0, 0, ?, NULL, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&draft.username)
            .bind(&draft.display_name)
            .bind(draft.current_level.as_str())
            .bind(draft.target_level.as_str())
            .bind(&interests)
            .bind(now)
            .bind(now)
            .execute(proxy.pool())
            .await?;
            id
        }
    };

    get_profile_by_id(proxy, &id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

pub async fn get_profile_by_username(
    proxy: &DatabaseProxy,
    username: &str,
) -> Result<Option<Profile>, sqlx::Error> {
    let row = sqlx::query(r#"SELECT * FROM "profiles" WHERE "username" = ? LIMIT 1"#)
        .bind(username)
        .fetch_optional(proxy.pool())
        .await?;
    row.map(|r| map_profile(&r)).transpose()
}

pub async fn get_profile_by_id(
    proxy: &DatabaseProxy,
    profile_id: &str,
) -> Result<Option<Profile>, sqlx::Error> {
    let row = sqlx::query(r#"SELECT * FROM "profiles" WHERE "id" = ? LIMIT 1"#)
        .bind(profile_id)
        .fetch_optional(proxy.pool())
        .await?;
    row.map(|r| map_profile(&r)).transpose()
}

/// Persists level, XP and streak fields after a completion event.
pub async fn update_profile_progress(
    proxy: &DatabaseProxy,
    profile: &Profile,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE "profiles"
        SET "level" = ?, "xp" = ?, "totalXp" = ?, "streak" = ?, "longestStreak" = ?,
            "lastPracticeOn" = ?, "updatedAt" = ?
        WHERE "id" = ?
        "#,
    )
    .bind(i64::from(profile.level))
    .bind(to_i64(profile.xp))
    .bind(to_i64(profile.total_xp))
    .bind(i64::from(profile.streak))
    .bind(i64::from(profile.longest_streak))
    .bind(profile.last_practice_on)
    .bind(Utc::now())
    .bind(&profile.id)
    .execute(proxy.pool())
    .await?;
    Ok(())
}

/// Hard delete, reserved for administrative use. Modules and lessons cascade.
pub async fn delete_profile(proxy: &DatabaseProxy, username: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM "profiles" WHERE "username" = ?"#)
        .bind(username)
        .execute(proxy.pool())
        .await?;
    Ok(result.rows_affected() > 0)
}

fn map_profile(row: &SqliteRow) -> Result<Profile, sqlx::Error> {
    let id: String = row.try_get("id")?;
    let raw_interests: String = row.try_get("interests")?;
    let interests = match serde_json::from_str::<Vec<String>>(&raw_interests) {
        Ok(interests) => interests,
        Err(err) => {
            tracing::warn!(profile_id = %id, error = %err, "discarding undecodable interests");
            Vec::new()
        }
    };

    Ok(Profile {
        id,
        username: row.try_get("username")?,
        display_name: row.try_get("displayName")?,
        current_level: parse_level(row.try_get("currentLevel")?)?,
        target_level: parse_level(row.try_get("targetLevel")?)?,
        level: from_i64::<u32>(row.try_get("level")?).max(1),
        xp: from_i64(row.try_get("xp")?),
        total_xp: from_i64(row.try_get("totalXp")?),
        streak: from_i64(row.try_get("streak")?),
        longest_streak: from_i64(row.try_get("longestStreak")?),
        interests,
        last_practice_on: row.try_get::<Option<NaiveDate>, _>("lastPracticeOn")?,
        created_at: row.try_get::<DateTime<Utc>, _>("createdAt")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updatedAt")?,
    })
}

fn parse_level(value: String) -> Result<CefrLevel, sqlx::Error> {
    value
        .parse::<CefrLevel>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_i64<T: TryFrom<i64> + Default>(value: i64) -> T {
    T::try_from(value.max(0)).unwrap_or_default()
}
