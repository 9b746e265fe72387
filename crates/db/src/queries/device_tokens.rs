use sqlx::PgPool;

use crate::models::DeviceTokenRow;

/// Active (not invalidated) device tokens registered for a user.
pub async fn list_active_for_user(
    pool: &PgPool,
    user_id: &str,
) -> Result<Vec<DeviceTokenRow>, sqlx::Error> {
    sqlx::query_as::<_, DeviceTokenRow>(
        r#"
        SELECT token, user_id, platform, invalidated_at, created_at
        FROM device_tokens
        WHERE user_id = $1 AND invalidated_at IS NULL
        ORDER BY created_at ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Flag tokens the provider reported as permanently invalid.
pub async fn invalidate(pool: &PgPool, tokens: &[String]) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE device_tokens
        SET invalidated_at = now()
        WHERE token = ANY($1) AND invalidated_at IS NULL
        "#,
    )
    .bind(tokens)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
