//! 会话数据访问层（DAO）
//!
//! 所有方法都接收一个 `SqliteConnection`，既可以直接用连接池里的连接，
//! 也可以在事务里组合多个操作（见 [`crate::sync::cache::CacheStore`]）。

use crate::sync::chat::models::{Chat, ChatSummary, TimestampedTable};
use crate::sync::pagination::PageRequest;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::debug;

/// 单条批量语句最多包含的行数（SQLite 绑定参数上限为 32766）
pub(crate) const UPSERT_CHUNK_SIZE: usize = 500;

const CHAT_COLUMNS: &str = "c.id, c.user_id, c.title, c.created_at, c.updated_at, c.deleted_at";

/// 生成 `(?,?,...)` 形式的占位符组
pub(crate) fn placeholders(columns: usize, rows: usize) -> String {
    let group = format!("({})", vec!["?"; columns].join(","));
    vec![group; rows].join(",")
}

fn row_to_chat(row: &SqliteRow) -> sqlx::Result<Chat> {
    Ok(Chat {
        chat_id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

/// 用户会话列表的过滤条件（不含分页）
fn user_filter(exclude_deleted: bool) -> &'static str {
    if exclude_deleted {
        "c.user_id = ? AND c.updated_at > ? AND c.deleted_at IS NULL"
    } else {
        "c.user_id = ? AND c.updated_at > ?"
    }
}

/// 会话 DAO
pub struct ChatDao;

impl ChatDao {
    /// 插入一条会话，主键冲突时失败
    pub async fn insert(conn: &mut SqliteConnection, chat: &Chat) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chats (id, user_id, title, created_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chat.chat_id)
        .bind(&chat.user_id)
        .bind(&chat.title)
        .bind(chat.created_at)
        .bind(chat.updated_at)
        .bind(chat.deleted_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// 批量插入或更新；冲突时覆盖 user_id/title/updated_at/deleted_at，保留首次插入的 created_at
    pub async fn upsert_many(conn: &mut SqliteConnection, chats: &[Chat]) -> sqlx::Result<u64> {
        let mut affected = 0;
        for chunk in chats.chunks(UPSERT_CHUNK_SIZE) {
            let sql = format!(
                r#"
                INSERT INTO chats (id, user_id, title, created_at, updated_at, deleted_at)
                VALUES {}
                ON CONFLICT (id) DO UPDATE SET
                    user_id = excluded.user_id,
                    title = excluded.title,
                    updated_at = excluded.updated_at,
                    deleted_at = excluded.deleted_at
                "#,
                placeholders(6, chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for chat in chunk {
                query = query
                    .bind(&chat.chat_id)
                    .bind(&chat.user_id)
                    .bind(&chat.title)
                    .bind(chat.created_at)
                    .bind(chat.updated_at)
                    .bind(chat.deleted_at);
            }
            affected += query.execute(&mut *conn).await?.rows_affected();
        }
        debug!("[ChatDAO] 批量写入会话 {} 条", chats.len());
        Ok(affected)
    }

    /// 按用户分页查询 `updated_at > updated_after` 的会话，按最近消息时间、会话 ID 倒序
    pub async fn list_by_user(
        conn: &mut SqliteConnection,
        user_id: &str,
        updated_after: i64,
        page: PageRequest,
        exclude_deleted: bool,
    ) -> sqlx::Result<Vec<Chat>> {
        let sql = format!(
            r#"
            SELECT {columns},
                (SELECT MAX(m.created_at) FROM messages m WHERE m.chat_id = c.id) AS last_activity
            FROM chats c
            WHERE {filter}
            ORDER BY last_activity DESC, c.id DESC
            LIMIT ? OFFSET ?
            "#,
            columns = CHAT_COLUMNS,
            filter = user_filter(exclude_deleted)
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(updated_after)
            .bind(page.limit)
            .bind(page.offset())
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(row_to_chat).collect()
    }

    /// 按会话 ID 升序做 keyset 分页，返回 `updated_at > updated_after` 且 ID 大于 `after_id` 的会话（含软删除）
    pub async fn list_changed_after(
        conn: &mut SqliteConnection,
        user_id: &str,
        updated_after: i64,
        after_id: Option<&str>,
        limit: i64,
    ) -> sqlx::Result<Vec<Chat>> {
        let sql = format!(
            r#"
            SELECT {columns}
            FROM chats c
            WHERE {filter} AND (? IS NULL OR c.id > ?)
            ORDER BY c.id ASC
            LIMIT ?
            "#,
            columns = CHAT_COLUMNS,
            filter = user_filter(false)
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(updated_after)
            .bind(after_id)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(row_to_chat).collect()
    }

    /// 与 [`Self::list_by_user`] 相同过滤条件下的总数
    pub async fn count_by_user(
        conn: &mut SqliteConnection,
        user_id: &str,
        updated_after: i64,
        exclude_deleted: bool,
    ) -> sqlx::Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM chats c WHERE {}",
            user_filter(exclude_deleted)
        );
        sqlx::query_scalar::<_, i64>(&sql)
            .bind(user_id)
            .bind(updated_after)
            .fetch_one(&mut *conn)
            .await
    }

    /// 按主键批量查询
    pub async fn get_by_ids(
        conn: &mut SqliteConnection,
        chat_ids: &[String],
    ) -> sqlx::Result<Vec<Chat>> {
        let mut chats = Vec::with_capacity(chat_ids.len());
        for chunk in chat_ids.chunks(UPSERT_CHUNK_SIZE) {
            let sql = format!(
                "SELECT {} FROM chats c WHERE c.id IN ({})",
                CHAT_COLUMNS,
                vec!["?"; chunk.len()].join(",")
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            for row in query.fetch_all(&mut *conn).await? {
                chats.push(row_to_chat(&row)?);
            }
        }
        Ok(chats)
    }

    /// 全部会话，附带消息数和最近活跃时间
    pub async fn list_summaries(conn: &mut SqliteConnection) -> sqlx::Result<Vec<ChatSummary>> {
        let sql = format!(
            r#"
            SELECT {columns},
                (SELECT COUNT(*) FROM messages m WHERE m.chat_id = c.id) AS message_count,
                (SELECT MAX(m.created_at) FROM messages m WHERE m.chat_id = c.id) AS last_activity
            FROM chats c
            ORDER BY last_activity DESC, c.id DESC
            "#,
            columns = CHAT_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
        rows.iter()
            .map(|row| {
                Ok(ChatSummary {
                    chat: row_to_chat(row)?,
                    message_count: row.try_get("message_count")?,
                    last_activity: row.try_get("last_activity")?,
                })
            })
            .collect()
    }

    /// 物理删除会话（消息随外键级联删除）
    pub async fn delete(conn: &mut SqliteConnection, chat_id: &str) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM chats WHERE id = ?")
            .bind(chat_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// 软删除：设置 deleted_at，并把 updated_at 推进到 `now`（不会回退）
    pub async fn mark_deleted(
        conn: &mut SqliteConnection,
        chat_id: &str,
        now: i64,
    ) -> sqlx::Result<u64> {
        let result = sqlx::query(
            "UPDATE chats SET deleted_at = ?, updated_at = MAX(updated_at, ?) WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(chat_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn rename(conn: &mut SqliteConnection, chat_id: &str, title: &str) -> sqlx::Result<u64> {
        let result = sqlx::query("UPDATE chats SET title = ? WHERE id = ?")
            .bind(title)
            .bind(chat_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// 把某张表中一行的 updated_at 推进到 `now`（不会回退）
    pub async fn touch(
        conn: &mut SqliteConnection,
        table: TimestampedTable,
        id: &str,
        now: i64,
    ) -> sqlx::Result<u64> {
        let sql = format!(
            "UPDATE {} SET updated_at = MAX(updated_at, ?) WHERE id = ?",
            table.table_name()
        );
        let result = sqlx::query(&sql)
            .bind(now)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// 物理清除 `updated_at < before` 的已软删除会话
    pub async fn purge_deleted(conn: &mut SqliteConnection, before: i64) -> sqlx::Result<u64> {
        let result =
            sqlx::query("DELETE FROM chats WHERE deleted_at IS NOT NULL AND updated_at < ?")
                .bind(before)
                .execute(&mut *conn)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn clear(conn: &mut SqliteConnection) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM chats").execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_groups() {
        assert_eq!(placeholders(2, 3), "(?,?),(?,?),(?,?)");
        assert_eq!(placeholders(1, 1), "(?)");
    }
}
