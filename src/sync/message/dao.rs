//! 消息数据访问层（DAO）

use crate::sync::chat::dao::{placeholders, UPSERT_CHUNK_SIZE};
use crate::sync::message::models::{Message, Role};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::debug;

const MESSAGE_COLUMNS: &str =
    "m.id, m.chat_id, m.content, m.image_url, m.role, m.prompt, m.created_at, m.is_synced";

fn row_to_message(row: &SqliteRow) -> sqlx::Result<Message> {
    let role = Role::from(row.try_get::<String, _>("role")?);
    let is_synced: i64 = row.try_get("is_synced")?;

    Ok(Message {
        message_id: row.try_get("id")?,
        chat_id: row.try_get("chat_id")?,
        content: row.try_get("content")?,
        role,
        created_at: row.try_get("created_at")?,
        image_url: row.try_get("image_url")?,
        prompt: row.try_get("prompt")?,
        is_synced: is_synced != 0,
    })
}

fn id_list(n: usize) -> String {
    vec!["?"; n].join(",")
}

/// 消息 DAO
pub struct MessageDao;

impl MessageDao {
    /// 插入一条消息，主键冲突或会话不存在时失败
    pub async fn insert(conn: &mut SqliteConnection, message: &Message) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, chat_id, content, image_url, role, prompt, created_at, is_synced)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.message_id)
        .bind(&message.chat_id)
        .bind(&message.content)
        .bind(&message.image_url)
        .bind(message.role.as_str())
        .bind(&message.prompt)
        .bind(message.created_at)
        .bind(message.is_synced)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// 批量插入或更新；冲突时覆盖 content/role/image_url/prompt/is_synced，不修改 created_at
    ///
    /// `is_synced` 为 `Some` 时统一覆盖每条消息自身的同步标记。
    pub async fn upsert_many(
        conn: &mut SqliteConnection,
        messages: &[Message],
        is_synced: Option<bool>,
    ) -> sqlx::Result<u64> {
        let mut affected = 0;
        for chunk in messages.chunks(UPSERT_CHUNK_SIZE) {
            let sql = format!(
                r#"
                INSERT INTO messages (id, chat_id, content, image_url, role, prompt, created_at, is_synced)
                VALUES {}
                ON CONFLICT (id) DO UPDATE SET
                    content = excluded.content,
                    role = excluded.role,
                    image_url = excluded.image_url,
                    prompt = excluded.prompt,
                    is_synced = excluded.is_synced
                "#,
                placeholders(8, chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for message in chunk {
                query = query
                    .bind(&message.message_id)
                    .bind(&message.chat_id)
                    .bind(&message.content)
                    .bind(&message.image_url)
                    .bind(message.role.as_str())
                    .bind(&message.prompt)
                    .bind(message.created_at)
                    .bind(is_synced.unwrap_or(message.is_synced));
            }
            affected += query.execute(&mut *conn).await?.rows_affected();
        }
        debug!("[MsgDAO] 批量写入消息 {} 条", messages.len());
        Ok(affected)
    }

    /// 会话内的全部消息，按消息 ID 升序
    pub async fn list_by_chat(
        conn: &mut SqliteConnection,
        chat_id: &str,
    ) -> sqlx::Result<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages m WHERE m.chat_id = ? ORDER BY m.id ASC",
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(chat_id).fetch_all(&mut *conn).await?;
        rows.iter().map(row_to_message).collect()
    }

    /// 用户所有会话中未同步的消息，最新的在前，最多 `limit` 条
    pub async fn list_unsynced_by_user(
        conn: &mut SqliteConnection,
        user_id: &str,
        limit: i64,
    ) -> sqlx::Result<Vec<Message>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM messages m
            JOIN chats c ON c.id = m.chat_id
            WHERE c.user_id = ? AND m.is_synced = 0
            ORDER BY m.created_at DESC, m.id DESC
            LIMIT ?
            "#,
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(limit)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(row_to_message).collect()
    }

    pub async fn count_unsynced_by_user(
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> sqlx::Result<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM messages m
            JOIN chats c ON c.id = m.chat_id
            WHERE c.user_id = ? AND m.is_synced = 0
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await
    }

    /// 批量设置同步标记
    pub async fn set_synced(
        conn: &mut SqliteConnection,
        message_ids: &[String],
        is_synced: bool,
    ) -> sqlx::Result<u64> {
        let mut affected = 0;
        for chunk in message_ids.chunks(UPSERT_CHUNK_SIZE) {
            let sql = format!(
                "UPDATE messages SET is_synced = ? WHERE id IN ({})",
                id_list(chunk.len())
            );
            let mut query = sqlx::query(&sql).bind(is_synced);
            for id in chunk {
                query = query.bind(id);
            }
            affected += query.execute(&mut *conn).await?.rows_affected();
        }
        Ok(affected)
    }

    pub async fn clear(conn: &mut SqliteConnection) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM messages").execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }
}
