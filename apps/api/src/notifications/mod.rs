//! In-app notifications. Each one is persisted, optionally queued for email, and pushed
//! to the user's live sockets. The push does not wait for delivery.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::notification::NotificationRow;
use crate::realtime::events::ServerEvent;
use crate::realtime::fanout::{Envelope, Fanout};

pub mod handlers;

#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: &'static str,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    /// Also write an `email_outbox` row for the user's address.
    pub email: bool,
}

impl Notice {
    pub fn new(kind: &'static str, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: body.into(),
            link: None,
            email: false,
        }
    }

    pub fn link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_email(mut self) -> Self {
        self.email = true;
        self
    }
}

#[derive(Clone)]
pub struct Notifier {
    db: PgPool,
    fanout: Arc<dyn Fanout>,
}

impl Notifier {
    pub fn new(db: PgPool, fanout: Arc<dyn Fanout>) -> Self {
        Self { db, fanout }
    }

    pub async fn notify(&self, user_id: Uuid, notice: Notice) -> Result<NotificationRow, AppError> {
        let row: NotificationRow = sqlx::query_as(
            r#"
            INSERT INTO notifications (user_id, kind, title, body, link)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(notice.kind)
        .bind(&notice.title)
        .bind(&notice.body)
        .bind(&notice.link)
        .fetch_one(&self.db)
        .await?;

        if notice.email {
            sqlx::query(
                r#"
                INSERT INTO email_outbox (to_email, subject, body)
                SELECT email, $2, $3 FROM users WHERE id = $1
                "#,
            )
            .bind(user_id)
            .bind(&notice.title)
            .bind(&notice.body)
            .execute(&self.db)
            .await?;
        }

        self.push(
            user_id,
            ServerEvent::Notification {
                id: row.id,
                kind: row.kind.clone(),
                title: row.title.clone(),
                body: row.body.clone(),
                link: row.link.clone(),
            },
        );
        Ok(row)
    }

    /// For notifications that follow a completed write: a failure is logged, not returned.
    pub async fn notify_or_log(&self, user_id: Uuid, notice: Notice) {
        let kind = notice.kind;
        if let Err(e) = self.notify(user_id, notice).await {
            warn!(user_id = %user_id, kind, "Failed to record notification: {e}");
        }
    }

    /// Socket-only event, nothing persisted.
    pub fn push(&self, user_id: Uuid, event: ServerEvent) {
        let fanout = self.fanout.clone();
        tokio::spawn(async move {
            fanout.publish(Envelope::to_user(user_id, event)).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_builder() {
        let notice = Notice::new("application_status", "Shortlisted", "You were shortlisted")
            .link("/applications/1")
            .with_email();
        assert_eq!(notice.kind, "application_status");
        assert_eq!(notice.link.as_deref(), Some("/applications/1"));
        assert!(notice.email);
        assert!(!Notice::new("k", "t", "b").email);
    }
}
