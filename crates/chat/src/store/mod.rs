// Message store: identity lookup plus the durable write path.
//
// One valid inbound frame becomes exactly one message row and one
// notification row for the receiver. On Postgres both inserts run in a
// single transaction; the memory backend applies them under one write lock.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;

use innosphere_common::{
    protocol::ws::ValidFrame,
    types::{MessageId, UserId, UserRole},
};

/// Notification descriptions are clipped to this many characters.
const NOTIFICATION_PREVIEW_CHARS: usize = 50;

/// A resolved platform user, as the chat relay sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatUser {
    pub id: UserId,
    pub email: String,
    pub role: UserRole,
    /// Role-dependent: company name for startups, firm name for investors,
    /// fallback to the local part of the email.
    pub display_name: String,
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub attachment_url: Option<String>,
    pub attachment_type: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A persisted notification row, owned by the receiving user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredNotification {
    pub id: i64,
    pub user_id: UserId,
    pub kind: String,
    pub title: String,
    pub description: String,
    pub related_id: MessageId,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("receiver {0} does not exist")]
    UnknownReceiver(UserId),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Clone)]
pub enum ChatStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryChatStore>>),
}

#[derive(Debug, Default)]
pub struct MemoryChatStore {
    users: HashMap<UserId, ChatUser>,
    messages: Vec<StoredMessage>,
    notifications: Vec<StoredNotification>,
    next_user_id: UserId,
    next_message_id: MessageId,
    next_notification_id: i64,
}

impl ChatStore {
    /// In-process backend for development without a database, and for tests.
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryChatStore::default())))
    }

    /// Resolve the verified token subject to a user row, with the
    /// role-dependent display name already computed.
    pub async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<ChatUser>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, UserLookupRow>(
                    r#"
                    SELECT u.id, u.email, u.role, sp.company_name, ip.firm_name
                    FROM users AS u
                    LEFT JOIN startup_profiles AS sp ON sp.user_id = u.id
                    LEFT JOIN investor_profiles AS ip ON ip.user_id = u.id
                    WHERE u.email = $1
                    "#,
                )
                .bind(email)
                .fetch_optional(pool)
                .await
                .map_err(|error| anyhow::anyhow!("failed to look up user by email: {error}"))?;

                row.map(|row| {
                    let role = UserRole::from_db_value(&row.role).ok_or_else(|| {
                        anyhow::anyhow!("invalid user role '{}' in database", row.role)
                    })?;
                    let display_name =
                        resolve_display_name(role, row.company_name, row.firm_name, &row.email);
                    Ok(ChatUser { id: row.id, email: row.email, role, display_name })
                })
                .transpose()
            }
            Self::Memory(store) => {
                let store = store.read().await;
                Ok(store.users.values().find(|user| user.email == email).cloned())
            }
        }
    }

    /// Durably create one message row and one notification row for the
    /// receiver. The two writes share a transaction on Postgres so the
    /// message/notification invariant cannot be half-applied.
    pub async fn persist_message(
        &self,
        sender: &ChatUser,
        frame: &ValidFrame,
    ) -> Result<StoredMessage, StoreError> {
        let title = notification_title(&sender.display_name);
        let description = notification_preview(&frame.content);

        match self {
            Self::Postgres(pool) => {
                let mut tx = pool.begin().await?;

                let receiver_exists = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)",
                )
                .bind(frame.receiver_id)
                .fetch_one(&mut *tx)
                .await?;
                if !receiver_exists {
                    return Err(StoreError::UnknownReceiver(frame.receiver_id));
                }

                let (attachment_url, attachment_type) = match &frame.attachment {
                    Some(attachment) => {
                        (Some(attachment.url.clone()), attachment.content_type.clone())
                    }
                    None => (None, None),
                };

                let inserted = sqlx::query_as::<_, InsertedMessageRow>(
                    r#"
                    INSERT INTO messages (sender_id, receiver_id, content, attachment_url, attachment_type)
                    VALUES ($1, $2, $3, $4, $5)
                    RETURNING id, timestamp
                    "#,
                )
                .bind(sender.id)
                .bind(frame.receiver_id)
                .bind(&frame.content)
                .bind(&attachment_url)
                .bind(&attachment_type)
                .fetch_one(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    INSERT INTO notifications (user_id, type, title, description, related_id)
                    VALUES ($1, 'message', $2, $3, $4)
                    "#,
                )
                .bind(frame.receiver_id)
                .bind(&title)
                .bind(&description)
                .bind(inserted.id)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;

                Ok(StoredMessage {
                    id: inserted.id,
                    sender_id: sender.id,
                    receiver_id: frame.receiver_id,
                    content: frame.content.clone(),
                    attachment_url,
                    attachment_type,
                    timestamp: inserted.timestamp,
                })
            }
            Self::Memory(store) => {
                let mut store = store.write().await;

                if !store.users.contains_key(&frame.receiver_id) {
                    return Err(StoreError::UnknownReceiver(frame.receiver_id));
                }

                store.next_message_id += 1;
                let message = StoredMessage {
                    id: store.next_message_id,
                    sender_id: sender.id,
                    receiver_id: frame.receiver_id,
                    content: frame.content.clone(),
                    attachment_url: frame.attachment.as_ref().map(|a| a.url.clone()),
                    attachment_type: frame
                        .attachment
                        .as_ref()
                        .and_then(|a| a.content_type.clone()),
                    timestamp: Utc::now(),
                };
                store.messages.push(message.clone());

                store.next_notification_id += 1;
                let notification = StoredNotification {
                    id: store.next_notification_id,
                    user_id: frame.receiver_id,
                    kind: "message".to_string(),
                    title,
                    description,
                    related_id: message.id,
                    is_read: false,
                    created_at: message.timestamp,
                };
                store.notifications.push(notification);

                Ok(message)
            }
        }
    }

    /// Seed a user on the memory backend. Returns the stored user; no-op
    /// `None` on Postgres, where users come from the platform schema.
    pub async fn add_memory_user(
        &self,
        email: &str,
        role: UserRole,
        profile_name: Option<&str>,
    ) -> Option<ChatUser> {
        match self {
            Self::Postgres(_) => None,
            Self::Memory(store) => {
                let mut store = store.write().await;
                store.next_user_id += 1;
                let display_name = match profile_name {
                    Some(name) => name.to_string(),
                    None => email_local_part(email).to_string(),
                };
                let user = ChatUser {
                    id: store.next_user_id,
                    email: email.to_string(),
                    role,
                    display_name,
                };
                store.users.insert(user.id, user.clone());
                Some(user)
            }
        }
    }

    /// All messages held by the memory backend, in insertion order. Empty on
    /// Postgres; history reads live in the platform's REST API, not here.
    pub async fn memory_messages(&self) -> Vec<StoredMessage> {
        match self {
            Self::Postgres(_) => Vec::new(),
            Self::Memory(store) => store.read().await.messages.clone(),
        }
    }

    /// Notifications owned by `user_id` on the memory backend.
    pub async fn memory_notifications_for(&self, user_id: UserId) -> Vec<StoredNotification> {
        match self {
            Self::Postgres(_) => Vec::new(),
            Self::Memory(store) => store
                .read()
                .await
                .notifications
                .iter()
                .filter(|notification| notification.user_id == user_id)
                .cloned()
                .collect(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserLookupRow {
    id: i64,
    email: String,
    role: String,
    company_name: Option<String>,
    firm_name: Option<String>,
}

#[derive(sqlx::FromRow)]
struct InsertedMessageRow {
    id: i64,
    timestamp: DateTime<Utc>,
}

fn resolve_display_name(
    role: UserRole,
    company_name: Option<String>,
    firm_name: Option<String>,
    email: &str,
) -> String {
    let profile_name = match role {
        UserRole::Startup => company_name,
        UserRole::Investor => firm_name,
    };
    profile_name
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| email_local_part(email).to_string())
}

fn email_local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

fn notification_title(sender_name: &str) -> String {
    format!("New message from {sender_name}")
}

/// Clip `content` to at most [`NOTIFICATION_PREVIEW_CHARS`] characters,
/// ellipsizing on overflow. Operates on characters, not bytes, so multibyte
/// content cannot split a code point.
fn notification_preview(content: &str) -> String {
    if content.chars().count() <= NOTIFICATION_PREVIEW_CHARS {
        return content.to_string();
    }

    let clipped: String = content.chars().take(NOTIFICATION_PREVIEW_CHARS - 3).collect();
    format!("{clipped}...")
}

#[cfg(test)]
mod tests {
    use super::{
        notification_preview, notification_title, resolve_display_name, ChatStore, StoreError,
    };
    use innosphere_common::{
        protocol::ws::{Attachment, ValidFrame},
        types::UserRole,
    };

    fn frame(receiver_id: i64, content: &str) -> ValidFrame {
        ValidFrame {
            receiver_id,
            content: content.to_string(),
            attachment: None,
            temp_id: None,
        }
    }

    #[tokio::test]
    async fn persist_creates_message_and_linked_notification() {
        let store = ChatStore::memory();
        let sender = store
            .add_memory_user("founder@acme.dev", UserRole::Startup, Some("Acme"))
            .await
            .expect("memory store seeds users");
        let receiver = store
            .add_memory_user("partner@fund.vc", UserRole::Investor, Some("Fund VC"))
            .await
            .expect("memory store seeds users");

        let message = store
            .persist_message(&sender, &frame(receiver.id, "hello"))
            .await
            .expect("persist should succeed");

        let messages = store.memory_messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender_id, sender.id);
        assert_eq!(messages[0].receiver_id, receiver.id);
        assert_eq!(messages[0].content, "hello");

        let notifications = store.memory_notifications_for(receiver.id).await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].related_id, message.id);
        assert_eq!(notifications[0].kind, "message");
        assert_eq!(notifications[0].title, "New message from Acme");
        assert!(!notifications[0].is_read);
    }

    #[tokio::test]
    async fn persist_to_unknown_receiver_fails() {
        let store = ChatStore::memory();
        let sender = store
            .add_memory_user("founder@acme.dev", UserRole::Startup, Some("Acme"))
            .await
            .expect("memory store seeds users");

        let error = store
            .persist_message(&sender, &frame(999, "hello"))
            .await
            .expect_err("unknown receiver must fail");
        assert!(matches!(error, StoreError::UnknownReceiver(999)));
        assert!(store.memory_messages().await.is_empty());
    }

    #[tokio::test]
    async fn persist_keeps_attachment_columns() {
        let store = ChatStore::memory();
        let sender = store
            .add_memory_user("founder@acme.dev", UserRole::Startup, Some("Acme"))
            .await
            .expect("memory store seeds users");
        let receiver = store
            .add_memory_user("partner@fund.vc", UserRole::Investor, Some("Fund VC"))
            .await
            .expect("memory store seeds users");

        let valid = ValidFrame {
            receiver_id: receiver.id,
            content: String::new(),
            attachment: Some(Attachment {
                url: "https://cdn/x.pdf".to_string(),
                content_type: Some("application/pdf".to_string()),
            }),
            temp_id: None,
        };
        let message =
            store.persist_message(&sender, &valid).await.expect("persist should succeed");
        assert_eq!(message.attachment_url.as_deref(), Some("https://cdn/x.pdf"));
        assert_eq!(message.attachment_type.as_deref(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn find_user_by_email_resolves_seeded_user() {
        let store = ChatStore::memory();
        store.add_memory_user("founder@acme.dev", UserRole::Startup, Some("Acme")).await;

        let user = store
            .find_user_by_email("founder@acme.dev")
            .await
            .expect("lookup should not error")
            .expect("seeded user should resolve");
        assert_eq!(user.display_name, "Acme");
        assert_eq!(user.role, UserRole::Startup);

        let missing = store.find_user_by_email("ghost@nowhere.dev").await.expect("no error");
        assert!(missing.is_none());
    }

    #[test]
    fn display_name_prefers_profile_name_by_role() {
        assert_eq!(
            resolve_display_name(
                UserRole::Startup,
                Some("Acme".into()),
                Some("Fund".into()),
                "founder@acme.dev"
            ),
            "Acme"
        );
        assert_eq!(
            resolve_display_name(
                UserRole::Investor,
                Some("Acme".into()),
                Some("Fund".into()),
                "partner@fund.vc"
            ),
            "Fund"
        );
        assert_eq!(
            resolve_display_name(UserRole::Startup, None, None, "founder@acme.dev"),
            "founder"
        );
        assert_eq!(
            resolve_display_name(UserRole::Investor, Some("".into()), Some("".into()), "p@f.vc"),
            "p"
        );
    }

    #[test]
    fn notification_preview_clips_at_fifty_chars() {
        let short = "short message";
        assert_eq!(notification_preview(short), short);

        let exactly_fifty = "a".repeat(50);
        assert_eq!(notification_preview(&exactly_fifty), exactly_fifty);

        let long = "b".repeat(51);
        let preview = notification_preview(&long);
        assert_eq!(preview.chars().count(), 50);
        assert!(preview.ends_with("..."));
        assert!(preview.starts_with(&"b".repeat(47)));
    }

    #[test]
    fn notification_preview_respects_char_boundaries() {
        let long = "é".repeat(60);
        let preview = notification_preview(&long);
        assert_eq!(preview.chars().count(), 50);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn notification_title_format() {
        assert_eq!(notification_title("Acme"), "New message from Acme");
    }
}
