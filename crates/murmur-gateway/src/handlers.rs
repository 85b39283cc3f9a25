use chrono::Utc;
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{info, warn};
use uuid::Uuid;

use murmur_types::api::Claims;
use murmur_types::events::{ChatMessage, ClientEvent, HistoryMessage, ServerEvent, TypingBubble};
use murmur_types::models::{ChatType, Message, MessageKind};

use crate::dispatcher::Dispatcher;
use crate::error::HandlerError;
use crate::registry::{PresenceEntry, UNKNOWN_USERNAME};
use crate::typing::TypingTarget;

/// Name the sender sees on the echo of their own private message.
const ECHO_SENDER: &str = "You";

impl Dispatcher {
    /// Route one inbound event from `conn_id` to its handler.
    pub async fn handle(&self, conn_id: Uuid, event: ClientEvent) -> Result<(), HandlerError> {
        match event {
            ClientEvent::Authenticate {
                user_id,
                username,
                token,
            } => self.authenticate(conn_id, user_id, username, token).await,
            ClientEvent::LoadPrivateHistory {
                user_id,
                other_user_id,
            } => self.load_private_history(conn_id, user_id, other_user_id).await,
            ClientEvent::LoadGroupHistory { group_name } => {
                self.load_group_history(conn_id, group_name).await
            }
            ClientEvent::MarkPrivateRead {
                user_id,
                other_user_id,
            } => self.mark_private_read(conn_id, user_id, other_user_id).await,
            ClientEvent::MarkGroupRead {
                user_id,
                group_name,
            } => self.mark_group_read(conn_id, user_id, group_name).await,
            ClientEvent::SendPrivateMessage {
                to_socket_id,
                to_user_id,
                message,
            } => {
                self.send_private_message(conn_id, to_socket_id, to_user_id, message)
                    .await
            }
            ClientEvent::CreateGroup(group_name) => self.create_group(conn_id, group_name).await,
            ClientEvent::JoinGroup(group_name) => self.join_group(conn_id, group_name).await,
            ClientEvent::TypingStart {
                target_id,
                chat_type,
            } => self.typing_start(conn_id, &target_id, chat_type).await,
            ClientEvent::TypingStop {
                target_id,
                chat_type,
            } => self.typing_stop(conn_id, &target_id, chat_type).await,
            ClientEvent::SendGroupMessage {
                group_name,
                message,
            } => self.send_group_message(conn_id, group_name, message).await,
        }
    }

    async fn presence_of(&self, conn_id: Uuid) -> Option<PresenceEntry> {
        self.inner.registry.read().await.presence.get(conn_id).cloned()
    }

    async fn require_presence(&self, conn_id: Uuid) -> Result<PresenceEntry, HandlerError> {
        self.presence_of(conn_id)
            .await
            .ok_or(HandlerError::NotAuthenticated)
    }

    async fn find_connection(&self, user_id: Uuid) -> Option<Uuid> {
        self.inner
            .registry
            .read()
            .await
            .presence
            .find_by_user_id(user_id)
    }

    // -- Presence --

    pub async fn authenticate(
        &self,
        conn_id: Uuid,
        user_id: Uuid,
        username: String,
        token: Option<String>,
    ) -> Result<(), HandlerError> {
        if let Some(secret) = &self.inner.config.token_secret {
            verify_identity(secret, token.as_deref(), user_id, &username)?;
        }

        self.inner
            .registry
            .write()
            .await
            .presence
            .register(conn_id, user_id, username.clone());
        info!("{} ({}) authenticated on connection {}", username, user_id, conn_id);

        self.broadcast_user_list().await;

        let counts = self.unread_counts(user_id).await;
        self.send_to(conn_id, ServerEvent::UnreadCounts(counts)).await;
        Ok(())
    }

    /// Tear down everything a closed connection owned.
    pub async fn disconnect(&self, conn_id: Uuid) {
        let (entry, groups_left) = {
            let mut registry = self.inner.registry.write().await;
            let entry = registry.presence.unregister(conn_id);
            let left = registry.groups.remove_member_everywhere(conn_id);
            (entry, left)
        };
        self.close_queue(conn_id).await;

        let dangling = self.inner.typing.lock().await.clear_connection(conn_id);
        for (target, bubble) in dangling {
            self.deliver_typing(conn_id, &target, ServerEvent::HideTypingBubble(bubble))
                .await;
        }

        match entry {
            Some(entry) => info!(
                "{} ({}) disconnected from {}, left {} groups",
                entry.username, entry.user_id, conn_id, groups_left
            ),
            None => info!("Unauthenticated connection {} closed", conn_id),
        }

        self.broadcast_user_list().await;
        self.broadcast_group_list().await;
    }

    // -- History --

    pub async fn load_private_history(
        &self,
        conn_id: Uuid,
        user_id: Uuid,
        other_user_id: Uuid,
    ) -> Result<(), HandlerError> {
        let limit = self.inner.config.history_limit;
        let messages = self
            .with_db(move |db| db.get_private_history(user_id, other_user_id, limit))
            .await?;

        self.send_to(
            conn_id,
            ServerEvent::PrivateHistory {
                other_user_id,
                messages: messages.into_iter().map(to_history).collect(),
            },
        )
        .await;
        Ok(())
    }

    pub async fn load_group_history(
        &self,
        conn_id: Uuid,
        group_name: String,
    ) -> Result<(), HandlerError> {
        let limit = self.inner.config.history_limit;
        let name = group_name.clone();
        let messages = self
            .with_db(move |db| db.get_group_history(&name, limit))
            .await?;

        self.send_to(
            conn_id,
            ServerEvent::GroupHistory {
                group_name,
                messages: messages.into_iter().map(to_history).collect(),
            },
        )
        .await;
        Ok(())
    }

    // -- Read state --

    pub async fn mark_private_read(
        &self,
        conn_id: Uuid,
        user_id: Uuid,
        other_user_id: Uuid,
    ) -> Result<(), HandlerError> {
        let me = self.require_presence(conn_id).await?;

        let updated = self
            .with_db(move |db| db.mark_private_read(other_user_id, user_id, Utc::now()))
            .await?;
        info!(
            "{} marked {} messages from {} as read",
            me.username, updated, other_user_id
        );

        let counts = self.unread_counts(user_id).await;
        self.send_to(conn_id, ServerEvent::UnreadCounts(counts)).await;

        if let Some(sender_conn) = self.find_connection(other_user_id).await {
            self.send_to(
                sender_conn,
                ServerEvent::MessagesRead {
                    by_user_id: user_id,
                    by_username: me.username,
                },
            )
            .await;
        }
        Ok(())
    }

    pub async fn mark_group_read(
        &self,
        conn_id: Uuid,
        user_id: Uuid,
        group_name: String,
    ) -> Result<(), HandlerError> {
        let me = self.require_presence(conn_id).await?;

        let name = group_name.clone();
        let updated = self
            .with_db(move |db| db.mark_group_read(&name, user_id))
            .await?;
        info!(
            "{} marked {} messages in {} as read",
            me.username, updated, group_name
        );

        let counts = self.unread_counts(user_id).await;
        self.send_to(conn_id, ServerEvent::UnreadCounts(counts)).await;
        Ok(())
    }

    // -- Private messages --

    pub async fn send_private_message(
        &self,
        conn_id: Uuid,
        to_socket_id: Option<Uuid>,
        to_user_id: Uuid,
        message: String,
    ) -> Result<(), HandlerError> {
        let (from, target_conn, to_data) = {
            let registry = self.inner.registry.read().await;
            let from = registry
                .presence
                .get(conn_id)
                .cloned()
                .ok_or(HandlerError::NotAuthenticated)?;
            let target_conn =
                to_socket_id.or_else(|| registry.presence.find_by_user_id(to_user_id));
            let to_data = target_conn.and_then(|c| registry.presence.get(c).cloned());
            (from, target_conn, to_data)
        };

        let receiver_username = match &to_data {
            Some(to) => to.username.clone(),
            None => self.lookup_username(to_user_id).await,
        };
        info!(
            "Private message {} -> {} ({} chars)",
            from.username,
            receiver_username,
            message.chars().count()
        );

        let stored = Message {
            id: Uuid::new_v4(),
            sender: from.user_id,
            sender_username: from.username.clone(),
            message,
            timestamp: Utc::now(),
            kind: MessageKind::Private {
                receiver: to_user_id,
                receiver_username,
                is_read: false,
                read_at: None,
            },
        };
        let timestamp = stored.timestamp;
        let text = stored.message.clone();
        self.with_db(move |db| db.insert_message(&stored)).await?;

        let delivered = ChatMessage {
            message: text,
            from: from.username.clone(),
            from_socket_id: conn_id,
            from_user_id: from.user_id,
            to_user_id: Some(to_user_id),
            to_socket_id: None,
            group_name: None,
            chat_type: ChatType::Private,
            timestamp,
        };

        if let Some(target) = target_conn {
            self.send_to(target, ServerEvent::ReceiveMessage(delivered.clone()))
                .await;
        }

        let echo = ChatMessage {
            from: ECHO_SENDER.to_string(),
            to_socket_id: target_conn,
            ..delivered
        };
        self.send_to(conn_id, ServerEvent::ReceiveMessage(echo)).await;

        if let (Some(target), Some(_)) = (target_conn, to_data) {
            let counts = self.unread_counts(to_user_id).await;
            self.send_to(target, ServerEvent::UnreadCounts(counts)).await;
        }
        Ok(())
    }

    /// Username of an offline user, for the stored `receiverUsername`.
    async fn lookup_username(&self, user_id: Uuid) -> String {
        let id = user_id.to_string();
        match self.with_db(move |db| db.get_username_by_id(&id)).await {
            Ok(Some(name)) => name,
            Ok(None) => UNKNOWN_USERNAME.to_string(),
            Err(e) => {
                warn!("Looking up username for {}: {}", user_id, e);
                UNKNOWN_USERNAME.to_string()
            }
        }
    }

    // -- Groups --

    /// Create `group_name` if absent and join it. Blank or whitespace-only
    /// names are rejected with [`HandlerError::InvalidTarget`].
    pub async fn create_group(
        &self,
        conn_id: Uuid,
        group_name: String,
    ) -> Result<(), HandlerError> {
        let group_name = validate_group_name(group_name)?;
        let (created, username) = self.enter_group(conn_id, &group_name).await;
        if created {
            info!("Group created: {}", group_name);
        }
        info!("{} joined {}", username, group_name);

        self.broadcast_group_list().await;
        Ok(())
    }

    /// Same as [`Dispatcher::create_group`], plus `joined_group` to the caller.
    pub async fn join_group(&self, conn_id: Uuid, group_name: String) -> Result<(), HandlerError> {
        let group_name = validate_group_name(group_name)?;
        let (_, username) = self.enter_group(conn_id, &group_name).await;
        info!("{} joined {}", username, group_name);

        self.broadcast_group_list().await;
        self.send_to(conn_id, ServerEvent::JoinedGroup { group_name })
            .await;
        Ok(())
    }

    /// Create the group if needed and add the connection to it.
    /// Returns (created, display name of the joiner).
    async fn enter_group(&self, conn_id: Uuid, group_name: &str) -> (bool, String) {
        let mut registry = self.inner.registry.write().await;
        let created = registry.groups.create_or_get(group_name);
        registry.groups.add_member(group_name, conn_id);
        let username = registry
            .presence
            .get(conn_id)
            .map(|p| p.username.clone())
            .unwrap_or_else(|| conn_id.to_string());
        (created, username)
    }

    pub async fn send_group_message(
        &self,
        conn_id: Uuid,
        group_name: String,
        message: String,
    ) -> Result<(), HandlerError> {
        let from = self.require_presence(conn_id).await?;
        info!(
            "Group message {} in {} ({} chars)",
            from.username,
            group_name,
            message.chars().count()
        );

        let stored = Message {
            id: Uuid::new_v4(),
            sender: from.user_id,
            sender_username: from.username.clone(),
            message,
            timestamp: Utc::now(),
            kind: MessageKind::Group {
                group_name: group_name.clone(),
                read_by: Vec::new(),
            },
        };
        let timestamp = stored.timestamp;
        let text = stored.message.clone();
        self.with_db(move |db| db.insert_message(&stored)).await?;

        // Snapshot membership after the write so late joiners are included.
        let recipients: Vec<(Uuid, Option<Uuid>)> = {
            let registry = self.inner.registry.read().await;
            registry
                .groups
                .members(&group_name)
                .into_iter()
                .map(|member| (member, registry.presence.get(member).map(|p| p.user_id)))
                .collect()
        };

        let member_conns: Vec<Uuid> = recipients.iter().map(|(conn, _)| *conn).collect();
        self.send_to_many(
            &member_conns,
            ServerEvent::ReceiveMessage(ChatMessage {
                message: text,
                from: from.username.clone(),
                from_socket_id: conn_id,
                from_user_id: from.user_id,
                to_user_id: None,
                to_socket_id: None,
                group_name: Some(group_name),
                chat_type: ChatType::Group,
                timestamp,
            }),
        )
        .await;

        for (member_conn, member_user) in recipients {
            match member_user {
                Some(user_id) if user_id != from.user_id => {
                    let counts = self.unread_counts(user_id).await;
                    self.send_to(member_conn, ServerEvent::UnreadCounts(counts))
                        .await;
                }
                _ => {}
            }
        }
        Ok(())
    }

    // -- Typing --

    pub async fn typing_start(
        &self,
        conn_id: Uuid,
        target_id: &str,
        chat_type: ChatType,
    ) -> Result<(), HandlerError> {
        let me = self.require_presence(conn_id).await?;
        let target = TypingTarget::parse(target_id, chat_type)
            .ok_or_else(|| HandlerError::InvalidTarget(target_id.to_string()))?;

        let bubble = TypingBubble {
            from_username: me.username,
            from_user_id: me.user_id,
        };
        let start = self
            .inner
            .typing
            .lock()
            .await
            .start(conn_id, target.clone(), bubble.clone());

        if start.newly_shown {
            self.deliver_typing(conn_id, &target, ServerEvent::ShowTypingBubble(bubble))
                .await;
        }

        let dispatcher = self.clone();
        let idle = self.inner.config.typing_idle;
        tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            dispatcher
                .expire_typing(conn_id, target, start.generation)
                .await;
        });
        Ok(())
    }

    pub async fn typing_stop(
        &self,
        conn_id: Uuid,
        target_id: &str,
        chat_type: ChatType,
    ) -> Result<(), HandlerError> {
        self.require_presence(conn_id).await?;
        let target = TypingTarget::parse(target_id, chat_type)
            .ok_or_else(|| HandlerError::InvalidTarget(target_id.to_string()))?;

        let stopped = self.inner.typing.lock().await.stop(conn_id, &target);
        if let Some(bubble) = stopped {
            self.deliver_typing(conn_id, &target, ServerEvent::HideTypingBubble(bubble))
                .await;
        }
        Ok(())
    }

    async fn expire_typing(&self, conn_id: Uuid, target: TypingTarget, generation: u64) {
        let expired = self
            .inner
            .typing
            .lock()
            .await
            .expire(conn_id, &target, generation);
        if let Some(bubble) = expired {
            self.deliver_typing(conn_id, &target, ServerEvent::HideTypingBubble(bubble))
                .await;
        }
    }

    /// Send a typing event to everyone `target` covers, never the typist.
    async fn deliver_typing(&self, conn_id: Uuid, target: &TypingTarget, event: ServerEvent) {
        let recipients: Vec<Uuid> = {
            let registry = self.inner.registry.read().await;
            match target {
                TypingTarget::User(user_id) => registry
                    .presence
                    .find_by_user_id(*user_id)
                    .into_iter()
                    .collect(),
                TypingTarget::Group(name) => registry.groups.members(name),
            }
        };

        let recipients: Vec<Uuid> = recipients.into_iter().filter(|c| *c != conn_id).collect();
        self.send_to_many(&recipients, event).await;
    }
}

fn to_history(msg: Message) -> HistoryMessage {
    let chat_type = msg.chat_type();
    let (to_user_id, group_name) = match msg.kind {
        MessageKind::Private { receiver, .. } => (Some(receiver), None),
        MessageKind::Group { group_name, .. } => (None, Some(group_name)),
    };

    HistoryMessage {
        message: msg.message,
        from: msg.sender_username,
        from_user_id: msg.sender,
        to_user_id,
        group_name,
        timestamp: msg.timestamp,
        chat_type,
    }
}

fn validate_group_name(name: String) -> Result<String, HandlerError> {
    if name.trim().is_empty() {
        return Err(HandlerError::InvalidTarget("empty group name".into()));
    }
    Ok(name)
}

/// Check an `authenticate` payload against its JWT.
fn verify_identity(
    secret: &str,
    token: Option<&str>,
    user_id: Uuid,
    username: &str,
) -> Result<(), HandlerError> {
    let token = token.ok_or_else(|| HandlerError::InvalidToken("no token provided".into()))?;

    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| HandlerError::InvalidToken(e.to_string()))?
    .claims;

    if claims.sub != user_id || claims.username != username {
        return Err(HandlerError::InvalidToken(
            "token does not match the claimed identity".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token_for(secret: &str, user_id: Uuid, username: &str) -> String {
        let claims = Claims {
            sub: user_id,
            username: username.into(),
            exp: (Utc::now() + chrono::Duration::days(1)).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn identity_must_match_token() {
        let user_id = Uuid::new_v4();
        let token = token_for("s3cret", user_id, "alice");

        assert!(verify_identity("s3cret", Some(&token), user_id, "alice").is_ok());
        assert!(verify_identity("s3cret", Some(&token), user_id, "mallory").is_err());
        assert!(verify_identity("s3cret", Some(&token), Uuid::new_v4(), "alice").is_err());
        assert!(verify_identity("other", Some(&token), user_id, "alice").is_err());
        assert!(matches!(
            verify_identity("s3cret", None, user_id, "alice"),
            Err(HandlerError::InvalidToken(_))
        ));
    }

    #[test]
    fn history_entries_keep_their_shape() {
        let receiver = Uuid::new_v4();
        let msg = Message {
            id: Uuid::new_v4(),
            sender: Uuid::new_v4(),
            sender_username: "alice".into(),
            message: "hi".into(),
            timestamp: Utc::now(),
            kind: MessageKind::Private {
                receiver,
                receiver_username: "bob".into(),
                is_read: false,
                read_at: None,
            },
        };

        let entry = to_history(msg);
        assert_eq!(entry.from, "alice");
        assert_eq!(entry.to_user_id, Some(receiver));
        assert_eq!(entry.group_name, None);
        assert_eq!(entry.chat_type, ChatType::Private);
    }

    #[test]
    fn blank_group_names_are_rejected() {
        assert!(validate_group_name("   ".into()).is_err());
        assert_eq!(validate_group_name("lobby".into()).unwrap(), "lobby");
    }
}
