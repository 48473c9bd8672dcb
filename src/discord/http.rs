//! REST collaborators
//!
//! Shard count discovery plus chat sinks for the status message and the
//! lifecycle log, all over one shared [`Client`].

use crate::error::{BoxError, PoolError};
use crate::events::{Event, LogSink};
use crate::shard::ShardCountSource;
use crate::status::{StatusSink, STATUS_COLOR};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;
use twilight_http::Client;
use twilight_model::channel::message::Embed;
use twilight_model::id::marker::{ChannelMarker, MessageMarker, UserMarker};
use twilight_model::id::Id;

/// How far back the status message is searched for
const STATUS_LOOKUP_LIMIT: u16 = 50;

fn embed(title: Option<String>, description: String, color: u32) -> Embed {
    Embed {
        author: None,
        color: Some(color),
        description: Some(description),
        fields: Vec::new(),
        footer: None,
        image: None,
        kind: "rich".to_string(),
        provider: None,
        thumbnail: None,
        timestamp: None,
        title,
        url: None,
        video: None,
    }
}

fn channel_id(value: u64) -> Result<Id<ChannelMarker>, PoolError> {
    Id::new_checked(value)
        .ok_or_else(|| PoolError::Config("channel id must be non-zero".to_string()))
}

/// Recommended shard count from `GET /gateway/bot`
pub struct GatewayBotShardCount;

#[async_trait]
impl ShardCountSource for GatewayBotShardCount {
    async fn recommended_shard_count(&self, token: &str) -> Result<u32, BoxError> {
        let client = Client::new(token.to_string());
        let info = client.gateway().authed().await?.model().await?;

        debug!(shards = info.shards, "Gateway bot info received");
        Ok(info.shards)
    }
}

/// Keeps one embed in a channel up to date with the pool status
pub struct DiscordStatusSink {
    client: Arc<Client>,
    channel_id: Id<ChannelMarker>,
    bot_id: OnceCell<Id<UserMarker>>,
}

impl DiscordStatusSink {
    pub fn new(client: Arc<Client>, channel_id: u64) -> Result<Self, PoolError> {
        Ok(Self {
            client,
            channel_id: self::channel_id(channel_id)?,
            bot_id: OnceCell::new(),
        })
    }

    async fn bot_id(&self) -> Result<Id<UserMarker>, BoxError> {
        let id = self
            .bot_id
            .get_or_try_init(|| async {
                let user = self.client.current_user().await?.model().await?;
                Ok::<_, BoxError>(user.id)
            })
            .await?;
        Ok(*id)
    }
}

#[async_trait]
impl StatusSink for DiscordStatusSink {
    async fn find_existing(&self, title: &str) -> Result<Option<u64>, BoxError> {
        let bot_id = self.bot_id().await?;
        let messages = self
            .client
            .channel_messages(self.channel_id)
            .limit(STATUS_LOOKUP_LIMIT)
            .await?
            .models()
            .await?;

        let found = messages.into_iter().find(|message| {
            message.author.id == bot_id
                && message
                    .embeds
                    .first()
                    .and_then(|embed| embed.title.as_deref())
                    == Some(title)
        });

        Ok(found.map(|message| message.id.get()))
    }

    async fn publish(
        &self,
        existing: Option<u64>,
        title: &str,
        body: &str,
    ) -> Result<u64, BoxError> {
        let embeds = [embed(Some(title.to_string()), body.to_string(), STATUS_COLOR)];

        let message_id = existing.and_then(Id::<MessageMarker>::new_checked);
        let message = match message_id {
            Some(message_id) => {
                self.client
                    .update_message(self.channel_id, message_id)
                    .embeds(Some(&embeds[..]))
                    .await?
                    .model()
                    .await?
            }
            None => {
                self.client
                    .create_message(self.channel_id)
                    .embeds(&embeds)
                    .await?
                    .model()
                    .await?
            }
        };

        Ok(message.id.get())
    }
}

/// Posts each lifecycle event to a channel as a coloured embed
pub struct DiscordLogSink {
    client: Arc<Client>,
    channel_id: Id<ChannelMarker>,
}

impl DiscordLogSink {
    pub fn new(client: Arc<Client>, channel_id: u64) -> Result<Self, PoolError> {
        Ok(Self {
            client,
            channel_id: self::channel_id(channel_id)?,
        })
    }
}

#[async_trait]
impl LogSink for DiscordLogSink {
    async fn publish(&self, event: &Event, rendered: &str) -> Result<(), BoxError> {
        let embeds = [embed(None, rendered.to_string(), event.kind.color())];
        self.client
            .create_message(self.channel_id)
            .embeds(&embeds)
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "discord_log"
    }
}
