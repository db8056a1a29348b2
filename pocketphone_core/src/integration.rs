//! Generate phone content for a conversation message.
//!
//! Builds a prompt from a template, asks the generation service, parses the
//! reply into records and hands them to the attacher. Settings are kept in
//! the state store and every save is broadcast.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::attacher::ContentAttacher;
use crate::chat::ChatMessage;
use crate::events::{Broadcaster, SettingsUpdated};
use crate::generation::{GenerationClient, GenerationError, Message};
use crate::parser::RecordParser;
use crate::records::{Record, RecordType};
use crate::store::{load_json, save_json, StateStore};

pub const SETTINGS_KEY: &str = "integration_settings";
pub const PHONE_GENERAL_TEMPLATE: &str = "phone_general";
pub const PRIVATE_MESSAGE_TEMPLATE: &str = "private_message";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationSettings {
    pub enabled: bool,
    pub auto_detect: bool,
    pub auto_generate: bool,
    pub prompt_template: String,
    pub target_formats: Vec<RecordType>,
    pub trigger_keywords: Vec<String>,
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_detect: true,
            auto_generate: false,
            prompt_template: PHONE_GENERAL_TEMPLATE.to_string(),
            target_formats: RecordType::ALL.to_vec(),
            trigger_keywords: ["手机", "消息", "朋友圈", "群聊", "淘宝", "直播", "查看", "刷新"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub name: String,
    pub content: String,
}

pub fn builtin_templates() -> BTreeMap<String, PromptTemplate> {
    let mut templates = BTreeMap::new();
    templates.insert(
        PHONE_GENERAL_TEMPLATE.to_string(),
        PromptTemplate {
            name: "手机系统通用规则".to_string(),
            content: "# 线上规则\n\
                **角色会主动给用户发送信息，请根据剧情需要生成消息格式。**\n\
                **所有线上输出必须按照格式：**\n\n\
                私聊格式：[对方消息|名字|好友id|消息类型|内容]\n\
                群聊格式：[群聊消息|群聊id|姓名|消息类型|内容]\n\
                朋友圈格式：[朋友圈|角色名字|角色id|楼层id|内容]\n\
                朋友圈回复格式：[朋友圈回复|角色名字|角色id|楼层id|内容]\n\
                商品格式：[商品|商品名称|分类|描述|价格]\n\
                任务格式：[任务|编号|名称|介绍|发布人|奖励]\n\
                直播格式：[直播|类型|内容]\n\
                背包格式：[背包|商品名|类型|描述|数量]\n\
                加好友格式：[好友id|好友名字|数字ID]\n\n\
                **消息类型包括：文字、语音、红包、表情包**\n\
                **禁止生成用户消息，禁止替代用户发言**"
                .to_string(),
        },
    );
    templates.insert(
        PRIVATE_MESSAGE_TEMPLATE.to_string(),
        PromptTemplate {
            name: "私聊消息".to_string(),
            content: "# 私聊消息格式\n\
                [对方消息|对方名字|对方好友id|消息类型|消息内容]\n\
                消息类型：文字、语音、红包、表情包\n\
                示例：[对方消息|秦倦|500002|文字|小朋友，这么晚还不睡，在想什么呢]"
                .to_string(),
        },
    );
    templates
}

pub struct ContentIntegration {
    settings: Mutex<IntegrationSettings>,
    templates: BTreeMap<String, PromptTemplate>,
    store: Arc<dyn StateStore>,
    generator: Arc<dyn GenerationClient>,
    parser: Arc<RecordParser>,
    attacher: Arc<ContentAttacher>,
    updates: Broadcaster<SettingsUpdated>,
}

impl ContentIntegration {
    pub fn new(
        store: Arc<dyn StateStore>,
        generator: Arc<dyn GenerationClient>,
        parser: Arc<RecordParser>,
        attacher: Arc<ContentAttacher>,
    ) -> Self {
        let settings = load_json::<IntegrationSettings>(store.as_ref(), SETTINGS_KEY)
            .unwrap_or_default();
        tracing::debug!("Integration settings loaded (enabled: {})", settings.enabled);

        Self {
            settings: Mutex::new(settings),
            templates: builtin_templates(),
            store,
            generator,
            parser,
            attacher,
            updates: Broadcaster::new(),
        }
    }

    pub fn subscribe(&self) -> flume::Receiver<SettingsUpdated> {
        self.updates.subscribe()
    }

    fn lock_settings(&self) -> MutexGuard<'_, IntegrationSettings> {
        match self.settings.lock() {
            Ok(guard) => guard,
            Err(e) => e.into_inner(),
        }
    }

    pub fn settings(&self) -> IntegrationSettings {
        self.lock_settings().clone()
    }

    /// Replace the settings, persist them and broadcast the new snapshot.
    /// Returns false if persisting failed; the in-memory settings still apply.
    pub fn save_settings(&self, settings: IntegrationSettings) -> bool {
        *self.lock_settings() = settings.clone();

        let saved = match save_json(self.store.as_ref(), SETTINGS_KEY, &settings) {
            Ok(()) => {
                tracing::info!("Integration settings saved");
                true
            }
            Err(e) => {
                tracing::error!("Failed to save integration settings: {}", e);
                false
            }
        };

        self.updates.publish(&SettingsUpdated { settings });
        saved
    }

    pub fn template(&self, key: &str) -> Option<&PromptTemplate> {
        self.templates.get(key)
    }

    /// Whether `text` mentions something the phone should react to.
    pub fn should_trigger(&self, text: &str) -> bool {
        let settings = self.lock_settings();
        settings.enabled
            && settings.auto_detect
            && settings
                .trigger_keywords
                .iter()
                .any(|keyword| !keyword.is_empty() && text.contains(keyword.as_str()))
    }

    /// Poll the generation service until it reports itself configured.
    pub async fn wait_until_configured(&self, attempts: u32, interval: Duration) -> bool {
        for attempt in 0..attempts.max(1) {
            if self.generator.is_configured() {
                return true;
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        tracing::warn!("Generation API still not configured after {} attempt(s)", attempts);
        false
    }

    /// Generate content for `message`, attach whatever records come back
    /// and return them.
    pub async fn generate_for_message(
        &self,
        message: &mut ChatMessage,
        context: &str,
    ) -> Result<Vec<Record>, GenerationError> {
        if !self.generator.is_configured() {
            return Err(GenerationError::NotConfigured);
        }

        let (prompt, targets) = {
            let settings = self.lock_settings();
            let template = self
                .templates
                .get(&settings.prompt_template)
                .or_else(|| self.templates.get(PHONE_GENERAL_TEMPLATE))
                .map(|t| t.content.clone())
                .unwrap_or_default();
            (template, settings.target_formats.clone())
        };

        let reply = self
            .generator
            .generate(vec![Message::system(prompt), Message::user(context)])
            .await?;

        let records = self.parser.parse_filtered(&reply, &targets);
        if records.is_empty() {
            tracing::info!("Generation returned no usable records for message #{}", message.index);
            return Ok(records);
        }

        self.attacher.attach(message, &records).await;
        Ok(records)
    }
}
