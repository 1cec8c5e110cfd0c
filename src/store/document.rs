use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};

use super::StoreError;

/// The plugin document persisted as YAML.
///
/// User and group ids are kept as strings so comparisons against the
/// file's contents stay stable whatever the host sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub enable_white_list: bool,
    #[serde(deserialize_with = "id_list")]
    pub white_list_groups: Vec<String>,
    #[serde(deserialize_with = "id_list")]
    pub subscribed_users: Vec<String>,
    /// `YYYY-MM-DD` of the last completed sweep, empty before the first
    pub last_like_date: String,
    pub reply_templates: ReplyTemplates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyTemplates {
    pub success: Vec<String>,
    pub limit: Vec<String>,
    pub stranger: Vec<String>,
}

/// Reply template category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Success,
    Limit,
    Stranger,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            enable_white_list: false,
            white_list_groups: Vec::new(),
            subscribed_users: Vec::new(),
            last_like_date: String::new(),
            reply_templates: ReplyTemplates::default(),
        }
    }
}

impl Default for ReplyTemplates {
    fn default() -> Self {
        Self {
            success: vec![
                "已经给{username}点了{total_likes}个赞啦~".to_string(),
                "{username}，赞了你{total_likes}下，记得回赞哦！".to_string(),
            ],
            limit: vec![
                "今天已经给{username}赞过了，明天再来吧~".to_string(),
                "{username}今天的赞已经满啦！".to_string(),
            ],
            stranger: vec![
                "加个好友再来找我点赞吧，{username}~".to_string(),
                "点赞失败了，{username}是不是还不是我的好友？".to_string(),
            ],
        }
    }
}

impl ReplyTemplates {
    pub fn get(&self, kind: TemplateKind) -> &[String] {
        match kind {
            TemplateKind::Success => &self.success,
            TemplateKind::Limit => &self.limit,
            TemplateKind::Stranger => &self.stranger,
        }
    }
}

impl PluginConfig {
    pub fn from_yaml(text: &str) -> Result<Self, StoreError> {
        // An empty file deserializes as null; treat it as all defaults
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(StoreError::Parse)
    }

    pub fn to_yaml(&self) -> Result<String, StoreError> {
        serde_yaml::to_string(self).map_err(StoreError::Serialize)
    }

    pub fn is_subscribed(&self, user_id: &str) -> bool {
        self.subscribed_users.iter().any(|id| id == user_id)
    }

    /// Adds a subscriber. Returns false if already present.
    pub fn subscribe(&mut self, user_id: &str) -> bool {
        if self.is_subscribed(user_id) {
            return false;
        }
        self.subscribed_users.push(user_id.to_string());
        true
    }

    /// Removes a subscriber. Returns false if absent.
    pub fn unsubscribe(&mut self, user_id: &str) -> bool {
        let before = self.subscribed_users.len();
        self.subscribed_users.retain(|id| id != user_id);
        self.subscribed_users.len() != before
    }

    /// Whether commands are honored in this group
    pub fn allows_group(&self, group_id: Option<i64>) -> bool {
        match group_id {
            Some(gid) if self.enable_white_list => {
                let gid = gid.to_string();
                self.white_list_groups.iter().any(|g| g == &gid)
            }
            _ => true,
        }
    }

    /// Value at a dotted path such as `reply_templates.success`.
    pub fn get_path(&self, path: &str) -> Option<Value> {
        let root = serde_yaml::to_value(self).ok()?;
        let mut node = &root;
        for key in split_path(path)? {
            node = node.as_mapping()?.get(key)?;
        }
        Some(node.clone())
    }

    /// Replaces the value at a dotted path, creating intermediate maps.
    ///
    /// The result must still deserialize as a `PluginConfig`; otherwise
    /// the document is left untouched and the error is returned.
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<(), StoreError> {
        let keys = split_path(path).ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        let mut root = serde_yaml::to_value(&*self).map_err(StoreError::Serialize)?;

        let (last, parents) = keys
            .split_last()
            .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        let mut node = &mut root;
        for key in parents {
            let map = node
                .as_mapping_mut()
                .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
            node = map
                .entry(Value::String(key.to_string()))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
        }
        node.as_mapping_mut()
            .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?
            .insert(Value::String(last.to_string()), value);

        *self = serde_yaml::from_value(root).map_err(StoreError::Parse)?;
        Ok(())
    }
}

/// Ids may be written bare (`[123456]`) or quoted; both load as strings.
fn id_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    let ids = Vec::<Id>::deserialize(deserializer)?;
    Ok(ids
        .into_iter()
        .map(|id| match id {
            Id::Text(text) => text,
            Id::Number(n) => n.to_string(),
        })
        .collect())
}

fn split_path(path: &str) -> Option<Vec<&str>> {
    let keys: Vec<&str> = path.split('.').collect();
    if keys.iter().any(|k| k.trim().is_empty()) {
        return None;
    }
    Some(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = PluginConfig::default();
        assert!(!cfg.enable_white_list);
        assert!(cfg.subscribed_users.is_empty());
        assert_eq!(cfg.last_like_date, "");
        assert_eq!(cfg.reply_templates.success.len(), 2);
        assert!(!cfg.reply_templates.get(TemplateKind::Limit).is_empty());
    }

    #[test]
    fn test_yaml_round_trip() {
        for subscribers in [vec![], vec!["1"], vec!["1", "22", "333", "4444"]] {
            let cfg = PluginConfig {
                subscribed_users: subscribers.iter().map(|s| s.to_string()).collect(),
                last_like_date: "2026-10-19".to_string(),
                ..PluginConfig::default()
            };
            let back = PluginConfig::from_yaml(&cfg.to_yaml().unwrap()).unwrap();
            assert_eq!(back, cfg);
        }
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let cfg = PluginConfig::from_yaml("subscribed_users: ['42']\n").unwrap();
        assert_eq!(cfg.subscribed_users, vec!["42"]);
        assert_eq!(cfg.reply_templates, ReplyTemplates::default());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(PluginConfig::from_yaml("").unwrap(), PluginConfig::default());
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        assert!(PluginConfig::from_yaml("subscribed_users: {not: a list}").is_err());
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut cfg = PluginConfig::default();
        assert!(cfg.subscribe("100"));
        assert!(!cfg.subscribe("100"));
        assert_eq!(cfg.subscribed_users, vec!["100"]);
    }

    #[test]
    fn test_unsubscribe_absent_leaves_list() {
        let mut cfg = PluginConfig::default();
        cfg.subscribe("1");
        assert!(!cfg.unsubscribe("2"));
        assert_eq!(cfg.subscribed_users, vec!["1"]);
        assert!(cfg.unsubscribe("1"));
        assert!(cfg.subscribed_users.is_empty());
    }

    #[test]
    fn test_white_list() {
        let mut cfg = PluginConfig::default();
        assert!(cfg.allows_group(Some(5)));
        cfg.enable_white_list = true;
        cfg.white_list_groups = vec!["5".to_string()];
        assert!(cfg.allows_group(Some(5)));
        assert!(!cfg.allows_group(Some(6)));
        // Private chats are never gated
        assert!(cfg.allows_group(None));
    }

    #[test]
    fn test_get_path() {
        let cfg = PluginConfig::default();
        let success = cfg.get_path("reply_templates.success").unwrap();
        assert_eq!(success.as_sequence().unwrap().len(), 2);
        assert_eq!(cfg.get_path("enable_white_list"), Some(Value::Bool(false)));
        assert!(cfg.get_path("reply_templates.nope").is_none());
        assert!(cfg.get_path("").is_none());
    }

    #[test]
    fn test_set_path() {
        let mut cfg = PluginConfig::default();
        let value: Value = serde_yaml::from_str("['Hi {username}']").unwrap();
        cfg.set_path("reply_templates.limit", value).unwrap();
        assert_eq!(cfg.reply_templates.limit, vec!["Hi {username}"]);

        cfg.set_path("enable_white_list", Value::Bool(true)).unwrap();
        assert!(cfg.enable_white_list);
    }

    #[test]
    fn test_set_path_wrong_type_leaves_document() {
        let mut cfg = PluginConfig::default();
        let before = cfg.clone();
        let err = cfg
            .set_path("subscribed_users", Value::String("oops".into()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Parse(_)));
        assert_eq!(cfg, before);
    }

    #[test]
    fn test_set_path_through_scalar_rejected() {
        let mut cfg = PluginConfig::default();
        assert!(matches!(
            cfg.set_path("last_like_date.year", Value::Bool(true)),
            Err(StoreError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_bare_ids_load_as_strings() {
        let cfg = PluginConfig::from_yaml(
            "white_list_groups: [123456, '654321']\nsubscribed_users: [10001]\n",
        )
        .unwrap();
        assert_eq!(cfg.white_list_groups, vec!["123456", "654321"]);
        assert_eq!(cfg.subscribed_users, vec!["10001"]);
    }

    #[test]
    fn test_set_path_accepts_bare_ids() {
        let mut cfg = PluginConfig::default();
        let value: Value = serde_yaml::from_str("[123456]").unwrap();
        cfg.set_path("white_list_groups", value).unwrap();
        assert_eq!(cfg.white_list_groups, vec!["123456"]);

        let value: Value = serde_yaml::from_str("[10001, '10002']").unwrap();
        cfg.set_path("subscribed_users", value).unwrap();
        assert_eq!(cfg.subscribed_users, vec!["10001", "10002"]);
    }
}
