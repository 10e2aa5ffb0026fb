use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{Result, RpcError};

/// 静态属性：应用名。
pub const ATTR_APP_NAME: &str = "appName";
/// 静态属性：名义权重。
pub const ATTR_WEIGHT: &str = "weight";
/// 静态属性：预热时长（毫秒）。
pub const ATTR_WARMUP_TIME: &str = "warmupTime";
/// 静态属性：预热期间的权重。
pub const ATTR_WARMUP_WEIGHT: &str = "warmupWeight";
/// 静态属性：进程启动时间（毫秒时间戳）。
pub const ATTR_START_TIME: &str = "startTime";

/// 未声明权重时使用的名义权重。
pub const DEFAULT_WEIGHT: u32 = 100;

/// 服务提供者的运行时状态。
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ProviderStatus {
    /// 正常可用。
    #[default]
    Available,
    /// 预热中，选址时应使用预热权重。
    WarmingUp,
    /// 被运维禁用。
    Disabled,
    /// 暂停接流。
    Paused,
}

/// 注册后会被原地修改的动态属性。
///
/// 只有地址簿写路径（以及写入地址簿之前的预热计算）会修改这些字段。
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DynamicAttributes {
    pub warmup_weight: Option<u32>,
    pub warm_up_end_time: Option<u64>,
    pub status: ProviderStatus,
}

/// 一个远端服务提供者。
///
/// # 契约说明（What）
/// - **身份**：`host + port + protocol`，`PartialEq`/`Hash` 只比较这三项；
/// - **静态属性**：注册时写入，之后只会被预热计算消费（移除），不会被改写；
/// - **动态属性**：见 [`DynamicAttributes`]。
#[derive(Clone, Debug)]
pub struct ProviderInfo {
    host: String,
    port: u16,
    protocol: String,
    static_attrs: BTreeMap<String, String>,
    dynamic: DynamicAttributes,
}

impl ProviderInfo {
    pub fn new(host: impl Into<String>, port: u16, protocol: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: protocol.into(),
            static_attrs: BTreeMap::new(),
            dynamic: DynamicAttributes::default(),
        }
    }

    /// 追加静态属性，供构造阶段链式调用。
    pub fn with_static_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.static_attrs.insert(key.into(), value.into());
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// `host:port` 形式的地址。
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn static_attr(&self, key: &str) -> Option<&str> {
        self.static_attrs.get(key).map(String::as_str)
    }

    pub fn static_attrs(&self) -> &BTreeMap<String, String> {
        &self.static_attrs
    }

    pub(crate) fn take_static_attr(&mut self, key: &str) -> Option<String> {
        self.static_attrs.remove(key)
    }

    pub fn dynamic(&self) -> &DynamicAttributes {
        &self.dynamic
    }

    pub(crate) fn dynamic_mut(&mut self) -> &mut DynamicAttributes {
        &mut self.dynamic
    }

    pub fn status(&self) -> ProviderStatus {
        self.dynamic.status
    }

    pub fn set_status(&mut self, status: ProviderStatus) {
        self.dynamic.status = status;
    }

    /// 名义权重；属性缺失或无法解析时取 [`DEFAULT_WEIGHT`]。
    pub fn weight(&self) -> u32 {
        self.static_attr(ATTR_WEIGHT)
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(DEFAULT_WEIGHT)
    }

    /// 是否仍处于预热窗口。
    pub fn is_warming_up(&self, now_millis: u64) -> bool {
        self.dynamic.status == ProviderStatus::WarmingUp
            && self
                .dynamic
                .warm_up_end_time
                .is_some_and(|end| now_millis < end)
    }

    /// 在 `now_millis` 时刻参与选址的权重。
    ///
    /// 预热窗口内返回预热权重，窗口结束（含边界）后回到名义权重。每次选址都要调用，
    /// 只做一次时间戳比较。
    pub fn effective_weight(&self, now_millis: u64) -> u32 {
        match self.dynamic.warmup_weight {
            Some(weight) if self.is_warming_up(now_millis) => weight,
            _ => self.weight(),
        }
    }

    /// 在 `now_millis` 时刻观测到的状态：预热已结束时视为可用。
    pub fn status_at(&self, now_millis: u64) -> ProviderStatus {
        match self.dynamic.status {
            ProviderStatus::WarmingUp if !self.is_warming_up(now_millis) => {
                ProviderStatus::Available
            }
            status => status,
        }
    }

    /// 序列化为 `protocol://host:port?k=v&...` 形式。
    pub fn to_url(&self) -> String {
        let mut url = format!("{}://{}:{}", self.protocol, self.host, self.port);
        for (index, (key, value)) in self.static_attrs.iter().enumerate() {
            url.push(if index == 0 { '?' } else { '&' });
            url.push_str(key);
            url.push('=');
            url.push_str(value);
        }
        url
    }
}

impl PartialEq for ProviderInfo {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port && self.protocol == other.protocol
    }
}

impl Eq for ProviderInfo {}

impl Hash for ProviderInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
        self.protocol.hash(state);
    }
}

impl fmt::Display for ProviderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// 解析 `protocol://host:port?k=v&k2=v2`。
///
/// 缺少协议时默认 `bolt`；查询串中的键值全部作为静态属性。
impl FromStr for ProviderInfo {
    type Err = RpcError;

    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (protocol, rest) = raw.split_once("://").unwrap_or(("bolt", raw));
        let (authority, query) = match rest.split_once('?') {
            Some((authority, query)) => (authority, Some(query)),
            None => (rest, None),
        };
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| RpcError::config(format!("provider url `{raw}` is missing a port")))?;
        if host.is_empty() {
            return Err(RpcError::config(format!(
                "provider url `{raw}` is missing a host"
            )));
        }
        let port = port
            .parse::<u16>()
            .map_err(|err| RpcError::config(format!("provider url `{raw}` has bad port: {err}")))?;

        let mut provider = ProviderInfo::new(host, port, protocol);
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if let Some((key, value)) = pair.split_once('=') {
                if !key.is_empty() {
                    provider.static_attrs.insert(key.to_owned(), value.to_owned());
                }
            }
        }
        Ok(provider)
    }
}
