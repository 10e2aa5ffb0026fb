use super::ProviderInfo;

/// 默认分组名。
pub const DEFAULT_GROUP: &str = "_DEFAULT";
/// 直连分组名：显式配置（非注册中心下发）的地址归入该伪分组。
pub const DIRECT_GROUP: &str = "_DIRECT";

/// 同一逻辑服务下的一组服务提供者。
///
/// # 契约说明（What）
/// - 成员有序，保持写入顺序；
/// - [`ProviderGroup::add_all`] 直接追加，不做去重，去重由调用方负责；
/// - 读者只拿到副本，所有修改都发生在地址簿的写锁内。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProviderGroup {
    name: String,
    providers: Vec<ProviderInfo>,
}

impl ProviderGroup {
    /// 创建空分组。
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            providers: Vec::new(),
        }
    }

    pub fn with_providers(name: impl Into<String>, providers: Vec<ProviderInfo>) -> Self {
        Self {
            name: name.into(),
            providers,
        }
    }

    /// 直连分组的空实例。
    pub fn direct() -> Self {
        Self::new(DIRECT_GROUP)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_direct(&self) -> bool {
        self.name == DIRECT_GROUP
    }

    pub fn providers(&self) -> &[ProviderInfo] {
        &self.providers
    }

    pub fn providers_mut(&mut self) -> &mut [ProviderInfo] {
        &mut self.providers
    }

    pub fn into_providers(self) -> Vec<ProviderInfo> {
        self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// 追加一批提供者，不去重。
    pub fn add_all(&mut self, providers: impl IntoIterator<Item = ProviderInfo>) {
        self.providers.extend(providers);
    }

    /// 按身份（host + port + protocol）移除提供者。
    pub fn remove_all(&mut self, providers: &[ProviderInfo]) {
        self.providers.retain(|existing| !providers.contains(existing));
    }

    /// 整体替换成员列表。
    pub fn set_providers(&mut self, providers: Vec<ProviderInfo>) {
        self.providers = providers;
    }
}
