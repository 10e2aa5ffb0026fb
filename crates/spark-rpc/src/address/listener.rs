use std::sync::Arc;

use crate::provider::ProviderGroup;
use crate::registry::SubscriberCallback;
use crate::warmup::WarmupWeightCalculator;

use super::AddressHolder;

/// 把注册中心推送落到地址簿上的订阅回调。
///
/// 每个进入地址簿的提供者先经过一次预热计算，随后：
/// - `handle_data` → [`AddressHolder::update_all_providers`]；
/// - `set_data` → [`AddressHolder::update_providers`]；
/// - `add_data` → [`AddressHolder::add_provider`]；
/// - `delete_data` → [`AddressHolder::remove_provider`]（移除按身份匹配，无需预热）。
pub struct AddressBookListener {
    service: String,
    holder: Arc<dyn AddressHolder>,
}

impl AddressBookListener {
    pub fn new(service: impl Into<String>, holder: Arc<dyn AddressHolder>) -> Self {
        Self {
            service: service.into(),
            holder,
        }
    }

    fn prepare(mut group: ProviderGroup) -> ProviderGroup {
        for provider in group.providers_mut() {
            WarmupWeightCalculator::calculate(provider);
        }
        group
    }
}

impl SubscriberCallback for AddressBookListener {
    fn handle_data(&self, data_id: &str, groups: Vec<ProviderGroup>) {
        tracing::debug!(service = %self.service, data_id, groups = groups.len(), "full push");
        let groups = groups.into_iter().map(Self::prepare).collect();
        self.holder.update_all_providers(groups);
    }

    fn add_data(&self, data_id: &str, group: ProviderGroup) {
        tracing::debug!(service = %self.service, data_id, group = %group.name(), "incremental add");
        self.holder.add_provider(Self::prepare(group));
    }

    fn delete_data(&self, data_id: &str, group: ProviderGroup) {
        tracing::debug!(service = %self.service, data_id, group = %group.name(), "incremental delete");
        self.holder.remove_provider(group);
    }

    fn set_data(&self, data_id: &str, group: ProviderGroup) {
        tracing::debug!(service = %self.service, data_id, group = %group.name(), "group replaced");
        self.holder.update_providers(Self::prepare(group));
    }
}
