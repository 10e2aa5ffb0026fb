//! # 地址簿
//!
//! 每个服务引用持有一个 [`AddressHolder`]：多个具名分组加一个直连分组，在调用时合并为一个视图。
//! 查询走读锁并返回副本；所有修改走同一把写锁。

mod listener;

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::provider::{DIRECT_GROUP, ProviderGroup, ProviderInfo};

pub use listener::AddressBookListener;

/// 地址簿契约。
///
/// # 契约说明（What）
/// - 查询方法互不阻塞，返回值均为副本，调用方可在不持锁的情况下遍历；
/// - 修改方法由一把写锁串行化；
/// - 实现不得在持锁期间调用另一个加锁方法，也不得在临界区内做任何 I/O。
pub trait AddressHolder: Send + Sync + 'static {
    /// 指定分组的提供者副本。
    fn get_provider_infos(&self, group: &str) -> Vec<ProviderInfo>;

    /// 指定分组；不存在时返回同名空分组，且不写入地址簿。
    fn get_provider_group(&self, group: &str) -> ProviderGroup;

    /// 全部具名分组的快照，末尾追加直连分组。
    fn get_provider_groups(&self) -> Vec<ProviderGroup>;

    /// 所有分组（含直连分组）的提供者总数，仅用于诊断。
    fn get_all_provider_size(&self) -> usize;

    /// 追加提供者。
    fn add_provider(&self, group: ProviderGroup);

    /// 按身份移除提供者。
    fn remove_provider(&self, group: ProviderGroup);

    /// 替换或插入单个分组。
    fn update_providers(&self, group: ProviderGroup);

    /// 以注册中心的全量快照对账。
    fn update_all_providers(&self, groups: Vec<ProviderGroup>);
}

#[derive(Debug)]
struct Groups {
    named: BTreeMap<String, ProviderGroup>,
    direct: ProviderGroup,
}

/// 多分组地址簿的默认实现。
///
/// # 行为概览（How）
/// - 具名分组存于 `BTreeMap`，直连分组单独持有，二者共用一把 `parking_lot::RwLock`；
/// - `update_all_providers` 先把已知具名分组全部重置为同名空分组，再写入快照中的分组，
///   已从注册中心消失的分组因此可观测为空，而不是残留旧地址；
/// - `get_all_provider_size` 在读锁内取分组名列表，锁外逐组求和，允许与并发写交错。
#[derive(Debug)]
pub struct MultiGroupAddressHolder {
    inner: RwLock<Groups>,
}

impl Default for MultiGroupAddressHolder {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiGroupAddressHolder {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Groups {
                named: BTreeMap::new(),
                direct: ProviderGroup::direct(),
            }),
        }
    }

    fn group_names(&self) -> Vec<String> {
        let guard = self.inner.read();
        guard
            .named
            .keys()
            .cloned()
            .chain(std::iter::once(DIRECT_GROUP.to_owned()))
            .collect()
    }
}

impl AddressHolder for MultiGroupAddressHolder {
    fn get_provider_infos(&self, group: &str) -> Vec<ProviderInfo> {
        let guard = self.inner.read();
        if group == DIRECT_GROUP {
            return guard.direct.providers().to_vec();
        }
        guard
            .named
            .get(group)
            .map(|found| found.providers().to_vec())
            .unwrap_or_default()
    }

    fn get_provider_group(&self, group: &str) -> ProviderGroup {
        let guard = self.inner.read();
        if group == DIRECT_GROUP {
            return guard.direct.clone();
        }
        guard
            .named
            .get(group)
            .cloned()
            .unwrap_or_else(|| ProviderGroup::new(group))
    }

    fn get_provider_groups(&self) -> Vec<ProviderGroup> {
        let guard = self.inner.read();
        let mut groups: Vec<ProviderGroup> = guard.named.values().cloned().collect();
        groups.push(guard.direct.clone());
        groups
    }

    fn get_all_provider_size(&self) -> usize {
        self.group_names()
            .iter()
            .map(|name| self.get_provider_infos(name).len())
            .sum()
    }

    fn add_provider(&self, group: ProviderGroup) {
        if group.is_empty() {
            return;
        }
        let mut guard = self.inner.write();
        let name = group.name().to_owned();
        if let Some(existing) = guard.named.get_mut(&name) {
            existing.add_all(group.into_providers());
        } else if group.is_direct() {
            guard.direct.set_providers(group.into_providers());
        } else {
            guard.named.insert(name.clone(), group);
        }
        tracing::debug!(group = %name, "providers added");
    }

    fn remove_provider(&self, group: ProviderGroup) {
        if group.is_empty() {
            return;
        }
        let mut guard = self.inner.write();
        if group.is_direct() {
            guard.direct.remove_all(group.providers());
        } else if let Some(existing) = guard.named.get_mut(group.name()) {
            existing.remove_all(group.providers());
        }
        tracing::debug!(group = %group.name(), removed = group.len(), "providers removed");
    }

    fn update_providers(&self, group: ProviderGroup) {
        let mut guard = self.inner.write();
        if group.is_direct() {
            guard.direct = group;
        } else {
            guard.named.insert(group.name().to_owned(), group);
        }
    }

    fn update_all_providers(&self, groups: Vec<ProviderGroup>) {
        let mut guard = self.inner.write();
        for (name, existing) in guard.named.iter_mut() {
            *existing = ProviderGroup::new(name.clone());
        }
        for group in groups {
            if group.is_direct() {
                guard.direct = group;
            } else {
                guard.named.insert(group.name().to_owned(), group);
            }
        }
        tracing::debug!(groups = guard.named.len(), "address book reconciled");
    }
}
