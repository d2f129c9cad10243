//! 觸發器與計時器共用的註冊表
//!
//! 寫入時複製整個列表，讀取端拿到不可變快照，
//! 因此派發途中的註冊或開關不會影響正在走訪的列表。

use std::sync::Arc;

use parking_lot::RwLock;

/// 可放入 [`Registry`] 的項目
pub trait Registered: Send + Sync {
    fn name(&self) -> &str;
    fn group(&self) -> &str;
    fn set_enabled(&self, enabled: bool);

    /// 排序鍵，小的在前；相同時保持註冊順序
    fn order(&self) -> i32 {
        0
    }
}

/// 寫入時複製的有序註冊表
pub struct Registry<T> {
    entries: RwLock<Arc<Vec<Arc<T>>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }
}

impl<T: Registered> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入在所有排序鍵不大於它的項目之後
    pub fn add(&self, entry: Arc<T>) -> Arc<T> {
        let mut guard = self.entries.write();
        let mut list = Vec::clone(&guard);
        let pos = list.partition_point(|e| e.order() <= entry.order());
        list.insert(pos, entry.clone());
        *guard = Arc::new(list);
        entry
    }

    /// 目前列表的快照
    pub fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.entries.read().clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries.read().iter().find(|e| e.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    /// 移除所有同名項目，回傳被移除的項目
    pub fn remove(&self, name: &str) -> Vec<Arc<T>> {
        let mut guard = self.entries.write();
        let (removed, kept): (Vec<_>, Vec<_>) =
            guard.iter().cloned().partition(|e| e.name() == name);
        if !removed.is_empty() {
            *guard = Arc::new(kept);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn set_where(&self, enabled: bool, pred: impl Fn(&T) -> bool) -> usize {
        let snapshot = self.snapshot();
        let mut count = 0;
        for entry in snapshot.iter().filter(|e| pred(e)) {
            entry.set_enabled(enabled);
            count += 1;
        }
        count
    }

    /// 啟用所有同名項目，回傳受影響數量
    pub fn enable(&self, name: &str) -> usize {
        self.set_where(true, |e| e.name() == name)
    }

    pub fn disable(&self, name: &str) -> usize {
        self.set_where(false, |e| e.name() == name)
    }

    pub fn enable_group(&self, group: &str) -> usize {
        self.set_where(true, |e| e.group() == group)
    }

    pub fn disable_group(&self, group: &str) -> usize {
        self.set_where(false, |e| e.group() == group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Item {
        name: &'static str,
        group: &'static str,
        order: i32,
        enabled: AtomicBool,
    }

    impl Registered for Item {
        fn name(&self) -> &str {
            self.name
        }
        fn group(&self) -> &str {
            self.group
        }
        fn set_enabled(&self, enabled: bool) {
            self.enabled.store(enabled, Ordering::SeqCst);
        }
        fn order(&self) -> i32 {
            self.order
        }
    }

    fn item(name: &'static str, group: &'static str, order: i32) -> Arc<Item> {
        Arc::new(Item {
            name,
            group,
            order,
            enabled: AtomicBool::new(true),
        })
    }

    #[test]
    fn test_stable_ordering() {
        let registry = Registry::new();
        registry.add(item("c", "all", 100));
        registry.add(item("a", "all", 10));
        registry.add(item("d", "all", 100));
        registry.add(item("b", "all", 10));
        assert_eq!(registry.names(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_adds() {
        let registry = Registry::new();
        registry.add(item("a", "all", 0));
        let snapshot = registry.snapshot();
        registry.add(item("b", "all", 0));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_enable_by_name_and_group() {
        let registry = Registry::new();
        let a1 = registry.add(item("a", "combat", 0));
        let a2 = registry.add(item("a", "misc", 0));
        let b = registry.add(item("b", "combat", 0));

        assert_eq!(registry.disable("a"), 2);
        assert!(!a1.enabled.load(Ordering::SeqCst));
        assert!(!a2.enabled.load(Ordering::SeqCst));

        assert_eq!(registry.disable_group("combat"), 2);
        assert!(!b.enabled.load(Ordering::SeqCst));
        assert_eq!(registry.enable_group("misc"), 1);
        assert!(a2.enabled.load(Ordering::SeqCst));
        assert_eq!(registry.enable("missing"), 0);
    }

    #[test]
    fn test_remove() {
        let registry = Registry::new();
        registry.add(item("a", "all", 0));
        registry.add(item("b", "all", 0));
        registry.add(item("a", "all", 0));
        assert_eq!(registry.remove("a").len(), 2);
        assert_eq!(registry.names(), vec!["b"]);
        assert!(registry.get("a").is_none());
    }
}
