//! Namespaced string interner.
//!
//! `intern` is the only id-producing operation; because the kernel calls it
//! only from deterministic simulation code, the sequence of calls (and
//! therefore the resulting ids) is identical across peers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace(pub u8);

impl Namespace {
    pub const ENTITY_TYPE: Namespace = Namespace(0);
    pub const COMPONENT: Namespace = Namespace(1);
    pub const CLIENT: Namespace = Namespace(2);
    pub const COMMAND: Namespace = Namespace(3);
}

#[derive(Debug, Default, Clone)]
struct NamespaceTable {
    by_string: HashMap<String, u32>,
    by_id: Vec<String>,
    next_id: u32,
}

impl NamespaceTable {
    fn new() -> NamespaceTable {
        NamespaceTable {
            by_string: HashMap::new(),
            by_id: Vec::new(),
            next_id: 1,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Interner {
    namespaces: HashMap<Namespace, NamespaceTable>,
    namespace_order: Vec<Namespace>,
}

impl Interner {
    pub fn new() -> Interner {
        Interner::default()
    }

    fn table_mut(&mut self, ns: Namespace) -> &mut NamespaceTable {
        if !self.namespaces.contains_key(&ns) {
            self.namespace_order.push(ns);
            self.namespaces.insert(ns, NamespaceTable::new());
        }
        self.namespaces.get_mut(&ns).unwrap()
    }

    /// Returns the existing id for `value` in `ns`, or allocates the next
    /// monotone id.
    pub fn intern(&mut self, ns: Namespace, value: &str) -> u32 {
        let table = self.table_mut(ns);
        if let Some(&id) = table.by_string.get(value) {
            return id;
        }
        let id = table.next_id;
        table.next_id += 1;
        table.by_string.insert(value.to_owned(), id);
        table.by_id.push(value.to_owned());
        id
    }

    pub fn get_string(&self, ns: Namespace, id: u32) -> Option<&str> {
        let table = self.namespaces.get(&ns)?;
        if id == 0 {
            return None;
        }
        table.by_id.get((id - 1) as usize).map(|s| s.as_str())
    }

    pub fn get_id(&self, ns: Namespace, value: &str) -> Option<u32> {
        self.namespaces.get(&ns)?.by_string.get(value).copied()
    }

    /// Serializes every namespace's pairs in insertion order plus its
    /// `next_id`, in first-seen namespace order, so the wire bytes are a
    /// pure function of the call sequence.
    pub fn snapshot(&self) -> InternerSnapshot {
        let namespaces = self
            .namespace_order
            .iter()
            .map(|ns| {
                let table = &self.namespaces[ns];
                NamespaceSnapshot {
                    namespace: *ns,
                    pairs: table.by_id.clone(),
                    next_id: table.next_id,
                }
            })
            .collect();
        InternerSnapshot { namespaces }
    }

    pub fn restore(&mut self, snap: &InternerSnapshot) {
        self.namespaces.clear();
        self.namespace_order.clear();
        for ns_snap in &snap.namespaces {
            let mut table = NamespaceTable::new();
            table.next_id = ns_snap.next_id;
            for (i, s) in ns_snap.pairs.iter().enumerate() {
                table.by_string.insert(s.clone(), (i + 1) as u32);
                table.by_id.push(s.clone());
            }
            self.namespace_order.push(ns_snap.namespace);
            self.namespaces.insert(ns_snap.namespace, table);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceSnapshot {
    pub namespace: Namespace,
    pub pairs: Vec<String>,
    pub next_id: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InternerSnapshot {
    pub namespaces: Vec<NamespaceSnapshot>,
}
