//! Storage Key Layout
//!
//! Records live under `<key_prefix><cluster_id>/<node_id>`. Each node only
//! ever writes the key built from its own id, so writers never contend.

/// Key namespace for membership records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    key_prefix: String,
}

impl KeySpace {
    /// `key_prefix` is used verbatim; a trailing `/` is added when missing.
    pub fn new(key_prefix: impl Into<String>) -> Self {
        let mut key_prefix = key_prefix.into();
        if !key_prefix.is_empty() && !key_prefix.ends_with('/') {
            key_prefix.push('/');
        }
        Self { key_prefix }
    }

    /// Prefix covering every record of one cluster.
    pub fn cluster_prefix(&self, cluster_id: &str) -> String {
        format!("{}{}/", self.key_prefix, cluster_id)
    }

    /// Key of one node's record.
    pub fn record_key(&self, cluster_id: &str, node_id: &str) -> String {
        format!("{}{}/{}", self.key_prefix, cluster_id, node_id)
    }

    /// Node id encoded in `key`, if the key belongs to `cluster_id`.
    pub fn node_id_of<'a>(&self, cluster_id: &str, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.key_prefix.as_str())?
            .strip_prefix(cluster_id)?
            .strip_prefix('/')
            .filter(|id| !id.is_empty() && !id.contains('/'))
    }
}
